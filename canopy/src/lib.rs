//! Resumable loading of biodiversity data into a graph database,
//! and propagation of trait assertions down the taxonomic hierarchy.

#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts
)]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    variant_size_differences
)]

pub mod config;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod painter;
pub mod paginator;
pub mod registry;
pub mod staging;

pub use graph::{QueryClient, ResultSet};
pub use painter::BranchPainter;
pub use paginator::Paginator;
