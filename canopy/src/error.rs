//! Error-handling module for the crate

use std::path::PathBuf;

use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::graph::error::{QueryError, QueryErrorKind};
pub use crate::registry::RegistryError;

/// Error-Collection for all the possible Errors occurring in this crate
#[allow(variant_size_differences)]
#[derive(Error, Debug)]
pub enum Error {
    /// A query against the graph database failed
    #[error(transparent)]
    Query(#[from] QueryError),
    /// IO Error
    #[error(transparent)]
    IO(#[from] std::io::Error),
    /// Error during a Write operation
    #[error("Failed to write \"{filename}\": {error}")]
    IOWriting {
        /// Underlying IO error
        error: std::io::Error,
        /// Name of the file that could not be written
        filename: PathBuf,
    },
    /// CSV serialization/deserialization error
    #[error(transparent)]
    Csv(#[from] csv::Error),
    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Invalid or incomplete configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Error from the URI registry
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Error while walking a directory tree
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
    /// A directive file could not be interpreted
    #[error("Invalid directive in \"{filename}\" at record {record}: {message}")]
    Directive {
        /// File holding the directives
        filename: PathBuf,
        /// Record number (1-based, header excluded)
        record: u64,
        /// What is wrong with the record
        message: String,
    },
    /// A required column is absent from a table
    #[error("missing column \"{column}\" in \"{filename}\"")]
    MissingColumn {
        /// Name of the column
        column: String,
        /// File that lacks the column
        filename: PathBuf,
    },
    /// A row of a result table could not be interpreted
    #[error("Malformed row in \"{filename}\": {message}")]
    MalformedRow {
        /// Table holding the row
        filename: PathBuf,
        /// What is wrong with the row
        message: String,
    },
    /// The assertion phase of branch painting produced no table
    #[error("Could not compute start-point descendants for resource {resource}")]
    AssertPhaseFailed {
        /// Publishing id of the resource
        resource: u64,
    },
    /// Copying files to the staging area failed
    #[error("Staging failed: {0}")]
    Staging(String),
}

impl Error {
    /// Wrap an IO error that occurred while writing `filename`.
    pub fn writing(error: std::io::Error, filename: impl Into<PathBuf>) -> Self {
        Self::IOWriting {
            error,
            filename: filename.into(),
        }
    }
}
