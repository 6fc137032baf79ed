//! This module defines all the errors that can occur while executing canopy-cli.

use std::path::PathBuf;

use thiserror::Error;

/// Error that occur during execution of Canopy's CLI app
#[derive(Error, Debug)]
pub enum CliError {
    /// The command works on a resource, but none was given
    #[error("no resource was given (use --resource or CANOPY_RESOURCE)")]
    NoResource,
    /// The command talks to servers, but no assembly was given
    #[error("no assembly was given (use --assembly or CANOPY_ASSEMBLY)")]
    NoAssembly,
    /// A chunked query did not produce its table
    #[error("query failed; no table written to {}", .output.display())]
    QueryFailed {
        /// The table that was to be written
        output: PathBuf,
    },
    /// Error while connecting to a server
    #[error(transparent)]
    QueryError(#[from] canopy::error::QueryError),
    /// Error while reading the configuration
    #[error(transparent)]
    ConfigError(#[from] canopy::error::ConfigError),
    /// Error originating from canopy
    #[error(transparent)]
    CanopyError(#[from] canopy::error::Error),
}
