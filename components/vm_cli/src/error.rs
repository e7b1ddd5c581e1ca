//! Error types for the CLI

use std::path::PathBuf;

use core_types::VmError;
use thiserror::Error;

/// CLI-specific errors
#[derive(Debug, Error)]
pub enum CliError {
    /// The program ended with an uncaught guest exception
    #[error("Exception in thread \"{thread}\" {report}")]
    Uncaught {
        /// Name of the thread the exception escaped from
        thread: String,
        /// Class, message and backtrace of the exception
        report: String,
    },

    /// The VM failed in a way the program cannot observe
    #[error("fatal VM error: {0}")]
    Vm(#[from] VmError),

    /// A configuration file could not be read
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File being read
        path: PathBuf,
        /// Underlying failure
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON for `VmConfig`
    #[error("invalid configuration {}: {source}", path.display())]
    Config {
        /// File being parsed
        path: PathBuf,
        /// Underlying failure
        source: serde_json::Error,
    },
}

impl CliError {
    /// Process exit status reported for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Uncaught { .. } => 1,
            CliError::Vm(_) => 70,
            CliError::Io { .. } | CliError::Config { .. } => 2,
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
