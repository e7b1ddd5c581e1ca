//! Corten VM launcher library
//!
//! Provides the [`Runtime`] and argument parsing behind the `corten-vm`
//! binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod error;
pub mod runtime;

pub use cli::Cli;
pub use error::{CliError, CliResult};
pub use runtime::{config_from_cli, load_config, Runtime};
