#![forbid(unsafe_code)]

//! `sop` command-line front end: layered configuration, telemetry and
//! rendering around the `sop-core` model checker.

pub mod cli;
pub mod config;
pub mod error;
mod paths;
pub mod telemetry;

pub use error::{ConfigFileError, Error};
pub type Result<T> = std::result::Result<T, Error>;
