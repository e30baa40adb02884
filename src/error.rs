use std::path::PathBuf;

use thiserror::Error;

use sop_core::{ConfigError, EngineError, ReplayError};

/// Failure to read, parse or persist a configuration file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigFileError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("refusing to overwrite existing config at {}", path.display())]
    Exists { path: PathBuf },
}

/// Crate-level convenience error.
///
/// A thin wrapper over the model's capability errors plus the I/O the CLI
/// does around them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Model(#[from] sop_core::Error),

    #[error(transparent)]
    ConfigFile(#[from] ConfigFileError),

    #[error("trace file {}: {source}", path.display())]
    Trace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Model(err.into())
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        Error::Model(err.into())
    }
}

impl From<ReplayError> for Error {
    fn from(err: ReplayError) -> Self {
        Error::Model(err.into())
    }
}
