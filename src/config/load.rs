use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigFileError;

use super::merge::{apply_env_overrides, merge_layers};
use super::{Config, ConfigLayer};

pub fn config_path() -> PathBuf {
    crate::paths::config_dir().join("config.toml")
}

pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join("sop.toml")
}

/// Read one layer; a missing file is not an error.
pub fn load_layer(path: &Path) -> Result<Option<ConfigLayer>, ConfigFileError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

pub fn load_user_config() -> Result<Option<ConfigLayer>, ConfigFileError> {
    load_layer(&config_path())
}

/// Effective configuration plus warnings about ignored env overrides.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub config: Config,
    pub warnings: Vec<String>,
}

/// Effective configuration. `explicit` replaces the project file discovered
/// in the working directory; unlike the discovered file it must exist.
pub fn load(explicit: Option<&Path>) -> Result<Loaded, ConfigFileError> {
    let user = load_user_config()?;
    let project = match explicit {
        Some(path) => Some(load_layer(path)?.ok_or_else(|| ConfigFileError::Read {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        })?),
        None => match std::env::current_dir() {
            Ok(cwd) => load_layer(&project_config_path(&cwd))?,
            Err(_) => None,
        },
    };
    let mut config = merge_layers(user.into_iter().chain(project));
    let warnings = apply_env_overrides(&mut config);
    Ok(Loaded { config, warnings })
}

/// Write `cfg` to `path` atomically. Existing files are only replaced when
/// `overwrite` is set.
pub fn write_config(path: &Path, cfg: &Config, overwrite: bool) -> Result<(), ConfigFileError> {
    if path.exists() && !overwrite {
        return Err(ConfigFileError::Exists {
            path: path.to_path_buf(),
        });
    }
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| ConfigFileError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let contents = toml::to_string_pretty(cfg)?;
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigFileError> {
    let write_error = |source| ConfigFileError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(write_error)?;
    fs::write(temp.path(), data).map_err(write_error)?;
    temp.persist(path).map_err(|err| write_error(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use sop_core::{NamedFacts, Policy};

    use crate::config::{LogFormat, LogRotation};

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.enforce = vec![Policy::XmlHttpReqSop];
        cfg.bounds.ports = vec!["8080".to_string()];
        cfg.search.steps = 4;
        cfg.search.max_states = Some(50_000);
        cfg.facts = NamedFacts {
            cookie_scopes: Some(BTreeMap::from([(
                "Cookie0".to_string(),
                vec!["a.com".to_string()],
            )])),
            ..NamedFacts::default()
        };
        cfg.logging.stdout = false;
        cfg.logging.stdout_format = LogFormat::Compact;
        cfg.logging.file.enabled = true;
        cfg.logging.file.dir = Some(PathBuf::from("/tmp/sop-test-logs"));
        cfg.logging.file.rotation = LogRotation::Hourly;

        write_config(&path, &cfg, false).expect("write config");
        let layer = load_layer(&path).expect("load").expect("present");
        let loaded = merge_layers([layer]);
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn write_refuses_to_clobber() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        write_config(&path, &Config::default(), false).expect("first write");
        let err = write_config(&path, &Config::default(), false).expect_err("second write");
        assert!(matches!(err, ConfigFileError::Exists { .. }));
        write_config(&path, &Config::default(), true).expect("forced write");
    }

    #[test]
    fn missing_layer_is_none_and_bad_layer_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = project_config_path(dir.path());
        assert!(load_layer(&path).expect("missing").is_none());

        fs::write(&path, "[search]\nsteps = \"three\"\n").expect("write");
        let err = load_layer(&path).expect_err("bad type");
        assert!(matches!(err, ConfigFileError::Parse { .. }));
    }
}
