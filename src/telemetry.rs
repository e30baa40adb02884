use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{FileLoggingConfig, LogFormat, LogRotation, LoggingConfig};
use crate::paths;

const LOG_FILE_PREFIX: &str = "sop.log";
const LOG_ENV_VAR: &str = "SOP_LOG";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub verbosity: u8,
    pub logging: LoggingConfig,
}

impl TelemetryConfig {
    pub fn new(verbosity: u8, logging: LoggingConfig) -> Self {
        Self { verbosity, logging }
    }
}

/// Keeps the non-blocking file writers flushing until dropped.
pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(config: TelemetryConfig) -> TelemetryGuard {
    let filter = build_filter(config.verbosity, config.logging.filter.as_deref());

    let mut guards = Vec::new();
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.logging.stdout {
        layers.push(build_stdout_layer(config.logging.stdout_format));
    }

    let mut pruned = None;
    let mut setup_error = None;
    if config.logging.file.enabled {
        let dir = resolve_log_dir(&config.logging.file);
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                if let Some(max_files) = config.logging.file.retention_max_files {
                    match prune_logs(&dir, LOG_FILE_PREFIX, max_files) {
                        Ok(report) => pruned = Some(report),
                        Err(err) => setup_error = Some(format!("log retention failed: {err}")),
                    }
                }
                let (layer, guard) = build_file_layer(&config.logging.file, &dir);
                layers.push(layer);
                guards.push(guard);
            }
            Err(err) => {
                setup_error = Some(format!("log dir init failed for {}: {err}", dir.display()));
            }
        }
    }

    layers.push(Box::new(filter));

    // A second init (tests driving `main` twice) keeps the first subscriber.
    let _ = Registry::default().with(layers).try_init();

    if let Some(report) = pruned
        && report.removed + report.failed > 0
    {
        tracing::info!(
            pruned = report.removed,
            failed = report.failed,
            candidates = report.candidates,
            "log retention applied"
        );
    }
    if let Some(error) = setup_error {
        tracing::warn!("{error}");
    }

    TelemetryGuard { _guards: guards }
}

/// `SOP_LOG` wins over the configured directives, which win over `-v`.
fn build_filter(verbosity: u8, directives: Option<&str>) -> EnvFilter {
    let builder = EnvFilter::builder().with_default_directive(level_from_verbosity(verbosity).into());
    if std::env::var_os(LOG_ENV_VAR).is_some() {
        return builder.with_env_var(LOG_ENV_VAR).from_env_lossy();
    }
    match directives {
        Some(directives) => builder.parse_lossy(directives),
        None => builder.parse_lossy(""),
    }
}

fn build_stdout_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Tree => Box::new(
            tracing_tree::HierarchicalLayer::new(2)
                .with_writer(std::io::stderr)
                .with_targets(true),
        ),
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(true),
        ),
        LogFormat::Compact => Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(true),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(true)
                .with_current_span(true)
                .with_span_list(true),
        ),
    }
}

fn build_file_layer(
    config: &FileLoggingConfig,
    dir: &Path,
) -> (BoxedLayer, tracing_appender::non_blocking::WorkerGuard) {
    let rotation = match config.rotation {
        LogRotation::Daily => tracing_appender::rolling::Rotation::DAILY,
        LogRotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
        LogRotation::Never => tracing_appender::rolling::Rotation::NEVER,
    };
    let appender =
        tracing_appender::rolling::RollingFileAppender::new(rotation, dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer: BoxedLayer = match config.format {
        LogFormat::Tree => Box::new(
            tracing_tree::HierarchicalLayer::new(2)
                .with_ansi(false)
                .with_writer(writer),
        ),
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        ),
        LogFormat::Compact => Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_thread_names(true)
                .with_current_span(true)
                .with_span_list(true),
        ),
    };
    (layer, guard)
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::WARN,
        1 => tracing::metadata::LevelFilter::INFO,
        _ => tracing::metadata::LevelFilter::DEBUG,
    }
}

fn resolve_log_dir(config: &FileLoggingConfig) -> PathBuf {
    config.dir.clone().unwrap_or_else(paths::log_dir)
}

#[derive(Clone, Debug)]
struct LogEntry {
    path: PathBuf,
    modified: SystemTime,
}

#[derive(Clone, Debug, Default)]
struct PruneReport {
    candidates: usize,
    removed: usize,
    failed: usize,
}

fn prune_logs(dir: &Path, prefix: &str, max_files: usize) -> std::io::Result<PruneReport> {
    let mut entries = collect_log_entries(dir, prefix)?;
    let candidates = entries.len();
    let mut report = PruneReport {
        candidates,
        ..PruneReport::default()
    };
    for path in oldest_beyond(&mut entries, max_files) {
        match fs::remove_file(&path) {
            Ok(()) => report.removed += 1,
            Err(_) => report.failed += 1,
        }
    }
    Ok(report)
}

fn collect_log_entries(dir: &Path, prefix: &str) -> std::io::Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
        entries.push(LogEntry { path, modified });
    }
    Ok(entries)
}

/// Removes all but the `max_files` newest entries and returns their paths.
fn oldest_beyond(entries: &mut Vec<LogEntry>, max_files: usize) -> Vec<PathBuf> {
    entries.sort_by_key(|entry| entry.modified);
    let excess = entries.len().saturating_sub(max_files);
    entries.drain(..excess).map(|entry| entry.path).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[test]
    fn retention_keeps_newest_files() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10_000);
        let mut entries = ["old", "mid", "new", "newest"]
            .into_iter()
            .zip([9_000, 500, 40, 5])
            .map(|(name, age)| LogEntry {
                path: PathBuf::from(format!("sop.log.{name}")),
                modified: now - Duration::from_secs(age),
            })
            .collect::<Vec<_>>();

        let removed = oldest_beyond(&mut entries, 2);

        assert_eq!(
            removed,
            vec![PathBuf::from("sop.log.old"), PathBuf::from("sop.log.mid")]
        );
        assert_eq!(entries.len(), 2);
        assert!(oldest_beyond(&mut entries, 5).is_empty());
    }

    #[test]
    fn prune_ignores_foreign_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["sop.log.2026-01-01", "sop.log.2026-01-02", "notes.txt"] {
            fs::write(dir.path().join(name), b"x").expect("write");
        }

        let report = prune_logs(dir.path(), LOG_FILE_PREFIX, 1).expect("prune");

        assert_eq!(report.candidates, 2);
        assert_eq!(report.removed, 1);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn verbosity_raises_level() {
        use tracing::metadata::LevelFilter;
        assert_eq!(level_from_verbosity(0), LevelFilter::WARN);
        assert_eq!(level_from_verbosity(1), LevelFilter::INFO);
        assert_eq!(level_from_verbosity(4), LevelFilter::DEBUG);
    }
}
