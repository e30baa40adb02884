use std::process::ExitCode;

use sop_check::config::{self, LoggingConfig};
use sop_check::{cli, telemetry};

fn main() -> ExitCode {
    let cli = cli::parse_from(std::env::args_os());

    let loaded = match config::load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(err) => {
            let _telemetry_guard = telemetry::init(telemetry::TelemetryConfig::new(
                cli.verbose,
                LoggingConfig::default(),
            ));
            tracing::error!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let _telemetry_guard = telemetry::init(telemetry::TelemetryConfig::new(
        cli.verbose,
        loaded.config.logging.clone(),
    ));
    for warning in &loaded.warnings {
        tracing::warn!("{warning}");
    }

    match cli::run(cli, loaded.config) {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            tracing::error!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
