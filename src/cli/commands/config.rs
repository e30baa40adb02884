use serde::Serialize;

use super::super::{ConfigCmd, Ctx, Outcome, print_ok};
use crate::config::{self, Config};
use crate::{ConfigFileError, Result};

#[derive(Debug, Serialize)]
struct ConfigPaths {
    user: String,
    project: Option<String>,
}

pub(crate) fn handle(ctx: &Ctx, cmd: ConfigCmd) -> Result<Outcome> {
    match cmd {
        ConfigCmd::Show => {
            let rendered = toml::to_string_pretty(&ctx.config).map_err(ConfigFileError::from)?;
            print_ok(&ctx.config, ctx.json, || rendered.trim_end().to_string())?;
        }
        ConfigCmd::Path => {
            let project = std::env::current_dir()
                .ok()
                .map(|cwd| config::project_config_path(&cwd))
                .filter(|path| path.exists());
            let paths = ConfigPaths {
                user: config::config_path().display().to_string(),
                project: project.map(|path| path.display().to_string()),
            };
            print_ok(&paths, ctx.json, || {
                let mut out = format!("user:    {}", paths.user);
                if let Some(project) = &paths.project {
                    out.push_str(&format!("\nproject: {project}"));
                }
                out
            })?;
        }
        ConfigCmd::Init { force } => {
            let path = config::config_path();
            config::write_config(&path, &Config::default(), force)?;
            tracing::info!(path = %path.display(), "config written");
            let shown = path.display().to_string();
            print_ok(&serde_json::json!({ "written": shown }), ctx.json, || {
                format!("wrote {shown}")
            })?;
        }
    }
    Ok(Outcome::Done)
}
