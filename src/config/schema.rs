use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use sop_core::{Bounds, NamedFacts, Policy, SearchConfig};

/// Effective configuration after every layer has been applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Policies enforced as extra facts on every search.
    pub enforce: Vec<Policy>,
    pub bounds: Bounds,
    pub search: SearchConfig,
    #[serde(skip_serializing_if = "NamedFacts::is_empty")]
    pub facts: NamedFacts,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Tree,
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    /// `EnvFilter` directives; `SOP_LOG` takes precedence.
    pub filter: Option<String>,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Tree,
            filter: None,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
    pub rotation: LogRotation,
    pub retention_max_files: Option<usize>,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            format: LogFormat::Json,
            rotation: LogRotation::Daily,
            retention_max_files: Some(10),
        }
    }
}

// =============================================================================
// Layers
// =============================================================================

/// One configuration file. Every field is optional; set fields override the
/// layers below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    pub enforce: Option<Vec<Policy>>,
    pub bounds: BoundsOverride,
    pub search: SearchOverride,
    pub facts: NamedFacts,
    pub logging: LoggingConfigOverride,
}

impl ConfigLayer {
    pub fn apply_to(&self, target: &mut Config) {
        if let Some(enforce) = &self.enforce {
            target.enforce = enforce.clone();
        }
        self.bounds.apply_to(&mut target.bounds);
        self.search.apply_to(&mut target.search);
        apply_facts(&self.facts, &mut target.facts);
        self.logging.apply_to(&mut target.logging);
    }
}

/// Fact groups are replaced whole, never merged entry by entry.
fn apply_facts(layer: &NamedFacts, target: &mut NamedFacts) {
    if layer.dns.is_some() {
        target.dns = layer.dns.clone();
    }
    if layer.tables.is_some() {
        target.tables = layer.tables.clone();
    }
    if layer.cookie_scopes.is_some() {
        target.cookie_scopes = layer.cookie_scopes.clone();
    }
    if layer.script_contexts.is_some() {
        target.script_contexts = layer.script_contexts.clone();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsOverride {
    pub protocols: Option<Vec<String>>,
    pub hosts: Option<Vec<String>>,
    pub ports: Option<Vec<String>>,
    pub paths: Option<Vec<String>>,
    pub browsers: Option<u32>,
    pub scripts: Option<u32>,
    pub servers: Option<u32>,
    pub resources: Option<u32>,
    pub cookies: Option<u32>,
    pub documents: Option<u32>,
}

impl BoundsOverride {
    pub fn apply_to(&self, target: &mut Bounds) {
        if let Some(protocols) = &self.protocols {
            target.protocols = protocols.clone();
        }
        if let Some(hosts) = &self.hosts {
            target.hosts = hosts.clone();
        }
        if let Some(ports) = &self.ports {
            target.ports = ports.clone();
        }
        if let Some(paths) = &self.paths {
            target.paths = paths.clone();
        }
        let counted = [
            (self.browsers, &mut target.browsers),
            (self.scripts, &mut target.scripts),
            (self.servers, &mut target.servers),
            (self.resources, &mut target.resources),
            (self.cookies, &mut target.cookies),
            (self.documents, &mut target.documents),
        ];
        for (value, slot) in counted {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOverride {
    pub steps: Option<u32>,
    pub threads: Option<usize>,
    pub time_budget_ms: Option<u64>,
    pub max_states: Option<u64>,
}

impl SearchOverride {
    pub fn apply_to(&self, target: &mut SearchConfig) {
        if let Some(steps) = self.steps {
            target.steps = steps;
        }
        if let Some(threads) = self.threads {
            target.threads = threads;
        }
        if self.time_budget_ms.is_some() {
            target.time_budget_ms = self.time_budget_ms;
        }
        if self.max_states.is_some() {
            target.max_states = self.max_states;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfigOverride {
    pub stdout: Option<bool>,
    pub stdout_format: Option<LogFormat>,
    pub filter: Option<String>,
    pub file: Option<FileLoggingConfigOverride>,
}

impl LoggingConfigOverride {
    pub fn apply_to(&self, target: &mut LoggingConfig) {
        if let Some(stdout) = self.stdout {
            target.stdout = stdout;
        }
        if let Some(format) = self.stdout_format {
            target.stdout_format = format;
        }
        if self.filter.is_some() {
            target.filter = self.filter.clone();
        }
        if let Some(file) = &self.file {
            file.apply_to(&mut target.file);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfigOverride {
    pub enabled: Option<bool>,
    pub dir: Option<PathBuf>,
    pub format: Option<LogFormat>,
    pub rotation: Option<LogRotation>,
    pub retention_max_files: Option<usize>,
}

impl FileLoggingConfigOverride {
    pub fn apply_to(&self, target: &mut FileLoggingConfig) {
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if self.dir.is_some() {
            target.dir = self.dir.clone();
        }
        if let Some(format) = self.format {
            target.format = format;
        }
        if let Some(rotation) = self.rotation {
            target.rotation = rotation;
        }
        if self.retention_max_files.is_some() {
            target.retention_max_files = self.retention_max_files;
        }
    }
}
