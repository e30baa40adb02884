use std::str::FromStr;

use sop_core::Policy;

use super::{Config, ConfigLayer};

pub fn merge_layers(layers: impl IntoIterator<Item = ConfigLayer>) -> Config {
    let mut config = Config::default();
    for layer in layers {
        layer.apply_to(&mut config);
    }
    config
}

pub fn apply_env_overrides(config: &mut Config) -> Vec<String> {
    apply_env_overrides_from(config, |key| std::env::var(key).ok())
}

/// Apply `SOP_*` overrides read through `lookup`. Invalid values are skipped
/// and returned as warnings for the caller to log.
pub fn apply_env_overrides_from(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let read = |key: &str| {
        lookup(key)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    };

    if let Some(raw) = read("SOP_STEPS")
        && let Some(steps) = parse_or_warn::<u32>("SOP_STEPS", &raw, &mut warnings)
    {
        config.search.steps = steps;
    }
    if let Some(raw) = read("SOP_THREADS")
        && let Some(threads) = parse_or_warn::<usize>("SOP_THREADS", &raw, &mut warnings)
    {
        config.search.threads = threads;
    }
    if let Some(raw) = read("SOP_TIME_BUDGET_MS")
        && let Some(budget) = parse_or_warn::<u64>("SOP_TIME_BUDGET_MS", &raw, &mut warnings)
    {
        config.search.time_budget_ms = Some(budget);
    }
    if let Some(raw) = read("SOP_MAX_STATES")
        && let Some(cap) = parse_or_warn::<u64>("SOP_MAX_STATES", &raw, &mut warnings)
    {
        config.search.max_states = Some(cap);
    }
    if let Some(raw) = read("SOP_HOSTS") {
        config.bounds.hosts = split_list(&raw);
    }
    if let Some(raw) = read("SOP_ENFORCE") {
        let parsed: Result<Vec<Policy>, _> = split_list(&raw)
            .iter()
            .map(|name| Policy::from_str(name))
            .collect();
        match parsed {
            Ok(policies) => config.enforce = policies,
            Err(err) => warnings.push(format!("invalid SOP_ENFORCE, ignoring: {err}")),
        }
    }
    warnings
}

fn parse_or_warn<T>(key: &str, raw: &str, warnings: &mut Vec<String>) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            warnings.push(format!("invalid {key}, ignoring: {err}"));
            None
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
