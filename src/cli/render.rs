//! Human renderer for CLI outputs.
//!
//! Pure formatting; handlers gather the data. Traces are shown through their
//! named artifacts so atom names match the configured pools.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use sop_core::trace::{SnapshotView, StepView};
use sop_core::{Mode, Report, SearchStats, TraceArtifact, Verdict};

use super::commands::SearchOutput;
use super::commands::facts::FactsOutput;
use super::commands::replay::ReplayOutput;

pub fn render_search(output: &SearchOutput) -> String {
    let report = &output.report;
    let mut out = render_header(report);
    match &report.verdict {
        Verdict::Witnesses { witnesses } => {
            for (n, (witness, trace)) in witnesses.iter().zip(&output.traces).enumerate() {
                let _ = writeln!(
                    out,
                    "\nwitness {} (initial state #{}):",
                    n + 1,
                    witness.initial_index
                );
                out.push_str(&render_trace(trace, true));
            }
        }
        Verdict::Counterexample { counterexample } => {
            let _ = writeln!(
                out,
                "\ncounterexample (initial state #{}):",
                counterexample.initial_index
            );
            if let Some(trace) = output.traces.first() {
                out.push_str(&render_trace(trace, true));
            }
        }
        Verdict::NoWitness | Verdict::NoCounterexample => {
            let _ = writeln!(
                out,
                "\nunsat within bound: every trace of up to {} step(s) was examined",
                report.steps
            );
        }
        Verdict::BudgetExhausted { found, deepest } => {
            if !found.is_empty() {
                let _ = writeln!(out, "\n{} trace(s) found before the budget ran out", found.len());
            }
            if deepest.is_some()
                && let Some(trace) = output.traces.last()
            {
                out.push_str("\ndeepest trace reached:\n");
                out.push_str(&render_trace(trace, false));
            }
        }
    }
    out.push('\n');
    out.push_str(&render_stats(&report.stats));
    out
}

fn render_header(report: &Report) -> String {
    let mode = match report.mode {
        Mode::Run => "run",
        Mode::Check => "check",
    };
    let policies = if report.policies.is_empty() {
        "none".to_string()
    } else {
        report
            .policies
            .iter()
            .map(|policy| policy.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "{mode} {}: {}\n  steps <= {}, enforced: {policies}\n",
        report.property,
        report.verdict.label(),
        report.steps
    )
}

/// Numbered steps, optionally followed by a snapshot per instant.
pub fn render_trace(trace: &TraceArtifact, snapshots: bool) -> String {
    let mut out = String::new();
    if trace.steps.is_empty() {
        out.push_str("  (empty trace)\n");
    }
    for (i, step) in trace.steps.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", i + 1, render_step(step));
    }
    if snapshots {
        out.push_str("  state:\n");
        for snapshot in &trace.snapshots {
            let _ = writeln!(out, "    {}", render_snapshot(snapshot));
        }
    }
    out
}

fn render_step(step: &StepView) -> String {
    let fields = step
        .fields
        .iter()
        .map(|(name, value)| format!("{name}={}", render_value(value)))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{} {} -> {} [{}..{}] {fields}",
        step.kind, step.from, step.to, step.before, step.after
    )
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => {
            let items = items.iter().map(render_value).collect::<Vec<_>>();
            format!("{{{}}}", items.join(","))
        }
        other => other.to_string(),
    }
}

fn render_snapshot(snapshot: &SnapshotView) -> String {
    let mut parts = vec![snapshot.time.clone()];
    push_pairs(&mut parts, "src", &snapshot.src);
    push_pairs(&mut parts, "content", &snapshot.content);
    push_groups(&mut parts, "domain", &snapshot.domain);
    push_groups(&mut parts, "documents", &snapshot.documents);
    push_groups(&mut parts, "cookies", &snapshot.cookies);
    parts.join("  ")
}

fn push_pairs(parts: &mut Vec<String>, label: &str, pairs: &BTreeMap<String, String>) {
    if pairs.is_empty() {
        return;
    }
    let body = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    parts.push(format!("{label}: {body}"));
}

fn push_groups(parts: &mut Vec<String>, label: &str, groups: &BTreeMap<String, Vec<String>>) {
    if groups.is_empty() {
        return;
    }
    let body = groups
        .iter()
        .map(|(k, v)| format!("{k}={{{}}}", v.join(",")))
        .collect::<Vec<_>>()
        .join(" ");
    parts.push(format!("{label}: {body}"));
}

pub fn render_stats(stats: &SearchStats) -> String {
    format!(
        "searched {} of {} initial state(s): {} state(s), {} transition(s), {} refused, \
         {} pruned, depth {} in {} ms",
        stats.explored_initial,
        stats.initial_states,
        stats.states,
        stats.transitions,
        stats.refused,
        stats.pruned,
        stats.max_depth,
        stats.elapsed_ms
    )
}

pub fn render_facts(output: &FactsOutput) -> String {
    let mut out = format!("{} initial state(s)", output.count);
    for (i, facts) in output.states.iter().enumerate() {
        let _ = write!(out, "\n\n#{i}");
        if let Some(dns) = &facts.dns {
            for (host, servers) in dns {
                let _ = write!(out, "\n  dns {host} -> {{{}}}", servers.join(","));
            }
        }
        if let Some(tables) = &facts.tables {
            for (server, table) in tables {
                let entries = table
                    .iter()
                    .map(|(path, resource)| format!("{path}={resource}"))
                    .collect::<Vec<_>>();
                let _ = write!(out, "\n  table {server}: {{{}}}", entries.join(","));
            }
        }
        if let Some(scopes) = &facts.cookie_scopes {
            for (cookie, hosts) in scopes {
                let _ = write!(out, "\n  scope {cookie}: {{{}}}", hosts.join(","));
            }
        }
        if let Some(contexts) = &facts.script_contexts {
            for (script, doc) in contexts {
                let _ = write!(out, "\n  context {script} -> {doc}");
            }
        }
    }
    if output.states.len() < output.count && !output.states.is_empty() {
        let _ = write!(out, "\n\n({} more)", output.count - output.states.len());
    }
    out
}

pub fn render_replay(output: &ReplayOutput) -> String {
    let mut out = format!("trace valid: {} step(s)\n", output.steps);
    out.push_str(&render_trace(&output.trace, true));
    out.trim_end().to_string()
}
