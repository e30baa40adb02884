use std::path::Path;

use serde::Serialize;

use sop_core::{Checker, Report, TraceArtifact, Verdict, Witness};

use crate::{Error, Result};

pub(super) mod check;
pub(super) mod config;
pub(super) mod facts;
pub(super) mod replay;
pub(super) mod run;

/// `run`/`check` output: the report plus each trace it found, with names.
#[derive(Debug, Serialize)]
pub(super) struct SearchOutput {
    pub report: Report,
    pub traces: Vec<TraceArtifact>,
}

pub(super) fn search_output(
    checker: &Checker,
    report: Report,
    trace_out: Option<&Path>,
) -> Result<SearchOutput> {
    let traces = verdict_traces(&report.verdict)
        .map(|witness| TraceArtifact::build(checker.universe(), checker.catalog(), witness))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if let Some(path) = trace_out {
        match traces.first() {
            Some(artifact) => write_trace(path, artifact)?,
            None => tracing::warn!(path = %path.display(), "no trace found; nothing written"),
        }
    }
    Ok(SearchOutput { report, traces })
}

fn verdict_traces(verdict: &Verdict) -> Box<dyn Iterator<Item = &Witness> + '_> {
    match verdict {
        Verdict::Witnesses { witnesses } => Box::new(witnesses.iter()),
        Verdict::Counterexample { counterexample } => Box::new(std::iter::once(counterexample)),
        Verdict::BudgetExhausted { found, deepest } => Box::new(found.iter().chain(deepest)),
        Verdict::NoWitness | Verdict::NoCounterexample => Box::new(std::iter::empty()),
    }
}

fn write_trace(path: &Path, artifact: &TraceArtifact) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(artifact)?;
    std::fs::write(path, bytes).map_err(|source| Error::Trace {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), steps = artifact.records.len(), "trace written");
    Ok(())
}
