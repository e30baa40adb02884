use serde::Serialize;

use sop_core::TraceArtifact;

use super::super::render;
use super::super::{Ctx, Outcome, ReplayArgs, print_ok};
use crate::{Error, Result};

#[derive(Debug, Serialize)]
pub(in crate::cli) struct ReplayOutput {
    pub valid: bool,
    pub steps: usize,
    pub trace: TraceArtifact,
}

pub(crate) fn handle(ctx: &Ctx, args: ReplayArgs) -> Result<Outcome> {
    let bytes = std::fs::read(&args.path).map_err(|source| Error::Trace {
        path: args.path.clone(),
        source,
    })?;
    let trace: TraceArtifact = serde_json::from_slice(&bytes)?;
    let stores = trace.replay()?;
    tracing::debug!(instants = stores.len(), "trace replayed");
    let output = ReplayOutput {
        valid: true,
        steps: trace.records.len(),
        trace,
    };
    print_ok(&output, ctx.json, || render::render_replay(&output))?;
    Ok(Outcome::Done)
}
