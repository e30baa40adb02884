use serde::Serialize;

use sop_core::{Bounds, NamedFacts, Universe, enumerate_initial};

use super::super::render;
use super::super::{Ctx, FactsArgs, Outcome, print_ok};
use crate::Result;

#[derive(Debug, Serialize)]
pub(in crate::cli) struct FactsOutput {
    pub bounds: Bounds,
    pub count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<NamedFacts>,
}

pub(crate) fn handle(ctx: &Ctx, args: FactsArgs) -> Result<Outcome> {
    let universe = Universe::new(ctx.config.bounds.clone())?;
    let spec = ctx.config.facts.resolve(&universe)?;
    let initial = enumerate_initial(&universe, &spec)?;
    let states = if args.list {
        initial
            .iter()
            .take(args.limit)
            .map(|facts| facts.to_named(&universe))
            .collect()
    } else {
        Vec::new()
    };
    let output = FactsOutput {
        bounds: universe.bounds().clone(),
        count: initial.len(),
        states,
    };
    print_ok(&output, ctx.json, || render::render_facts(&output))?;
    Ok(Outcome::Done)
}
