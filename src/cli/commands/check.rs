use super::super::render;
use super::super::{CheckArgs, Ctx, Outcome, print_ok};
use super::search_output;
use crate::Result;

pub(crate) fn handle(ctx: &Ctx, args: CheckArgs) -> Result<Outcome> {
    let checker = ctx.checker(&args.search)?;
    let report = {
        let _span = tracing::info_span!("check", property = %args.property).entered();
        checker.check(&args.property)?
    };
    let violated = report.verdict.is_counterexample();
    let output = search_output(&checker, report, args.search.trace_out.as_deref())?;
    print_ok(&output, ctx.json, || render::render_search(&output))?;
    Ok(if violated {
        Outcome::Violated
    } else {
        Outcome::Done
    })
}
