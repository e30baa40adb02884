use super::super::render;
use super::super::{Ctx, Outcome, RunArgs, print_ok};
use super::search_output;
use crate::Result;

pub(crate) fn handle(ctx: &Ctx, args: RunArgs) -> Result<Outcome> {
    let checker = ctx.checker(&args.search)?;
    let report = {
        let _span = tracing::info_span!("run", property = %args.property).entered();
        checker.run(&args.property, args.count)?
    };
    let output = search_output(&checker, report, args.search.trace_out.as_deref())?;
    print_ok(&output, ctx.json, || render::render_search(&output))?;
    Ok(Outcome::Done)
}
