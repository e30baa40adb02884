//! Model: browsers, scripts and servers under the Same-Origin Policy.
//!
//! Checks one built-in property of the SOP model with Stateright, or serves
//! the state space for interactive exploration.
//!
//! ```text
//! sop_machine check [--steps N] [--property NAME] [--enforce POLICY]...
//! sop_machine explore [ADDRESS] [--steps N] [--property NAME]
//! ```

use std::time::Duration;

use sop_core::{Bounds, FactSpec, Policy, Property, Universe};
use sop_stateright_models::SopModel;
use stateright::{Checker, Model, report::WriteReporter};

fn build(args: &mut pico_args::Arguments) -> Result<SopModel, Box<dyn std::error::Error>> {
    let steps: u32 = args.opt_value_from_str("--steps")?.unwrap_or(2);
    let property: Property = args
        .opt_value_from_str("--property")?
        .unwrap_or(Property::DomSop);
    let policies: Vec<Policy> = args.values_from_str("--enforce")?;
    let universe = Universe::new(Bounds::default())?;
    Ok(SopModel::new(
        universe,
        &FactSpec::default(),
        policies,
        steps,
        property,
    )?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = pico_args::Arguments::from_env();
    match args.subcommand()?.as_deref() {
        Some("explore") => {
            let model = build(&mut args)?;
            let address = args
                .opt_free_from_str()?
                .unwrap_or("localhost:3000".to_string());
            println!("Exploring SOP state space on {address}.");
            model
                .checker()
                .threads(num_cpus::get())
                .timeout(Duration::from_secs(60))
                .serve(address);
        }
        Some("check") | None => {
            let model = build(&mut args)?;
            println!(
                "Model checking {} initial states of the SOP model.",
                model.initial().len()
            );
            model
                .checker()
                .threads(num_cpus::get())
                .timeout(Duration::from_secs(60))
                .spawn_bfs()
                .report(&mut WriteReporter::new(&mut std::io::stdout()));
        }
        _ => {
            println!("USAGE:");
            println!("  sop_machine check [--steps N] [--property NAME] [--enforce POLICY]");
            println!("  sop_machine explore [ADDRESS] [--steps N] [--property NAME]");
        }
    }

    Ok(())
}
