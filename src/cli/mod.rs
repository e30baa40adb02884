//! CLI surface for `sop`.
//!
//! - `run` and `check` search the bounded model for one built-in property
//! - `facts` enumerates the admissible initial states
//! - `replay` re-validates a saved trace artifact
//! - flags are normalized first (case, `_` vs `-`, a few aliases)

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand, builder::BoolishValueParser};
use serde::Serialize;

use sop_core::{Checker, Policy, Property, Universe};

use crate::config::Config;
use crate::{Error, Result};

mod commands;
mod render;

// =============================================================================
// Entry + global options
// =============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "sop",
    version,
    about = "Bounded model checker for the browser Same-Origin Policy",
    infer_subcommands = true,
    infer_long_args = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Machine-readable JSON output (default: false; use `--json` for scripting).
    #[arg(
        long,
        global = true,
        default_value_t = false,
        num_args = 0..=1,
        value_parser = BoolishValueParser::new()
    )]
    pub json: bool,

    /// Project config file (default: ./sop.toml when present).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log more (repeat for debug output).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search for traces satisfying a property.
    #[command(alias = "witness")]
    Run(RunArgs),

    /// Search for a trace violating a property.
    #[command(alias = "verify")]
    Check(CheckArgs),

    /// Count (or list) the admissible initial states.
    Facts(FactsArgs),

    /// Re-validate a trace artifact written by `--trace-out`.
    Replay(ReplayArgs),

    /// Inspect or initialize configuration.
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCmd {
    /// Print the effective configuration.
    Show,
    /// Print the user and project config paths.
    Path,
    /// Write the default configuration to the user config path.
    Init {
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

// =============================================================================
// Per-command args
// =============================================================================

/// Search limits; each flag overrides the configured value.
#[derive(Args, Debug, Clone, Default)]
pub struct SearchArgs {
    /// Maximum number of actions per trace.
    #[arg(long, short = 's', value_name = "N")]
    pub steps: Option<u32>,

    /// Worker threads (1 = sequential).
    #[arg(long, short = 'j', value_name = "N")]
    pub threads: Option<usize>,

    /// Enforce a policy as an extra fact (repeat or comma-separate): dom-sop, xhr-sop.
    #[arg(long, value_delimiter = ',', value_name = "POLICY")]
    pub enforce: Vec<Policy>,

    /// Stop searching after this many milliseconds.
    #[arg(long, value_name = "MS")]
    pub time_budget_ms: Option<u64>,

    /// Stop searching after visiting this many states.
    #[arg(long, value_name = "N")]
    pub max_states: Option<u64>,

    /// Write the first trace found as a JSON artifact.
    #[arg(long, value_name = "PATH")]
    pub trace_out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Property to satisfy, e.g. cross-origin-dom.
    pub property: Property,

    /// Number of distinct witnesses to collect.
    #[arg(long, short = 'n', default_value_t = 1)]
    pub count: usize,

    #[command(flatten)]
    pub search: SearchArgs,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Property that must hold of every trace, e.g. set-domain-keeps-src-host.
    pub property: Property,

    #[command(flatten)]
    pub search: SearchArgs,
}

#[derive(Args, Debug)]
pub struct FactsArgs {
    /// Also print each initial state's facts.
    #[arg(long)]
    pub list: bool,

    /// Print at most this many states with `--list`.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Trace artifact (JSON).
    pub path: PathBuf,
}

// =============================================================================
// Public API
// =============================================================================

/// How a successful command ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// `check` found a counterexample.
    Violated,
}

impl Outcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Done => ExitCode::SUCCESS,
            Outcome::Violated => ExitCode::from(2),
        }
    }
}

/// Parse CLI from raw args, normalizing flag spelling first.
pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let raw: Vec<OsString> = args.into_iter().map(|t| t.into()).collect();
    Cli::parse_from(normalize_args(raw))
}

/// Run the CLI (used by bin).
pub fn run(cli: Cli, config: Config) -> Result<Outcome> {
    let ctx = Ctx {
        json: cli.json,
        config,
    };
    match cli.command {
        Commands::Run(args) => commands::run::handle(&ctx, args),
        Commands::Check(args) => commands::check::handle(&ctx, args),
        Commands::Facts(args) => commands::facts::handle(&ctx, args),
        Commands::Replay(args) => commands::replay::handle(&ctx, args),
        Commands::Config { cmd } => commands::config::handle(&ctx, cmd),
    }
}

// =============================================================================
// Context + helpers
// =============================================================================

struct Ctx {
    json: bool,
    config: Config,
}

impl Ctx {
    /// Checker for the effective config with `args` layered on top.
    fn checker(&self, args: &SearchArgs) -> Result<Checker> {
        let mut search = self.config.search.clone();
        if let Some(steps) = args.steps {
            search.steps = steps;
        }
        if let Some(threads) = args.threads {
            search.threads = threads;
        }
        if args.time_budget_ms.is_some() {
            search.time_budget_ms = args.time_budget_ms;
        }
        if args.max_states.is_some() {
            search.max_states = args.max_states;
        }
        let policies = if args.enforce.is_empty() {
            self.config.enforce.clone()
        } else {
            args.enforce.clone()
        };

        let universe = Universe::new(self.config.bounds.clone())?;
        let spec = self.config.facts.resolve(&universe)?;
        Ok(Checker::new(universe, &spec, policies, search)?)
    }
}

/// Print `value` as JSON, or `human()` otherwise. A closed pipe is not an error.
fn print_ok<T: Serialize>(value: &T, json: bool, human: impl FnOnce() -> String) -> Result<()> {
    let s = if json {
        serde_json::to_string_pretty(value)?
    } else {
        human()
    };

    use std::io::Write;
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{s}")
        && e.kind() != std::io::ErrorKind::BrokenPipe
    {
        return Err(Error::Io(e));
    }
    Ok(())
}

// =============================================================================
// Parsing helpers
// =============================================================================

fn normalize_args(mut raw: Vec<OsString>) -> Vec<OsString> {
    if raw.is_empty() {
        return raw;
    }

    let mut out = Vec::with_capacity(raw.len());
    out.push(raw.remove(0)); // program name

    for arg in raw {
        let s = arg.to_string_lossy();
        if s.starts_with("--") {
            let mut pieces = s.splitn(2, '=');
            let flag = pieces.next().unwrap_or("");
            let val = pieces.next();
            let canon = flag.to_lowercase().replace('_', "-");
            let canon = canonical_flag(&canon);
            match val {
                Some(v) => out.push(OsString::from(format!("{canon}={v}"))),
                None => out.push(OsString::from(canon)),
            }
        } else {
            out.push(arg);
        }
    }
    out
}

fn canonical_flag(flag: &str) -> &str {
    match flag {
        "--max-steps" | "--depth" => "--steps",
        "--policy" | "--policies" => "--enforce",
        "--budget-ms" | "--timeout-ms" => "--time-budget-ms",
        "--trace" | "--out" => "--trace-out",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        parse_from(std::iter::once("sop").chain(args.iter().copied()))
    }

    #[test]
    fn normalizes_flag_spelling() {
        let cli = parse(&["check", "dom-sop", "--Max_Steps=2", "--policy", "xhr-sop,dom"]);
        let Commands::Check(args) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.property, Property::DomSop);
        assert_eq!(args.search.steps, Some(2));
        assert_eq!(
            args.search.enforce,
            vec![Policy::XmlHttpReqSop, Policy::DomSop]
        );
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = parse(&["run", "cross-origin-xhr", "-n", "3", "--json", "-vv"]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.count, 3);
        assert_eq!(args.property, Property::CrossOriginXhr);
    }

    #[test]
    fn unknown_property_is_rejected() {
        let err = Cli::try_parse_from(["sop", "check", "no-such-property"]).expect_err("reject");
        assert!(err.to_string().contains("unknown property"));
    }

    #[test]
    fn flags_override_config() {
        let mut config = Config::default();
        config.search.steps = 5;
        config.enforce = vec![Policy::DomSop];
        let ctx = Ctx {
            json: false,
            config,
        };
        let checker = ctx
            .checker(&SearchArgs {
                steps: Some(2),
                enforce: vec![Policy::XmlHttpReqSop],
                ..SearchArgs::default()
            })
            .expect("checker");
        assert_eq!(checker.search().steps, 2);
        assert_eq!(checker.catalog().policies(), &[Policy::XmlHttpReqSop]);
    }
}
