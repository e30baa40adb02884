//! Policies, predicates and the checker that drives the explorer in `run`
//! (witness search) or `check` (counterexample search) mode.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::action::{ActionKind, ActionRecord, Binding, Call, Catalog, Ctx};
use crate::error::{ConfigError, EngineError};
use crate::explore::{Execution, Explorer, SearchConfig, SearchStats, Visit, Visitor};
use crate::facts::{FactSpec, StaticFacts, enumerate_initial};
use crate::schema::{Bounds, DocumentId, Endpoint, ScriptId, UrlId, Universe};
use crate::store::{Field, Store};

// =============================================================================
// Origins and policies
// =============================================================================

/// Equal protocol, host and port. Two URLs without a port agree on it.
pub fn same_origin(universe: &Universe, left: UrlId, right: UrlId) -> bool {
    match (universe.url(left), universe.url(right)) {
        (Some(left), Some(right)) => left.origin() == right.origin(),
        _ => false,
    }
}

fn context_src(facts: &StaticFacts, store: &Store, script: ScriptId) -> Option<UrlId> {
    facts
        .context_of(script)
        .and_then(|context| store.src_of(context))
}

/// Same-origin check between a script's context and a document.
fn dom_same_origin(
    universe: &Universe,
    facts: &StaticFacts,
    store: &Store,
    script: ScriptId,
    doc: DocumentId,
) -> bool {
    match (context_src(facts, store, script), store.src_of(doc)) {
        (Some(context), Some(target)) => same_origin(universe, context, target),
        _ => false,
    }
}

fn xhr_same_origin(
    universe: &Universe,
    facts: &StaticFacts,
    store: &Store,
    script: ScriptId,
    url: UrlId,
) -> bool {
    context_src(facts, store, script).is_some_and(|context| same_origin(universe, context, url))
}

/// Restriction that can be enforced on the model as an extra fact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Policy {
    #[serde(rename = "dom-sop", alias = "domSop")]
    DomSop,
    #[serde(rename = "xhr-sop", alias = "xmlHttpReqSop")]
    XmlHttpReqSop,
}

impl Policy {
    pub const ALL: [Policy; 2] = [Policy::DomSop, Policy::XmlHttpReqSop];

    pub fn as_str(self) -> &'static str {
        match self {
            Policy::DomSop => "dom-sop",
            Policy::XmlHttpReqSop => "xhr-sop",
        }
    }

    /// Whether a binding that already satisfies its precondition is allowed.
    pub fn permits(self, ctx: &Ctx<'_>, binding: &Binding) -> bool {
        let Endpoint::Script(script) = binding.from else {
            return true;
        };
        match (self, &binding.call) {
            (Policy::DomSop, Call::ReadDom { doc, .. } | Call::WriteDom { doc, .. }) => {
                dom_same_origin(ctx.universe, ctx.facts, ctx.store, script, *doc)
            }
            (Policy::XmlHttpReqSop, Call::XmlHttpRequest { url, .. }) => {
                xhr_same_origin(ctx.universe, ctx.facts, ctx.store, script, *url)
            }
            _ => true,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "dom-sop" | "domSop" | "dom" => Ok(Policy::DomSop),
            "xhr-sop" | "xmlHttpReqSop" | "xhr" => Ok(Policy::XmlHttpReqSop),
            other => Err(ConfigError::InvalidFact {
                reason: format!("unknown policy `{other}`; expected dom-sop or xhr-sop"),
            }),
        }
    }
}

// =============================================================================
// Predicates
// =============================================================================

/// A predicate over an execution prefix.
pub trait Predicate: Send + Sync {
    fn name(&self) -> &str;

    fn holds(&self, execution: &Execution<'_>) -> bool;
}

/// Ad-hoc predicate from a closure.
pub struct FnPredicate<F> {
    name: String,
    f: F,
}

impl<F> FnPredicate<F>
where
    F: Fn(&Execution<'_>) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&Execution<'_>) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn holds(&self, execution: &Execution<'_>) -> bool {
        (self.f)(execution)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantifier {
    /// Holds of some trace; searched with `run`.
    Exists,
    /// Holds of every trace; searched with `check`.
    ForAll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Property {
    /// Every ReadDom/WriteDom stays within the script's origin.
    DomSop,
    /// Every XmlHttpRequest targets the script's origin.
    XhrSop,
    /// Some ReadDom/WriteDom crosses origins.
    CrossOriginDom,
    /// Some XmlHttpRequest crosses origins.
    CrossOriginXhr,
    /// Every SetDomain keeps the document's own host in its new domain.
    SetDomainKeepsSrcHost,
    /// Every loaded document starts with the server's resource at its path.
    ResponseIntegrity,
    /// Reads of a document agree until it is written.
    ReadIdempotence,
    ServerAssumption,
}

impl Property {
    pub const ALL: [Property; 8] = [
        Property::DomSop,
        Property::XhrSop,
        Property::CrossOriginDom,
        Property::CrossOriginXhr,
        Property::SetDomainKeepsSrcHost,
        Property::ResponseIntegrity,
        Property::ReadIdempotence,
        Property::ServerAssumption,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Property::DomSop => "dom-sop",
            Property::XhrSop => "xhr-sop",
            Property::CrossOriginDom => "cross-origin-dom",
            Property::CrossOriginXhr => "cross-origin-xhr",
            Property::SetDomainKeepsSrcHost => "set-domain-keeps-src-host",
            Property::ResponseIntegrity => "response-integrity",
            Property::ReadIdempotence => "read-idempotence",
            Property::ServerAssumption => "server-assumption",
        }
    }

    pub fn quantifier(self) -> Quantifier {
        match self {
            Property::CrossOriginDom | Property::CrossOriginXhr => Quantifier::Exists,
            _ => Quantifier::ForAll,
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Property {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Property::ALL
            .into_iter()
            .find(|property| property.as_str() == raw.trim())
            .ok_or_else(|| ConfigError::InvalidFact {
                reason: format!("unknown property `{raw}`"),
            })
    }
}

fn dom_records<'t>(
    trace: &'t [ActionRecord],
) -> impl Iterator<Item = (ScriptId, DocumentId)> + 't {
    trace.iter().filter_map(|record| match (&record.call, record.from) {
        (Call::ReadDom { doc, .. } | Call::WriteDom { doc, .. }, Endpoint::Script(script)) => {
            Some((script, *doc))
        }
        _ => None,
    })
}

fn xhr_records<'t>(trace: &'t [ActionRecord]) -> impl Iterator<Item = (ScriptId, UrlId)> + 't {
    trace.iter().filter_map(|record| match (&record.call, record.from) {
        (Call::XmlHttpRequest { url, .. }, Endpoint::Script(script)) => Some((script, *url)),
        _ => None,
    })
}

fn response_integrity(execution: &Execution<'_>) -> bool {
    execution.trace.iter().all(|record| {
        let Call::BrowserHttpRequest { url, doc, .. } = &record.call else {
            return true;
        };
        let (Some(server), Some(url)) = (record.to.as_server(), execution.universe.url(*url))
        else {
            return false;
        };
        let expected = execution.facts.resource_at(server, url.path);
        let Ok(content) = execution.store.at(Field::Content, record.after) else {
            return false;
        };
        content.value(&[doc.atom()]) == expected.map(|resource| resource.atom())
    })
}

fn read_idempotence(execution: &Execution<'_>) -> bool {
    let mut last_read = std::collections::BTreeMap::new();
    for record in execution.trace {
        match &record.call {
            Call::ReadDom { doc, result } => {
                if let Some(previous) = last_read.insert(*doc, *result)
                    && previous != *result
                {
                    return false;
                }
            }
            Call::WriteDom { doc, .. } => {
                last_read.remove(doc);
            }
            _ => {}
        }
    }
    true
}

fn set_domain_keeps_src_host(execution: &Execution<'_>) -> bool {
    execution.trace.iter().all(|record| {
        let Call::SetDomain { doc, new_domain } = &record.call else {
            return true;
        };
        execution
            .store
            .src_of(*doc)
            .and_then(|src| execution.universe.url(src))
            .is_some_and(|src| new_domain.contains(&src.host))
    })
}

impl Predicate for Property {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn holds(&self, execution: &Execution<'_>) -> bool {
        let Execution {
            universe,
            facts,
            store,
            trace,
        } = *execution;
        match self {
            Property::DomSop => dom_records(trace)
                .all(|(script, doc)| dom_same_origin(universe, facts, store, script, doc)),
            Property::XhrSop => xhr_records(trace)
                .all(|(script, url)| xhr_same_origin(universe, facts, store, script, url)),
            Property::CrossOriginDom => dom_records(trace)
                .any(|(script, doc)| !dom_same_origin(universe, facts, store, script, doc)),
            Property::CrossOriginXhr => xhr_records(trace)
                .any(|(script, url)| !xhr_same_origin(universe, facts, store, script, url)),
            Property::SetDomainKeepsSrcHost => set_domain_keeps_src_host(execution),
            Property::ResponseIntegrity => response_integrity(execution),
            Property::ReadIdempotence => read_idempotence(execution),
            Property::ServerAssumption => facts.check_server_assumption(universe).is_ok(),
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Run,
    Check,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Run => "run",
            Mode::Check => "check",
        })
    }
}

/// A concrete trace together with the static facts it runs under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub initial_index: usize,
    pub facts: StaticFacts,
    pub records: Vec<ActionRecord>,
}

impl Witness {
    pub fn kinds(&self) -> Vec<ActionKind> {
        self.records.iter().map(ActionRecord::kind).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Verdict {
    Witnesses { witnesses: Vec<Witness> },
    NoWitness,
    Counterexample { counterexample: Witness },
    /// Not a proof: only traces up to the step bound were examined.
    NoCounterexample,
    /// The time budget or state cap ran out first.
    BudgetExhausted {
        found: Vec<Witness>,
        deepest: Option<Witness>,
    },
}

impl Verdict {
    pub fn is_counterexample(&self) -> bool {
        matches!(self, Verdict::Counterexample { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Witnesses { .. } => "witness found",
            Verdict::NoWitness => "no witness within bound",
            Verdict::Counterexample { .. } => "counterexample found",
            Verdict::NoCounterexample => "no counterexample within bound",
            Verdict::BudgetExhausted { .. } => "search budget exhausted",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    pub mode: Mode,
    pub property: String,
    pub steps: u32,
    pub policies: Vec<Policy>,
    pub bounds: Bounds,
    pub verdict: Verdict,
    pub stats: SearchStats,
}

// =============================================================================
// Checker
// =============================================================================

struct RunVisitor<'p> {
    predicate: &'p dyn Predicate,
    wanted: usize,
    found: Vec<Vec<ActionRecord>>,
}

impl Visitor for RunVisitor<'_> {
    type Output = Vec<Vec<ActionRecord>>;

    fn visit(&mut self, execution: &Execution<'_>) -> Visit {
        if !self.predicate.holds(execution) {
            return Visit::Continue;
        }
        self.found.push(execution.trace.to_vec());
        if self.found.len() >= self.wanted {
            Visit::Stop
        } else {
            Visit::Prune
        }
    }

    fn hits(&self) -> usize {
        self.found.len()
    }

    fn finish(self) -> Self::Output {
        self.found
    }
}

struct CheckVisitor<'p> {
    predicate: &'p dyn Predicate,
    violation: Option<Vec<ActionRecord>>,
}

impl Visitor for CheckVisitor<'_> {
    type Output = Vec<Vec<ActionRecord>>;

    fn visit(&mut self, execution: &Execution<'_>) -> Visit {
        if self.predicate.holds(execution) {
            return Visit::Continue;
        }
        self.violation = Some(execution.trace.to_vec());
        Visit::Stop
    }

    fn hits(&self) -> usize {
        usize::from(self.violation.is_some())
    }

    fn finish(self) -> Self::Output {
        self.violation.into_iter().collect()
    }
}

/// A configured model: universe, admissible initial states, enforced
/// policies and search limits.
#[derive(Debug)]
pub struct Checker {
    universe: Universe,
    initial: Vec<StaticFacts>,
    catalog: Catalog,
    search: SearchConfig,
}

impl Checker {
    pub fn new(
        universe: Universe,
        spec: &FactSpec,
        policies: impl IntoIterator<Item = Policy>,
        search: SearchConfig,
    ) -> Result<Self, ConfigError> {
        search.validate()?;
        let initial = enumerate_initial(&universe, spec)?;
        Ok(Self {
            universe,
            initial,
            catalog: Catalog::new(policies),
            search,
        })
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub fn initial(&self) -> &[StaticFacts] {
        &self.initial
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn search(&self) -> &SearchConfig {
        &self.search
    }

    /// Witness search: the first `count` traces satisfying `predicate`.
    pub fn run(&self, predicate: &dyn Predicate, count: usize) -> Result<Report, EngineError> {
        let count = count.max(1);
        let exploration = Explorer::new(&self.universe, &self.catalog, &self.search)
            .explore(&self.initial, count, |_| RunVisitor {
                predicate,
                wanted: count,
                found: Vec::new(),
            })?;
        let mut found = self.witnesses(exploration.results);
        found.truncate(count);
        let verdict = if !found.is_empty() && (found.len() >= count || !exploration.exhausted) {
            Verdict::Witnesses { witnesses: found }
        } else if exploration.exhausted {
            Verdict::BudgetExhausted {
                found,
                deepest: self.deepest(exploration.deepest),
            }
        } else {
            Verdict::NoWitness
        };
        Ok(self.report(Mode::Run, predicate, verdict, exploration.stats))
    }

    /// Counterexample search: the first trace violating `predicate`.
    pub fn check(&self, predicate: &dyn Predicate) -> Result<Report, EngineError> {
        let exploration = Explorer::new(&self.universe, &self.catalog, &self.search)
            .explore(&self.initial, 1, |_| CheckVisitor {
                predicate,
                violation: None,
            })?;
        let mut found = self.witnesses(exploration.results);
        let verdict = if !found.is_empty() {
            Verdict::Counterexample {
                counterexample: found.swap_remove(0),
            }
        } else if exploration.exhausted {
            Verdict::BudgetExhausted {
                found,
                deepest: self.deepest(exploration.deepest),
            }
        } else {
            Verdict::NoCounterexample
        };
        Ok(self.report(Mode::Check, predicate, verdict, exploration.stats))
    }

    fn witnesses(&self, results: Vec<(usize, Vec<Vec<ActionRecord>>)>) -> Vec<Witness> {
        results
            .into_iter()
            .flat_map(|(index, traces)| {
                traces.into_iter().map(move |records| Witness {
                    initial_index: index,
                    facts: self.initial[index].clone(),
                    records,
                })
            })
            .collect()
    }

    fn deepest(&self, deepest: Option<(usize, Vec<ActionRecord>)>) -> Option<Witness> {
        deepest.map(|(index, records)| Witness {
            initial_index: index,
            facts: self.initial[index].clone(),
            records,
        })
    }

    fn report(
        &self,
        mode: Mode,
        predicate: &dyn Predicate,
        verdict: Verdict,
        stats: SearchStats,
    ) -> Report {
        tracing::info!(
            %mode,
            property = predicate.name(),
            verdict = verdict.label(),
            states = stats.states,
            elapsed_ms = stats.elapsed_ms,
            "search complete"
        );
        Report {
            mode,
            property: predicate.name().to_string(),
            steps: self.search.steps,
            policies: self.catalog.policies().to_vec(),
            bounds: self.universe.bounds().clone(),
            verdict,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_take_part_in_origin() {
        let bounds = Bounds {
            ports: vec!["8080".into()],
            ..Bounds::default()
        };
        let universe = Universe::new(bounds).expect("universe");
        let origin_of = |port: bool, path: bool| {
            universe
                .urls()
                .find(|(_, url)| {
                    url.host.0 == 0 && url.port.is_some() == port && url.path.is_some() == path
                })
                .map(|(id, _)| id)
                .expect("url")
        };
        assert!(same_origin(&universe, origin_of(false, false), origin_of(false, true)));
        assert!(!same_origin(&universe, origin_of(false, true), origin_of(true, true)));
        assert!(same_origin(&universe, origin_of(true, false), origin_of(true, true)));
    }

    #[test]
    fn policy_and_property_names_parse() {
        assert_eq!("domSop".parse::<Policy>(), Ok(Policy::DomSop));
        assert_eq!("xhr-sop".parse::<Policy>(), Ok(Policy::XmlHttpReqSop));
        assert!("csp".parse::<Policy>().is_err());
        for property in Property::ALL {
            assert_eq!(property.as_str().parse::<Property>(), Ok(property));
        }
    }

    #[test]
    fn policy_serde_accepts_both_spellings() {
        let parsed: Vec<Policy> =
            serde_json::from_str(r#"["dom-sop", "xmlHttpReqSop"]"#).expect("policies");
        assert_eq!(parsed, vec![Policy::DomSop, Policy::XmlHttpReqSop]);
        assert_eq!(
            serde_json::to_string(&Policy::DomSop).expect("json"),
            "\"dom-sop\""
        );
    }

    #[test]
    fn fn_predicate_reports_its_name() {
        let predicate = FnPredicate::new("short", |execution: &Execution<'_>| {
            execution.trace.len() < 2
        });
        assert_eq!(predicate.name(), "short");
    }
}
