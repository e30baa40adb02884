//! End-to-end properties of the model: SOP enforcement, counterexample
//! discovery, trace integrity and deterministic search.

use std::collections::BTreeMap;

use sop_core::schema::HostId;
use sop_core::{
    ActionKind, Bounds, Call, Checker, ConfigError, Endpoint, Execution, FactSpec, FnPredicate,
    NamedFacts, Policy, Property, SearchConfig, Universe, Verdict, Witness,
};

/// a.com and b.com resolve to the same server; Script0 runs in Document0.
fn shared_server() -> NamedFacts {
    NamedFacts {
        dns: Some(BTreeMap::from([
            ("a.com".to_string(), vec!["Server0".to_string()]),
            ("b.com".to_string(), vec!["Server0".to_string()]),
        ])),
        tables: Some(BTreeMap::from([(
            "Server0".to_string(),
            BTreeMap::from([("/".to_string(), "Resource0".to_string())]),
        )])),
        cookie_scopes: Some(BTreeMap::from([(
            "Cookie0".to_string(),
            vec!["a.com".to_string()],
        )])),
        script_contexts: Some(BTreeMap::from([(
            "Script0".to_string(),
            "Document0".to_string(),
        )])),
    }
}

fn checker(facts: &NamedFacts, policies: &[Policy], search: SearchConfig) -> Checker {
    let universe = Universe::new(Bounds::default()).expect("universe");
    let spec = facts.resolve(&universe).expect("facts");
    Checker::new(universe, &spec, policies.iter().copied(), search).expect("checker")
}

fn steps(steps: u32) -> SearchConfig {
    SearchConfig {
        steps,
        ..SearchConfig::default()
    }
}

fn host_of_src(checker: &Checker, witness: &Witness, doc: sop_core::schema::DocumentId) -> HostId {
    let stores = checker
        .catalog()
        .replay(checker.universe(), &witness.facts, &witness.records)
        .expect("replay");
    let last = stores.last().expect("final store");
    let src = last.src_of(doc).expect("document has a src");
    checker.universe().url(src).expect("url").host
}

/// Script with an a.com context touching a b.com document.
fn a_reads_b() -> FnPredicate<impl Fn(&Execution<'_>) -> bool + Send + Sync> {
    FnPredicate::new("a-reads-b", |execution: &Execution<'_>| {
        execution.trace.iter().any(|record| {
            let Call::ReadDom { doc, .. } = &record.call else {
                return false;
            };
            let Endpoint::Script(script) = record.from else {
                return false;
            };
            let host = |doc| {
                execution
                    .store
                    .src_of(doc)
                    .and_then(|src| execution.universe.url(src))
                    .map(|url| execution.universe.host_name(url.host).to_string())
            };
            let context = execution.facts.context_of(script).and_then(host);
            context.as_deref() == Some("a.com") && host(*doc).as_deref() == Some("b.com")
        })
    })
}

#[test]
fn cross_origin_read_is_reachable_without_dom_sop() {
    let checker = checker(&shared_server(), &[], steps(3));
    let report = checker.run(&a_reads_b(), 1).expect("run");
    let Verdict::Witnesses { witnesses } = report.verdict else {
        panic!("expected a witness, got {:?}", report.verdict);
    };
    let witness = &witnesses[0];
    let last = witness.records.last().expect("non-empty witness");
    assert_eq!(last.kind(), ActionKind::ReadDom);
    let doc = last.call.doc().expect("read targets a document");
    assert_eq!(checker.universe().host_name(host_of_src(&checker, witness, doc)), "b.com");
}

#[test]
fn dom_sop_excludes_cross_origin_reads() {
    let checker = checker(&shared_server(), &[Policy::DomSop], steps(3));
    let report = checker.run(&a_reads_b(), 1).expect("run");
    assert_eq!(report.verdict, Verdict::NoWitness);

    let report = checker.check(&Property::DomSop).expect("check");
    assert_eq!(report.verdict, Verdict::NoCounterexample);
}

#[test]
fn dom_sop_property_fails_on_the_unrestricted_model() {
    let checker = checker(&shared_server(), &[], steps(3));
    let report = checker.check(&Property::DomSop).expect("check");
    assert!(report.verdict.is_counterexample(), "{:?}", report.verdict);
}

#[test]
fn cross_origin_xhr_witness_and_exclusion() {
    let open = checker(&shared_server(), &[], steps(2));
    let report = open.run(&Property::CrossOriginXhr, 1).expect("run");
    let Verdict::Witnesses { witnesses } = report.verdict else {
        panic!("expected a witness, got {:?}", report.verdict);
    };
    let kinds = witnesses[0].kinds();
    assert_eq!(kinds, vec![ActionKind::BrowserHttpRequest, ActionKind::XmlHttpRequest]);
    let context_host = host_of_src(&open, &witnesses[0], sop_core::schema::DocumentId(0));
    let target = witnesses[0].records[1].call.url().expect("xhr url");
    let target_host = open.universe().url(target).expect("url").host;
    assert_eq!(open.universe().host_name(context_host), "a.com");
    assert_eq!(open.universe().host_name(target_host), "b.com");

    let enforced = checker(&shared_server(), &[Policy::XmlHttpReqSop], steps(2));
    let report = enforced.run(&Property::CrossOriginXhr, 1).expect("run");
    assert_eq!(report.verdict, Verdict::NoWitness);
    let report = enforced.check(&Property::XhrSop).expect("check");
    assert_eq!(report.verdict, Verdict::NoCounterexample);
}

#[test]
fn set_domain_can_drop_the_source_host() {
    let checker = checker(&NamedFacts::default(), &[], steps(2));
    let report = checker.check(&Property::SetDomainKeepsSrcHost).expect("check");
    let Verdict::Counterexample { counterexample } = report.verdict else {
        panic!("expected a counterexample, got {:?}", report.verdict);
    };
    let last = counterexample.records.last().expect("set domain step");
    assert_eq!(last.kind(), ActionKind::SetDomain);
}

#[test]
fn responses_match_server_tables() {
    let checker = checker(&shared_server(), &[], steps(3));
    let report = checker.check(&Property::ResponseIntegrity).expect("check");
    assert_eq!(report.verdict, Verdict::NoCounterexample);
    assert!(report.stats.transitions > 0);
}

#[test]
fn reads_are_idempotent_without_writes() {
    let checker = checker(&shared_server(), &[], steps(3));
    let report = checker.check(&Property::ReadIdempotence).expect("check");
    assert_eq!(report.verdict, Verdict::NoCounterexample);
}

#[test]
fn every_enumerated_state_satisfies_the_server_assumption() {
    let bounds = Bounds {
        servers: 2,
        hosts: vec!["a.com".into()],
        resources: 1,
        ..Bounds::default()
    };
    let universe = Universe::new(bounds).expect("universe");
    let checker = Checker::new(universe, &FactSpec::default(), [], steps(1)).expect("checker");
    let report = checker.check(&Property::ServerAssumption).expect("check");
    assert_eq!(report.verdict, Verdict::NoCounterexample);
    assert_eq!(report.stats.explored_initial, checker.initial().len());
}

#[test]
fn fixed_facts_violating_the_server_assumption_are_rejected() {
    let bounds = Bounds {
        servers: 2,
        ..Bounds::default()
    };
    let universe = Universe::new(bounds).expect("universe");
    let facts = NamedFacts {
        dns: Some(BTreeMap::from([(
            "a.com".to_string(),
            vec!["Server0".to_string(), "Server1".to_string()],
        )])),
        tables: Some(BTreeMap::from([(
            "Server0".to_string(),
            BTreeMap::from([("/".to_string(), "Resource0".to_string())]),
        )])),
        ..NamedFacts::default()
    };
    let spec = facts.resolve(&universe).expect("names resolve");
    let err = Checker::new(universe, &spec, [], steps(1)).expect_err("must be rejected");
    assert!(matches!(err, ConfigError::ServerAssumption { .. }), "{err}");
}

#[test]
fn verdicts_do_not_depend_on_thread_count() {
    let run = |threads: usize| {
        let checker = checker(
            &NamedFacts::default(),
            &[],
            SearchConfig {
                steps: 2,
                threads,
                ..SearchConfig::default()
            },
        );
        let check = checker.check(&Property::SetDomainKeepsSrcHost).expect("check");
        let witnesses = checker.run(&Property::CrossOriginXhr, 3).expect("run");
        (check.verdict, witnesses.verdict)
    };
    let sequential = run(1);
    assert_eq!(sequential, run(2));
    assert_eq!(sequential, run(8));
}

#[test]
fn budget_exhaustion_reports_the_deepest_trace() {
    let checker = checker(
        &shared_server(),
        &[],
        SearchConfig {
            steps: 3,
            max_states: Some(8),
            ..SearchConfig::default()
        },
    );
    let report = checker.check(&Property::DomSop).expect("check");
    let Verdict::BudgetExhausted { found, deepest } = report.verdict else {
        panic!("expected budget exhaustion, got {:?}", report.verdict);
    };
    assert!(found.is_empty());
    let deepest = deepest.expect("deepest trace");
    assert!(!deepest.records.is_empty());
    assert_eq!(report.stats.states, 8);
}

#[test]
fn zero_steps_is_rejected_before_search() {
    let universe = Universe::new(Bounds::default()).expect("universe");
    let err = Checker::new(universe, &FactSpec::default(), [], steps(0)).expect_err("zero steps");
    assert_eq!(err, ConfigError::ZeroSteps);
}
