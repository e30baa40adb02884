use std::collections::BTreeMap;

use sop_core::{
    Bounds, Checker as SopChecker, FactSpec, NamedFacts, Policy, Property, SearchConfig, Universe,
    Verdict,
};
use sop_stateright_models::{PROPERTY, SopModel};
use stateright::{Checker, Model};

fn shared_server(universe: &Universe) -> FactSpec {
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
    .resolve(universe)
    .expect("facts")
}

/// Whether the explorer found something (a witness or a counterexample).
fn explorer_discovers(property: Property, policies: &[Policy], steps: u32) -> bool {
    let universe = Universe::new(Bounds::default()).expect("universe");
    let spec = shared_server(&universe);
    let checker = SopChecker::new(
        universe,
        &spec,
        policies.iter().copied(),
        SearchConfig {
            steps,
            ..SearchConfig::default()
        },
    )
    .expect("checker");
    let report = match property.quantifier() {
        sop_core::Quantifier::Exists => checker.run(&property, 1),
        sop_core::Quantifier::ForAll => checker.check(&property),
    }
    .expect("search");
    matches!(
        report.verdict,
        Verdict::Witnesses { .. } | Verdict::Counterexample { .. }
    )
}

fn stateright_discovers(property: Property, policies: &[Policy], steps: u32) -> bool {
    let universe = Universe::new(Bounds::default()).expect("universe");
    let spec = shared_server(&universe);
    let model = SopModel::new(universe, &spec, policies.iter().copied(), steps, property)
        .expect("model");
    let checker = model.checker().spawn_bfs().join();
    checker.discovery(PROPERTY).is_some()
}

#[test]
fn searches_agree_on_sop_properties() {
    let cases: &[(Property, &[Policy], u32)] = &[
        (Property::CrossOriginDom, &[], 3),
        (Property::CrossOriginDom, &[Policy::DomSop], 3),
        (Property::CrossOriginXhr, &[], 2),
        (Property::CrossOriginXhr, &[Policy::XmlHttpReqSop], 2),
        (Property::DomSop, &[], 3),
        (Property::SetDomainKeepsSrcHost, &[], 2),
        (Property::ReadIdempotence, &[], 3),
    ];
    for (property, policies, steps) in cases {
        assert_eq!(
            explorer_discovers(*property, policies, *steps),
            stateright_discovers(*property, policies, *steps),
            "{property} with {policies:?} at {steps} steps"
        );
    }
}

#[test]
fn enforced_dom_sop_has_no_cross_origin_state() {
    assert!(!stateright_discovers(
        Property::CrossOriginDom,
        &[Policy::DomSop],
        3
    ));
    assert!(stateright_discovers(Property::CrossOriginDom, &[], 3));
}

#[test]
fn steps_bound_the_state_space() {
    let universe = Universe::new(Bounds::default()).expect("universe");
    let spec = shared_server(&universe);
    let model = SopModel::new(universe, &spec, [], 1, Property::DomSop).expect("model");
    let mut state = model.init_states().pop().expect("init state");
    let mut actions = Vec::new();
    model.actions(&state, &mut actions);
    let first = actions.first().cloned().expect("a page load is enabled");
    state = model.next_state(&state, first).expect("transition");
    assert_eq!(state.trace.len(), 1);

    actions.clear();
    model.actions(&state, &mut actions);
    assert!(actions.is_empty());
}
