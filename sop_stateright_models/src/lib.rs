//! SOP model as a Stateright machine.
//!
//! The transition relation is the `sop-core` action catalog itself; only the
//! search differs. Stateright explores the same bounded executions breadth
//! first, so its discoveries give an independent check of the verdicts the
//! `sop-core` explorer reports.

use sop_core::action::{Binding, Catalog, Ctx};
use sop_core::check::Quantifier;
use sop_core::{
    ActionRecord, ConfigError, Execution, FactSpec, Policy, Predicate, StaticFacts, Store,
    Universe, enumerate_initial,
};
use stateright::{Model, Property};

/// Name of the single Stateright property, whatever the checked predicate.
pub const PROPERTY: &str = "predicate";

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SopState {
    /// Index into the model's initial static facts.
    pub initial: usize,
    pub store: Store,
    pub trace: Vec<ActionRecord>,
}

#[derive(Clone, Debug)]
pub struct SopModel {
    universe: Universe,
    initial: Vec<StaticFacts>,
    catalog: Catalog,
    steps: usize,
    predicate: sop_core::Property,
}

impl SopModel {
    pub fn new(
        universe: Universe,
        spec: &FactSpec,
        policies: impl IntoIterator<Item = Policy>,
        steps: u32,
        predicate: sop_core::Property,
    ) -> Result<Self, ConfigError> {
        if steps == 0 {
            return Err(ConfigError::ZeroSteps);
        }
        let initial = enumerate_initial(&universe, spec)?;
        Ok(Self {
            universe,
            initial,
            catalog: Catalog::new(policies),
            steps: steps as usize,
            predicate,
        })
    }

    pub fn initial(&self) -> &[StaticFacts] {
        &self.initial
    }

    pub fn execution<'a>(&'a self, state: &'a SopState) -> Execution<'a> {
        Execution {
            universe: &self.universe,
            facts: &self.initial[state.initial],
            store: &state.store,
            trace: &state.trace,
        }
    }

    fn ctx<'a>(&'a self, state: &'a SopState) -> Ctx<'a> {
        Ctx {
            universe: &self.universe,
            facts: &self.initial[state.initial],
            store: &state.store,
        }
    }
}

fn predicate_holds(model: &SopModel, state: &SopState) -> bool {
    model.predicate.holds(&model.execution(state))
}

impl Model for SopModel {
    type State = SopState;
    type Action = Binding;

    fn init_states(&self) -> Vec<Self::State> {
        (0..self.initial.len())
            .map(|initial| SopState {
                initial,
                store: Store::initial(),
                trace: Vec::new(),
            })
            .collect()
    }

    fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
        if state.trace.len() < self.steps {
            actions.extend(self.catalog.enabled(&self.ctx(state)));
        }
    }

    fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
        let transition = self.catalog.apply(&self.ctx(state), &action).ok()?;
        let mut trace = state.trace.clone();
        trace.push(transition.record);
        Some(SopState {
            initial: state.initial,
            store: transition.store,
            trace,
        })
    }

    fn properties(&self) -> Vec<Property<Self>> {
        match self.predicate.quantifier() {
            Quantifier::ForAll => vec![Property::always(PROPERTY, predicate_holds)],
            Quantifier::Exists => vec![Property::sometimes(PROPERTY, predicate_holds)],
        }
    }

    fn within_boundary(&self, state: &Self::State) -> bool {
        state.trace.len() <= self.steps
    }
}
