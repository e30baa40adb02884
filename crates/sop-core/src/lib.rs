#![forbid(unsafe_code)]

//! Bounded relational model of browsers, scripts and servers under the
//! Same-Origin Policy.
//!
//! The model is a set of time-indexed relations ([`relation`], [`store`])
//! over a finite typed universe ([`schema`], [`facts`]). Actions from the
//! [`action`] catalog advance the state one instant at a time; the
//! [`explore`] module enumerates every execution up to a step bound and the
//! [`check`] module searches those executions for witnesses or
//! counterexamples of a predicate.

pub mod action;
pub mod check;
pub mod error;
pub mod explore;
pub mod facts;
pub mod relation;
pub mod schema;
pub mod store;
pub mod trace;

pub use action::{ActionKind, ActionRecord, Binding, Call, Catalog, Ctx, Refusal};
pub use check::{
    Checker, FnPredicate, Mode, Policy, Predicate, Property, Quantifier, Report, Verdict, Witness,
    same_origin,
};
pub use error::{ConfigError, EngineError, Error, ReplayError, Result};
pub use explore::{Execution, Explorer, SearchConfig, SearchStats, Visit, Visitor};
pub use facts::{FactSpec, NamedFacts, StaticFacts, enumerate_initial};
pub use relation::{Relation, RelationError};
pub use schema::{Bounds, Endpoint, Universe};
pub use store::{Field, Store};
pub use trace::TraceArtifact;
