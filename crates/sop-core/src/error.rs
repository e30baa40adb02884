//! Capability errors for the model and the search engine.
//!
//! Configuration errors are detected before any search starts. Engine errors
//! are fatal and carry the partial trace for diagnosis. Running out of search
//! space is not an error; see `check::Verdict`.

use thiserror::Error;

use crate::action::{ActionRecord, Refusal};
use crate::relation::RelationError;
use crate::schema::Sort;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("pool `{pool}` must not be empty")]
    EmptyPool { pool: &'static str },
    #[error("pool `{pool}` has {size} atoms; at most {max} are supported")]
    PoolTooLarge {
        pool: &'static str,
        size: usize,
        max: usize,
    },
    #[error("pool `{pool}` contains an empty name")]
    EmptyName { pool: &'static str },
    #[error("pool `{pool}` contains `{name}` twice")]
    DuplicateName { pool: &'static str, name: String },
    #[error("step bound must be at least 1")]
    ZeroSteps,
    #[error("unknown {sort} `{name}`")]
    UnknownAtom { sort: Sort, name: String },
    #[error("invalid fixed fact: {reason}")]
    InvalidFact { reason: String },
    #[error("server assumption violated: {host} maps to {left} and {right} with different resource tables")]
    ServerAssumption {
        host: String,
        left: String,
        right: String,
    },
    #[error("no initial state satisfies the static constraints")]
    Unsatisfiable,
    #[error("{count} initial states exceed the limit of {max}; fix some facts or shrink the bounds")]
    TooManyInitialStates { count: u128, max: u128 },
    #[error(transparent)]
    Relation(#[from] RelationError),
}

/// Fatal search failure.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum EngineError {
    #[error("internal invariant breached after {} step(s): {reason}", partial.len())]
    Invariant {
        reason: String,
        partial: Vec<ActionRecord>,
    },
    #[error("search worker panicked while exploring initial state {index}")]
    WorkerPanicked { index: usize },
}

/// A recorded trace that is not a valid execution of the model.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ReplayError {
    #[error("step {step} is not a valid transition: {refusal}")]
    Refused { step: usize, refusal: Refusal },
    #[error("step {step} is stamped {found} but the clock is at {expected}")]
    Clock {
        step: usize,
        expected: String,
        found: String,
    },
    #[error("step {step} breached an internal invariant: {reason}")]
    Breach { step: usize, reason: String },
    #[error("step {step} records a different outcome than the model produces")]
    Diverged { step: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Crate-level convenience error.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
}

pub type Result<T> = std::result::Result<T, Error>;
