//! Bounded depth-first exploration of executions.
//!
//! For each initial assignment of static facts, the explorer walks every
//! valid binding at every depth up to the step bound, handing each visited
//! state (including the initial one) to a [`Visitor`]. Initial states may be
//! spread over worker threads; results are merged by initial-state index so
//! the outcome does not depend on the thread count.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::channel;
use serde::{Deserialize, Serialize};

use crate::action::{ActionRecord, ApplyError, Catalog, Ctx};
use crate::error::{ConfigError, EngineError};
use crate::facts::StaticFacts;
use crate::schema::Universe;
use crate::store::Store;

/// A state reached by the explorer, with the trace that reached it.
#[derive(Clone, Copy, Debug)]
pub struct Execution<'a> {
    pub universe: &'a Universe,
    pub facts: &'a StaticFacts,
    pub store: &'a Store,
    pub trace: &'a [ActionRecord],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum number of actions per trace.
    pub steps: u32,
    /// Worker threads; 0 and 1 both mean sequential.
    pub threads: usize,
    pub time_budget_ms: Option<u64>,
    pub max_states: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            steps: 3,
            threads: 1,
            time_budget_ms: None,
            max_states: None,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps == 0 {
            return Err(ConfigError::ZeroSteps);
        }
        Ok(())
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_ms.map(Duration::from_millis)
    }
}

/// What to do after visiting a state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    Continue,
    /// Do not extend this trace.
    Prune,
    /// Abandon the search of the current initial state.
    Stop,
}

pub trait Visitor: Send {
    type Output: Send;

    fn visit(&mut self, execution: &Execution<'_>) -> Visit;

    /// Results recorded so far.
    fn hits(&self) -> usize;

    fn finish(self) -> Self::Output;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    pub initial_states: usize,
    pub explored_initial: usize,
    pub states: u64,
    pub transitions: u64,
    pub refused: u64,
    pub pruned: u64,
    pub max_depth: usize,
    pub elapsed_ms: u64,
}

impl SearchStats {
    fn absorb(&mut self, other: &SearchStats) {
        self.explored_initial += other.explored_initial;
        self.states += other.states;
        self.transitions += other.transitions;
        self.refused += other.refused;
        self.pruned += other.pruned;
        self.max_depth = self.max_depth.max(other.max_depth);
    }
}

/// Merged result of a search.
#[derive(Debug)]
pub struct Exploration<O> {
    /// Visitor outputs, in initial-state order.
    pub results: Vec<(usize, O)>,
    pub stats: SearchStats,
    /// The time budget or state cap stopped the search early.
    pub exhausted: bool,
    /// Longest trace explored, with the index of its initial state.
    pub deepest: Option<(usize, Vec<ActionRecord>)>,
}

impl<O> Exploration<O> {
    pub fn hits(&self) -> usize
    where
        O: HitCount,
    {
        self.results.iter().map(|(_, out)| out.hit_count()).sum()
    }
}

/// Number of results carried by a visitor output.
pub trait HitCount {
    fn hit_count(&self) -> usize;
}

impl<T> HitCount for Vec<T> {
    fn hit_count(&self) -> usize {
        self.len()
    }
}

/// Shared wall-clock and state budget.
#[derive(Debug)]
struct Budget {
    deadline: Option<Instant>,
    max_states: Option<u64>,
    states: AtomicU64,
    tripped: AtomicBool,
}

impl Budget {
    fn new(config: &SearchConfig) -> Self {
        Self {
            deadline: config.time_budget().map(|budget| Instant::now() + budget),
            max_states: config.max_states,
            states: AtomicU64::new(0),
            tripped: AtomicBool::new(false),
        }
    }

    fn tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }

    /// Account for one more visited state; false once the budget is spent.
    fn admit(&self) -> bool {
        if self.tripped() {
            return false;
        }
        let visited = self.states.fetch_add(1, Ordering::Relaxed) + 1;
        let over_cap = self.max_states.is_some_and(|cap| visited > cap);
        let over_time = self.deadline.is_some_and(|deadline| Instant::now() >= deadline);
        if over_cap || over_time {
            self.tripped.store(true, Ordering::Relaxed);
            return false;
        }
        true
    }
}

/// Search of one initial state.
#[derive(Debug)]
struct IndexRun<O> {
    output: O,
    hits: usize,
    stats: SearchStats,
    exhausted: bool,
    deepest: Vec<ActionRecord>,
}

struct Walk<'e, V> {
    universe: &'e Universe,
    catalog: &'e Catalog,
    facts: &'e StaticFacts,
    steps: usize,
    budget: &'e Budget,
    visitor: V,
    trace: Vec<ActionRecord>,
    deepest: Vec<ActionRecord>,
    stats: SearchStats,
    stopped: bool,
    exhausted: bool,
}

impl<V: Visitor> Walk<'_, V> {
    fn descend(&mut self, store: &Store) -> Result<(), EngineError> {
        if !self.budget.admit() {
            self.exhausted = true;
            return Ok(());
        }
        self.stats.states += 1;
        self.stats.max_depth = self.stats.max_depth.max(self.trace.len());
        if self.trace.len() > self.deepest.len() {
            self.deepest = self.trace.clone();
        }

        let execution = Execution {
            universe: self.universe,
            facts: self.facts,
            store,
            trace: &self.trace,
        };
        match self.visitor.visit(&execution) {
            Visit::Continue => {}
            Visit::Prune => {
                self.stats.pruned += 1;
                return Ok(());
            }
            Visit::Stop => {
                self.stopped = true;
                return Ok(());
            }
        }
        if self.trace.len() >= self.steps {
            return Ok(());
        }

        let ctx = Ctx {
            universe: self.universe,
            facts: self.facts,
            store,
        };
        for binding in self.catalog.candidates(&ctx) {
            match self.catalog.apply(&ctx, &binding) {
                Ok(transition) => {
                    self.stats.transitions += 1;
                    self.trace.push(transition.record);
                    self.descend(&transition.store)?;
                    self.trace.pop();
                    if self.stopped || self.exhausted {
                        return Ok(());
                    }
                }
                Err(ApplyError::Refused(_)) => self.stats.refused += 1,
                Err(ApplyError::Breach(reason)) => {
                    return Err(EngineError::Invariant {
                        reason,
                        partial: self.trace.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Hits recorded per finished initial-state index, used by workers to skip
/// indices whose results can no longer be reported.
#[derive(Debug, Default)]
struct Settled {
    hits: Mutex<BTreeMap<usize, usize>>,
}

impl Settled {
    fn record(&self, index: usize, hits: usize) {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, hits);
    }

    fn below(&self, index: usize) -> usize {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .range(..index)
            .map(|(_, hits)| *hits)
            .sum()
    }
}

pub struct Explorer<'a> {
    universe: &'a Universe,
    catalog: &'a Catalog,
    config: &'a SearchConfig,
}

impl<'a> Explorer<'a> {
    pub fn new(universe: &'a Universe, catalog: &'a Catalog, config: &'a SearchConfig) -> Self {
        Self {
            universe,
            catalog,
            config,
        }
    }

    /// Explore every initial state in order until `wanted` hits have been
    /// collected across them. Each initial state gets a fresh visitor from
    /// `make`.
    pub fn explore<V, F>(
        &self,
        initial: &[StaticFacts],
        wanted: usize,
        make: F,
    ) -> Result<Exploration<V::Output>, EngineError>
    where
        V: Visitor,
        F: Fn(usize) -> V + Sync,
    {
        let started = Instant::now();
        let budget = Budget::new(self.config);
        let workers = self.config.threads.clamp(1, initial.len().max(1));

        let runs = if workers == 1 {
            self.sequential(initial, wanted, &budget, &make)?
        } else {
            self.parallel(initial, wanted, workers, &budget, &make)?
        };

        let mut exploration = merge(runs, initial.len(), wanted, budget.tripped())?;
        exploration.stats.initial_states = initial.len();
        exploration.stats.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::debug!(
            states = exploration.stats.states,
            transitions = exploration.stats.transitions,
            exhausted = exploration.exhausted,
            workers,
            "exploration finished"
        );
        Ok(exploration)
    }

    fn sequential<V, F>(
        &self,
        initial: &[StaticFacts],
        wanted: usize,
        budget: &Budget,
        make: &F,
    ) -> Result<BTreeMap<usize, Result<IndexRun<V::Output>, EngineError>>, EngineError>
    where
        V: Visitor,
        F: Fn(usize) -> V + Sync,
    {
        let mut runs = BTreeMap::new();
        let mut hits = 0;
        for (index, facts) in initial.iter().enumerate() {
            if hits >= wanted || budget.tripped() {
                break;
            }
            let run = self.explore_one(index, facts, budget, make(index));
            let stop = match &run {
                Ok(run) => {
                    hits += run.hits;
                    run.exhausted
                }
                Err(_) => true,
            };
            runs.insert(index, run);
            if stop {
                break;
            }
        }
        Ok(runs)
    }

    fn parallel<V, F>(
        &self,
        initial: &[StaticFacts],
        wanted: usize,
        workers: usize,
        budget: &Budget,
        make: &F,
    ) -> Result<BTreeMap<usize, Result<IndexRun<V::Output>, EngineError>>, EngineError>
    where
        V: Visitor,
        F: Fn(usize) -> V + Sync,
    {
        let next = AtomicUsize::new(0);
        let settled = Settled::default();
        let (tx, rx) = channel::unbounded();

        let (runs, panicked) = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    let tx = tx.clone();
                    let next = &next;
                    let settled = &settled;
                    scope.spawn(move || {
                        loop {
                            let index = next.fetch_add(1, Ordering::Relaxed);
                            if index >= initial.len()
                                || budget.tripped()
                                || settled.below(index) >= wanted
                            {
                                break;
                            }
                            let run = self.explore_one(index, &initial[index], budget, make(index));
                            let hits = run.as_ref().map_or(0, |run| run.hits);
                            settled.record(index, hits);
                            if tx.send((index, run)).is_err() {
                                break;
                            }
                        }
                    })
                })
                .collect();
            drop(tx);

            let runs: BTreeMap<_, _> = rx.iter().collect();
            let panicked = handles
                .into_iter()
                .map(|handle| handle.join().is_err())
                .fold(false, |acc, failed| acc || failed);
            (runs, panicked)
        });

        if panicked {
            let claimed = next.load(Ordering::Relaxed).min(initial.len());
            let index = (0..claimed)
                .find(|index| !runs.contains_key(index))
                .unwrap_or(claimed);
            return Err(EngineError::WorkerPanicked { index });
        }
        Ok(runs)
    }

    fn explore_one<V: Visitor>(
        &self,
        index: usize,
        facts: &StaticFacts,
        budget: &Budget,
        visitor: V,
    ) -> Result<IndexRun<V::Output>, EngineError> {
        let span = tracing::debug_span!("explore", initial = index);
        let _guard = span.enter();

        let mut walk = Walk {
            universe: self.universe,
            catalog: self.catalog,
            facts,
            steps: self.config.steps as usize,
            budget,
            visitor,
            trace: Vec::new(),
            deepest: Vec::new(),
            stats: SearchStats {
                explored_initial: 1,
                ..SearchStats::default()
            },
            stopped: false,
            exhausted: false,
        };
        walk.descend(&Store::initial())?;
        let hits = walk.visitor.hits();
        tracing::debug!(
            states = walk.stats.states,
            hits,
            exhausted = walk.exhausted,
            "initial state explored"
        );
        Ok(IndexRun {
            output: walk.visitor.finish(),
            hits,
            stats: walk.stats,
            exhausted: walk.exhausted,
            deepest: walk.deepest,
        })
    }
}

/// Fold per-index runs in index order, exactly as a sequential search would
/// have reported them.
fn merge<O>(
    runs: BTreeMap<usize, Result<IndexRun<O>, EngineError>>,
    total: usize,
    wanted: usize,
    tripped: bool,
) -> Result<Exploration<O>, EngineError> {
    let mut exploration = Exploration {
        results: Vec::new(),
        stats: SearchStats::default(),
        exhausted: false,
        deepest: None,
    };
    let mut runs = runs.into_iter().peekable();
    let mut hits = 0;
    for index in 0..total {
        if hits >= wanted {
            break;
        }
        let Some((_, run)) = runs.next_if(|(i, _)| *i == index) else {
            exploration.exhausted = tripped;
            break;
        };
        let run = run?;
        exploration.stats.absorb(&run.stats);
        let longer = exploration
            .deepest
            .as_ref()
            .is_none_or(|(_, deepest)| run.deepest.len() > deepest.len());
        if longer {
            exploration.deepest = Some((index, run.deepest));
        }
        hits += run.hits;
        exploration.results.push((index, run.output));
        if run.exhausted {
            exploration.exhausted = true;
            break;
        }
    }
    Ok(exploration)
}
