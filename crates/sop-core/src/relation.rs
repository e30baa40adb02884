//! Finite relations over atoms.
//!
//! A `Relation` is an arity-checked, ordered set of atom tuples. Every
//! operation is pure: inputs are borrowed and a new relation is returned.
//! Tuples are kept in a `BTreeSet`, so membership and prefix lookups are
//! logarithmic and iteration order is deterministic.

use std::collections::BTreeSet;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::Atom;

pub type Tuple = Vec<Atom>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RelationError {
    #[error("relations must have arity >= 1")]
    ZeroArity,
    #[error("{op}: arity mismatch ({left} vs {right})")]
    ArityMismatch {
        op: &'static str,
        left: usize,
        right: usize,
    },
    #[error("{op}: relation of arity {arity} is too narrow")]
    TooNarrow { op: &'static str, arity: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Relation {
    arity: usize,
    tuples: BTreeSet<Tuple>,
}

impl Relation {
    pub fn empty(arity: usize) -> Result<Self, RelationError> {
        if arity == 0 {
            return Err(RelationError::ZeroArity);
        }
        Ok(Self {
            arity,
            tuples: BTreeSet::new(),
        })
    }

    pub fn from_tuples<I>(arity: usize, tuples: I) -> Result<Self, RelationError>
    where
        I: IntoIterator<Item = Tuple>,
    {
        let mut rel = Self::empty(arity)?;
        for tuple in tuples {
            rel.push(tuple)?;
        }
        Ok(rel)
    }

    /// Binary relation from pairs.
    pub fn pairs<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<Atom>,
        B: Into<Atom>,
    {
        Self {
            arity: 2,
            tuples: pairs
                .into_iter()
                .map(|(a, b)| vec![a.into(), b.into()])
                .collect(),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Atom]> {
        self.tuples.iter().map(Vec::as_slice)
    }

    pub fn contains(&self, tuple: &[Atom]) -> bool {
        tuple.len() == self.arity && self.tuples.contains(tuple)
    }

    /// Copy of `self` with one more tuple.
    pub fn with(&self, tuple: Tuple) -> Result<Self, RelationError> {
        let mut next = self.clone();
        next.push(tuple)?;
        Ok(next)
    }

    fn push(&mut self, tuple: Tuple) -> Result<(), RelationError> {
        if tuple.len() != self.arity {
            return Err(RelationError::ArityMismatch {
                op: "insert",
                left: self.arity,
                right: tuple.len(),
            });
        }
        self.tuples.insert(tuple);
        Ok(())
    }

    /// Tuples whose leading columns equal `prefix`, in order.
    pub fn with_prefix<'a>(&'a self, prefix: &'a [Atom]) -> impl Iterator<Item = &'a [Atom]> + 'a {
        self.tuples
            .range::<[Atom], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |tuple| tuple.starts_with(prefix))
            .map(|tuple| &tuple[prefix.len()..])
    }

    /// Second column of every tuple whose first column is `key`.
    pub fn successors(&self, key: Atom) -> impl Iterator<Item = Atom> + '_ {
        self.tuples
            .range(vec![key]..)
            .take_while(move |tuple| tuple.first() == Some(&key))
            .filter_map(|tuple| tuple.get(1).copied())
    }

    /// Last column of every tuple keyed by `key` (all columns but the last).
    pub fn values<'a>(&'a self, key: &'a [Atom]) -> impl Iterator<Item = Atom> + 'a {
        let expected = self.arity.checked_sub(1) == Some(key.len());
        self.with_prefix(key)
            .filter(move |_| expected)
            .filter_map(|rest| rest.first().copied())
    }

    /// The single value keyed by `key`, if exactly one exists.
    pub fn value(&self, key: &[Atom]) -> Option<Atom> {
        let mut values = self.values(key);
        let first = values.next()?;
        values.next().is_none().then_some(first)
    }

    /// Image of `key`: the relation of remaining columns.
    pub fn image(&self, key: &[Atom]) -> Result<Self, RelationError> {
        if key.len() >= self.arity {
            return Err(RelationError::TooNarrow {
                op: "image",
                arity: self.arity,
            });
        }
        Self::from_tuples(
            self.arity - key.len(),
            self.with_prefix(key).map(<[Atom]>::to_vec),
        )
    }

    /// Set of leading keys (all columns but the last).
    pub fn keys(&self) -> BTreeSet<Tuple> {
        self.tuples
            .iter()
            .map(|tuple| tuple[..self.arity - 1].to_vec())
            .collect()
    }

    pub fn union(&self, other: &Self) -> Result<Self, RelationError> {
        self.same_arity("union", other)?;
        let mut tuples = self.tuples.clone();
        tuples.extend(other.tuples.iter().cloned());
        Ok(Self {
            arity: self.arity,
            tuples,
        })
    }

    /// Relational override (`self ++ other`): all of `other`, plus tuples of
    /// `self` whose leading key does not appear in `other`.
    pub fn override_with(&self, other: &Self) -> Result<Self, RelationError> {
        self.same_arity("override", other)?;
        let replaced = other.keys();
        let mut tuples: BTreeSet<Tuple> = self
            .tuples
            .iter()
            .filter(|tuple| !replaced.contains(&tuple[..self.arity - 1]))
            .cloned()
            .collect();
        tuples.extend(other.tuples.iter().cloned());
        Ok(Self {
            arity: self.arity,
            tuples,
        })
    }

    /// Relational composition (`self . other`): the last column of `self` is
    /// matched against the first column of `other` and both are dropped.
    pub fn join(&self, other: &Self) -> Result<Self, RelationError> {
        let arity = (self.arity + other.arity)
            .checked_sub(2)
            .filter(|arity| *arity > 0)
            .ok_or(RelationError::TooNarrow {
                op: "join",
                arity: self.arity.min(other.arity),
            })?;
        let mut tuples = BTreeSet::new();
        for left in &self.tuples {
            let (pivot, head) = left.split_last().ok_or(RelationError::ZeroArity)?;
            for rest in other.with_prefix(std::slice::from_ref(pivot)) {
                let mut tuple = Vec::with_capacity(arity);
                tuple.extend_from_slice(head);
                tuple.extend_from_slice(rest);
                tuples.insert(tuple);
            }
        }
        Ok(Self { arity, tuples })
    }

    /// Slice of a time-indexed relation: tuples whose trailing column is `at`,
    /// with that column projected away.
    pub fn restrict(&self, at: Atom) -> Result<Self, RelationError> {
        if self.arity < 2 {
            return Err(RelationError::TooNarrow {
                op: "restrict",
                arity: self.arity,
            });
        }
        let tuples = self
            .tuples
            .iter()
            .filter(|tuple| tuple.last() == Some(&at))
            .map(|tuple| tuple[..self.arity - 1].to_vec())
            .collect();
        Ok(Self {
            arity: self.arity - 1,
            tuples,
        })
    }

    /// Append `at` as a trailing column to every tuple; inverse of `restrict`.
    pub fn stamp(&self, at: Atom) -> Self {
        Self {
            arity: self.arity + 1,
            tuples: self
                .tuples
                .iter()
                .map(|tuple| {
                    let mut stamped = tuple.clone();
                    stamped.push(at);
                    stamped
                })
                .collect(),
        }
    }

    /// Reverse a binary relation.
    pub fn transpose(&self) -> Result<Self, RelationError> {
        if self.arity != 2 {
            return Err(RelationError::ArityMismatch {
                op: "transpose",
                left: self.arity,
                right: 2,
            });
        }
        Ok(Self {
            arity: 2,
            tuples: self
                .tuples
                .iter()
                .map(|tuple| vec![tuple[1], tuple[0]])
                .collect(),
        })
    }

    fn same_arity(&self, op: &'static str, other: &Self) -> Result<(), RelationError> {
        if self.arity != other.arity {
            return Err(RelationError::ArityMismatch {
                op,
                left: self.arity,
                right: other.arity,
            });
        }
        Ok(())
    }
}
