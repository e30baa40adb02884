//! Versioned, persistent model state.
//!
//! Each time-varying field is kept twice: the current slice (what actions
//! query) and an append-only log with a trailing `Time` column (what "value at
//! t" queries and trace artifacts use). Both are `Arc`-shared, so a branch
//! that leaves a field unchanged shares it with its parent and siblings.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::relation::{Relation, RelationError};
use crate::schema::{Atom, BrowserId, CookieId, DocumentId, HostId, ResourceId, Time, UrlId};

/// Time-varying relations of the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Document -> Resource (lone per document)
    Content,
    /// Document -> Host
    Domain,
    /// Browser -> Document
    Documents,
    /// Browser -> Cookie
    Cookies,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Content, Field::Domain, Field::Documents, Field::Cookies];

    fn slot(self) -> usize {
        match self {
            Field::Content => 0,
            Field::Domain => 1,
            Field::Documents => 2,
            Field::Cookies => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Content => "content",
            Field::Domain => "domain",
            Field::Documents => "documents",
            Field::Cookies => "cookies",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Store {
    now: Time,
    current: [Arc<Relation>; 4],
    log: [Arc<Relation>; 4],
    /// Document -> Url, fixed at creation.
    src: Arc<Relation>,
}

impl Store {
    /// The state at `T0`: no documents, no cookies.
    pub fn initial() -> Self {
        let empty = Arc::new(Relation::pairs(Vec::<(Atom, Atom)>::new()));
        let empty_log = Arc::new(empty.stamp(Time::ZERO.atom()));
        Self {
            now: Time::ZERO,
            current: std::array::from_fn(|_| Arc::clone(&empty)),
            log: std::array::from_fn(|_| Arc::clone(&empty_log)),
            src: empty,
        }
    }

    pub fn now(&self) -> Time {
        self.now
    }

    /// Current slice of `field`.
    pub fn slice(&self, field: Field) -> &Relation {
        &self.current[field.slot()]
    }

    /// Time-indexed log of `field` (`... x Time`).
    pub fn log(&self, field: Field) -> &Relation {
        &self.log[field.slot()]
    }

    /// Value of `field` at `at`, recovered from the log.
    pub fn at(&self, field: Field, at: Time) -> Result<Relation, RelationError> {
        self.log(field).restrict(at.atom())
    }

    pub fn src(&self) -> &Relation {
        &self.src
    }

    pub fn src_of(&self, doc: DocumentId) -> Option<UrlId> {
        self.src.value(&[doc.atom()]).and_then(UrlId::from_atom)
    }

    pub fn is_created(&self, doc: DocumentId) -> bool {
        self.src_of(doc).is_some()
    }

    pub fn content_of(&self, doc: DocumentId) -> Option<ResourceId> {
        self.slice(Field::Content)
            .value(&[doc.atom()])
            .and_then(ResourceId::from_atom)
    }

    pub fn domain_of(&self, doc: DocumentId) -> BTreeSet<HostId> {
        self.slice(Field::Domain)
            .successors(doc.atom())
            .filter_map(HostId::from_atom)
            .collect()
    }

    pub fn documents_of(&self, browser: BrowserId) -> impl Iterator<Item = DocumentId> + '_ {
        self.slice(Field::Documents)
            .successors(browser.atom())
            .filter_map(DocumentId::from_atom)
    }

    pub fn owns(&self, browser: BrowserId, doc: DocumentId) -> bool {
        self.slice(Field::Documents)
            .contains(&[browser.atom(), doc.atom()])
    }

    /// Browser holding `doc`, if it has been created.
    pub fn owner_of(&self, doc: DocumentId) -> Option<BrowserId> {
        self.slice(Field::Documents)
            .iter()
            .find(|tuple| tuple[1] == doc.atom())
            .and_then(|tuple| BrowserId::from_atom(tuple[0]))
    }

    pub fn cookies_of(&self, browser: BrowserId) -> impl Iterator<Item = CookieId> + '_ {
        self.slice(Field::Cookies)
            .successors(browser.atom())
            .filter_map(CookieId::from_atom)
    }

    pub fn holds_cookie(&self, browser: BrowserId, cookie: CookieId) -> bool {
        self.slice(Field::Cookies)
            .contains(&[browser.atom(), cookie.atom()])
    }

    /// Start a transition from this state to the next instant.
    pub fn begin(&self) -> Draft<'_> {
        Draft {
            base: self,
            next: self.current.clone(),
            created: None,
        }
    }
}

/// Pending transition. Fields not written keep their current slice.
#[derive(Debug)]
pub struct Draft<'a> {
    base: &'a Store,
    next: [Arc<Relation>; 4],
    created: Option<(DocumentId, UrlId)>,
}

impl Draft<'_> {
    pub fn slice(&self, field: Field) -> &Relation {
        &self.next[field.slot()]
    }

    pub fn set(&mut self, field: Field, value: Relation) -> Result<(), RelationError> {
        let expected = self.base.slice(field).arity();
        if value.arity() != expected {
            return Err(RelationError::ArityMismatch {
                op: "set",
                left: expected,
                right: value.arity(),
            });
        }
        self.next[field.slot()] = Arc::new(value);
        Ok(())
    }

    /// `field := field ++ value`
    pub fn override_with(&mut self, field: Field, value: &Relation) -> Result<(), RelationError> {
        let next = self.slice(field).override_with(value)?;
        self.set(field, next)
    }

    /// `field := field + value`
    pub fn extend(&mut self, field: Field, value: &Relation) -> Result<(), RelationError> {
        let next = self.slice(field).union(value)?;
        self.set(field, next)
    }

    pub fn create(&mut self, doc: DocumentId, url: UrlId) {
        self.created = Some((doc, url));
    }

    /// Fields whose slice differs from the base state.
    pub fn changed(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|field| self.slice(*field) != self.base.slice(*field))
            .collect()
    }

    /// Advance the clock and append every slice to its log.
    pub fn commit(self) -> Result<Store, RelationError> {
        let after = self.base.now.next();
        let mut log = self.base.log.clone();
        for field in Field::ALL {
            let stamped = self.next[field.slot()].stamp(after.atom());
            log[field.slot()] = Arc::new(self.base.log(field).union(&stamped)?);
        }
        let src = match self.created {
            Some((doc, url)) => Arc::new(self.base.src.with(vec![doc.atom(), url.atom()])?),
            None => Arc::clone(&self.base.src),
        };
        Ok(Store {
            now: after,
            current: self.next,
            log,
            src,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_advances_clock_and_logs_every_field() {
        let store = Store::initial();
        let mut draft = store.begin();
        draft
            .extend(
                Field::Documents,
                &Relation::pairs([(BrowserId(0), DocumentId(0))]),
            )
            .expect("extend");
        draft.create(DocumentId(0), UrlId(1));
        assert_eq!(draft.changed(), vec![Field::Documents]);
        let next = draft.commit().expect("commit");

        assert_eq!(next.now(), Time(1));
        assert!(next.owns(BrowserId(0), DocumentId(0)));
        assert_eq!(next.src_of(DocumentId(0)), Some(UrlId(1)));
        assert!(next.at(Field::Documents, Time(0)).expect("t0").is_empty());
        assert_eq!(
            next.at(Field::Documents, Time(1)).expect("t1"),
            Relation::pairs([(BrowserId(0), DocumentId(0))])
        );
        // untouched fields are carried forward into the log
        assert!(next.log(Field::Content).is_empty());
        // the parent state is unchanged
        assert!(!store.owns(BrowserId(0), DocumentId(0)));
        assert_eq!(store.now(), Time(0));
    }

    #[test]
    fn override_replaces_content_per_document() {
        let store = Store::initial();
        let mut draft = store.begin();
        draft
            .override_with(
                Field::Content,
                &Relation::pairs([(DocumentId(0), ResourceId(0))]),
            )
            .expect("first");
        let first = draft.commit().expect("commit");
        let mut draft = first.begin();
        draft
            .override_with(
                Field::Content,
                &Relation::pairs([(DocumentId(0), ResourceId(1))]),
            )
            .expect("second");
        let second = draft.commit().expect("commit");

        assert_eq!(second.content_of(DocumentId(0)), Some(ResourceId(1)));
        assert_eq!(first.content_of(DocumentId(0)), Some(ResourceId(0)));
        assert_eq!(
            second.at(Field::Content, Time(1)).expect("t1"),
            Relation::pairs([(DocumentId(0), ResourceId(0))])
        );
    }

    #[test]
    fn set_rejects_wrong_arity() {
        let store = Store::initial();
        let mut draft = store.begin();
        let unary = Relation::empty(1).expect("unary");
        assert!(draft.set(Field::Cookies, unary).is_err());
    }
}
