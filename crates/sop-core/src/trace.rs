//! Trace artifacts: a witness or counterexample rendered with atom names and
//! a snapshot of every instant, for external tooling and for `replay`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::action::{ActionKind, ActionRecord, Call, Catalog};
use crate::check::{Policy, Witness};
use crate::error::{ConfigError, ReplayError};
use crate::facts::{NamedFacts, StaticFacts, enumerate_initial};
use crate::schema::{Atom, Bounds, Time, Universe};
use crate::store::{Field, Store};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepView {
    pub kind: ActionKind,
    pub from: String,
    pub to: String,
    pub before: String,
    pub after: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Every time-varying field at one instant, keyed by atom name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotView {
    pub time: String,
    pub src: BTreeMap<String, String>,
    pub content: BTreeMap<String, String>,
    pub domain: BTreeMap<String, Vec<String>>,
    pub documents: BTreeMap<String, Vec<String>>,
    pub cookies: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceArtifact {
    pub bounds: Bounds,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<Policy>,
    pub facts: NamedFacts,
    /// Raw records, re-validated by `replay`.
    pub records: Vec<ActionRecord>,
    pub steps: Vec<StepView>,
    pub snapshots: Vec<SnapshotView>,
}

impl TraceArtifact {
    /// Replay the witness and render it. Fails if the trace is not a valid
    /// execution under its facts.
    pub fn build(
        universe: &Universe,
        catalog: &Catalog,
        witness: &Witness,
    ) -> Result<Self, ReplayError> {
        let stores = catalog.replay(universe, &witness.facts, &witness.records)?;
        let last = stores.last().cloned().unwrap_or_else(Store::initial);
        let snapshots = (0..=last.now().0)
            .map(|t| snapshot(universe, &last, Time(t)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            bounds: universe.bounds().clone(),
            policies: catalog.policies().to_vec(),
            facts: witness.facts.to_named(universe),
            records: witness.records.clone(),
            steps: witness
                .records
                .iter()
                .map(|record| step_view(universe, record))
                .collect(),
            snapshots,
        })
    }

    /// Resolve the artifact's universe and facts, then re-validate every step.
    pub fn replay(&self) -> Result<Vec<Store>, ReplayError> {
        let universe = Universe::new(self.bounds.clone())?;
        let facts = self.static_facts(&universe)?;
        Catalog::new(self.policies.iter().copied()).replay(&universe, &facts, &self.records)
    }

    fn static_facts(&self, universe: &Universe) -> Result<StaticFacts, ConfigError> {
        let spec = self.facts.resolve(universe)?;
        let complete = spec.dns.is_some()
            && spec.tables.is_some()
            && spec.scopes.is_some()
            && spec.contexts.is_some();
        if !complete {
            return Err(ConfigError::InvalidFact {
                reason: "trace artifact must fix every group of static facts".to_string(),
            });
        }
        enumerate_initial(universe, &spec)?
            .into_iter()
            .next()
            .ok_or(ConfigError::Unsatisfiable)
    }
}

fn names(universe: &Universe, atoms: impl IntoIterator<Item = Atom>) -> Vec<String> {
    atoms.into_iter().map(|atom| universe.name(atom)).collect()
}

fn step_view(universe: &Universe, record: &ActionRecord) -> StepView {
    let name = |atom: Atom| serde_json::Value::String(universe.name(atom));
    let list = |atoms: Vec<Atom>| serde_json::Value::from(names(universe, atoms));
    let optional = |atom: Option<Atom>| atom.map_or(serde_json::Value::Null, name);

    let mut fields = BTreeMap::new();
    match &record.call {
        Call::BrowserHttpRequest {
            url,
            doc,
            sent_cookies,
            received_cookies,
            response,
        } => {
            fields.insert("url".into(), name(url.atom()));
            fields.insert("doc".into(), name(doc.atom()));
            fields.insert(
                "sent_cookies".into(),
                list(sent_cookies.iter().map(|c| c.atom()).collect()),
            );
            fields.insert(
                "received_cookies".into(),
                list(received_cookies.iter().map(|c| c.atom()).collect()),
            );
            fields.insert("response".into(), optional(response.map(|r| r.atom())));
        }
        Call::XmlHttpRequest {
            url,
            sent_cookies,
            response,
        } => {
            fields.insert("url".into(), name(url.atom()));
            fields.insert(
                "sent_cookies".into(),
                list(sent_cookies.iter().map(|c| c.atom()).collect()),
            );
            fields.insert("response".into(), optional(response.map(|r| r.atom())));
        }
        Call::ReadDom { doc, result } => {
            fields.insert("doc".into(), name(doc.atom()));
            fields.insert("result".into(), optional(result.map(|r| r.atom())));
        }
        Call::WriteDom { doc, new_dom } => {
            fields.insert("doc".into(), name(doc.atom()));
            fields.insert("new_dom".into(), name(new_dom.atom()));
        }
        Call::SetDomain { doc, new_domain } => {
            fields.insert("doc".into(), name(doc.atom()));
            fields.insert(
                "new_domain".into(),
                list(new_domain.iter().map(|h| h.atom()).collect()),
            );
        }
    }
    StepView {
        kind: record.kind(),
        from: universe.endpoint_name(record.from),
        to: universe.endpoint_name(record.to),
        before: record.before.to_string(),
        after: record.after.to_string(),
        fields,
    }
}

/// Snapshot at `at`, read back from the final store's logs.
fn snapshot(universe: &Universe, last: &Store, at: Time) -> Result<SnapshotView, ReplayError> {
    let slice = |field: Field| {
        last.at(field, at).map_err(|err| ReplayError::Breach {
            step: at.0 as usize,
            reason: err.to_string(),
        })
    };
    let grouped = |field: Field| -> Result<BTreeMap<String, Vec<String>>, ReplayError> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for tuple in slice(field)?.iter() {
            out.entry(universe.name(tuple[0]))
                .or_default()
                .push(universe.name(tuple[1]));
        }
        Ok(out)
    };

    let documents = slice(Field::Documents)?;
    let live: Vec<Atom> = documents.iter().map(|tuple| tuple[1]).collect();
    let src = last
        .src()
        .iter()
        .filter(|tuple| live.contains(&tuple[0]))
        .map(|tuple| (universe.name(tuple[0]), universe.name(tuple[1])))
        .collect();
    let content = slice(Field::Content)?
        .iter()
        .map(|tuple| (universe.name(tuple[0]), universe.name(tuple[1])))
        .collect();

    Ok(SnapshotView {
        time: at.to_string(),
        src,
        content,
        domain: grouped(Field::Domain)?,
        documents: grouped(Field::Documents)?,
        cookies: grouped(Field::Cookies)?,
    })
}
