//! Static facts: the parts of the world that never change during an
//! execution (DNS map, server resource tables, cookie scopes, script
//! contexts), and enumeration of every admissible assignment of them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::relation::Relation;
use crate::schema::{
    CookieId, DocumentId, HostId, PathId, ResourceId, ScriptId, ServerId, Sort, Universe,
    host_suffix_matches,
};

/// Upper bound on the number of initial states a search will enumerate.
pub const MAX_INITIAL_STATES: u128 = 1 << 16;

/// One complete assignment of static facts.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StaticFacts {
    /// Host -> Server
    pub dns: Relation,
    /// Server -> Path -> Resource
    pub tables: Relation,
    /// Cookie -> Host
    pub scopes: Relation,
    /// Script -> Document
    pub contexts: Relation,
}

impl StaticFacts {
    pub fn servers_for(&self, host: HostId) -> impl Iterator<Item = ServerId> + '_ {
        self.dns
            .successors(host.atom())
            .filter_map(ServerId::from_atom)
    }

    pub fn resolves(&self, host: HostId, server: ServerId) -> bool {
        self.dns.contains(&[host.atom(), server.atom()])
    }

    /// Resource stored by `server` at `path`; `None` when nothing is stored or
    /// the URL has no path.
    pub fn resource_at(&self, server: ServerId, path: Option<PathId>) -> Option<ResourceId> {
        let path = path?;
        self.tables
            .value(&[server.atom(), path.atom()])
            .and_then(ResourceId::from_atom)
    }

    pub fn context_of(&self, script: ScriptId) -> Option<DocumentId> {
        self.contexts
            .value(&[script.atom()])
            .and_then(DocumentId::from_atom)
    }

    pub fn scopes_of(&self, cookie: CookieId) -> impl Iterator<Item = HostId> + '_ {
        self.scopes
            .successors(cookie.atom())
            .filter_map(HostId::from_atom)
    }

    /// Whether `cookie` may be sent to or set by `host`.
    pub fn cookie_matches(&self, universe: &Universe, cookie: CookieId, host: HostId) -> bool {
        let target = universe.host_name(host);
        self.scopes_of(cookie)
            .any(|scope| host_suffix_matches(target, universe.host_name(scope)))
    }

    /// Servers that share a host must expose identical resource tables.
    pub fn check_server_assumption(&self, universe: &Universe) -> Result<(), ConfigError> {
        for host in universe.hosts() {
            let servers: Vec<ServerId> = self.servers_for(host).collect();
            for (i, left) in servers.iter().enumerate() {
                for right in &servers[i + 1..] {
                    let left_table = self.tables.image(&[left.atom()])?;
                    let right_table = self.tables.image(&[right.atom()])?;
                    if left_table != right_table {
                        return Err(ConfigError::ServerAssumption {
                            host: universe.host_name(host).to_string(),
                            left: universe.name(left.atom()),
                            right: universe.name(right.atom()),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn to_named(&self, universe: &Universe) -> NamedFacts {
        let mut dns = BTreeMap::new();
        for host in universe.hosts() {
            dns.insert(
                universe.host_name(host).to_string(),
                self.servers_for(host)
                    .map(|server| universe.name(server.atom()))
                    .collect(),
            );
        }
        let mut tables = BTreeMap::new();
        for server in universe.servers() {
            let mut table = BTreeMap::new();
            for path in universe.paths() {
                if let Some(resource) = self.resource_at(server, Some(path)) {
                    table.insert(universe.name(path.atom()), universe.name(resource.atom()));
                }
            }
            tables.insert(universe.name(server.atom()), table);
        }
        let mut cookie_scopes = BTreeMap::new();
        for cookie in universe.cookies() {
            cookie_scopes.insert(
                universe.name(cookie.atom()),
                self.scopes_of(cookie)
                    .map(|host| universe.host_name(host).to_string())
                    .collect(),
            );
        }
        let mut script_contexts = BTreeMap::new();
        for script in universe.scripts() {
            if let Some(doc) = self.context_of(script) {
                script_contexts.insert(universe.name(script.atom()), universe.name(doc.atom()));
            }
        }
        NamedFacts {
            dns: Some(dns),
            tables: Some(tables),
            cookie_scopes: Some(cookie_scopes),
            script_contexts: Some(script_contexts),
        }
    }
}

// =============================================================================
// Fixed facts (by name)
// =============================================================================

/// Static facts written with atom names. Each group left as `None` is
/// enumerated by the search instead of being fixed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedFacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<BTreeMap<String, BTreeMap<String, String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_scopes: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_contexts: Option<BTreeMap<String, String>>,
}

impl NamedFacts {
    pub fn is_empty(&self) -> bool {
        self.dns.is_none()
            && self.tables.is_none()
            && self.cookie_scopes.is_none()
            && self.script_contexts.is_none()
    }

    pub fn resolve(&self, universe: &Universe) -> Result<FactSpec, ConfigError> {
        let dns = self
            .dns
            .as_ref()
            .map(|dns| {
                let mut pairs = Vec::new();
                for (host, servers) in dns {
                    let host = universe.lookup(Sort::Host, host)?;
                    for server in servers {
                        pairs.push((host, universe.lookup(Sort::Server, server)?));
                    }
                }
                Ok::<_, ConfigError>(Relation::pairs(pairs))
            })
            .transpose()?;

        let tables = self
            .tables
            .as_ref()
            .map(|tables| {
                let mut tuples = Vec::new();
                for (server, entries) in tables {
                    let server = universe.lookup(Sort::Server, server)?;
                    for (path, resource) in entries {
                        tuples.push(vec![
                            server,
                            universe.lookup(Sort::Path, path)?,
                            universe.lookup(Sort::Resource, resource)?,
                        ]);
                    }
                }
                Ok::<_, ConfigError>(Relation::from_tuples(3, tuples)?)
            })
            .transpose()?;

        let scopes = self
            .cookie_scopes
            .as_ref()
            .map(|scopes| {
                let mut pairs = Vec::new();
                for (cookie, hosts) in scopes {
                    let cookie = universe.lookup(Sort::Cookie, cookie)?;
                    for host in hosts {
                        pairs.push((cookie, universe.lookup(Sort::Host, host)?));
                    }
                }
                Ok::<_, ConfigError>(Relation::pairs(pairs))
            })
            .transpose()?;

        let contexts = self
            .script_contexts
            .as_ref()
            .map(|contexts| {
                let mut pairs = Vec::new();
                for (script, doc) in contexts {
                    pairs.push((
                        universe.lookup(Sort::Script, script)?,
                        universe.lookup(Sort::Document, doc)?,
                    ));
                }
                Ok::<_, ConfigError>(Relation::pairs(pairs))
            })
            .transpose()?;

        Ok(FactSpec {
            dns,
            tables,
            scopes,
            contexts,
        })
    }
}

/// Partially fixed static facts, resolved to atoms.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FactSpec {
    pub dns: Option<Relation>,
    pub tables: Option<Relation>,
    pub scopes: Option<Relation>,
    pub contexts: Option<Relation>,
}

impl FactSpec {
    pub fn fixed(facts: StaticFacts) -> Self {
        Self {
            dns: Some(facts.dns),
            tables: Some(facts.tables),
            scopes: Some(facts.scopes),
            contexts: Some(facts.contexts),
        }
    }
}

// =============================================================================
// Enumeration
// =============================================================================

/// Every admissible assignment of static facts, in deterministic order.
///
/// Fixed groups are validated instead of enumerated. Assignments violating the
/// server assumption are dropped; a fixed assignment that violates it, or an
/// empty result, is a configuration error.
pub fn enumerate_initial(
    universe: &Universe,
    spec: &FactSpec,
) -> Result<Vec<StaticFacts>, ConfigError> {
    let count = assignment_count(universe, spec);
    if count > MAX_INITIAL_STATES {
        return Err(ConfigError::TooManyInitialStates {
            count,
            max: MAX_INITIAL_STATES,
        });
    }

    let dns_choices = match &spec.dns {
        Some(fixed) => vec![fixed.clone()],
        None => dns_assignments(universe),
    };
    let table_choices = match &spec.tables {
        Some(fixed) => {
            validate_tables(universe, fixed)?;
            vec![fixed.clone()]
        }
        None => table_assignments(universe)?,
    };
    let scope_choices = match &spec.scopes {
        Some(fixed) => vec![fixed.clone()],
        None => scope_assignments(universe),
    };
    let context_choices = match &spec.contexts {
        Some(fixed) => {
            validate_contexts(universe, fixed)?;
            vec![fixed.clone()]
        }
        None => context_assignments(universe),
    };

    let both_fixed = spec.dns.is_some() && spec.tables.is_some();
    let mut out = Vec::new();
    for dns in &dns_choices {
        for tables in &table_choices {
            let routing = StaticFacts {
                dns: dns.clone(),
                tables: tables.clone(),
                scopes: Relation::pairs(Vec::<(CookieId, HostId)>::new()),
                contexts: Relation::pairs(Vec::<(ScriptId, DocumentId)>::new()),
            };
            if let Err(err) = routing.check_server_assumption(universe) {
                if both_fixed {
                    return Err(err);
                }
                continue;
            }
            for scopes in &scope_choices {
                for contexts in &context_choices {
                    out.push(StaticFacts {
                        dns: dns.clone(),
                        tables: tables.clone(),
                        scopes: scopes.clone(),
                        contexts: contexts.clone(),
                    });
                }
            }
        }
    }

    if out.is_empty() {
        return Err(ConfigError::Unsatisfiable);
    }
    tracing::debug!(initial_states = out.len(), "enumerated static facts");
    Ok(out)
}

/// Number of raw assignments before the server assumption filters them,
/// computed without materializing any. Saturates at `u128::MAX`.
fn assignment_count(universe: &Universe, spec: &FactSpec) -> u128 {
    let size = |n: usize| n as u128;
    let power = |base: u128, exp: usize| {
        u32::try_from(exp)
            .ok()
            .and_then(|exp| base.checked_pow(exp))
            .unwrap_or(u128::MAX)
    };
    let hosts = universe.hosts().count();
    let servers = universe.servers().count();
    let paths = universe.paths().count();

    let dns = match spec.dns {
        Some(_) => 1,
        None => power(2, servers.saturating_mul(hosts)),
    };
    let tables = match spec.tables {
        Some(_) => 1,
        None => power(
            size(universe.resources().count()) + 1,
            servers.saturating_mul(paths),
        ),
    };
    let scopes = match spec.scopes {
        Some(_) => 1,
        None => power(
            power(2, hosts).saturating_sub(1),
            universe.cookies().count(),
        ),
    };
    let contexts = match spec.contexts {
        Some(_) => 1,
        None => power(size(universe.documents().count()), universe.scripts().count()),
    };
    [dns, tables, scopes, contexts]
        .into_iter()
        .try_fold(1u128, u128::checked_mul)
        .unwrap_or(u128::MAX)
}

fn validate_tables(universe: &Universe, tables: &Relation) -> Result<(), ConfigError> {
    for server in universe.servers() {
        for path in universe.paths() {
            if tables.values(&[server.atom(), path.atom()]).count() > 1 {
                return Err(ConfigError::InvalidFact {
                    reason: format!(
                        "{} stores more than one resource at {}",
                        universe.name(server.atom()),
                        universe.name(path.atom())
                    ),
                });
            }
        }
    }
    Ok(())
}

fn validate_contexts(universe: &Universe, contexts: &Relation) -> Result<(), ConfigError> {
    for script in universe.scripts() {
        if contexts.values(&[script.atom()]).count() != 1 {
            return Err(ConfigError::InvalidFact {
                reason: format!(
                    "{} must have exactly one context document",
                    universe.name(script.atom())
                ),
            });
        }
    }
    Ok(())
}

fn dns_assignments(universe: &Universe) -> Vec<Relation> {
    let servers: Vec<ServerId> = universe.servers().collect();
    let per_host: Vec<Vec<Vec<(HostId, ServerId)>>> = universe
        .hosts()
        .map(|host| {
            subsets(&servers)
                .into_iter()
                .map(|set| set.into_iter().map(|server| (host, server)).collect())
                .collect()
        })
        .collect();
    cartesian(&per_host)
        .into_iter()
        .map(|choice| Relation::pairs(choice.into_iter().flatten()))
        .collect()
}

fn table_assignments(universe: &Universe) -> Result<Vec<Relation>, ConfigError> {
    let resources: Vec<Option<ResourceId>> = std::iter::once(None)
        .chain(universe.resources().map(Some))
        .collect();
    let mut slots = Vec::new();
    for server in universe.servers() {
        for path in universe.paths() {
            slots.push(
                resources
                    .iter()
                    .map(|resource| resource.map(|resource| (server, path, resource)))
                    .collect::<Vec<_>>(),
            );
        }
    }
    cartesian(&slots)
        .into_iter()
        .map(|choice| {
            Relation::from_tuples(
                3,
                choice.into_iter().flatten().map(|(server, path, resource)| {
                    vec![server.atom(), path.atom(), resource.atom()]
                }),
            )
            .map_err(ConfigError::from)
        })
        .collect()
}

fn scope_assignments(universe: &Universe) -> Vec<Relation> {
    let hosts: Vec<HostId> = universe.hosts().collect();
    let per_cookie: Vec<Vec<Vec<(CookieId, HostId)>>> = universe
        .cookies()
        .map(|cookie| {
            subsets(&hosts)
                .into_iter()
                .filter(|set| !set.is_empty())
                .map(|set| set.into_iter().map(|host| (cookie, host)).collect())
                .collect()
        })
        .collect();
    cartesian(&per_cookie)
        .into_iter()
        .map(|choice| Relation::pairs(choice.into_iter().flatten()))
        .collect()
}

fn context_assignments(universe: &Universe) -> Vec<Relation> {
    let docs: Vec<DocumentId> = universe.documents().collect();
    let per_script: Vec<Vec<(ScriptId, DocumentId)>> = universe
        .scripts()
        .map(|script| docs.iter().map(|doc| (script, *doc)).collect())
        .collect();
    cartesian(&per_script)
        .into_iter()
        .map(Relation::pairs)
        .collect()
}

/// All subsets of `items`, in ascending bitmask order (empty set first).
pub fn subsets<T: Copy>(items: &[T]) -> Vec<Vec<T>> {
    (0u32..1 << items.len())
        .map(|mask| {
            items
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, item)| *item)
                .collect()
        })
        .collect()
}

/// Same as [`subsets`], collected into ordered sets.
pub fn subset_sets<T: Copy + Ord>(items: &[T]) -> Vec<BTreeSet<T>> {
    subsets(items)
        .into_iter()
        .map(|set| set.into_iter().collect())
        .collect()
}

/// Cartesian product of choice lists; the last list varies fastest.
fn cartesian<T: Clone>(choices: &[Vec<T>]) -> Vec<Vec<T>> {
    let mut out: Vec<Vec<T>> = vec![Vec::new()];
    for options in choices {
        let mut next = Vec::with_capacity(out.len() * options.len());
        for prefix in &out {
            for option in options {
                let mut row = prefix.clone();
                row.push(option.clone());
                next.push(row);
            }
        }
        out = next;
    }
    out
}
