//! Action catalog: the state-transition rules of the model.
//!
//! Every action kind declares role constraints on `from`/`to`, a precondition
//! evaluated against the store at `before`, an effect producing the store at
//! `after`, and a frame listing the fields it must leave unchanged. Applying a
//! binding never mutates the input store; a refused binding produces nothing.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::check::Policy;
use crate::error::ReplayError;
use crate::facts::{StaticFacts, subset_sets};
use crate::relation::{Relation, RelationError};
use crate::schema::{
    BrowserId, CookieId, DocumentId, Endpoint, HostId, ResourceId, ScriptId, ServerId, Time, Url,
    UrlId, Universe,
};
use crate::store::{Field, Store};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    BrowserHttpRequest,
    XmlHttpRequest,
    ReadDom,
    WriteDom,
    SetDomain,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::BrowserHttpRequest,
        ActionKind::XmlHttpRequest,
        ActionKind::ReadDom,
        ActionKind::WriteDom,
        ActionKind::SetDomain,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::BrowserHttpRequest => "browser_http_request",
            ActionKind::XmlHttpRequest => "xml_http_request",
            ActionKind::ReadDom => "read_dom",
            ActionKind::WriteDom => "write_dom",
            ActionKind::SetDomain => "set_domain",
        }
    }

    /// Fields the action asserts unchanged.
    pub fn frame(self) -> &'static [Field] {
        match self {
            ActionKind::BrowserHttpRequest => &[],
            ActionKind::XmlHttpRequest | ActionKind::ReadDom => &Field::ALL,
            ActionKind::WriteDom => &[Field::Domain, Field::Documents, Field::Cookies],
            ActionKind::SetDomain => &[Field::Content, Field::Documents, Field::Cookies],
        }
    }

    pub fn is_http(self) -> bool {
        matches!(
            self,
            ActionKind::BrowserHttpRequest | ActionKind::XmlHttpRequest
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific fields of an action. `response` and `result` are derived
/// from the state but recorded so a trace can be checked on its own.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Call {
    BrowserHttpRequest {
        url: UrlId,
        doc: DocumentId,
        sent_cookies: BTreeSet<CookieId>,
        received_cookies: BTreeSet<CookieId>,
        response: Option<ResourceId>,
    },
    XmlHttpRequest {
        url: UrlId,
        sent_cookies: BTreeSet<CookieId>,
        response: Option<ResourceId>,
    },
    ReadDom {
        doc: DocumentId,
        result: Option<ResourceId>,
    },
    WriteDom {
        doc: DocumentId,
        new_dom: ResourceId,
    },
    SetDomain {
        doc: DocumentId,
        new_domain: BTreeSet<HostId>,
    },
}

impl Call {
    pub fn kind(&self) -> ActionKind {
        match self {
            Call::BrowserHttpRequest { .. } => ActionKind::BrowserHttpRequest,
            Call::XmlHttpRequest { .. } => ActionKind::XmlHttpRequest,
            Call::ReadDom { .. } => ActionKind::ReadDom,
            Call::WriteDom { .. } => ActionKind::WriteDom,
            Call::SetDomain { .. } => ActionKind::SetDomain,
        }
    }

    /// Document the call targets, for DOM operations and page loads.
    pub fn doc(&self) -> Option<DocumentId> {
        match self {
            Call::BrowserHttpRequest { doc, .. }
            | Call::ReadDom { doc, .. }
            | Call::WriteDom { doc, .. }
            | Call::SetDomain { doc, .. } => Some(*doc),
            Call::XmlHttpRequest { .. } => None,
        }
    }

    pub fn url(&self) -> Option<UrlId> {
        match self {
            Call::BrowserHttpRequest { url, .. } | Call::XmlHttpRequest { url, .. } => Some(*url),
            _ => None,
        }
    }
}

/// A candidate action before it is placed on the timeline.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Binding {
    pub from: Endpoint,
    pub to: Endpoint,
    pub call: Call,
}

impl Binding {
    pub fn kind(&self) -> ActionKind {
        self.call.kind()
    }
}

/// Immutable entry of the execution transcript.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionRecord {
    pub from: Endpoint,
    pub to: Endpoint,
    pub before: Time,
    pub after: Time,
    #[serde(flatten)]
    pub call: Call,
}

impl ActionRecord {
    pub fn kind(&self) -> ActionKind {
        self.call.kind()
    }

    pub fn binding(&self) -> Binding {
        Binding {
            from: self.from,
            to: self.to,
            call: self.call.clone(),
        }
    }
}

/// Why a binding is not a valid transition from the current state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Refusal {
    #[error("{kind} requires `{side}` to be a {expected}")]
    Role {
        kind: ActionKind,
        side: &'static str,
        expected: &'static str,
    },
    #[error("{what} is outside the universe")]
    OutOfUniverse { what: String },
    #[error("server is not reachable via DNS for the request host")]
    Unreachable,
    #[error("document already exists")]
    DocumentExists,
    #[error("cookie {0:?} is not held by the sending browser")]
    CookieNotHeld(CookieId),
    #[error("cookie {0:?} is not scoped to the request host")]
    CookieOutOfScope(CookieId),
    #[error("response does not match the server's resource at the request path")]
    ResponseMismatch,
    #[error("script's context document has not been loaded")]
    ScriptInactive,
    #[error("target browser does not host the script")]
    NotHostBrowser,
    #[error("document is neither the script's context nor held by the browser")]
    DocumentInaccessible,
    #[error("result does not match the document content")]
    ResultMismatch,
    #[error("only the script's context document may change its domain")]
    NotContext,
    #[error("new domain must name at least one host")]
    EmptyDomain,
    #[error("forbidden by {0}")]
    Policy(Policy),
}

#[derive(Debug, Error, Clone)]
pub enum ApplyError {
    #[error(transparent)]
    Refused(#[from] Refusal),
    #[error("{0}")]
    Breach(String),
}

impl From<RelationError> for ApplyError {
    fn from(err: RelationError) -> Self {
        ApplyError::Breach(err.to_string())
    }
}

/// Read-only view an action is evaluated against.
#[derive(Clone, Copy, Debug)]
pub struct Ctx<'a> {
    pub universe: &'a Universe,
    pub facts: &'a StaticFacts,
    pub store: &'a Store,
}

impl Ctx<'_> {
    /// Context document and the browser that currently holds it.
    pub fn host_of(&self, script: ScriptId) -> Option<(DocumentId, BrowserId)> {
        let doc = self.facts.context_of(script)?;
        let browser = self.store.owner_of(doc)?;
        Some((doc, browser))
    }

    fn url(&self, id: UrlId) -> Result<&Url, Refusal> {
        self.universe.url(id).ok_or_else(|| Refusal::OutOfUniverse {
            what: format!("url {}", id.0),
        })
    }

    fn endpoint(&self, endpoint: Endpoint) -> Result<(), Refusal> {
        let bounds = self.universe.bounds();
        let (what, index, size) = match endpoint {
            Endpoint::Browser(id) => ("browser", id.0, bounds.browsers),
            Endpoint::Script(id) => ("script", id.0, bounds.scripts),
            Endpoint::Server(id) => ("server", id.0, bounds.servers),
        };
        if index >= size {
            return Err(Refusal::OutOfUniverse {
                what: format!("{what} {index}"),
            });
        }
        Ok(())
    }

    fn accessible_docs(&self, context: DocumentId, browser: BrowserId) -> BTreeSet<DocumentId> {
        std::iter::once(context)
            .chain(self.store.documents_of(browser))
            .collect()
    }
}

/// Outcome of applying a binding.
#[derive(Clone, Debug)]
pub struct Transition {
    pub record: ActionRecord,
    pub store: Store,
}

/// The set of action rules, plus any policies enforced as extra facts.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    policies: Vec<Policy>,
}

impl Catalog {
    pub fn new(policies: impl IntoIterator<Item = Policy>) -> Self {
        let mut policies: Vec<Policy> = policies.into_iter().collect();
        policies.sort();
        policies.dedup();
        Self { policies }
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Every valid binding from the current state, in catalog order.
    pub fn enabled(&self, ctx: &Ctx<'_>) -> Vec<Binding> {
        self.candidates(ctx)
            .into_iter()
            .filter(|binding| self.check(ctx, binding).is_ok())
            .collect()
    }

    /// Structurally plausible bindings: action kinds in catalog order, then
    /// bindings ordered by (from, to, fields).
    pub fn candidates(&self, ctx: &Ctx<'_>) -> Vec<Binding> {
        let mut out = Vec::new();
        browser_requests(ctx, &mut out);
        xml_http_requests(ctx, &mut out);
        dom_operations(ctx, &mut out);
        out
    }

    pub fn check(&self, ctx: &Ctx<'_>, binding: &Binding) -> Result<(), Refusal> {
        precondition(ctx, binding)?;
        for policy in &self.policies {
            if !policy.permits(ctx, binding) {
                return Err(Refusal::Policy(*policy));
            }
        }
        Ok(())
    }

    pub fn apply(&self, ctx: &Ctx<'_>, binding: &Binding) -> Result<Transition, ApplyError> {
        self.check(ctx, binding)?;
        let store = effect(ctx, binding)?;
        Ok(Transition {
            record: ActionRecord {
                from: binding.from,
                to: binding.to,
                before: ctx.store.now(),
                after: store.now(),
                call: binding.call.clone(),
            },
            store,
        })
    }

    /// Re-validate a recorded trace step by step; returns the store at every
    /// instant, starting with `T0`.
    pub fn replay(
        &self,
        universe: &Universe,
        facts: &StaticFacts,
        records: &[ActionRecord],
    ) -> Result<Vec<Store>, ReplayError> {
        facts.check_server_assumption(universe)?;
        let mut current = Store::initial();
        let mut stores = vec![current.clone()];
        for (step, record) in records.iter().enumerate() {
            if record.before != current.now() {
                return Err(ReplayError::Clock {
                    step,
                    expected: current.now().to_string(),
                    found: record.before.to_string(),
                });
            }
            let ctx = Ctx {
                universe,
                facts,
                store: &current,
            };
            let transition = match self.apply(&ctx, &record.binding()) {
                Ok(transition) => transition,
                Err(ApplyError::Refused(refusal)) => {
                    return Err(ReplayError::Refused { step, refusal });
                }
                Err(ApplyError::Breach(reason)) => {
                    return Err(ReplayError::Breach { step, reason });
                }
            };
            if transition.record != *record {
                return Err(ReplayError::Diverged { step });
            }
            current = transition.store;
            stores.push(current.clone());
        }
        Ok(stores)
    }
}

// =============================================================================
// Preconditions
// =============================================================================

fn role(kind: ActionKind, side: &'static str, expected: &'static str) -> Refusal {
    Refusal::Role {
        kind,
        side,
        expected,
    }
}

fn browser_of(kind: ActionKind, side: &'static str, endpoint: Endpoint) -> Result<BrowserId, Refusal> {
    endpoint.as_browser().ok_or(role(kind, side, "browser"))
}

fn script_of(kind: ActionKind, side: &'static str, endpoint: Endpoint) -> Result<ScriptId, Refusal> {
    endpoint.as_script().ok_or(role(kind, side, "script"))
}

fn server_of(kind: ActionKind, side: &'static str, endpoint: Endpoint) -> Result<ServerId, Refusal> {
    endpoint.as_server().ok_or(role(kind, side, "server"))
}

fn check_cookies(
    ctx: &Ctx<'_>,
    host: HostId,
    holder: Option<BrowserId>,
    cookies: &BTreeSet<CookieId>,
) -> Result<(), Refusal> {
    for cookie in cookies {
        if cookie.0 >= ctx.universe.bounds().cookies {
            return Err(Refusal::OutOfUniverse {
                what: format!("cookie {}", cookie.0),
            });
        }
        if let Some(browser) = holder
            && !ctx.store.holds_cookie(browser, *cookie)
        {
            return Err(Refusal::CookieNotHeld(*cookie));
        }
        if !ctx.facts.cookie_matches(ctx.universe, *cookie, host) {
            return Err(Refusal::CookieOutOfScope(*cookie));
        }
    }
    Ok(())
}

/// Script's host browser, required to be the `to` endpoint.
fn hosted_script(ctx: &Ctx<'_>, binding: &Binding) -> Result<(DocumentId, BrowserId), Refusal> {
    let kind = binding.kind();
    let script = script_of(kind, "from", binding.from)?;
    let browser = browser_of(kind, "to", binding.to)?;
    let (context, host) = ctx.host_of(script).ok_or(Refusal::ScriptInactive)?;
    if host != browser {
        return Err(Refusal::NotHostBrowser);
    }
    Ok((context, host))
}

fn precondition(ctx: &Ctx<'_>, binding: &Binding) -> Result<(), Refusal> {
    let kind = binding.kind();
    ctx.endpoint(binding.from)?;
    ctx.endpoint(binding.to)?;
    match &binding.call {
        Call::BrowserHttpRequest {
            url,
            doc,
            sent_cookies,
            received_cookies,
            response,
        } => {
            let browser = browser_of(kind, "from", binding.from)?;
            let server = server_of(kind, "to", binding.to)?;
            let url = ctx.url(*url)?;
            if !ctx.facts.resolves(url.host, server) {
                return Err(Refusal::Unreachable);
            }
            if doc.0 >= ctx.universe.bounds().documents {
                return Err(Refusal::OutOfUniverse {
                    what: format!("document {}", doc.0),
                });
            }
            if ctx.store.is_created(*doc) {
                return Err(Refusal::DocumentExists);
            }
            check_cookies(ctx, url.host, Some(browser), sent_cookies)?;
            check_cookies(ctx, url.host, None, received_cookies)?;
            if *response != ctx.facts.resource_at(server, url.path) {
                return Err(Refusal::ResponseMismatch);
            }
            Ok(())
        }
        Call::XmlHttpRequest {
            url,
            sent_cookies,
            response,
        } => {
            let script = script_of(kind, "from", binding.from)?;
            let server = server_of(kind, "to", binding.to)?;
            let (_, browser) = ctx.host_of(script).ok_or(Refusal::ScriptInactive)?;
            let url = ctx.url(*url)?;
            if !ctx.facts.resolves(url.host, server) {
                return Err(Refusal::Unreachable);
            }
            check_cookies(ctx, url.host, Some(browser), sent_cookies)?;
            if *response != ctx.facts.resource_at(server, url.path) {
                return Err(Refusal::ResponseMismatch);
            }
            Ok(())
        }
        Call::ReadDom { doc, result } => {
            let (context, browser) = hosted_script(ctx, binding)?;
            if !ctx.accessible_docs(context, browser).contains(doc) {
                return Err(Refusal::DocumentInaccessible);
            }
            if *result != ctx.store.content_of(*doc) {
                return Err(Refusal::ResultMismatch);
            }
            Ok(())
        }
        Call::WriteDom { doc, new_dom } => {
            let (context, browser) = hosted_script(ctx, binding)?;
            if !ctx.accessible_docs(context, browser).contains(doc) {
                return Err(Refusal::DocumentInaccessible);
            }
            if new_dom.0 >= ctx.universe.bounds().resources {
                return Err(Refusal::OutOfUniverse {
                    what: format!("resource {}", new_dom.0),
                });
            }
            Ok(())
        }
        Call::SetDomain { doc, new_domain } => {
            let (context, _) = hosted_script(ctx, binding)?;
            if *doc != context {
                return Err(Refusal::NotContext);
            }
            if new_domain.is_empty() {
                return Err(Refusal::EmptyDomain);
            }
            if let Some(host) = new_domain
                .iter()
                .find(|host| host.0 as usize >= ctx.universe.bounds().hosts.len())
            {
                return Err(Refusal::OutOfUniverse {
                    what: format!("host {}", host.0),
                });
            }
            Ok(())
        }
    }
}

// =============================================================================
// Effects
// =============================================================================

fn effect(ctx: &Ctx<'_>, binding: &Binding) -> Result<Store, ApplyError> {
    let mut draft = ctx.store.begin();
    match &binding.call {
        Call::BrowserHttpRequest {
            url: url_id,
            doc,
            received_cookies,
            response,
            ..
        } => {
            let browser = browser_of(binding.kind(), "from", binding.from)?;
            let url = ctx.url(*url_id)?;
            if let Some(resource) = response {
                draft.override_with(Field::Content, &Relation::pairs([(*doc, *resource)]))?;
            }
            draft.override_with(Field::Domain, &Relation::pairs([(*doc, url.host)]))?;
            draft.extend(Field::Documents, &Relation::pairs([(browser, *doc)]))?;
            draft.extend(
                Field::Cookies,
                &Relation::pairs(received_cookies.iter().map(|cookie| (browser, *cookie))),
            )?;
            draft.create(*doc, *url_id);
        }
        Call::XmlHttpRequest { .. } | Call::ReadDom { .. } => {}
        Call::WriteDom { doc, new_dom } => {
            draft.override_with(Field::Content, &Relation::pairs([(*doc, *new_dom)]))?;
        }
        Call::SetDomain { doc, new_domain } => {
            draft.override_with(
                Field::Domain,
                &Relation::pairs(new_domain.iter().map(|host| (*doc, *host))),
            )?;
        }
    }

    let changed = draft.changed();
    if let Some(field) = binding
        .kind()
        .frame()
        .iter()
        .find(|field| changed.contains(field))
    {
        return Err(ApplyError::Breach(format!(
            "{} changed {field}, which its frame keeps fixed",
            binding.kind()
        )));
    }
    if let Some(doc) = draft
        .slice(Field::Content)
        .keys()
        .into_iter()
        .find(|key| draft.slice(Field::Content).values(key).nth(1).is_some())
    {
        return Err(ApplyError::Breach(format!(
            "content is not functional for {}",
            ctx.universe.name(doc[0])
        )));
    }
    Ok(draft.commit()?)
}

// =============================================================================
// Candidate generation
// =============================================================================

fn matching_cookies(
    ctx: &Ctx<'_>,
    host: HostId,
    pool: impl Iterator<Item = CookieId>,
) -> Vec<CookieId> {
    pool.filter(|cookie| ctx.facts.cookie_matches(ctx.universe, *cookie, host))
        .collect()
}

fn browser_requests(ctx: &Ctx<'_>, out: &mut Vec<Binding>) {
    for browser in ctx.universe.browsers() {
        for server in ctx.universe.servers() {
            for (url_id, url) in ctx.universe.urls() {
                if !ctx.facts.resolves(url.host, server) {
                    continue;
                }
                let response = ctx.facts.resource_at(server, url.path);
                let held = matching_cookies(ctx, url.host, ctx.store.cookies_of(browser));
                let settable = matching_cookies(ctx, url.host, ctx.universe.cookies());
                for doc in ctx.universe.documents() {
                    if ctx.store.is_created(doc) {
                        continue;
                    }
                    for sent in subset_sets(&held) {
                        for received in subset_sets(&settable) {
                            out.push(Binding {
                                from: Endpoint::Browser(browser),
                                to: Endpoint::Server(server),
                                call: Call::BrowserHttpRequest {
                                    url: url_id,
                                    doc,
                                    sent_cookies: sent.clone(),
                                    received_cookies: received,
                                    response,
                                },
                            });
                        }
                    }
                }
            }
        }
    }
}

fn xml_http_requests(ctx: &Ctx<'_>, out: &mut Vec<Binding>) {
    for script in ctx.universe.scripts() {
        let Some((_, browser)) = ctx.host_of(script) else {
            continue;
        };
        for server in ctx.universe.servers() {
            for (url_id, url) in ctx.universe.urls() {
                if !ctx.facts.resolves(url.host, server) {
                    continue;
                }
                let response = ctx.facts.resource_at(server, url.path);
                let held = matching_cookies(ctx, url.host, ctx.store.cookies_of(browser));
                for sent in subset_sets(&held) {
                    out.push(Binding {
                        from: Endpoint::Script(script),
                        to: Endpoint::Server(server),
                        call: Call::XmlHttpRequest {
                            url: url_id,
                            sent_cookies: sent,
                            response,
                        },
                    });
                }
            }
        }
    }
}

/// ReadDom, WriteDom and SetDomain bindings, grouped by kind.
fn dom_operations(ctx: &Ctx<'_>, out: &mut Vec<Binding>) {
    let hosted: Vec<(ScriptId, DocumentId, BrowserId)> = ctx
        .universe
        .scripts()
        .filter_map(|script| {
            ctx.host_of(script)
                .map(|(context, browser)| (script, context, browser))
        })
        .collect();

    for (script, context, browser) in &hosted {
        for doc in ctx.accessible_docs(*context, *browser) {
            out.push(Binding {
                from: Endpoint::Script(*script),
                to: Endpoint::Browser(*browser),
                call: Call::ReadDom {
                    doc,
                    result: ctx.store.content_of(doc),
                },
            });
        }
    }

    for (script, context, browser) in &hosted {
        for doc in ctx.accessible_docs(*context, *browser) {
            for new_dom in ctx.universe.resources() {
                out.push(Binding {
                    from: Endpoint::Script(*script),
                    to: Endpoint::Browser(*browser),
                    call: Call::WriteDom { doc, new_dom },
                });
            }
        }
    }

    let hosts: Vec<HostId> = ctx.universe.hosts().collect();
    for (script, context, browser) in &hosted {
        for new_domain in subset_sets(&hosts) {
            if new_domain.is_empty() {
                continue;
            }
            out.push(Binding {
                from: Endpoint::Script(*script),
                to: Endpoint::Browser(*browser),
                call: Call::SetDomain {
                    doc: *context,
                    new_domain,
                },
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Bounds;

    struct World {
        universe: Universe,
        facts: StaticFacts,
    }

    /// a.com and b.com both resolve to Server0, which stores Resource0 at `/`.
    /// Script0 runs in Document0; Cookie0 is scoped to a.com.
    fn world() -> World {
        let universe = Universe::new(Bounds::default()).expect("universe");
        let facts = StaticFacts {
            dns: Relation::pairs([(HostId(0), ServerId(0)), (HostId(1), ServerId(0))]),
            tables: Relation::from_tuples(
                3,
                [vec![
                    ServerId(0).atom(),
                    crate::schema::PathId(0).atom(),
                    ResourceId(0).atom(),
                ]],
            )
            .expect("tables"),
            scopes: Relation::pairs([(CookieId(0), HostId(0))]),
            contexts: Relation::pairs([(ScriptId(0), DocumentId(0))]),
        };
        World { universe, facts }
    }

    fn url(world: &World, host: u32, with_path: bool) -> UrlId {
        world
            .universe
            .url_id(&Url {
                protocol: crate::schema::ProtocolId(0),
                host: HostId(host),
                port: None,
                path: with_path.then_some(crate::schema::PathId(0)),
            })
            .expect("url")
    }

    fn load(world: &World, store: &Store, doc: u32, host: u32, cookies: &[u32]) -> Transition {
        let ctx = Ctx {
            universe: &world.universe,
            facts: &world.facts,
            store,
        };
        let binding = Binding {
            from: Endpoint::Browser(BrowserId(0)),
            to: Endpoint::Server(ServerId(0)),
            call: Call::BrowserHttpRequest {
                url: url(world, host, true),
                doc: DocumentId(doc),
                sent_cookies: BTreeSet::new(),
                received_cookies: cookies.iter().map(|c| CookieId(*c)).collect(),
                response: Some(ResourceId(0)),
            },
        };
        Catalog::default().apply(&ctx, &binding).expect("load")
    }

    #[test]
    fn browser_request_creates_document_with_response() {
        let world = world();
        let t = load(&world, &Store::initial(), 0, 0, &[0]);
        let store = &t.store;
        assert_eq!(t.record.before, Time(0));
        assert_eq!(t.record.after, Time(1));
        assert_eq!(store.content_of(DocumentId(0)), Some(ResourceId(0)));
        assert_eq!(store.domain_of(DocumentId(0)), BTreeSet::from([HostId(0)]));
        assert!(store.owns(BrowserId(0), DocumentId(0)));
        assert!(store.holds_cookie(BrowserId(0), CookieId(0)));
    }

    #[test]
    fn request_without_path_has_no_response() {
        let world = world();
        let store = Store::initial();
        let ctx = Ctx {
            universe: &world.universe,
            facts: &world.facts,
            store: &store,
        };
        let binding = Binding {
            from: Endpoint::Browser(BrowserId(0)),
            to: Endpoint::Server(ServerId(0)),
            call: Call::BrowserHttpRequest {
                url: url(&world, 0, false),
                doc: DocumentId(0),
                sent_cookies: BTreeSet::new(),
                received_cookies: BTreeSet::new(),
                response: Some(ResourceId(0)),
            },
        };
        assert_eq!(
            Catalog::default().check(&ctx, &binding),
            Err(Refusal::ResponseMismatch)
        );
    }

    #[test]
    fn documents_are_created_once() {
        let world = world();
        let first = load(&world, &Store::initial(), 0, 0, &[]);
        let ctx = Ctx {
            universe: &world.universe,
            facts: &world.facts,
            store: &first.store,
        };
        let again = Binding {
            from: Endpoint::Browser(BrowserId(0)),
            to: Endpoint::Server(ServerId(0)),
            call: Call::BrowserHttpRequest {
                url: url(&world, 1, true),
                doc: DocumentId(0),
                sent_cookies: BTreeSet::new(),
                received_cookies: BTreeSet::new(),
                response: Some(ResourceId(0)),
            },
        };
        assert_eq!(
            Catalog::default().check(&ctx, &again),
            Err(Refusal::DocumentExists)
        );
    }

    #[test]
    fn endpoints_outside_the_universe_are_refused() {
        let world = world();
        let store = Store::initial();
        let ctx = Ctx {
            universe: &world.universe,
            facts: &world.facts,
            store: &store,
        };
        let binding = Binding {
            from: Endpoint::Browser(BrowserId(99)),
            to: Endpoint::Server(ServerId(0)),
            call: Call::BrowserHttpRequest {
                url: url(&world, 0, true),
                doc: DocumentId(0),
                sent_cookies: BTreeSet::new(),
                received_cookies: BTreeSet::new(),
                response: Some(ResourceId(0)),
            },
        };
        assert_eq!(
            Catalog::default().check(&ctx, &binding),
            Err(Refusal::OutOfUniverse {
                what: "browser 99".to_string()
            })
        );
    }

    #[test]
    fn out_of_scope_cookies_are_refused() {
        let world = world();
        let store = Store::initial();
        let ctx = Ctx {
            universe: &world.universe,
            facts: &world.facts,
            store: &store,
        };
        let binding = Binding {
            from: Endpoint::Browser(BrowserId(0)),
            to: Endpoint::Server(ServerId(0)),
            call: Call::BrowserHttpRequest {
                url: url(&world, 1, true),
                doc: DocumentId(0),
                sent_cookies: BTreeSet::new(),
                received_cookies: BTreeSet::from([CookieId(0)]),
                response: Some(ResourceId(0)),
            },
        };
        assert_eq!(
            Catalog::default().check(&ctx, &binding),
            Err(Refusal::CookieOutOfScope(CookieId(0)))
        );
    }

    #[test]
    fn scripts_are_inactive_until_context_loads() {
        let world = world();
        let store = Store::initial();
        let ctx = Ctx {
            universe: &world.universe,
            facts: &world.facts,
            store: &store,
        };
        let read = Binding {
            from: Endpoint::Script(ScriptId(0)),
            to: Endpoint::Browser(BrowserId(0)),
            call: Call::ReadDom {
                doc: DocumentId(0),
                result: None,
            },
        };
        assert_eq!(
            Catalog::default().check(&ctx, &read),
            Err(Refusal::ScriptInactive)
        );
        assert!(
            Catalog::default()
                .enabled(&ctx)
                .iter()
                .all(|b| b.kind() == ActionKind::BrowserHttpRequest)
        );
    }

    #[test]
    fn write_dom_overrides_content_and_keeps_frame() {
        let world = world();
        let loaded = load(&world, &Store::initial(), 0, 0, &[]);
        let ctx = Ctx {
            universe: &world.universe,
            facts: &world.facts,
            store: &loaded.store,
        };
        let write = Binding {
            from: Endpoint::Script(ScriptId(0)),
            to: Endpoint::Browser(BrowserId(0)),
            call: Call::WriteDom {
                doc: DocumentId(0),
                new_dom: ResourceId(1),
            },
        };
        let t = Catalog::default().apply(&ctx, &write).expect("write");
        assert_eq!(t.store.content_of(DocumentId(0)), Some(ResourceId(1)));
        assert_eq!(
            t.store.domain_of(DocumentId(0)),
            loaded.store.domain_of(DocumentId(0))
        );
        // the input store is untouched
        assert_eq!(loaded.store.content_of(DocumentId(0)), Some(ResourceId(0)));
    }

    #[test]
    fn set_domain_only_on_context() {
        let world = world();
        let first = load(&world, &Store::initial(), 0, 0, &[]);
        let second = load(&world, &first.store, 1, 1, &[]);
        let ctx = Ctx {
            universe: &world.universe,
            facts: &world.facts,
            store: &second.store,
        };
        let other = Binding {
            from: Endpoint::Script(ScriptId(0)),
            to: Endpoint::Browser(BrowserId(0)),
            call: Call::SetDomain {
                doc: DocumentId(1),
                new_domain: BTreeSet::from([HostId(0)]),
            },
        };
        assert_eq!(
            Catalog::default().check(&ctx, &other),
            Err(Refusal::NotContext)
        );
        let own = Binding {
            call: Call::SetDomain {
                doc: DocumentId(0),
                new_domain: BTreeSet::from([HostId(1)]),
            },
            ..other
        };
        let t = Catalog::default().apply(&ctx, &own).expect("set domain");
        assert_eq!(t.store.domain_of(DocumentId(0)), BTreeSet::from([HostId(1)]));
    }

    #[test]
    fn enabled_bindings_all_pass_their_precondition() {
        let world = world();
        let loaded = load(&world, &Store::initial(), 0, 0, &[0]);
        let ctx = Ctx {
            universe: &world.universe,
            facts: &world.facts,
            store: &loaded.store,
        };
        let catalog = Catalog::default();
        let enabled = catalog.enabled(&ctx);
        assert!(!enabled.is_empty());
        for kind in ActionKind::ALL {
            assert!(enabled.iter().any(|b| b.kind() == kind), "missing {kind}");
        }
        let mut kinds: Vec<ActionKind> = enabled.iter().map(Binding::kind).collect();
        let sorted = {
            let mut k = kinds.clone();
            k.sort();
            k
        };
        assert_eq!(kinds, sorted, "bindings are grouped by kind in catalog order");
        kinds.dedup();
        for binding in &enabled {
            assert!(catalog.apply(&ctx, binding).is_ok());
        }
    }

    #[test]
    fn replay_rejects_tampered_records() {
        let world = world();
        let loaded = load(&world, &Store::initial(), 0, 0, &[]);
        let catalog = Catalog::default();
        let stores = catalog
            .replay(&world.universe, &world.facts, std::slice::from_ref(&loaded.record))
            .expect("replay");
        assert_eq!(stores.len(), 2);

        let mut tampered = loaded.record.clone();
        tampered.after = Time(5);
        assert!(matches!(
            catalog.replay(&world.universe, &world.facts, &[tampered]),
            Err(ReplayError::Diverged { step: 0 })
        ));
    }
}
