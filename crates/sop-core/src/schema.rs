//! Typed universe of the model: atom sorts, identity newtypes, URLs and
//! origins, per-type pool bounds, and the materialized `Universe`.
//!
//! Atoms are identity-only. Protocols, hosts, ports and paths carry a display
//! name because hosts need one for cookie suffix matching; every other pool is
//! counted and named `<Sort><index>`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest pool the explorer accepts for any single sort.
pub const MAX_POOL: usize = 8;

// =============================================================================
// Atoms
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sort {
    Browser,
    Script,
    Server,
    Protocol,
    Host,
    Port,
    Path,
    Resource,
    Cookie,
    Document,
    Url,
    Time,
}

impl Sort {
    pub fn as_str(self) -> &'static str {
        match self {
            Sort::Browser => "browser",
            Sort::Script => "script",
            Sort::Server => "server",
            Sort::Protocol => "protocol",
            Sort::Host => "host",
            Sort::Port => "port",
            Sort::Path => "path",
            Sort::Resource => "resource",
            Sort::Cookie => "cookie",
            Sort::Document => "document",
            Sort::Url => "url",
            Sort::Time => "time",
        }
    }

    /// Prefix used to name atoms of counted pools (`Browser0`, `Cookie1`, ...).
    pub fn label(self) -> &'static str {
        match self {
            Sort::Browser => "Browser",
            Sort::Script => "Script",
            Sort::Server => "Server",
            Sort::Protocol => "Protocol",
            Sort::Host => "Host",
            Sort::Port => "Port",
            Sort::Path => "Path",
            Sort::Resource => "Resource",
            Sort::Cookie => "Cookie",
            Sort::Document => "Document",
            Sort::Url => "Url",
            Sort::Time => "T",
        }
    }

    const ALL: [Sort; 12] = [
        Sort::Browser,
        Sort::Script,
        Sort::Server,
        Sort::Protocol,
        Sort::Host,
        Sort::Port,
        Sort::Path,
        Sort::Resource,
        Sort::Cookie,
        Sort::Document,
        Sort::Url,
        Sort::Time,
    ];
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single identity-only element of the universe.
///
/// Ordering is by sort, then index; relations are ordered sets of atom tuples,
/// so this ordering fixes the enumeration order of the whole search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Atom {
    pub sort: Sort,
    pub index: u32,
}

impl Atom {
    pub const fn new(sort: Sort, index: u32) -> Self {
        Self { sort, index }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.sort.as_str(), self.index)
    }
}

impl From<Atom> for String {
    fn from(atom: Atom) -> String {
        atom.to_string()
    }
}

impl FromStr for Atom {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (sort, index) = raw
            .split_once('#')
            .ok_or_else(|| format!("atom `{raw}` is missing `#`"))?;
        let sort = Sort::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == sort)
            .ok_or_else(|| format!("atom `{raw}` has unknown sort `{sort}`"))?;
        let index = index
            .parse::<u32>()
            .map_err(|e| format!("atom `{raw}` has invalid index: {e}"))?;
        Ok(Atom { sort, index })
    }
}

impl TryFrom<String> for Atom {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

macro_rules! atom_id {
    ($(#[$meta:meta])* $name:ident => $sort:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const SORT: Sort = Sort::$sort;

            pub const fn atom(self) -> Atom {
                Atom::new(Sort::$sort, self.0)
            }

            pub fn from_atom(atom: Atom) -> Option<Self> {
                (atom.sort == Sort::$sort).then_some(Self(atom.index))
            }
        }

        impl From<$name> for Atom {
            fn from(id: $name) -> Atom {
                id.atom()
            }
        }
    };
}

atom_id!(BrowserId => Browser);
atom_id!(ScriptId => Script);
atom_id!(ServerId => Server);
atom_id!(ProtocolId => Protocol);
atom_id!(HostId => Host);
atom_id!(PortId => Port);
atom_id!(PathId => Path);
atom_id!(ResourceId => Resource);
atom_id!(CookieId => Cookie);
atom_id!(DocumentId => Document);
atom_id!(
    /// Index into the universe's URL product.
    UrlId => Url
);
atom_id!(
    /// An instant on the single global timeline. `Time(0)` is the initial state.
    Time => Time
);

impl Time {
    pub const ZERO: Time = Time(0);

    pub fn next(self) -> Time {
        Time(self.0 + 1)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

// =============================================================================
// Endpoints
// =============================================================================

/// Communication endpoint. Browsers and scripts are clients; the variants are
/// disjoint by construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Endpoint {
    Browser(BrowserId),
    Script(ScriptId),
    Server(ServerId),
}

impl Endpoint {
    pub fn atom(self) -> Atom {
        match self {
            Endpoint::Browser(id) => id.atom(),
            Endpoint::Script(id) => id.atom(),
            Endpoint::Server(id) => id.atom(),
        }
    }

    pub fn is_client(self) -> bool {
        matches!(self, Endpoint::Browser(_) | Endpoint::Script(_))
    }

    pub fn as_browser(self) -> Option<BrowserId> {
        match self {
            Endpoint::Browser(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_script(self) -> Option<ScriptId> {
        match self {
            Endpoint::Script(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_server(self) -> Option<ServerId> {
        match self {
            Endpoint::Server(id) => Some(id),
            _ => None,
        }
    }
}

// =============================================================================
// URLs and origins
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Url {
    pub protocol: ProtocolId,
    pub host: HostId,
    pub port: Option<PortId>,
    pub path: Option<PathId>,
}

impl Url {
    pub fn origin(&self) -> Origin {
        Origin {
            protocol: self.protocol,
            host: self.host,
            port: self.port,
        }
    }
}

/// A URL without its path: the security boundary of the SOP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Origin {
    pub protocol: ProtocolId,
    pub host: HostId,
    pub port: Option<PortId>,
}

/// Cookie scope rule: `host` equals `scope` or is a sub-domain of it.
pub fn host_suffix_matches(host: &str, scope: &str) -> bool {
    if host == scope {
        return true;
    }
    host.len() > scope.len()
        && host.ends_with(scope)
        && host.as_bytes()[host.len() - scope.len() - 1] == b'.'
}

// =============================================================================
// Bounds
// =============================================================================

/// Per-type atom pool bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bounds {
    pub protocols: Vec<String>,
    pub hosts: Vec<String>,
    pub ports: Vec<String>,
    pub paths: Vec<String>,
    pub browsers: u32,
    pub scripts: u32,
    pub servers: u32,
    pub resources: u32,
    pub cookies: u32,
    pub documents: u32,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            protocols: vec!["http".to_string()],
            hosts: vec!["a.com".to_string(), "b.com".to_string()],
            ports: Vec::new(),
            paths: vec!["/".to_string()],
            browsers: 1,
            scripts: 1,
            servers: 1,
            resources: 2,
            cookies: 1,
            documents: 2,
        }
    }
}

impl Bounds {
    /// Reject pools that would make the model empty or the search intractable.
    ///
    /// Scripts, cookies, ports and paths may be empty; everything else needs at
    /// least one atom.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("protocols", &self.protocols, true),
            ("hosts", &self.hosts, true),
            ("ports", &self.ports, false),
            ("paths", &self.paths, false),
        ];
        for (pool, names, required) in named {
            if required && names.is_empty() {
                return Err(ConfigError::EmptyPool { pool });
            }
            check_pool_size(pool, names.len())?;
            for (i, name) in names.iter().enumerate() {
                if name.trim().is_empty() {
                    return Err(ConfigError::EmptyName { pool });
                }
                if names[..i].contains(name) {
                    return Err(ConfigError::DuplicateName {
                        pool,
                        name: name.clone(),
                    });
                }
            }
        }

        let counted = [
            ("browsers", self.browsers, true),
            ("scripts", self.scripts, false),
            ("servers", self.servers, true),
            ("resources", self.resources, true),
            ("cookies", self.cookies, false),
            ("documents", self.documents, true),
        ];
        for (pool, count, required) in counted {
            if required && count == 0 {
                return Err(ConfigError::EmptyPool { pool });
            }
            check_pool_size(pool, count as usize)?;
        }
        Ok(())
    }
}

fn check_pool_size(pool: &'static str, size: usize) -> Result<(), ConfigError> {
    if size > MAX_POOL {
        return Err(ConfigError::PoolTooLarge {
            pool,
            size,
            max: MAX_POOL,
        });
    }
    Ok(())
}

// =============================================================================
// Universe
// =============================================================================

/// Materialized atom pools plus the URL product, with name lookup both ways.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universe {
    bounds: Bounds,
    urls: Vec<Url>,
}

impl Universe {
    pub fn new(bounds: Bounds) -> Result<Self, ConfigError> {
        bounds.validate()?;
        let mut urls = Vec::new();
        let ports: Vec<Option<PortId>> = std::iter::once(None)
            .chain((0..bounds.ports.len() as u32).map(|i| Some(PortId(i))))
            .collect();
        let paths: Vec<Option<PathId>> = std::iter::once(None)
            .chain((0..bounds.paths.len() as u32).map(|i| Some(PathId(i))))
            .collect();
        for protocol in 0..bounds.protocols.len() as u32 {
            for host in 0..bounds.hosts.len() as u32 {
                for port in &ports {
                    for path in &paths {
                        urls.push(Url {
                            protocol: ProtocolId(protocol),
                            host: HostId(host),
                            port: *port,
                            path: *path,
                        });
                    }
                }
            }
        }
        Ok(Self { bounds, urls })
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn browsers(&self) -> impl Iterator<Item = BrowserId> + use<> {
        (0..self.bounds.browsers).map(BrowserId)
    }

    pub fn scripts(&self) -> impl Iterator<Item = ScriptId> + use<> {
        (0..self.bounds.scripts).map(ScriptId)
    }

    pub fn servers(&self) -> impl Iterator<Item = ServerId> + use<> {
        (0..self.bounds.servers).map(ServerId)
    }

    pub fn hosts(&self) -> impl Iterator<Item = HostId> + use<> {
        (0..self.bounds.hosts.len() as u32).map(HostId)
    }

    pub fn paths(&self) -> impl Iterator<Item = PathId> + use<> {
        (0..self.bounds.paths.len() as u32).map(PathId)
    }

    pub fn resources(&self) -> impl Iterator<Item = ResourceId> + use<> {
        (0..self.bounds.resources).map(ResourceId)
    }

    pub fn cookies(&self) -> impl Iterator<Item = CookieId> + use<> {
        (0..self.bounds.cookies).map(CookieId)
    }

    pub fn documents(&self) -> impl Iterator<Item = DocumentId> + use<> {
        (0..self.bounds.documents).map(DocumentId)
    }

    pub fn urls(&self) -> impl Iterator<Item = (UrlId, &Url)> {
        self.urls
            .iter()
            .enumerate()
            .map(|(i, url)| (UrlId(i as u32), url))
    }

    pub fn url(&self, id: UrlId) -> Option<&Url> {
        self.urls.get(id.0 as usize)
    }

    pub fn url_id(&self, url: &Url) -> Option<UrlId> {
        self.urls
            .iter()
            .position(|candidate| candidate == url)
            .map(|i| UrlId(i as u32))
    }

    pub fn host_name(&self, host: HostId) -> &str {
        self.bounds
            .hosts
            .get(host.0 as usize)
            .map(String::as_str)
            .unwrap_or("?")
    }

    /// Human-readable name of any atom.
    pub fn name(&self, atom: Atom) -> String {
        let named = |pool: &[String]| {
            pool.get(atom.index as usize)
                .cloned()
                .unwrap_or_else(|| format!("{}?{}", atom.sort.label(), atom.index))
        };
        match atom.sort {
            Sort::Protocol => named(&self.bounds.protocols),
            Sort::Host => named(&self.bounds.hosts),
            Sort::Port => named(&self.bounds.ports),
            Sort::Path => named(&self.bounds.paths),
            Sort::Url => match self.url(UrlId(atom.index)) {
                Some(url) => self.render_url(url),
                None => format!("Url?{}", atom.index),
            },
            sort => format!("{}{}", sort.label(), atom.index),
        }
    }

    pub fn endpoint_name(&self, endpoint: Endpoint) -> String {
        self.name(endpoint.atom())
    }

    /// Resolve a display name back to an atom of the given sort.
    pub fn lookup(&self, sort: Sort, name: &str) -> Result<Atom, ConfigError> {
        let position = |pool: &[String]| pool.iter().position(|candidate| candidate == name);
        let counted = |count: u32| {
            name.strip_prefix(sort.label())
                .and_then(|raw| raw.parse::<u32>().ok())
                .filter(|index| *index < count)
                .map(|index| index as usize)
        };
        let index = match sort {
            Sort::Protocol => position(&self.bounds.protocols),
            Sort::Host => position(&self.bounds.hosts),
            Sort::Port => position(&self.bounds.ports),
            Sort::Path => position(&self.bounds.paths),
            Sort::Browser => counted(self.bounds.browsers),
            Sort::Script => counted(self.bounds.scripts),
            Sort::Server => counted(self.bounds.servers),
            Sort::Resource => counted(self.bounds.resources),
            Sort::Cookie => counted(self.bounds.cookies),
            Sort::Document => counted(self.bounds.documents),
            Sort::Url => self
                .urls
                .iter()
                .position(|url| self.render_url(url) == name),
            Sort::Time => name
                .strip_prefix('T')
                .and_then(|raw| raw.parse::<u32>().ok())
                .map(|index| index as usize),
        };
        index
            .map(|index| Atom::new(sort, index as u32))
            .ok_or_else(|| ConfigError::UnknownAtom {
                sort,
                name: name.to_string(),
            })
    }

    /// `protocol://host[:port][path]`.
    pub fn render_url(&self, url: &Url) -> String {
        let mut out = format!(
            "{}://{}",
            self.name(url.protocol.atom()),
            self.name(url.host.atom())
        );
        if let Some(port) = url.port {
            out.push(':');
            out.push_str(&self.name(port.atom()));
        }
        if let Some(path) = url.path {
            let path = self.name(path.atom());
            if !path.starts_with('/') {
                out.push('/');
            }
            out.push_str(&path);
        }
        out
    }

    /// Atom names per pool, as written into trace artifacts.
    pub fn pools(&self) -> BTreeMap<&'static str, Vec<String>> {
        let counted = |sort: Sort, count: u32| {
            (0..count)
                .map(|i| format!("{}{}", sort.label(), i))
                .collect::<Vec<_>>()
        };
        BTreeMap::from([
            ("protocols", self.bounds.protocols.clone()),
            ("hosts", self.bounds.hosts.clone()),
            ("ports", self.bounds.ports.clone()),
            ("paths", self.bounds.paths.clone()),
            ("browsers", counted(Sort::Browser, self.bounds.browsers)),
            ("scripts", counted(Sort::Script, self.bounds.scripts)),
            ("servers", counted(Sort::Server, self.bounds.servers)),
            ("resources", counted(Sort::Resource, self.bounds.resources)),
            ("cookies", counted(Sort::Cookie, self.bounds.cookies)),
            ("documents", counted(Sort::Document, self.bounds.documents)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_match_requires_label_boundary() {
        assert!(host_suffix_matches("a.com", "a.com"));
        assert!(host_suffix_matches("www.a.com", "a.com"));
        assert!(!host_suffix_matches("evila.com", "a.com"));
        assert!(!host_suffix_matches("a.com", "www.a.com"));
    }

    #[test]
    fn url_product_includes_optional_components() {
        let universe = Universe::new(Bounds {
            ports: vec!["8080".into()],
            ..Bounds::default()
        })
        .expect("universe");
        // 1 protocol x 2 hosts x (none + 1 port) x (none + 1 path)
        assert_eq!(universe.urls().count(), 8);
        let rendered: Vec<String> = universe
            .urls()
            .map(|(_, url)| universe.render_url(url))
            .collect();
        assert!(rendered.contains(&"http://a.com".to_string()));
        assert!(rendered.contains(&"http://b.com:8080/".to_string()));
    }

    #[test]
    fn lookup_round_trips_names() {
        let universe = Universe::new(Bounds::default()).expect("universe");
        let host = universe.lookup(Sort::Host, "b.com").expect("host");
        assert_eq!(host, HostId(1).atom());
        let doc = universe.lookup(Sort::Document, "Document1").expect("doc");
        assert_eq!(universe.name(doc), "Document1");
        assert!(universe.lookup(Sort::Document, "Document9").is_err());
        let url = universe.lookup(Sort::Url, "http://a.com/").expect("url");
        assert_eq!(universe.name(url), "http://a.com/");
    }

    #[test]
    fn bounds_reject_empty_and_oversized_pools() {
        let empty_hosts = Bounds {
            hosts: Vec::new(),
            ..Bounds::default()
        };
        assert!(matches!(
            empty_hosts.validate(),
            Err(ConfigError::EmptyPool { pool: "hosts" })
        ));

        let no_browsers = Bounds {
            browsers: 0,
            ..Bounds::default()
        };
        assert!(no_browsers.validate().is_err());

        let huge = Bounds {
            documents: (MAX_POOL + 1) as u32,
            ..Bounds::default()
        };
        assert!(matches!(
            huge.validate(),
            Err(ConfigError::PoolTooLarge { .. })
        ));

        let dup = Bounds {
            hosts: vec!["a.com".into(), "a.com".into()],
            ..Bounds::default()
        };
        assert!(matches!(
            dup.validate(),
            Err(ConfigError::DuplicateName { .. })
        ));
    }

    #[test]
    fn atom_string_form_parses_back() {
        let atom = DocumentId(3).atom();
        let raw = atom.to_string();
        assert_eq!(raw, "document#3");
        assert_eq!(raw.parse::<Atom>(), Ok(atom));
        assert!("nope#1".parse::<Atom>().is_err());
    }
}
