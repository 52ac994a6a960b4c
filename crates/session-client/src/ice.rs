//! Client-supplied ICE server hints.
//!
//! Callers may describe ICE servers loosely: a bare url string, a server
//! object with `urls` (string or list) or the legacy `url` field, or a
//! list of those. [`normalize_ice_servers`] flattens all of it into
//! [`IceServer`] descriptors that always carry `urls`.

use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

/// One url or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceUrls {
    One(String),
    Many(Vec<String>),
}

impl IceUrls {
    /// A single empty url. A list is kept even when empty.
    fn is_blank(&self) -> bool {
        matches!(self, IceUrls::One(url) if url.is_empty())
    }
}

/// Normalised ICE server descriptor.
///
/// Serialises with the credential exposed: this is the form handed to the
/// peer connection engine.
#[derive(Debug, Clone, Serialize)]
pub struct IceServer {
    pub urls: IceUrls,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "expose_credential"
    )]
    pub credential: Option<SecretString>,
}

fn expose_credential<S: Serializer>(
    credential: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match credential {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

impl PartialEq for IceServer {
    fn eq(&self, other: &Self) -> bool {
        self.urls == other.urls
            && self.username == other.username
            && self.credential.as_ref().map(|c| c.expose_secret())
                == other.credential.as_ref().map(|c| c.expose_secret())
    }
}

impl Eq for IceServer {}

/// A server object as supplied by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIceServer {
    #[serde(default)]
    pub urls: Option<IceUrls>,
    /// Legacy single-url field.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<SecretString>,
}

/// An element of a server list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IceServerEntry {
    Url(String),
    Server(RawIceServer),
}

/// One argument to `set_ice_servers`.
///
/// Lists nest one level only.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IceServerInput {
    Url(String),
    List(Vec<IceServerEntry>),
    Server(RawIceServer),
}

impl From<&str> for IceServerInput {
    fn from(url: &str) -> Self {
        IceServerInput::Url(url.to_string())
    }
}

impl From<RawIceServer> for IceServerInput {
    fn from(server: RawIceServer) -> Self {
        IceServerInput::Server(server)
    }
}

fn normalize_url(url: String) -> Option<IceServer> {
    if url.is_empty() {
        return None;
    }
    Some(IceServer {
        urls: IceUrls::One(url),
        username: None,
        credential: None,
    })
}

fn normalize_server(server: RawIceServer) -> Option<IceServer> {
    let urls = match (server.urls, server.url) {
        (Some(urls), _) if !urls.is_blank() => urls,
        (_, Some(url)) if !url.is_empty() => IceUrls::One(url),
        _ => return None,
    };
    Some(IceServer {
        urls,
        username: server.username,
        credential: server.credential,
    })
}

/// Flatten caller input into descriptors, in input order. Empty strings and
/// servers without any url are skipped; a `urls` list is kept as given.
#[must_use]
pub fn normalize_ice_servers(inputs: Vec<IceServerInput>) -> Vec<IceServer> {
    let mut servers = Vec::new();
    for input in inputs {
        match input {
            IceServerInput::Url(url) => servers.extend(normalize_url(url)),
            IceServerInput::Server(server) => servers.extend(normalize_server(server)),
            IceServerInput::List(entries) => {
                for entry in entries {
                    match entry {
                        IceServerEntry::Url(url) => servers.extend(normalize_url(url)),
                        IceServerEntry::Server(server) => {
                            servers.extend(normalize_server(server));
                        }
                    }
                }
            }
        }
    }
    servers
}
