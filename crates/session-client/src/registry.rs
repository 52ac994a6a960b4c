//! Stream registry.
//!
//! Two owning maps, one per [`Origin`], keyed by server-assigned id. The
//! registry is pure bookkeeping: it never talks to the network and never
//! emits events. The session actor is its only writer.

use crate::stream::{Origin, Stream, StreamInfo};
use common::types::{LocalStreamKey, StreamId};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{origin} stream {id} already registered")]
    Duplicate { origin: Origin, id: StreamId },

    #[error("stream {id} is {found}, cannot register as {expected}")]
    OriginMismatch {
        id: StreamId,
        expected: Origin,
        found: Origin,
    },
}

#[derive(Debug, Default)]
pub struct StreamRegistry {
    local: HashMap<StreamId, Stream>,
    remote: HashMap<StreamId, Stream>,
}

impl StreamRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, origin: Origin) -> &HashMap<StreamId, Stream> {
        match origin {
            Origin::Local => &self.local,
            Origin::Remote => &self.remote,
        }
    }

    fn map_mut(&mut self, origin: Origin) -> &mut HashMap<StreamId, Stream> {
        match origin {
            Origin::Local => &mut self.local,
            Origin::Remote => &mut self.remote,
        }
    }

    /// Register a stream under its id. Fails if the id is taken in that
    /// origin's map or the stream belongs to the other origin.
    pub fn register(&mut self, origin: Origin, stream: Stream) -> Result<(), RegistryError> {
        if stream.origin != origin {
            return Err(RegistryError::OriginMismatch {
                id: stream.id,
                expected: origin,
                found: stream.origin,
            });
        }
        let map = self.map_mut(origin);
        if map.contains_key(&stream.id) {
            return Err(RegistryError::Duplicate {
                origin,
                id: stream.id,
            });
        }
        debug!(target: "sc.registry", origin = %origin, stream_id = %stream.id, "Stream registered");
        map.insert(stream.id.clone(), stream);
        Ok(())
    }

    pub fn unregister(&mut self, origin: Origin, id: &StreamId) -> Option<Stream> {
        let removed = self.map_mut(origin).remove(id);
        if removed.is_some() {
            debug!(target: "sc.registry", origin = %origin, stream_id = %id, "Stream unregistered");
        }
        removed
    }

    #[must_use]
    pub fn lookup(&self, origin: Origin, id: &StreamId) -> Option<&Stream> {
        self.map(origin).get(id)
    }

    pub fn lookup_mut(&mut self, origin: Origin, id: &StreamId) -> Option<&mut Stream> {
        self.map_mut(origin).get_mut(id)
    }

    #[must_use]
    pub fn contains(&self, origin: Origin, id: &StreamId) -> bool {
        self.map(origin).contains_key(id)
    }

    /// Remote streams whose attribute `name` equals `value`.
    #[must_use]
    pub fn find_by_attribute(&self, name: &str, value: &Value) -> Vec<&Stream> {
        self.remote
            .values()
            .filter(|stream| stream.attributes.get(name) == Some(value))
            .collect()
    }

    /// The registered local stream published from this caller-side key.
    #[must_use]
    pub fn find_local_by_key(&self, key: LocalStreamKey) -> Option<&Stream> {
        self.local.values().find(|s| s.local_key == Some(key))
    }

    /// Remove and return every stream of an origin.
    pub fn drain(&mut self, origin: Origin) -> Vec<Stream> {
        self.map_mut(origin).drain().map(|(_, stream)| stream).collect()
    }

    #[must_use]
    pub fn ids(&self, origin: Origin) -> Vec<StreamId> {
        self.map(origin).keys().cloned().collect()
    }

    #[must_use]
    pub fn snapshot(&self, origin: Origin) -> Vec<StreamInfo> {
        self.map(origin).values().map(Stream::info).collect()
    }

    #[must_use]
    pub fn len(&self, origin: Origin) -> usize {
        self.map(origin).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }

    /// Every violated registry invariant, described. Empty when consistent.
    #[must_use]
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let mut keys = HashSet::new();

        for origin in [Origin::Local, Origin::Remote] {
            for (key, stream) in self.map(origin) {
                if key != &stream.id {
                    violations.push(format!(
                        "{origin} entry {key} holds stream {}",
                        stream.id
                    ));
                }
                if stream.origin != origin {
                    violations.push(format!(
                        "{} stream {key} stored in the {origin} map",
                        stream.origin
                    ));
                }
                if stream.negotiation.is_some() && stream.url.is_some() {
                    violations.push(format!("url-backed stream {key} has a negotiation"));
                }
                if stream.controls_wired && stream.negotiation.is_none() {
                    violations.push(format!("stream {key} has controls without a negotiation"));
                }
            }
        }

        for stream in self.local.values() {
            match stream.local_key {
                Some(local_key) => {
                    if !keys.insert(local_key) {
                        violations.push(format!(
                            "local stream {} published twice from the same source",
                            stream.id
                        ));
                    }
                }
                None => violations.push(format!("local stream {} has no client key", stream.id)),
            }
            if stream.media.is_none() && stream.url.is_none() {
                violations.push(format!("local stream {} has neither media nor url", stream.id));
            }
        }

        for stream in self.remote.values() {
            if stream.local_key.is_some() {
                violations.push(format!("remote stream {} carries a client key", stream.id));
            }
        }

        violations
    }
}
