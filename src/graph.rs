//! Social-graph edge cache.
//!
//! Holds the outbound Follow/Mute/Report edges for a bounded set of actors.
//! Edges are last-write-wins per (source, target, kind) and expire after a
//! TTL, after which the scorer refetches them through [`GraphTransport`].

use crate::error::GraphError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A public-key identity in the social graph: 64 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn parse(s: &str) -> Result<Self, GraphError> {
        let s = s.trim();
        if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            Ok(Self(s.to_string()))
        } else {
            Err(GraphError::InvalidActor(s.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Follow,
    Mute,
    Report,
}

/// Directed trust relation between two actors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustEdge {
    pub source: ActorId,
    pub target: ActorId,
    pub kind: EdgeKind,
    pub created_at: DateTime<Utc>,
}

/// One published social-graph event: an author restating its edge list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialGraphEvent {
    pub author: ActorId,
    pub kind: EdgeKind,
    pub targets: Vec<ActorId>,
    pub created_at: DateTime<Utc>,
}

/// Edge transport boundary: fetches an actor's outbound edges from relays.
///
/// Implementations block; callers bridge through `spawn_blocking`.
pub trait GraphTransport: Send + Sync {
    /// Fetch up to `limit` outbound edges published by `actor`.
    fn outbound_edges(&self, actor: &ActorId, limit: usize) -> Result<Vec<TrustEdge>, GraphError>;
}

#[derive(Debug, Clone)]
struct ActorEdges {
    // (target, kind) -> latest created_at
    edges: HashMap<(ActorId, EdgeKind), DateTime<Utc>>,
    fetched_at: DateTime<Utc>,
}

/// TTL-bounded cache of outbound edges, keyed by source actor.
pub struct GraphCache {
    actors: HashMap<ActorId, ActorEdges>,
    ttl: Duration,
    max_edges_per_actor: usize,
}

impl GraphCache {
    #[must_use]
    pub fn new(ttl_secs: i64, max_edges_per_actor: usize) -> Self {
        Self {
            actors: HashMap::new(),
            ttl: Duration::seconds(ttl_secs),
            max_edges_per_actor,
        }
    }

    /// Replace an actor's outbound edges with a freshly fetched set.
    ///
    /// Last-write-wins within the batch: a newer timestamp for the same
    /// (target, kind) pair displaces an older one. Edges beyond the per-actor
    /// bound are dropped, newest first kept.
    pub fn store_outbound(&mut self, actor: &ActorId, mut edges: Vec<TrustEdge>) {
        edges.retain(|e| &e.source == actor);
        edges.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        edges.truncate(self.max_edges_per_actor);
        let mut map: HashMap<(ActorId, EdgeKind), DateTime<Utc>> = HashMap::new();
        for e in edges {
            let key = (e.target, e.kind);
            let slot = map.entry(key).or_insert(e.created_at);
            if e.created_at > *slot {
                *slot = e.created_at;
            }
        }
        self.actors.insert(
            actor.clone(),
            ActorEdges {
                edges: map,
                fetched_at: Utc::now(),
            },
        );
    }

    /// Fold a stream of published graph events into the cache.
    ///
    /// Each event contributes one edge per target; stale events never
    /// overwrite newer state for the same (source, target, kind).
    pub fn apply_events(&mut self, events: &[SocialGraphEvent]) {
        for ev in events {
            let entry = self
                .actors
                .entry(ev.author.clone())
                .or_insert_with(|| ActorEdges {
                    edges: HashMap::new(),
                    fetched_at: Utc::now(),
                });
            for target in &ev.targets {
                let key = (target.clone(), ev.kind);
                // The bound gates new edges only; known pairs still take
                // timestamp updates.
                if !entry.edges.contains_key(&key)
                    && entry.edges.len() >= self.max_edges_per_actor
                {
                    continue;
                }
                let slot = entry.edges.entry(key).or_insert(ev.created_at);
                if ev.created_at > *slot {
                    *slot = ev.created_at;
                }
            }
        }
    }

    /// Whether we hold unexpired edge data for `actor`.
    #[must_use]
    pub fn is_fresh(&self, actor: &ActorId, now: DateTime<Utc>) -> bool {
        self.actors
            .get(actor)
            .is_some_and(|a| now - a.fetched_at < self.ttl)
    }

    #[must_use]
    pub fn has_actor(&self, actor: &ActorId) -> bool {
        self.actors.contains_key(actor)
    }

    /// Does `source` hold an edge of `kind` toward `target`?
    #[must_use]
    pub fn has_edge(&self, source: &ActorId, target: &ActorId, kind: EdgeKind) -> bool {
        self.actors
            .get(source)
            .is_some_and(|a| a.edges.contains_key(&(target.clone(), kind)))
    }

    /// All targets of `kind` edges published by `source`.
    #[must_use]
    pub fn targets_of(&self, source: &ActorId, kind: EdgeKind) -> Vec<ActorId> {
        let Some(a) = self.actors.get(source) else {
            return Vec::new();
        };
        a.edges
            .keys()
            .filter(|(_, k)| *k == kind)
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Actors whose outbound edges are currently cached.
    #[must_use]
    pub fn cached_actors(&self) -> Vec<ActorId> {
        self.actors.keys().cloned().collect()
    }

    /// Drop entries whose TTL elapsed before `now`.
    pub fn evict_stale(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.actors.retain(|_, a| now - a.fetched_at < ttl);
    }
}
