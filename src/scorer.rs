//! Trust tier classification over the cached social graph.
//!
//! `classify` is synchronous and reads only cached edges; `refresh` goes to
//! the transport and collapses concurrent calls for the same actor into one
//! in-flight fetch.

use crate::error::GraphError;
use crate::graph::{ActorId, EdgeKind, GraphCache, GraphTransport, SocialGraphEvent};
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Trust tiers, highest first. Mute dominates every follow-derived tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Own,
    Trusted,
    FriendOfFriend,
    Extended,
    Unknown,
    Muted,
}

impl TrustLevel {
    /// Rank used for filter threshold comparison; Muted deliberately lowest.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            TrustLevel::Own => 4,
            TrustLevel::Trusted => 3,
            TrustLevel::FriendOfFriend => 2,
            TrustLevel::Extended => 1,
            TrustLevel::Unknown => 0,
            TrustLevel::Muted => 0,
        }
    }
}

/// Derived trust indicator for one actor. Never stored, always recomputed
/// from the edge cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustIndicator {
    pub level: TrustLevel,
    pub score: u8,
    pub label: &'static str,
    pub color: &'static str,
}

impl TrustIndicator {
    fn of(level: TrustLevel, score: u8) -> Self {
        let (label, color) = match level {
            TrustLevel::Own => ("you", "purple"),
            TrustLevel::Trusted => ("trusted", "green"),
            TrustLevel::FriendOfFriend => ("friend-of-friend", "teal"),
            TrustLevel::Extended => ("extended", "amber"),
            TrustLevel::Unknown => ("unknown", "gray"),
            TrustLevel::Muted => ("muted", "red"),
        };
        Self {
            level,
            score,
            label,
            color,
        }
    }
}

pub const SCORE_OWN: u8 = 100;
pub const SCORE_TRUSTED: u8 = 80;
pub const SCORE_FOF_BASE: u8 = 50;
pub const SCORE_EXTENDED: u8 = 25;
pub const SCORE_UNKNOWN: u8 = 10;
pub const SCORE_MUTED: u8 = 0;

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    pub ttl_secs: i64,
    pub max_edges_per_actor: usize,
    /// Report edges from the follow set above this count demote an actor
    /// from Extended to Unknown.
    pub report_threshold: usize,
    /// Upper bound on the popularity boost for FriendOfFriend scores.
    pub fof_boost_cap: u8,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_edges_per_actor: 2000,
            report_threshold: 2,
            fof_boost_cap: 70,
        }
    }
}

type RefreshResult = Result<(), GraphError>;
type PendingMap = HashMap<ActorId, watch::Receiver<Option<RefreshResult>>>;

/// Removes the pending-map entry when the owning refresh finishes or its
/// future is dropped mid-flight, so later calls start fresh instead of
/// joining a dead channel.
struct PendingEntry<'a> {
    pending: &'a Mutex<PendingMap>,
    actor: &'a ActorId,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(self.actor);
        }
    }
}

pub struct TrustScorer {
    own: ActorId,
    config: ScorerConfig,
    cache: Mutex<GraphCache>,
    transport: Arc<dyn GraphTransport>,
    pending: Mutex<PendingMap>,
}

impl TrustScorer {
    #[must_use]
    pub fn new(own: ActorId, transport: Arc<dyn GraphTransport>, config: ScorerConfig) -> Self {
        let cache = GraphCache::new(config.ttl_secs, config.max_edges_per_actor);
        Self {
            own,
            config,
            cache: Mutex::new(cache),
            transport,
            pending: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn own_actor(&self) -> &ActorId {
        &self.own
    }

    /// Seed the cache from a batch of published graph events.
    pub fn load_events(&self, events: &[SocialGraphEvent]) {
        self.cache
            .lock()
            .expect("graph cache poisoned")
            .apply_events(events);
    }

    /// Classify an actor from cached edges only. Precedence is fixed:
    /// own identity, then mute, then follow, then second degree, then
    /// anything reachable in the cached neighborhood, then unknown.
    #[must_use]
    pub fn classify(&self, actor: &ActorId) -> TrustIndicator {
        if actor == &self.own {
            return TrustIndicator::of(TrustLevel::Own, SCORE_OWN);
        }
        let cache = self.cache.lock().expect("graph cache poisoned");
        if !cache.has_actor(&self.own) {
            return TrustIndicator::of(TrustLevel::Unknown, SCORE_UNKNOWN);
        }
        if cache.has_edge(&self.own, actor, EdgeKind::Mute) {
            return TrustIndicator::of(TrustLevel::Muted, SCORE_MUTED);
        }
        if cache.has_edge(&self.own, actor, EdgeKind::Follow) {
            return TrustIndicator::of(TrustLevel::Trusted, SCORE_TRUSTED);
        }

        let follows = cache.targets_of(&self.own, EdgeKind::Follow);
        let fof_paths = follows
            .iter()
            .filter(|x| cache.has_edge(x, actor, EdgeKind::Follow))
            .count();
        if fof_paths > 0 {
            let boosted = SCORE_FOF_BASE as usize + 2 * (fof_paths - 1);
            let score = boosted.min(self.config.fof_boost_cap as usize) as u8;
            return TrustIndicator::of(TrustLevel::FriendOfFriend, score);
        }

        let reports = follows
            .iter()
            .filter(|x| cache.has_edge(x, actor, EdgeKind::Report))
            .count();
        let reachable = cache
            .cached_actors()
            .iter()
            .any(|y| y != &self.own && cache.has_edge(y, actor, EdgeKind::Follow));
        if reachable && reports <= self.config.report_threshold {
            return TrustIndicator::of(TrustLevel::Extended, SCORE_EXTENDED);
        }

        TrustIndicator::of(TrustLevel::Unknown, SCORE_UNKNOWN)
    }

    /// Refetch an actor's outbound edges (and the own follow list when it is
    /// missing or stale). Concurrent calls for the same actor join the
    /// in-flight fetch and observe its result. On failure the cache keeps
    /// its last-known edges.
    pub async fn refresh(&self, actor: &ActorId) -> RefreshResult {
        let mut rx = {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            if let Some(rx) = pending.get(actor) {
                rx.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                pending.insert(actor.clone(), rx);
                drop(pending);
                let _evict = PendingEntry {
                    pending: &self.pending,
                    actor,
                };
                let result = self.do_refresh(actor).await;
                let _ = tx.send(Some(result.clone()));
                return result;
            }
        };

        loop {
            if let Some(result) = rx.borrow().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                // Sender gone; either the result was published or the
                // owning refresh was dropped mid-flight.
                return rx
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| Err(GraphError::Network("refresh abandoned".into())));
            }
        }
    }

    /// Refresh the own follow list, then the outbound edges of up to
    /// `contact_limit` followed actors, so second-degree classification has
    /// data to work with. Per-contact failures are logged and skipped.
    pub async fn warm_neighborhood(&self, contact_limit: usize) -> RefreshResult {
        let own = self.own.clone();
        self.refresh(&own).await?;
        let follows = {
            let cache = self.cache.lock().expect("graph cache poisoned");
            cache.targets_of(&own, EdgeKind::Follow)
        };
        for contact in follows.into_iter().take(contact_limit) {
            if let Err(e) = self.refresh(&contact).await {
                warn!("skipping contact {contact}: {e}");
            }
        }
        Ok(())
    }

    async fn do_refresh(&self, actor: &ActorId) -> RefreshResult {
        let now = Utc::now();
        let need_own = {
            let cache = self.cache.lock().expect("graph cache poisoned");
            actor != &self.own && !cache.is_fresh(&self.own, now)
        };
        if need_own {
            let own = self.own.clone();
            let edges = self.fetch_edges(&own).await?;
            self.cache
                .lock()
                .expect("graph cache poisoned")
                .store_outbound(&own, edges);
        }
        let edges = self.fetch_edges(actor).await?;
        debug!("refreshed {} edges for {actor}", edges.len());
        self.cache
            .lock()
            .expect("graph cache poisoned")
            .store_outbound(actor, edges);
        Ok(())
    }

    async fn fetch_edges(&self, actor: &ActorId) -> Result<Vec<crate::graph::TrustEdge>, GraphError> {
        let transport = Arc::clone(&self.transport);
        let actor = actor.clone();
        let limit = self.config.max_edges_per_actor;
        tokio::task::spawn_blocking(move || transport.outbound_edges(&actor, limit))
            .await
            .map_err(|e| GraphError::Network(format!("fetch task aborted: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TrustEdge;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticTransport {
        edges: HashMap<ActorId, Vec<TrustEdge>>,
        calls: AtomicUsize,
    }

    impl StaticTransport {
        fn new(edges: HashMap<ActorId, Vec<TrustEdge>>) -> Self {
            Self {
                edges,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl GraphTransport for StaticTransport {
        fn outbound_edges(
            &self,
            actor: &ActorId,
            _limit: usize,
        ) -> Result<Vec<TrustEdge>, GraphError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.edges.get(actor).cloned().unwrap_or_default())
        }
    }

    fn actor(byte: u8) -> ActorId {
        ActorId::parse(&hex::encode([byte; 32])).unwrap()
    }

    fn follow(src: &ActorId, dst: &ActorId) -> SocialGraphEvent {
        SocialGraphEvent {
            author: src.clone(),
            kind: EdgeKind::Follow,
            targets: vec![dst.clone()],
            created_at: Utc::now(),
        }
    }

    fn scorer_with(events: Vec<SocialGraphEvent>) -> TrustScorer {
        let scorer = TrustScorer::new(
            actor(0),
            Arc::new(StaticTransport::new(HashMap::new())),
            ScorerConfig::default(),
        );
        scorer.load_events(&events);
        scorer
    }

    #[test]
    fn own_identity_ignores_edges() {
        let me = actor(0);
        let scorer = scorer_with(vec![SocialGraphEvent {
            author: me.clone(),
            kind: EdgeKind::Mute,
            targets: vec![me.clone()],
            created_at: Utc::now(),
        }]);
        assert_eq!(scorer.classify(&me).level, TrustLevel::Own);
        assert_eq!(scorer.classify(&me).score, SCORE_OWN);
    }

    #[test]
    fn mute_dominates_follow() {
        let me = actor(0);
        let bob = actor(1);
        let scorer = scorer_with(vec![
            follow(&me, &bob),
            SocialGraphEvent {
                author: me.clone(),
                kind: EdgeKind::Mute,
                targets: vec![bob.clone()],
                created_at: Utc::now(),
            },
        ]);
        let ind = scorer.classify(&bob);
        assert_eq!(ind.level, TrustLevel::Muted);
        assert_eq!(ind.score, SCORE_MUTED);
    }

    #[test]
    fn fof_score_grows_with_paths_and_caps() {
        let me = actor(0);
        let target = actor(99);
        let mut events = Vec::new();
        for i in 1..=20u8 {
            let x = actor(i);
            events.push(follow(&me, &x));
            events.push(follow(&x, &target));
        }
        let scorer = scorer_with(events);
        let ind = scorer.classify(&target);
        assert_eq!(ind.level, TrustLevel::FriendOfFriend);
        assert_eq!(ind.score, ScorerConfig::default().fof_boost_cap);
        assert!(ind.score < SCORE_TRUSTED);
    }

    #[test]
    fn tier_scores_are_monotonic() {
        assert!(SCORE_TRUSTED > SCORE_FOF_BASE);
        assert!(SCORE_FOF_BASE > SCORE_EXTENDED);
        assert!(SCORE_EXTENDED > SCORE_UNKNOWN);
        assert!(SCORE_UNKNOWN > SCORE_MUTED);
    }

    #[test]
    fn unreached_actor_is_unknown() {
        let me = actor(0);
        let scorer = scorer_with(vec![follow(&me, &actor(1))]);
        assert_eq!(scorer.classify(&actor(50)).level, TrustLevel::Unknown);
    }

    #[test]
    fn reachable_third_degree_is_extended() {
        let me = actor(0);
        let x = actor(1);
        let y = actor(2);
        let far = actor(3);
        // me -> x -> y -> far: not FoF, but y's edges are cached.
        let scorer = scorer_with(vec![follow(&me, &x), follow(&x, &y), follow(&y, &far)]);
        assert_eq!(scorer.classify(&far).level, TrustLevel::Extended);
    }

    #[test]
    fn heavily_reported_actor_degrades_to_unknown() {
        let me = actor(0);
        let shady = actor(9);
        // shady is reachable only through a non-contact, so Extended would
        // apply, but the report count from contacts exceeds the threshold.
        let mut events = vec![follow(&actor(30), &shady)];
        for i in 1..=4u8 {
            let x = actor(i);
            events.push(follow(&me, &x));
            events.push(SocialGraphEvent {
                author: x.clone(),
                kind: EdgeKind::Report,
                targets: vec![shady.clone()],
                created_at: Utc::now(),
            });
        }
        let scorer = scorer_with(events);
        assert_eq!(scorer.classify(&shady).level, TrustLevel::Unknown);
    }

    #[tokio::test]
    async fn refresh_populates_cache_and_collapses() {
        let me = actor(0);
        let bob = actor(1);
        let mut edges = HashMap::new();
        edges.insert(
            me.clone(),
            vec![TrustEdge {
                source: me.clone(),
                target: bob.clone(),
                kind: EdgeKind::Follow,
                created_at: Utc::now(),
            }],
        );
        let transport = Arc::new(StaticTransport::new(edges));
        let scorer = Arc::new(TrustScorer::new(
            me.clone(),
            transport.clone(),
            ScorerConfig::default(),
        ));
        let (a, b) = tokio::join!(scorer.refresh(&me), scorer.refresh(&me));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scorer.classify(&bob).level, TrustLevel::Trusted);
    }

    #[tokio::test]
    async fn cancelled_refresh_does_not_wedge_the_actor() {
        struct SlowTransport;
        impl GraphTransport for SlowTransport {
            fn outbound_edges(
                &self,
                _actor: &ActorId,
                _limit: usize,
            ) -> Result<Vec<TrustEdge>, GraphError> {
                std::thread::sleep(Duration::from_millis(200));
                Ok(Vec::new())
            }
        }

        let me = actor(0);
        let scorer = TrustScorer::new(me.clone(), Arc::new(SlowTransport), ScorerConfig::default());
        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), scorer.refresh(&me)).await;
        assert!(cancelled.is_err());

        // The orphaned blocking fetch may still be running; a later call
        // must start its own refresh, not join the dead one.
        tokio::time::sleep(Duration::from_millis(300)).await;
        scorer.refresh(&me).await.expect("later refresh succeeds");
    }
}
