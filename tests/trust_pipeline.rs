use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use trustline::error::GraphError;
use trustline::filter::{FilterLevel, WotFilter};
use trustline::graph::{ActorId, EdgeKind, GraphTransport, SocialGraphEvent, TrustEdge};
use trustline::scorer::{ScorerConfig, TrustLevel, TrustScorer};

struct NullTransport;

impl GraphTransport for NullTransport {
    fn outbound_edges(
        &self,
        _actor: &ActorId,
        _limit: usize,
    ) -> Result<Vec<TrustEdge>, GraphError> {
        Ok(Vec::new())
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

/// Snapshot: me follows alice and carol, mutes mallory; alice follows bob;
/// bob follows dave. mallory is also followed by alice.
fn seeded_scorer() -> (TrustScorer, HashMap<&'static str, ActorId>) {
    let me = actor(0);
    let alice = actor(1);
    let carol = actor(2);
    let bob = actor(3);
    let dave = actor(4);
    let mallory = actor(5);

    let events = vec![
        follow(&me, &alice),
        follow(&me, &carol),
        SocialGraphEvent {
            author: me.clone(),
            kind: EdgeKind::Mute,
            targets: vec![mallory.clone()],
            created_at: Utc::now(),
        },
        follow(&alice, &bob),
        follow(&alice, &mallory),
        follow(&bob, &dave),
    ];
    let scorer = TrustScorer::new(me.clone(), Arc::new(NullTransport), ScorerConfig::default());
    scorer.load_events(&events);

    let mut names = HashMap::new();
    names.insert("me", me);
    names.insert("alice", alice);
    names.insert("carol", carol);
    names.insert("bob", bob);
    names.insert("dave", dave);
    names.insert("mallory", mallory);
    (scorer, names)
}

#[test]
fn tiers_across_the_snapshot() {
    let (scorer, n) = seeded_scorer();
    assert_eq!(scorer.classify(&n["me"]).level, TrustLevel::Own);
    assert_eq!(scorer.classify(&n["alice"]).level, TrustLevel::Trusted);
    assert_eq!(scorer.classify(&n["bob"]).level, TrustLevel::FriendOfFriend);
    assert_eq!(scorer.classify(&n["dave"]).level, TrustLevel::Extended);
    assert_eq!(scorer.classify(&n["mallory"]).level, TrustLevel::Muted);
    assert_eq!(scorer.classify(&actor(99)).level, TrustLevel::Unknown);
}

#[test]
fn mute_wins_even_with_a_follow_path() {
    let (scorer, n) = seeded_scorer();
    // alice follows mallory, which would make mallory FriendOfFriend,
    // but the local mute dominates.
    let ind = scorer.classify(&n["mallory"]);
    assert_eq!(ind.level, TrustLevel::Muted);
    assert_eq!(ind.score, 0);
}

#[test]
fn filter_pipeline_over_classified_stream() {
    let (scorer, n) = seeded_scorer();
    let authors = ["me", "alice", "bob", "dave", "mallory"];

    let mut filter = WotFilter::new(FilterLevel::FriendOfFriend, false);
    let visible: Vec<&str> = authors
        .iter()
        .filter(|name| filter.passes(&scorer.classify(&n[**name])))
        .copied()
        .collect();
    assert_eq!(visible, vec!["me", "alice", "bob"]);

    filter.set_filter_level(FilterLevel::All);
    let visible: Vec<&str> = authors
        .iter()
        .filter(|name| filter.passes(&scorer.classify(&n[**name])))
        .copied()
        .collect();
    // Everything but the muted actor.
    assert_eq!(visible, vec!["me", "alice", "bob", "dave"]);
}

#[tokio::test]
async fn failed_refresh_keeps_cached_classification() {
    struct FailingTransport;
    impl GraphTransport for FailingTransport {
        fn outbound_edges(
            &self,
            _actor: &ActorId,
            _limit: usize,
        ) -> Result<Vec<TrustEdge>, GraphError> {
            Err(GraphError::Network("relay unreachable".into()))
        }
    }

    let me = actor(0);
    let alice = actor(1);
    let scorer = TrustScorer::new(
        me.clone(),
        Arc::new(FailingTransport),
        ScorerConfig::default(),
    );
    scorer.load_events(&[follow(&me, &alice)]);

    assert!(scorer.refresh(&alice).await.is_err());
    // Prior cached data still classifies.
    assert_eq!(scorer.classify(&alice).level, TrustLevel::Trusted);
}
