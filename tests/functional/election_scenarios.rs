//! Multi-replica election scenarios over a shared in-memory lock store.

use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use tokio::sync::mpsc;

use ingress_core::election::{
    ElectionConfig, ElectionError, ElectionState, Elector, LockRecord, MemoryLockStore,
    get_current_leader, new_election,
};

const NS: &str = "ingress-system";
const ELECTION: &str = "ingress-controller-leader";
const TTL: Duration = Duration::from_secs(30);

fn at(secs: i64) -> Timestamp {
    Timestamp::from_second(1_700_000_000 + secs).unwrap()
}

fn elector(identity: &str, store: &Arc<MemoryLockStore>) -> Elector {
    Elector::new(ElectionConfig::new(ELECTION, identity, NS, TTL), store.clone())
}

fn stored_record(store: &MemoryLockStore) -> LockRecord {
    let raw = store.snapshot(ELECTION, NS).unwrap().record.unwrap();
    LockRecord::from_json(&raw).unwrap()
}

#[tokio::test]
async fn test_concurrent_claims_elect_one_leader() {
    let store = Arc::new(MemoryLockStore::new());
    store.put_raw(ELECTION, NS, None);

    let mut a = elector("replica-a", &store);
    let mut b = elector("replica-b", &store);
    let (state_a, state_b) = tokio::join!(a.tick_at(at(0)), b.tick_at(at(0)));

    let mut states = [state_a, state_b];
    states.sort_by_key(|s| *s == ElectionState::Leading);
    assert_eq!(states, [ElectionState::Following, ElectionState::Leading]);

    let holder = stored_record(&store).holder_identity;
    assert_eq!(a.leader(), Some(holder.as_str()));
    assert_eq!(b.leader(), Some(holder.as_str()));
}

#[tokio::test]
async fn test_concurrent_creates_elect_one_leader() {
    let store = Arc::new(MemoryLockStore::new());

    let mut electors: Vec<Elector> = (0..4)
        .map(|i| elector(&format!("replica-{i}"), &store))
        .collect();
    let states = futures::future::join_all(electors.iter_mut().map(|e| e.tick_at(at(0)))).await;

    let leaders = states
        .iter()
        .filter(|s| **s == ElectionState::Leading)
        .count();
    assert_eq!(leaders, 1);
    assert!(states
        .iter()
        .all(|s| matches!(s, ElectionState::Leading | ElectionState::Following)));
}

#[tokio::test]
async fn test_follower_takes_over_after_leader_stops_renewing() {
    let store = Arc::new(MemoryLockStore::new());
    let mut a = elector("replica-a", &store);
    let mut b = elector("replica-b", &store);

    assert_eq!(a.tick_at(at(0)).await, ElectionState::Leading);
    assert_eq!(b.tick_at(at(1)).await, ElectionState::Following);

    // replica-a renews at +7 and then goes silent
    assert_eq!(a.tick_at(at(7)).await, ElectionState::Leading);
    for t in [10, 20, 30, 39] {
        assert_eq!(b.tick_at(at(t)).await, ElectionState::Following, "tick at +{t}");
    }

    // Lease renewed at +7 runs to +37, plus 2s skew
    assert_eq!(b.tick_at(at(40)).await, ElectionState::Leading);
    let record = stored_record(&store);
    assert_eq!(record.holder_identity, "replica-b");
    assert_eq!(record.leader_transitions, 1);

    // The old leader learns about the takeover on its next read
    assert_eq!(a.tick_at(at(41)).await, ElectionState::Following);
    assert_eq!(a.leader(), Some("replica-b"));
}

#[tokio::test]
async fn test_leadership_is_stable_while_renewed() {
    let store = Arc::new(MemoryLockStore::new());
    let mut a = elector("replica-a", &store);
    let mut b = elector("replica-b", &store);

    a.tick_at(at(0)).await;
    for round in 1..=20 {
        let now = at(round * 7);
        assert_eq!(a.tick_at(now).await, ElectionState::Leading);
        assert_eq!(b.tick_at(now).await, ElectionState::Following);
    }

    let record = stored_record(&store);
    assert_eq!(record.holder_identity, "replica-a");
    assert_eq!(record.acquire_time, at(0));
    assert_eq!(record.leader_transitions, 0);
}

#[tokio::test]
async fn test_get_current_leader_tracks_winner() {
    let store = Arc::new(MemoryLockStore::new());
    store.put_raw(ELECTION, NS, None);

    let (identity, _) = get_current_leader(ELECTION, NS, store.as_ref()).await.unwrap();
    assert_eq!(identity, "");

    let mut a = elector("replica-a", &store);
    a.tick_at(at(0)).await;

    let (identity, object) = get_current_leader(ELECTION, NS, store.as_ref()).await.unwrap();
    assert_eq!(identity, "replica-a");
    assert_eq!(object.namespace, NS);
    assert!(object.record.is_some());
}

#[tokio::test]
async fn test_get_current_leader_errors() {
    let store = Arc::new(MemoryLockStore::new());
    let err = get_current_leader(ELECTION, NS, store.as_ref()).await.unwrap_err();
    assert!(matches!(err, ElectionError::ResourceNotFound { .. }));

    store.put_raw(ELECTION, NS, Some("just-test-error-leader-annotation".to_string()));
    let err = get_current_leader(ELECTION, NS, store.as_ref()).await.unwrap_err();
    assert!(err.is_malformed_record());
}

#[tokio::test]
async fn test_new_election_becomes_leader_and_notifies() {
    let store = Arc::new(MemoryLockStore::new());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let config = ElectionConfig::new(ELECTION, "startLeader", NS, Duration::from_secs(4))
        .with_retry_period(Duration::from_millis(100));
    let handle = new_election(config, store.clone(), move |leader| {
        let _ = tx.send(leader);
    })
    .await
    .unwrap();

    let leader = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no leader notification")
        .unwrap();
    assert_eq!(leader, "startLeader");
    assert!(handle.is_leader());
    assert_eq!(handle.current_leader().as_deref(), Some("startLeader"));

    let (identity, _) = get_current_leader(ELECTION, NS, store.as_ref()).await.unwrap();
    assert_eq!(identity, "startLeader");
}

#[tokio::test]
async fn test_second_election_follows_first() {
    let store = Arc::new(MemoryLockStore::new());
    let config = |identity: &str| {
        ElectionConfig::new(ELECTION, identity, NS, Duration::from_secs(4))
            .with_retry_period(Duration::from_millis(100))
    };

    let first = new_election(config("first"), store.clone(), |_| {}).await.unwrap();
    let mut status = first.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.state == ElectionState::Leading),
    )
    .await
    .expect("first replica never led")
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let second = new_election(config("second"), store.clone(), move |leader| {
        let _ = tx.send(leader);
    })
    .await
    .unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no leader notification")
        .unwrap();
    assert_eq!(seen, "first");
    assert!(!second.is_leader());
    assert!(first.is_leader());
}
