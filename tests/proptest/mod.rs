// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for ingress-core.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::sync::Arc;
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use proptest::prelude::*;

use ingress_core::annotations::{ANNOTATION_PREFIX, AnnotationExtractor};
use ingress_core::election::{
    ElectionConfig, ElectionEvent, ElectionState, ElectionStateMachine, Elector, LockRecord,
    MemoryLockStore,
};
use ingress_core::resolver::StaticResolver;

const NS: &str = "ingress-system";
const ELECTION: &str = "leader";

/// Strategy for generating random states.
fn any_state() -> impl Strategy<Value = ElectionState> {
    prop_oneof![
        Just(ElectionState::Observing),
        Just(ElectionState::Following),
        Just(ElectionState::Leading),
        Just(ElectionState::Acquiring),
    ]
}

/// Strategy for generating random events.
fn any_event() -> impl Strategy<Value = ElectionEvent> {
    prop_oneof![
        Just(ElectionEvent::LeaseHeldByOther),
        Just(ElectionEvent::LeaseAvailable),
        Just(ElectionEvent::LeaseHeldBySelf),
        Just(ElectionEvent::AcquireSucceeded),
        Just(ElectionEvent::AcquireConflicted),
        Just(ElectionEvent::RenewalFailed),
        Just(ElectionEvent::AcquireFailed),
        Just(ElectionEvent::LockUnreadable),
        Just(ElectionEvent::StoreUnavailable),
        Just(ElectionEvent::LeaseLapsed),
    ]
}

fn at(secs: i64) -> Timestamp {
    Timestamp::from_second(1_700_000_000 + secs).unwrap()
}

/// Annotation, a value its parser accepts, a value it rejects, and the
/// registry name the outcome is recorded under.
const ANNOTATION_CASES: [(&str, &str, &str, &str); 9] = [
    ("enable-cors", "true", "maybe", "EnableCORS"),
    ("auth-url", "http://auth.local/", "ftp://auth.local/", "ExternalAuth"),
    ("proxy-body-size", "8m", "huge", "Proxy"),
    ("limit-rps", "5", "-1", "RateLimit"),
    ("app-root", "/app", "app", "Redirect"),
    ("ssl-passthrough", "false", "perhaps", "SSLPassthrough"),
    ("affinity", "cookie", "sticky", "SessionAffinity"),
    ("use-port-in-redirects", "true", "sometimes", "UsePortInRedirects"),
    ("whitelist-source-range", "10.0.0.0/8", "not-an-ip", "Whitelist"),
];

fn ingress_with(annotations: impl Iterator<Item = (String, String)>) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some("default".to_string()),
            annotations: Some(annotations.collect()),
            ..Default::default()
        },
        ..Default::default()
    }
}

proptest! {
    /// Property: State machine transitions are deterministic.
    #[test]
    fn test_state_transitions_deterministic(state in any_state(), event in any_event()) {
        let sm = ElectionStateMachine::new();
        prop_assert_eq!(sm.transition(state, event), sm.transition(state, event));
    }

    /// Property: An event the table does not know leaves the state alone.
    #[test]
    fn test_invalid_transition_keeps_state(state in any_state(), event in any_event()) {
        let sm = ElectionStateMachine::new();
        if !sm.can_transition(state, event) {
            prop_assert_eq!(sm.transition(state, event).next_state(), state);
        }
    }

    /// Property: Leadership is only gained through a successful write.
    #[test]
    fn test_leading_requires_acquiring(state in any_state(), event in any_event()) {
        let sm = ElectionStateMachine::new();
        let next = sm.transition(state, event).next_state();
        if next == ElectionState::Leading && state != ElectionState::Leading {
            prop_assert_eq!(state, ElectionState::Acquiring);
            prop_assert!(matches!(
                event,
                ElectionEvent::AcquireSucceeded | ElectionEvent::RenewalFailed
            ));
        }
    }

    /// Property: Once expired, a lease stays expired.
    #[test]
    fn test_expiry_is_monotonic(
        lease in 1u64..300,
        skew in 0u64..10,
        probe in 0i64..1000,
        later in 0i64..1000,
    ) {
        let record = LockRecord::claim("a", Duration::from_secs(lease), at(0), None);
        let skew = Duration::from_secs(skew);
        if record.is_expired_at(at(probe), skew) {
            prop_assert!(record.is_expired_at(at(probe + later), skew));
        }
        let deadline = i64::try_from(lease + skew.as_secs()).unwrap();
        prop_assert!(!record.is_expired_at(at(deadline), skew));
        prop_assert!(record.is_expired_at(at(deadline + 1), skew));
    }

    /// Property: Sub-second precision never leaks into the stored record.
    #[test]
    fn test_claim_times_are_whole_seconds(secs in 0i64..100_000, millis in 0i64..1000) {
        let now = at(secs).checked_add(SignedDuration::from_millis(millis)).unwrap();
        let record = LockRecord::claim("a", Duration::from_secs(30), now, None);
        prop_assert_eq!(record.renew_time, at(secs));
        prop_assert_eq!(LockRecord::from_json(&record.to_json().unwrap()).unwrap(), record);
    }

    /// Property: A full round of ticks at one instant ends with exactly one
    /// leader, the stored holder, and transitions never decrease.
    #[test]
    fn test_one_leader_per_round(
        rounds in proptest::collection::vec(
            (1i64..90, Just(vec![0usize, 1, 2]).prop_shuffle()),
            1..12,
        ),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let store = Arc::new(MemoryLockStore::new());
            let mut electors: Vec<Elector> = (0..3)
                .map(|i| {
                    let config = ElectionConfig::new(
                        ELECTION,
                        format!("replica-{i}"),
                        NS,
                        Duration::from_secs(30),
                    );
                    Elector::new(config, store.clone())
                })
                .collect();

            let mut now = 0;
            let mut transitions = 0;
            for (gap, order) in rounds {
                now += gap;
                for i in order {
                    electors[i].tick_at(at(now)).await;
                }

                let leaders: Vec<usize> = (0..3)
                    .filter(|i| electors[*i].state() == ElectionState::Leading)
                    .collect();
                prop_assert_eq!(leaders.len(), 1, "round at +{}", now);

                let raw = store.snapshot(ELECTION, NS).unwrap().record.unwrap();
                let record = LockRecord::from_json(&raw).unwrap();
                prop_assert_eq!(record.holder_identity, format!("replica-{}", leaders[0]));
                prop_assert!(record.leader_transitions >= transitions);
                transitions = record.leader_transitions;
            }
            Ok(())
        })?;
    }

    /// Property: The denial names the first failing parser in registry
    /// order, and every other chosen annotation still yields its value.
    #[test]
    fn test_extraction_aggregation(
        choices in proptest::collection::vec((any::<bool>(), any::<bool>()), ANNOTATION_CASES.len()),
    ) {
        let extractor = AnnotationExtractor::new(Arc::new(StaticResolver::default()), "/nonexistent");
        let chosen: Vec<_> = ANNOTATION_CASES
            .iter()
            .zip(&choices)
            .filter(|(_, (set, _))| *set)
            .map(|(case, (_, invalid))| (*case, *invalid))
            .collect();

        let ingress = ingress_with(chosen.iter().map(|((name, good, bad, _), invalid)| {
            let value = if *invalid { bad } else { good };
            (format!("{ANNOTATION_PREFIX}{name}"), (*value).to_string())
        }));
        let snapshot = extractor.extract(&ingress);

        let expected_denial = chosen
            .iter()
            .filter(|(_, invalid)| *invalid)
            .map(|((_, _, _, parser), _)| *parser)
            .min();
        prop_assert_eq!(snapshot.denial().map(|d| d.annotation.as_str()), expected_denial);

        for ((_, _, _, parser), invalid) in &chosen {
            prop_assert_eq!(snapshot.contains(parser), !*invalid, "parser {}", parser);
        }
    }
}
