// Test code is allowed to panic on failure
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Unit tests for ingress-core.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation through the public API.

mod state_machine_tests {
    use ingress_core::election::{ElectionEvent, ElectionState, ElectionStateMachine};

    #[test]
    fn test_valid_events_from_observing() {
        let sm = ElectionStateMachine::new();
        assert!(sm.can_transition(ElectionState::Observing, ElectionEvent::LeaseHeldByOther));
        assert!(sm.can_transition(ElectionState::Observing, ElectionEvent::LeaseAvailable));
        assert!(sm.can_transition(ElectionState::Observing, ElectionEvent::StoreUnavailable));
        // Observing never writes, so write outcomes are meaningless here
        assert!(!sm.can_transition(ElectionState::Observing, ElectionEvent::AcquireSucceeded));
        assert!(!sm.can_transition(ElectionState::Observing, ElectionEvent::LeaseLapsed));
    }

    #[test]
    fn test_valid_events_from_leading() {
        let sm = ElectionStateMachine::new();
        assert!(sm.can_transition(ElectionState::Leading, ElectionEvent::LeaseHeldBySelf));
        assert!(sm.can_transition(ElectionState::Leading, ElectionEvent::LeaseHeldByOther));
        assert!(sm.can_transition(ElectionState::Leading, ElectionEvent::LeaseLapsed));
        assert!(!sm.can_transition(ElectionState::Leading, ElectionEvent::AcquireConflicted));
    }

    #[test]
    fn test_takeover_demotes_leader() {
        let sm = ElectionStateMachine::new();
        let next = sm
            .transition(ElectionState::Leading, ElectionEvent::LeaseHeldByOther)
            .next_state();
        assert_eq!(next, ElectionState::Following);
    }

    #[test]
    fn test_renewal_failure_keeps_leading() {
        let sm = ElectionStateMachine::new();
        let acquiring = sm
            .transition(ElectionState::Leading, ElectionEvent::LeaseHeldBySelf)
            .next_state();
        let next = sm
            .transition(acquiring, ElectionEvent::RenewalFailed)
            .next_state();
        assert_eq!(next, ElectionState::Leading);
    }

    #[test]
    fn test_every_state_has_events() {
        let sm = ElectionStateMachine::new();
        for state in [
            ElectionState::Observing,
            ElectionState::Following,
            ElectionState::Leading,
            ElectionState::Acquiring,
        ] {
            assert!(
                !sm.valid_events(state).is_empty(),
                "{state} has no outgoing transitions"
            );
        }
    }
}

mod record_tests {
    use std::time::Duration;

    use ingress_core::election::{LEADER_ANNOTATION_KEY, LockRecord};
    use jiff::Timestamp;

    #[test]
    fn test_annotation_key() {
        assert_eq!(LEADER_ANNOTATION_KEY, "control-plane.alpha.kubernetes.io/leader");
    }

    #[test]
    fn test_parses_record_written_by_other_controllers() {
        let raw = r#"{"holderIdentity":"ingress-7d9f","leaseDurationSeconds":30,"acquireTime":"2024-05-01T10:00:00Z","renewTime":"2024-05-01T10:05:00Z","leaderTransitions":5}"#;
        let record = LockRecord::from_json(raw).unwrap();
        assert_eq!(record.holder_identity, "ingress-7d9f");
        assert_eq!(record.leader_transitions, 5);
        assert_eq!(
            record.expires_at(),
            "2024-05-01T10:05:30Z".parse::<Timestamp>().unwrap()
        );
    }

    #[test]
    fn test_missing_holder_is_unowned() {
        let raw = r#"{"leaseDurationSeconds":30,"acquireTime":"2024-05-01T10:00:00Z","renewTime":"2024-05-01T10:00:00Z"}"#;
        let record = LockRecord::from_json(raw).unwrap();
        assert!(record.is_unowned());
        assert_eq!(record.leader_transitions, 0);

        let now = "2024-05-01T10:00:10Z".parse::<Timestamp>().unwrap();
        let claimed = LockRecord::claim("b", Duration::from_secs(30), now, Some(&record));
        assert_eq!(claimed.leader_transitions, 1);
    }
}

mod error_tests {
    use ingress_core::controller::error::Error;
    use ingress_core::election::{ElectionError, StoreError};

    #[test]
    fn test_error_is_retryable() {
        let kube_err = Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "timeout".to_string(),
            reason: "Timeout".to_string(),
            code: 504,
        }));
        assert!(kube_err.is_retryable());

        let missing = Error::MissingField("metadata.namespace".to_string());
        assert!(!missing.is_retryable());

        let store = Error::Election(ElectionError::Store(StoreError::Unavailable(
            "connection reset".to_string(),
        )));
        assert!(store.is_retryable());
    }

    #[test]
    fn test_conflict_classification() {
        let conflict = StoreError::Conflict {
            namespace: "default".to_string(),
            name: "lock".to_string(),
        };
        assert!(conflict.is_conflict());
        assert!(!StoreError::Unavailable("x".to_string()).is_conflict());
    }
}

mod resolver_tests {
    use std::collections::BTreeMap;

    use ingress_core::resolver::{
        BackendDefaults, ConfigResolver, ResolverError, StaticResolver, split_secret_name,
    };
    use k8s_openapi::api::core::v1::Secret;

    #[test]
    fn test_backend_defaults() {
        let defaults = BackendDefaults::default();
        assert_eq!(defaults.proxy_connect_timeout, 5);
        assert_eq!(defaults.proxy_body_size, "1m");
        assert!(defaults.ssl_redirect);
        assert!(defaults.whitelist_source_range.is_empty());
    }

    #[test]
    fn test_split_secret_name() {
        assert_eq!(split_secret_name("ns/name").unwrap(), ("ns", "name"));
        assert!(matches!(
            split_secret_name("name"),
            Err(ResolverError::InvalidName(_))
        ));
    }

    #[test]
    fn test_auth_certificate_from_string_data() {
        let secret = Secret {
            string_data: Some(BTreeMap::from([(
                "ca.crt".to_string(),
                "pem".to_string(),
            )])),
            ..Default::default()
        };
        let resolver = StaticResolver::default().with_secret("tls/ca", secret);
        let cert = resolver.get_auth_certificate("tls/ca").unwrap();
        assert_eq!(cert.ca_file_name, "ca-tls-ca.pem");
        assert_eq!(cert.pem_sha.len(), 64);
    }

    #[test]
    fn test_auth_certificate_missing_key() {
        let resolver = StaticResolver::default().with_secret("tls/empty", Secret::default());
        assert!(matches!(
            resolver.get_auth_certificate("tls/empty"),
            Err(ResolverError::MissingKey { .. })
        ));
    }
}

mod config_tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use ingress_core::ControllerConfig;

    #[test]
    fn test_empty_values_count_as_unset() {
        let vars = HashMap::from([
            ("POD_NAME", "ingress-0"),
            ("POD_NAMESPACE", " "),
            ("WATCH_NAMESPACE", ""),
            ("ELECTION_TTL_SECS", "12"),
        ]);
        let cfg = ControllerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.pod_namespace, "default");
        assert_eq!(cfg.watch_namespace, None);
        assert_eq!(cfg.election().retry_period(), Duration::from_secs(3));
    }
}

mod reporting_tests {
    use std::sync::Arc;

    use ingress_core::AnnotationExtractor;
    use ingress_core::annotations::ANNOTATION_PREFIX;
    use ingress_core::controller::reconciler::{IngressEvent, plan_event};
    use ingress_core::resolver::StaticResolver;
    use k8s_openapi::api::networking::v1::Ingress;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn ingress(annotations: &[(&str, &str)]) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (format!("{ANNOTATION_PREFIX}{k}"), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_denied_generation_reported_once() {
        let extractor = AnnotationExtractor::new(Arc::new(StaticResolver::default()), "/nonexistent");
        let snapshot = extractor.extract(&ingress(&[("limit-rps", "-5")]));

        let Some(IngressEvent::Denied { note }) = plan_event(&snapshot, true) else {
            panic!("expected a denial");
        };
        assert!(note.starts_with("RateLimit rejected"));
        assert_eq!(plan_event(&snapshot, false), None);
    }
}

mod health_tests {
    use ingress_core::HealthState;

    #[tokio::test]
    async fn test_starts_not_ready() {
        let state = HealthState::new();
        assert!(!state.is_ready().await);
        assert!(state.metrics.encode().contains("ingress_core_is_leader 0"));
    }
}
