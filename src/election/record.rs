//! The serialized leadership claim.
//!
//! A `LockRecord` lives as a JSON string inside a single annotation of the
//! shared lock resource. The store never interprets it; only the elector
//! reads and writes it.

use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Deserializer, Serialize};

/// Annotation key holding the serialized lock record.
pub const LEADER_ANNOTATION_KEY: &str = "control-plane.alpha.kubernetes.io/leader";

/// Leadership claim shared by all replicas of one election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Identity of the owning replica. Empty means unowned.
    #[serde(default)]
    pub holder_identity: String,
    /// Validity window of the lease, counted from `renew_time`.
    pub lease_duration_seconds: i64,
    /// When the current holder first acquired the lease.
    #[serde(default, deserialize_with = "null_as_epoch")]
    pub acquire_time: Timestamp,
    /// Last successful renewal by the current holder.
    #[serde(default, deserialize_with = "null_as_epoch")]
    pub renew_time: Timestamp,
    /// Number of times the holder changed.
    #[serde(default)]
    pub leader_transitions: i64,
}

impl LockRecord {
    /// Build the candidate record for `identity` claiming or renewing the lease.
    ///
    /// When the holder is unchanged the acquire time and transition count are
    /// carried over. A change of holder resets the acquire time and bumps the
    /// transition count. The first record ever written starts at zero.
    pub fn claim(
        identity: &str,
        lease_duration: Duration,
        now: Timestamp,
        previous: Option<&LockRecord>,
    ) -> Self {
        let now = whole_seconds(now);
        let lease_duration_seconds = i64::try_from(lease_duration.as_secs()).unwrap_or(i64::MAX);

        match previous {
            Some(prev) if prev.holder_identity == identity => Self {
                holder_identity: identity.to_string(),
                lease_duration_seconds,
                acquire_time: prev.acquire_time.min(now),
                renew_time: now,
                leader_transitions: prev.leader_transitions,
            },
            Some(prev) => Self {
                holder_identity: identity.to_string(),
                lease_duration_seconds,
                acquire_time: now,
                renew_time: now,
                leader_transitions: prev.leader_transitions.saturating_add(1),
            },
            None => Self {
                holder_identity: identity.to_string(),
                lease_duration_seconds,
                acquire_time: now,
                renew_time: now,
                leader_transitions: 0,
            },
        }
    }

    /// Parse a record from its annotation value.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Serialize the record for storage.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether nobody holds the lease.
    pub fn is_unowned(&self) -> bool {
        self.holder_identity.is_empty()
    }

    /// Whether `identity` is the current holder.
    pub fn is_held_by(&self, identity: &str) -> bool {
        !self.is_unowned() && self.holder_identity == identity
    }

    /// Instant after which the lease is no longer valid.
    pub fn expires_at(&self) -> Timestamp {
        self.renew_time
            .checked_add(SignedDuration::from_secs(self.lease_duration_seconds))
            .unwrap_or(Timestamp::MAX)
    }

    /// Whether the lease has expired at `now`, allowing for `clock_skew`
    /// between the holder's clock and ours.
    pub fn is_expired_at(&self, now: Timestamp, clock_skew: Duration) -> bool {
        let skew = SignedDuration::try_from(clock_skew).unwrap_or(SignedDuration::MAX);
        let deadline = self
            .expires_at()
            .checked_add(skew)
            .unwrap_or(Timestamp::MAX);
        now > deadline
    }
}

/// The record format carries second precision only.
/// Zero times written by other clients arrive as `null`.
fn null_as_epoch<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Timestamp>::deserialize(deserializer)?.unwrap_or(Timestamp::UNIX_EPOCH))
}

fn whole_seconds(ts: Timestamp) -> Timestamp {
    Timestamp::from_second(ts.as_second()).unwrap_or(ts)
}
