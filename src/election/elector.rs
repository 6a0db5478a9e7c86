//! The election loop.
//!
//! An [`Elector`] runs one tick per retry period: read the lock, decide, and
//! when the lease is free, expired or already ours, conditionally write a new
//! claim. Leadership changes are published on a `watch` channel; a separate
//! dispatcher task turns them into calls of the user's callback so a slow
//! callback can never delay lease renewal.

use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::ElectionError;
use super::record::LockRecord;
use super::state_machine::{ElectionEvent, ElectionState, ElectionStateMachine, TransitionResult};
use super::store::{LockObject, LockStore, StoreError};

/// Allowance for clock differences between replicas when judging expiry.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(2);

/// Settings for one election.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    election_id: String,
    identity: String,
    namespace: String,
    lease_duration: Duration,
    retry_period: Duration,
    clock_skew: Duration,
}

impl ElectionConfig {
    /// Election over the lock resource `election_id` in `namespace`.
    ///
    /// `ttl` becomes the lease duration. The retry period defaults to a
    /// quarter of it, leaving several renewal attempts before expiry.
    pub fn new(
        election_id: impl Into<String>,
        identity: impl Into<String>,
        namespace: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            election_id: election_id.into(),
            identity: identity.into(),
            namespace: namespace.into(),
            lease_duration: ttl,
            retry_period: ttl / 4,
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }

    /// Override the tick interval.
    pub fn with_retry_period(mut self, retry_period: Duration) -> Self {
        self.retry_period = retry_period;
        self
    }

    /// Override the clock skew allowance.
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Reject settings that could never hold a lease.
    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.election_id.is_empty() {
            return Err(ElectionError::Config("election_id cannot be empty".to_string()));
        }
        if self.identity.is_empty() {
            return Err(ElectionError::Config("identity cannot be empty".to_string()));
        }
        if self.namespace.is_empty() {
            return Err(ElectionError::Config("namespace cannot be empty".to_string()));
        }
        if self.lease_duration.as_secs() == 0 {
            return Err(ElectionError::Config(format!(
                "lease_duration ({:?}) must be at least one second",
                self.lease_duration
            )));
        }
        if self.retry_period.is_zero() || self.retry_period >= self.lease_duration {
            return Err(ElectionError::Config(format!(
                "retry_period ({:?}) must be non-zero and less than lease_duration ({:?})",
                self.retry_period, self.lease_duration
            )));
        }
        if self.clock_skew >= self.lease_duration {
            return Err(ElectionError::Config(format!(
                "clock_skew ({:?}) must be less than lease_duration ({:?})",
                self.clock_skew, self.lease_duration
            )));
        }
        Ok(())
    }

    /// Name of the lock resource.
    pub fn election_id(&self) -> &str {
        &self.election_id
    }

    /// This replica's identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Namespace of the lock resource.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Lease validity window.
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Tick interval.
    pub fn retry_period(&self) -> Duration {
        self.retry_period
    }

    /// Clock skew allowance.
    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }
}

/// Externally visible result of the latest tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElectionStatus {
    /// This replica's state.
    pub state: ElectionState,
    /// Last observed leader. `None` until a leader has been seen.
    pub leader: Option<String>,
    /// Transition count from the last record read or written.
    pub leader_transitions: i64,
}

/// One replica's participation in an election.
///
/// The elector is the only writer of its own state. Callers observe it via
/// [`Elector::subscribe`].
pub struct Elector {
    config: ElectionConfig,
    store: Arc<dyn LockStore>,
    machine: ElectionStateMachine,
    state: ElectionState,
    leader: Option<String>,
    leader_transitions: i64,
    /// Expiry of the lease this replica last wrote, by its own clock.
    own_lease_expires: Option<Timestamp>,
    status_tx: watch::Sender<ElectionStatus>,
}

impl Elector {
    /// Create an elector in the `Observing` state.
    pub fn new(config: ElectionConfig, store: Arc<dyn LockStore>) -> Self {
        let (status_tx, _) = watch::channel(ElectionStatus::default());
        Self {
            config,
            store,
            machine: ElectionStateMachine::new(),
            state: ElectionState::Observing,
            leader: None,
            leader_transitions: 0,
            own_lease_expires: None,
            status_tx,
        }
    }

    /// Receiver for status changes.
    pub fn subscribe(&self) -> watch::Receiver<ElectionStatus> {
        self.status_tx.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> ElectionState {
        self.state
    }

    /// Last observed leader identity.
    pub fn leader(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    /// Settings this elector runs with.
    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Tick forever at the configured retry period.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.retry_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            election = %self.config.election_id,
            namespace = %self.config.namespace,
            identity = %self.config.identity,
            lease_secs = self.config.lease_duration.as_secs(),
            retry_ms = u64::try_from(self.config.retry_period.as_millis()).unwrap_or(u64::MAX),
            "Starting leader election loop"
        );

        loop {
            interval.tick().await;
            self.tick_at(Timestamp::now()).await;
        }
    }

    /// Run one election round as of `now`.
    pub async fn tick_at(&mut self, now: Timestamp) -> ElectionState {
        match self.read().await {
            Ok((object, record)) => {
                let event = self.classify(record.as_ref(), now);
                self.apply(event);
                match event {
                    ElectionEvent::LeaseHeldByOther => {
                        if let Some(record) = &record {
                            self.observe_leader(&record.holder_identity, record.leader_transitions);
                        }
                    }
                    ElectionEvent::LeaseAvailable | ElectionEvent::LeaseHeldBySelf => {
                        self.acquire(object.as_ref(), record.as_ref(), now).await;
                    }
                    _ => {}
                }
            }
            Err(e) if e.is_malformed_record() => {
                warn!(
                    election = %self.config.election_id,
                    namespace = %self.config.namespace,
                    error = %e,
                    "Lock record is malformed, retrying next tick"
                );
                let event = if self.state == ElectionState::Leading && self.own_lease_lapsed(now) {
                    ElectionEvent::LeaseLapsed
                } else {
                    ElectionEvent::LockUnreadable
                };
                self.apply(event);
            }
            Err(e) => {
                warn!(
                    election = %self.config.election_id,
                    namespace = %self.config.namespace,
                    error = %e,
                    "Failed to read lock, retrying next tick"
                );
                let event = if self.state == ElectionState::Leading && self.own_lease_lapsed(now) {
                    ElectionEvent::LeaseLapsed
                } else {
                    ElectionEvent::StoreUnavailable
                };
                self.apply(event);
            }
        }

        if self.state != ElectionState::Leading {
            self.own_lease_expires = None;
        }
        self.publish();
        self.state
    }

    async fn read(&self) -> Result<(Option<LockObject>, Option<LockRecord>), ElectionError> {
        let object = self
            .store
            .get(&self.config.election_id, &self.config.namespace)
            .await?;
        let record = match object.as_ref().and_then(|o| o.record.as_deref()) {
            Some(raw) => Some(LockRecord::from_json(raw)?),
            None => None,
        };
        Ok((object, record))
    }

    fn classify(&self, record: Option<&LockRecord>, now: Timestamp) -> ElectionEvent {
        match record {
            None => ElectionEvent::LeaseAvailable,
            Some(r) if r.is_held_by(&self.config.identity) => ElectionEvent::LeaseHeldBySelf,
            Some(r) if r.is_unowned() || r.is_expired_at(now, self.config.clock_skew) => {
                ElectionEvent::LeaseAvailable
            }
            Some(_) => ElectionEvent::LeaseHeldByOther,
        }
    }

    async fn acquire(
        &mut self,
        object: Option<&LockObject>,
        previous: Option<&LockRecord>,
        now: Timestamp,
    ) {
        let renewing = previous.is_some_and(|r| r.is_held_by(&self.config.identity))
            && !self.own_lease_lapsed(now);
        let candidate =
            LockRecord::claim(&self.config.identity, self.config.lease_duration, now, previous);

        let raw = match candidate.to_json() {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "Failed to serialize lock record");
                self.apply(ElectionEvent::AcquireFailed);
                return;
            }
        };

        let name = &self.config.election_id;
        let namespace = &self.config.namespace;
        let written = match object {
            None => self.store.create(name, namespace, Some(raw)).await,
            Some(obj) => {
                self.store
                    .update(name, namespace, raw, &obj.resource_version)
                    .await
            }
        };

        // Unrelated writes to the lock object also bump its version
        let (candidate, written) = match written {
            Err(e) if renewing && e.is_conflict() => {
                debug!(
                    election = %self.config.election_id,
                    identity = %self.config.identity,
                    "Lock object changed during renewal, retrying once"
                );
                match self.renew_after_conflict(now).await {
                    Some(retried) => retried,
                    None => (candidate, Err(e)),
                }
            }
            other => (candidate, other),
        };

        match written {
            Ok(_) => {
                if !renewing {
                    info!(
                        election = %self.config.election_id,
                        identity = %self.config.identity,
                        transitions = candidate.leader_transitions,
                        "Acquired leadership"
                    );
                } else {
                    tracing::trace!(identity = %self.config.identity, "Lease renewed");
                }
                self.own_lease_expires = Some(candidate.expires_at());
                self.apply(ElectionEvent::AcquireSucceeded);
                let identity = self.config.identity.clone();
                self.observe_leader(&identity, candidate.leader_transitions);
            }
            Err(e) if e.is_conflict() => {
                debug!(
                    election = %self.config.election_id,
                    identity = %self.config.identity,
                    "Lost lease write race, re-reading"
                );
                self.own_lease_expires = None;
                self.apply(ElectionEvent::AcquireConflicted);
                self.reobserve(now).await;
            }
            Err(e) => {
                warn!(
                    election = %self.config.election_id,
                    identity = %self.config.identity,
                    error = %e,
                    renewing,
                    "Failed to write lease, retrying next tick"
                );
                if renewing {
                    self.apply(ElectionEvent::RenewalFailed);
                } else {
                    self.apply(ElectionEvent::AcquireFailed);
                }
            }
        }
    }

    /// Re-read the lock and, if it still names us, write the renewal against
    /// the fresh version. `None` when the lock moved to someone else.
    async fn renew_after_conflict(
        &self,
        now: Timestamp,
    ) -> Option<(LockRecord, Result<LockObject, StoreError>)> {
        let (Some(object), Some(record)) = self.read().await.ok()? else {
            return None;
        };
        if !record.is_held_by(&self.config.identity) {
            return None;
        }
        let candidate =
            LockRecord::claim(&self.config.identity, self.config.lease_duration, now, Some(&record));
        let raw = candidate.to_json().ok()?;
        let written = self
            .store
            .update(
                &self.config.election_id,
                &self.config.namespace,
                raw,
                &object.resource_version,
            )
            .await;
        Some((candidate, written))
    }

    /// After losing a write race, learn who won without attempting another write.
    async fn reobserve(&mut self, now: Timestamp) {
        match self.read().await {
            Ok((_, Some(record))) => {
                if self.classify(Some(&record), now) == ElectionEvent::LeaseHeldByOther {
                    self.apply(ElectionEvent::LeaseHeldByOther);
                    self.observe_leader(&record.holder_identity, record.leader_transitions);
                }
            }
            Ok((_, None)) => {}
            Err(e) => {
                debug!(error = %e, "Re-read after conflict failed, retrying next tick");
            }
        }
    }

    fn own_lease_lapsed(&self, now: Timestamp) -> bool {
        self.own_lease_expires.is_none_or(|expires| now > expires)
    }

    fn apply(&mut self, event: ElectionEvent) {
        let result = self.machine.transition(self.state, event);
        match &result {
            TransitionResult::Success {
                from,
                to,
                description,
                ..
            } if from != to => {
                debug!(
                    identity = %self.config.identity,
                    from = %from,
                    to = %to,
                    event = %event,
                    "{}",
                    description
                );
            }
            TransitionResult::Success { .. } => {}
            TransitionResult::InvalidTransition { current, event } => {
                warn!(
                    identity = %self.config.identity,
                    state = %current,
                    event = %event,
                    "Ignoring invalid election transition"
                );
            }
        }
        self.state = result.next_state();
    }

    fn observe_leader(&mut self, identity: &str, transitions: i64) {
        if self.leader.as_deref() != Some(identity) {
            info!(
                election = %self.config.election_id,
                leader = %identity,
                is_self = identity == self.config.identity,
                "Observed new leader"
            );
            self.leader = Some(identity.to_string());
        }
        self.leader_transitions = self.leader_transitions.max(transitions);
    }

    fn publish(&self) {
        let status = ElectionStatus {
            state: self.state,
            leader: self.leader.clone(),
            leader_transitions: self.leader_transitions,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Invoke `on_change` for every distinct leader identity published on `rx`.
///
/// Runs until the sender is dropped. Identities published faster than the
/// callback runs collapse to the latest one.
async fn dispatch_leader_changes<F>(mut rx: watch::Receiver<ElectionStatus>, on_change: F)
where
    F: Fn(String) + Send + Sync + 'static,
{
    let mut delivered: Option<String> = None;
    loop {
        let leader = rx.borrow_and_update().leader.clone();
        if let Some(leader) = leader
            && delivered.as_ref() != Some(&leader)
        {
            on_change(leader.clone());
            delivered = Some(leader);
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Make sure the resource holding the lock exists.
async fn ensure_lock_resource(
    store: &dyn LockStore,
    name: &str,
    namespace: &str,
) -> Result<(), ElectionError> {
    if store.get(name, namespace).await?.is_some() {
        return Ok(());
    }
    match store.create(name, namespace, None).await {
        Ok(_) => {
            info!(name = %name, namespace = %namespace, "Created lock resource");
            Ok(())
        }
        Err(e) if e.is_conflict() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Running election: owns the tick and dispatcher tasks.
///
/// Dropping the handle stops both tasks. The lease is not released; peers
/// take over once it expires.
pub struct ElectionHandle {
    config: ElectionConfig,
    status_rx: watch::Receiver<ElectionStatus>,
    ticker: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl ElectionHandle {
    /// This replica's identity.
    pub fn identity(&self) -> &str {
        self.config.identity()
    }

    /// Settings the election runs with.
    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Status as of the latest tick.
    pub fn status(&self) -> ElectionStatus {
        self.status_rx.borrow().clone()
    }

    /// Identity of the last observed leader.
    pub fn current_leader(&self) -> Option<String> {
        self.status_rx.borrow().leader.clone()
    }

    /// Whether this replica currently holds the lease.
    pub fn is_leader(&self) -> bool {
        self.status_rx.borrow().state == ElectionState::Leading
    }

    /// Receiver for status changes.
    pub fn subscribe(&self) -> watch::Receiver<ElectionStatus> {
        self.status_rx.clone()
    }
}

impl Drop for ElectionHandle {
    fn drop(&mut self) {
        self.ticker.abort();
        self.dispatcher.abort();
        debug!(identity = %self.config.identity, "Election stopped");
    }
}

/// Join the election described by `config`.
///
/// Creates the lock resource when it does not exist yet; that is the only
/// store interaction that can fail the call. `on_leader_change` runs on its
/// own task and receives each newly observed leader identity.
pub async fn new_election<F>(
    config: ElectionConfig,
    store: Arc<dyn LockStore>,
    on_leader_change: F,
) -> Result<ElectionHandle, ElectionError>
where
    F: Fn(String) + Send + Sync + 'static,
{
    config.validate()?;
    ensure_lock_resource(store.as_ref(), config.election_id(), config.namespace()).await?;

    let elector = Elector::new(config.clone(), store);
    let status_rx = elector.subscribe();
    let dispatcher = tokio::spawn(dispatch_leader_changes(
        elector.subscribe(),
        on_leader_change,
    ));
    let ticker = tokio::spawn(elector.run());

    Ok(ElectionHandle {
        config,
        status_rx,
        ticker,
        dispatcher,
    })
}

/// Read the identity of the current lock holder.
///
/// A resource without a lock record yields an empty identity, not an error.
/// A malformed record is an error.
pub async fn get_current_leader(
    name: &str,
    namespace: &str,
    store: &dyn LockStore,
) -> Result<(String, LockObject), ElectionError> {
    let object = store
        .get(name, namespace)
        .await?
        .ok_or_else(|| ElectionError::ResourceNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;

    let identity = match object.record.as_deref() {
        Some(raw) => LockRecord::from_json(raw)?.holder_identity,
        None => String::new(),
    };
    Ok((identity, object))
}
