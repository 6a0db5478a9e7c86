//! Finite state machine for one replica's view of the election.
//!
//! Each tick the elector turns what it observed in the lock store into an
//! [`ElectionEvent`] and asks the table for the next [`ElectionState`].
//!
//! ```text
//!                 LeaseHeldByOther
//!   Observing ───────────────────────▶ Following
//!       │  ▲                               │
//!       │  │ AcquireConflicted             │ LeaseAvailable
//!       │  │ AcquireFailed                 ▼
//!       │  └──────────────────────────  Acquiring ◀── LeaseHeldBySelf ── Leading
//!       └── LeaseAvailable ───────────────▶ │                              ▲
//!                                           └──── AcquireSucceeded ────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Leadership belief of this replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ElectionState {
    /// No opinion on leadership yet.
    #[default]
    Observing,
    /// Another identity holds a fresh lease.
    Following,
    /// This replica holds the lease.
    Leading,
    /// Attempting a conditional write to claim or renew the lease.
    Acquiring,
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionState::Observing => write!(f, "Observing"),
            ElectionState::Following => write!(f, "Following"),
            ElectionState::Leading => write!(f, "Leading"),
            ElectionState::Acquiring => write!(f, "Acquiring"),
        }
    }
}

/// What the elector learned from one store interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElectionEvent {
    /// Another identity holds a lease that has not expired.
    LeaseHeldByOther,
    /// The lease is unowned or expired.
    LeaseAvailable,
    /// This replica is the recorded holder.
    LeaseHeldBySelf,
    /// The conditional write succeeded.
    AcquireSucceeded,
    /// Another replica wrote first.
    AcquireConflicted,
    /// Renewing our own lease failed, but it has not lapsed yet.
    RenewalFailed,
    /// Claiming the lease failed for a reason other than a conflict.
    AcquireFailed,
    /// The lock payload could not be parsed.
    LockUnreadable,
    /// The store could not be read.
    StoreUnavailable,
    /// Our own lease lapsed without a successful renewal.
    LeaseLapsed,
}

impl fmt::Display for ElectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionEvent::LeaseHeldByOther => write!(f, "LeaseHeldByOther"),
            ElectionEvent::LeaseAvailable => write!(f, "LeaseAvailable"),
            ElectionEvent::LeaseHeldBySelf => write!(f, "LeaseHeldBySelf"),
            ElectionEvent::AcquireSucceeded => write!(f, "AcquireSucceeded"),
            ElectionEvent::AcquireConflicted => write!(f, "AcquireConflicted"),
            ElectionEvent::RenewalFailed => write!(f, "RenewalFailed"),
            ElectionEvent::AcquireFailed => write!(f, "AcquireFailed"),
            ElectionEvent::LockUnreadable => write!(f, "LockUnreadable"),
            ElectionEvent::StoreUnavailable => write!(f, "StoreUnavailable"),
            ElectionEvent::LeaseLapsed => write!(f, "LeaseLapsed"),
        }
    }
}

/// One row of the transition table.
#[derive(Debug)]
pub struct Transition {
    /// Source state
    pub from: ElectionState,
    /// Target state
    pub to: ElectionState,
    /// Event that triggers this transition
    pub event: ElectionEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: ElectionState,
        to: ElectionState,
        event: ElectionEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: ElectionState,
        to: ElectionState,
        event: ElectionEvent,
        description: &'static str,
    },
    /// Transition was not valid for current state
    InvalidTransition {
        current: ElectionState,
        event: ElectionEvent,
    },
}

impl TransitionResult {
    /// State after applying the result; invalid transitions keep `current`.
    pub fn next_state(&self) -> ElectionState {
        match self {
            TransitionResult::Success { to, .. } => *to,
            TransitionResult::InvalidTransition { current, .. } => *current,
        }
    }
}

/// Transition table for the election.
pub struct ElectionStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ElectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ElectionStateMachine {
    /// Create the state machine with the election transition table
    pub fn new() -> Self {
        use ElectionEvent as E;
        use ElectionState as S;

        Self {
            transitions: vec![
                // ========================================
                // Observing
                // ========================================
                Transition::new(S::Observing, S::Following, E::LeaseHeldByOther, "Leader observed"),
                Transition::new(S::Observing, S::Acquiring, E::LeaseAvailable, "Lease free, claiming"),
                Transition::new(S::Observing, S::Acquiring, E::LeaseHeldBySelf, "Recorded as holder, renewing"),
                Transition::new(S::Observing, S::Observing, E::LockUnreadable, "Lock unreadable, no opinion"),
                Transition::new(S::Observing, S::Observing, E::StoreUnavailable, "Store unavailable, no opinion"),
                // ========================================
                // Following
                // ========================================
                Transition::new(S::Following, S::Following, E::LeaseHeldByOther, "Leader still fresh"),
                Transition::new(S::Following, S::Acquiring, E::LeaseAvailable, "Leader lease expired, claiming"),
                Transition::new(S::Following, S::Acquiring, E::LeaseHeldBySelf, "Recorded as holder, renewing"),
                Transition::new(S::Following, S::Following, E::LockUnreadable, "Lock unreadable, keep following"),
                Transition::new(S::Following, S::Following, E::StoreUnavailable, "Store unavailable, keep following"),
                // ========================================
                // Leading
                // ========================================
                Transition::new(S::Leading, S::Acquiring, E::LeaseHeldBySelf, "Renewing lease"),
                Transition::new(S::Leading, S::Acquiring, E::LeaseAvailable, "Own lease found expired, reclaiming"),
                Transition::new(S::Leading, S::Following, E::LeaseHeldByOther, "Lease taken over by another replica"),
                Transition::new(S::Leading, S::Leading, E::LockUnreadable, "Lock unreadable, keep leading until lapse"),
                Transition::new(S::Leading, S::Leading, E::StoreUnavailable, "Store unavailable, keep leading until lapse"),
                Transition::new(S::Leading, S::Observing, E::LeaseLapsed, "Own lease lapsed without renewal"),
                // ========================================
                // Acquiring (transient)
                // ========================================
                Transition::new(S::Acquiring, S::Leading, E::AcquireSucceeded, "Lease written"),
                Transition::new(S::Acquiring, S::Observing, E::AcquireConflicted, "Lost the write race"),
                Transition::new(S::Acquiring, S::Leading, E::RenewalFailed, "Renewal failed, lease still valid"),
                Transition::new(S::Acquiring, S::Observing, E::AcquireFailed, "Claim failed"),
            ],
        }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(&self, current: ElectionState, event: ElectionEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    /// Check if a transition is valid
    pub fn can_transition(&self, from: ElectionState, event: ElectionEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: ElectionState) -> Vec<ElectionEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event)
            .collect()
    }
}
