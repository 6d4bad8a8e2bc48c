#![forbid(unsafe_code)]

//! Per-subscription settlement state machine.
//!
//! ```text
//!            will-change              deferred settle
//! Unchanged ────────────► WillChange ────────────────► DidChange
//!     ▲                   ▲   │ will-change (coalesced)    │   │
//!     │                   │   └──────┘                     │   │
//!     │                   └────────────── will-change ─────┘   │
//!     └──────────────────────── deliver (demand > 0) ──────────┘
//!
//! any state ── cancel ──► Cancelled (absorbing)
//! ```
//!
//! The functions here are pure: they decide the next state and report what
//! the caller has to do (schedule a settlement, forward completion). The
//! subscription applies the result and performs the side effects.
//!
//! # Invariants
//!
//! 1. A fresh subscription starts in `DidChange`, so the first value needs no
//!    upstream signal.
//! 2. At most one settlement is outstanding per subscription: only the
//!    `Unchanged | DidChange → WillChange` edge schedules one.
//! 3. `Cancelled` is absorbing; every event leaves it unchanged.
//! 4. Completion is forwarded only from `Unchanged`. In every other state it
//!    is dropped, including while a change is pending.

use std::fmt;

/// Where a subscription is in the will-change / did-change cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SettlementState {
    /// The last settled value was delivered; waiting for the next signal.
    Unchanged,
    /// A signal arrived and a settlement is scheduled but has not run.
    WillChange,
    /// A settled value is ready and waits for demand.
    #[default]
    DidChange,
    /// The consumer cancelled; nothing happens any more.
    Cancelled,
}

/// Result of feeding an upstream will-change signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Entered `WillChange`; the caller must schedule a settlement.
    ScheduleSettlement,
    /// A settlement is already pending (or the subscription is cancelled).
    Coalesced,
}

/// Result of feeding upstream completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Nothing pending: tell the consumer the stream is finished.
    Forward,
    /// A value is pending or the subscription is gone: drop the completion.
    Swallow,
}

impl SettlementState {
    /// State of a newly created subscription.
    pub const INITIAL: Self = Self::DidChange;

    #[must_use]
    pub const fn is_cancelled(self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether a settled value is waiting to be delivered.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::DidChange)
    }

    /// Upstream announced an imminent change.
    #[must_use]
    pub const fn on_will_change(self) -> (Self, SignalOutcome) {
        match self {
            Self::Unchanged | Self::DidChange => (Self::WillChange, SignalOutcome::ScheduleSettlement),
            Self::WillChange | Self::Cancelled => (self, SignalOutcome::Coalesced),
        }
    }

    /// The scheduled settlement action ran.
    ///
    /// Returns `None` when the subscription was cancelled in the meantime and
    /// the action must not touch anything.
    #[must_use]
    pub const fn on_settle(self) -> Option<Self> {
        match self {
            Self::Cancelled => None,
            Self::Unchanged | Self::WillChange | Self::DidChange => Some(Self::DidChange),
        }
    }

    /// Upstream finished.
    #[must_use]
    pub const fn on_completion(self) -> CompletionOutcome {
        match self {
            Self::Unchanged => CompletionOutcome::Forward,
            Self::WillChange | Self::DidChange | Self::Cancelled => CompletionOutcome::Swallow,
        }
    }

    /// A settled value was handed to the consumer.
    #[must_use]
    pub const fn on_delivered(self) -> Self {
        match self {
            Self::Cancelled => Self::Cancelled,
            Self::Unchanged | Self::WillChange | Self::DidChange => Self::Unchanged,
        }
    }

    /// Consumer cancelled. `None` if it already was.
    #[must_use]
    pub const fn on_cancel(self) -> Option<Self> {
        match self {
            Self::Cancelled => None,
            Self::Unchanged | Self::WillChange | Self::DidChange => Some(Self::Cancelled),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::WillChange => "will_change",
            Self::DidChange => "did_change",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SettlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
