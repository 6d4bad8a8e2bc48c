#![forbid(unsafe_code)]

//! The live did-change subscription.
//!
//! One [`SubscriptionCore`] exists per downstream consumer. It listens to the
//! source's will-change signal with unlimited internal demand, runs the
//! [`SettlementState`] machine, keeps the demand ledger, and delivers at most
//! one value per settlement.
//!
//! # Ownership
//!
//! ```text
//! SubscriptionHandle ──Rc──► SubscriptionCore ──► UpstreamHandle ──Rc──► observer closures
//!                                ▲                                             │
//!                                └──────────────── Weak ◄─────────────────────┘
//! scheduled settlement ── Weak ──┘
//! ```
//!
//! The consumer owns the core through its handles. The source and the
//! scheduler only hold weak references, so a deferred settlement that runs
//! after the last handle is gone does nothing. Dropping every handle
//! therefore cancels the subscription.
//!
//! # Re-entrancy
//!
//! Consumer callbacks may call back into the handle (`request`, `cancel`) or
//! mutate the source. While a callback runs the consumer is "in flight":
//!
//! - `request` only updates the ledger; demand is serviced when the callback
//!   returns.
//! - a settlement that lands meanwhile (synchronous scheduler) parks in
//!   `DidChange` and is serviced when the callback returns.
//! - completion is held back until the callback returns.
//! - `cancel` takes effect immediately for state and upstream; the consumer
//!   itself is released when the callback returns.
//!
//! Delivery is therefore strictly ordered with at most one value in flight.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::demand::Demand;
use crate::scheduler::Scheduler;
use crate::signal::{UpstreamHandle, WillChange};
use crate::state::{CompletionOutcome, SettlementState, SignalOutcome};
use crate::subscriber::Subscriber;

/// Selector stored by the publisher, applied to the shared source.
pub(crate) type Selector<S, T> = Rc<dyn Fn(&Rc<S>) -> T>;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Counters kept per subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionStats {
    /// Settlement actions that ran (entered `DidChange`).
    pub settlements: u64,
    /// Will-change signals folded into an already pending settlement.
    pub coalesced_signals: u64,
    /// Values handed to the consumer.
    pub delivered: u64,
}

/// Control surface shared by every [`SubscriptionHandle`].
trait SubscriptionControl {
    fn id(&self) -> u64;
    fn request(&self, demand: Demand);
    fn cancel(&self);
    fn state(&self) -> SettlementState;
    fn demand(&self) -> Demand;
    fn is_completed(&self) -> bool;
    fn stats(&self) -> SubscriptionStats;
}

pub(crate) struct SubscriptionCore<S, T> {
    id: u64,
    source: Rc<S>,
    selector: Selector<S, T>,
    scheduler: Rc<dyn Scheduler>,
    state: Cell<SettlementState>,
    demand: Cell<Demand>,
    upstream: RefCell<Option<UpstreamHandle>>,
    downstream: RefCell<Option<Box<dyn Subscriber<T>>>>,
    in_flight: Cell<bool>,
    completion_held: Cell<bool>,
    completed: Cell<bool>,
    stats: Cell<SubscriptionStats>,
}

impl<S: 'static, T: 'static> SubscriptionCore<S, T> {
    /// Create the subscription, attach it to `will_change`, and hand the
    /// consumer its handle.
    pub(crate) fn start(
        source: Rc<S>,
        will_change: &WillChange,
        selector: Selector<S, T>,
        scheduler: Rc<dyn Scheduler>,
        subscriber: Box<dyn Subscriber<T>>,
    ) -> SubscriptionHandle {
        let core = Rc::new(Self {
            id: NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed),
            source,
            selector,
            scheduler,
            state: Cell::new(SettlementState::INITIAL),
            demand: Cell::new(Demand::NONE),
            upstream: RefCell::new(None),
            downstream: RefCell::new(Some(subscriber)),
            in_flight: Cell::new(false),
            completion_held: Cell::new(false),
            completed: Cell::new(false),
            stats: Cell::new(SubscriptionStats::default()),
        });
        debug!(id = core.id, "subscription started");

        let on_signal = Rc::downgrade(&core);
        let on_complete = Weak::clone(&on_signal);
        let upstream = will_change.subscribe(
            move || {
                if let Some(core) = on_signal.upgrade() {
                    core.on_upstream_signal();
                }
            },
            move || {
                if let Some(core) = on_complete.upgrade() {
                    core.on_upstream_complete();
                }
            },
        );
        if upstream.is_active() {
            *core.upstream.borrow_mut() = Some(upstream);
        }

        let control: Rc<dyn SubscriptionControl> = core.clone();
        let handle = SubscriptionHandle { core: control };
        core.call_downstream(|downstream| downstream.on_subscribe(handle.clone()));
        core.after_callback();
        handle
    }

    fn transition(&self, next: SettlementState) {
        let prev = self.state.replace(next);
        if prev != next {
            trace!(id = self.id, from = %prev, to = %next, "settlement transition");
        }
    }

    fn bump(&self, f: impl FnOnce(&mut SubscriptionStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn on_upstream_signal(self: Rc<Self>) {
        let (next, outcome) = self.state.get().on_will_change();
        match outcome {
            SignalOutcome::Coalesced => {
                if !next.is_cancelled() {
                    self.bump(|s| s.coalesced_signals += 1);
                }
                trace!(id = self.id, state = %next, "will-change coalesced");
            }
            SignalOutcome::ScheduleSettlement => {
                self.transition(next);
                let weak = Rc::downgrade(&self);
                self.scheduler.schedule(Box::new(move || {
                    if let Some(core) = weak.upgrade() {
                        core.settle();
                    }
                }));
            }
        }
    }

    /// The deferred half of a will-change: the change has landed.
    fn settle(&self) {
        let Some(next) = self.state.get().on_settle() else {
            trace!(id = self.id, "settlement skipped after cancel");
            return;
        };
        self.transition(next);
        self.bump(|s| s.settlements += 1);
        debug!(id = self.id, demand = %self.demand.get(), "change settled");
        self.service_demand();
    }

    fn on_upstream_complete(&self) {
        drop(self.upstream.borrow_mut().take());
        match self.state.get().on_completion() {
            CompletionOutcome::Forward => self.complete_downstream(),
            CompletionOutcome::Swallow => {
                debug!(id = self.id, state = %self.state.get(), "upstream completion swallowed");
            }
        }
    }

    fn complete_downstream(&self) {
        if self.in_flight.get() {
            self.completion_held.set(true);
            return;
        }
        if self.completed.replace(true) {
            return;
        }
        debug!(id = self.id, "completing downstream");
        let downstream = self.downstream.borrow_mut().take();
        if let Some(mut downstream) = downstream {
            downstream.on_complete();
        }
    }

    /// Deliver one settled value if demand allows. Never loops: the next
    /// value needs the next settlement.
    fn service_demand(&self) {
        if self.in_flight.get() {
            return;
        }
        if !self.demand.get().is_positive() || !self.state.get().is_settled() {
            return;
        }
        let value = (self.selector)(&self.source);
        self.transition(self.state.get().on_delivered());
        self.demand.set(self.demand.get().consume_one());
        self.bump(|s| s.delivered += 1);
        debug!(id = self.id, demand = %self.demand.get(), "delivering settled value");

        if let Some(extra) = self.call_downstream(|downstream| downstream.on_next(value)) {
            self.demand.set(self.demand.get() + extra);
        }
        self.after_callback();
    }

    fn call_downstream<R>(&self, f: impl FnOnce(&mut Box<dyn Subscriber<T>>) -> R) -> Option<R> {
        debug_assert!(!self.in_flight.get(), "re-entrant delivery to subscriber");
        self.in_flight.set(true);
        let result = {
            let mut downstream = self.downstream.borrow_mut();
            downstream.as_mut().map(f)
        };
        self.in_flight.set(false);
        result
    }

    /// Apply whatever the consumer callback caused.
    fn after_callback(&self) {
        if self.state.get().is_cancelled() {
            drop(self.downstream.borrow_mut().take());
            return;
        }
        if self.completion_held.replace(false) {
            self.complete_downstream();
            return;
        }
        self.service_demand();
    }
}

impl<S: 'static, T: 'static> SubscriptionControl for SubscriptionCore<S, T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn request(&self, demand: Demand) {
        if self.state.get().is_cancelled() {
            trace!(id = self.id, %demand, "request after cancel ignored");
            return;
        }
        self.demand.set(self.demand.get() + demand);
        trace!(id = self.id, requested = %demand, total = %self.demand.get(), "demand requested");
        self.service_demand();
    }

    fn cancel(&self) {
        let Some(next) = self.state.get().on_cancel() else {
            return;
        };
        self.transition(next);
        drop(self.upstream.borrow_mut().take());
        if !self.in_flight.get() {
            drop(self.downstream.borrow_mut().take());
        }
        debug!(id = self.id, "subscription cancelled");
    }

    fn state(&self) -> SettlementState {
        self.state.get()
    }

    fn demand(&self) -> Demand {
        self.demand.get()
    }

    fn is_completed(&self) -> bool {
        self.completed.get()
    }

    fn stats(&self) -> SubscriptionStats {
        self.stats.get()
    }
}

/// The consumer's grip on a did-change subscription.
///
/// Clones share one subscription. When the last handle is dropped the
/// subscription is torn down as if cancelled.
#[derive(Clone)]
pub struct SubscriptionHandle {
    core: Rc<dyn SubscriptionControl>,
}

impl SubscriptionHandle {
    /// Authorize `demand` more values. Ignored after cancellation.
    pub fn request(&self, demand: Demand) {
        self.core.request(demand);
    }

    /// Stop the subscription and detach from the source. Idempotent.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    /// Process-unique subscription id, as used in log events.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.core.id()
    }

    #[must_use]
    pub fn state(&self) -> SettlementState {
        self.core.state()
    }

    /// Outstanding demand.
    #[must_use]
    pub fn demand(&self) -> Demand {
        self.core.demand()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.core.state().is_cancelled()
    }

    /// Whether completion has been delivered to the consumer.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.core.is_completed()
    }

    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.core.stats()
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.core.id())
            .field("state", &self.core.state())
            .field("demand", &self.core.demand())
            .field("completed", &self.core.is_completed())
            .finish()
    }
}
