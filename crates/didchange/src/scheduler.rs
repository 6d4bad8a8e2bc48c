#![forbid(unsafe_code)]

//! Deferred execution of settlement actions.
//!
//! A [`Scheduler`] accepts a unit of work and runs it at some later,
//! controlled point. The did-change subscription relies on that deferral to
//! open its coalescing window: every will-change signal that arrives before
//! the scheduled action runs is folded into one settlement.
//!
//! Two implementations ship with the crate:
//!
//! - [`ImmediateScheduler`] runs the action synchronously. The coalescing
//!   window collapses to a single signal, which is handy in tests.
//! - [`RunLoop`] queues actions until the owner drives it with
//!   [`RunLoop::run_pending`] (one turn) or [`RunLoop::run_until_idle`].
//!
//! # Failure Modes
//!
//! - **Runaway rescheduling**: an action that schedules itself forever would
//!   keep `run_until_idle()` busy. The drain budget from [`RunLoopConfig`]
//!   stops it with [`RunLoopError::BudgetExhausted`]; the remaining actions
//!   stay queued.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::{debug_span, trace, warn};

use crate::config::RunLoopConfig;

/// A deferred unit of work.
pub type Action = Box<dyn FnOnce()>;

/// Something that runs actions later.
///
/// Implementations must accept `schedule()` calls made from inside a running
/// action and from any number of independent subscriptions.
pub trait Scheduler {
    /// Enqueue `action`. Fire-and-forget; it may or may not run before this
    /// call returns.
    fn schedule(&self, action: Action);
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn schedule(&self, action: Action) {
        (**self).schedule(action);
    }
}

impl<S: Scheduler + ?Sized> Scheduler for &S {
    fn schedule(&self, action: Action) {
        (**self).schedule(action);
    }
}

/// Runs every action on the spot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, action: Action) {
        action();
    }
}

/// Error from draining a [`RunLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLoopError {
    /// The drain stopped after `executed` actions with `remaining` still queued.
    BudgetExhausted { executed: usize, remaining: usize },
}

impl fmt::Display for RunLoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BudgetExhausted {
                executed,
                remaining,
            } => write!(
                f,
                "run loop budget exhausted after {executed} actions ({remaining} still queued)"
            ),
        }
    }
}

impl std::error::Error for RunLoopError {}

struct RunLoopInner {
    queue: RefCell<VecDeque<Action>>,
    config: RunLoopConfig,
    executed: Cell<u64>,
}

/// A single-threaded FIFO action queue driven by its owner.
///
/// Cloning a `RunLoop` creates a new handle to the **same** queue.
#[derive(Clone)]
pub struct RunLoop {
    inner: Rc<RunLoopInner>,
}

impl fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoop")
            .field("pending", &self.pending())
            .field("executed", &self.executed())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLoop {
    /// Create a run loop with the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RunLoopConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RunLoopConfig) -> Self {
        Self {
            inner: Rc::new(RunLoopInner {
                queue: RefCell::new(VecDeque::new()),
                config,
                executed: Cell::new(0),
            }),
        }
    }

    /// Create a run loop configured from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_config(RunLoopConfig::from_env())
    }

    #[must_use]
    pub fn config(&self) -> &RunLoopConfig {
        &self.inner.config
    }

    /// Number of queued actions.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.queue.borrow().is_empty()
    }

    /// Total actions executed over the run loop's lifetime.
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.inner.executed.get()
    }

    /// Run one turn: the actions queued at call time. Actions they schedule
    /// wait for the next turn. Returns the number of actions run.
    pub fn run_pending(&self) -> usize {
        let turn = self.pending();
        let _span = debug_span!("run_loop.turn", actions = turn).entered();
        let mut ran = 0;
        while ran < turn && self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Run until the queue is empty, including actions scheduled while
    /// draining. Returns the number of actions run.
    pub fn run_until_idle(&self) -> Result<usize, RunLoopError> {
        let _span = debug_span!("run_loop.drain", pending = self.pending()).entered();
        let budget = self.inner.config.max_actions_per_drain;
        let mut ran = 0;
        loop {
            if budget.is_some_and(|max| ran >= max) && !self.is_idle() {
                let remaining = self.pending();
                warn!(executed = ran, remaining, "run loop drain budget exhausted");
                return Err(RunLoopError::BudgetExhausted {
                    executed: ran,
                    remaining,
                });
            }
            if !self.run_one() {
                return Ok(ran);
            }
            ran += 1;
        }
    }

    /// Pop and run the front action. The queue borrow is released first so
    /// the action may schedule more work.
    fn run_one(&self) -> bool {
        let Some(action) = self.inner.queue.borrow_mut().pop_front() else {
            return false;
        };
        action();
        self.inner.executed.set(self.inner.executed.get() + 1);
        true
    }
}

impl Scheduler for RunLoop {
    fn schedule(&self, action: Action) {
        let mut queue = self.inner.queue.borrow_mut();
        queue.push_back(action);
        trace!(pending = queue.len(), "action scheduled");
    }
}
