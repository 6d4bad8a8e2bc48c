#![forbid(unsafe_code)]

//! The upstream "about to change" signal.
//!
//! # Design
//!
//! [`WillChange`] is a shared, parameterless notification: `send()` tells
//! every live observer that the owner is about to mutate, and `finish()`
//! tells them it never will again. Cloning a `WillChange` creates a new
//! handle to the **same** observer list.
//!
//! Observers are stored as `Weak` references; the strong side lives in the
//! [`UpstreamHandle`] returned by [`WillChange::subscribe`]. Dropping or
//! cancelling the handle detaches the observer, and the dead entry is
//! pruned on the next `send()`.
//!
//! # Invariants
//!
//! 1. Observers are notified in registration order.
//! 2. `finish()` completes each live observer exactly once; afterwards
//!    `send()` and `finish()` are no-ops.
//! 3. Subscribing to a finished signal completes the observer immediately.
//! 4. A cancelled handle never sees another signal or completion.
//!
//! # Failure Modes
//!
//! - **Re-entrant send**: an observer may call `send()` on the same signal
//!   from inside its callback. The observer list is snapshotted before any
//!   callback runs, so the nested send is delivered in full before the outer
//!   one continues.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

struct Observer {
    on_signal: Box<dyn Fn()>,
    on_complete: Cell<Option<Box<dyn FnOnce()>>>,
}

struct WillChangeInner {
    observers: Vec<Weak<Observer>>,
    finished: bool,
    sent: u64,
}

/// A repeatable "about to change" notification with a terminal completion.
#[derive(Clone)]
pub struct WillChange {
    inner: Rc<RefCell<WillChangeInner>>,
}

impl fmt::Debug for WillChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("WillChange")
            .field("observer_count", &inner.observers.len())
            .field("finished", &inner.finished)
            .field("sent", &inner.sent)
            .finish()
    }
}

impl Default for WillChange {
    fn default() -> Self {
        Self::new()
    }
}

impl WillChange {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(WillChangeInner {
                observers: Vec::new(),
                finished: false,
                sent: 0,
            })),
        }
    }

    /// Observe the signal. `on_signal` runs on every `send()`, `on_complete`
    /// at most once on `finish()`.
    ///
    /// The observer stays attached for as long as the returned handle is
    /// alive and not cancelled.
    pub fn subscribe(
        &self,
        on_signal: impl Fn() + 'static,
        on_complete: impl FnOnce() + 'static,
    ) -> UpstreamHandle {
        if self.is_finished() {
            on_complete();
            return UpstreamHandle { observer: None };
        }
        let observer = Rc::new(Observer {
            on_signal: Box::new(on_signal),
            on_complete: Cell::new(Some(Box::new(on_complete))),
        });
        self.inner
            .borrow_mut()
            .observers
            .push(Rc::downgrade(&observer));
        UpstreamHandle {
            observer: Some(observer),
        }
    }

    /// Announce an imminent change to every live observer.
    pub fn send(&self) {
        let observers = {
            let mut inner = self.inner.borrow_mut();
            if inner.finished {
                return;
            }
            inner.sent += 1;
            inner.observers.retain(|w| w.strong_count() > 0);
            inner
                .observers
                .iter()
                .filter_map(Weak::upgrade)
                .collect::<Vec<_>>()
        };
        trace!(observers = observers.len(), "will-change sent");
        for observer in &observers {
            (observer.on_signal)();
        }
    }

    /// Complete the signal. Later `send()`/`finish()` calls do nothing.
    pub fn finish(&self) {
        let observers = {
            let mut inner = self.inner.borrow_mut();
            if inner.finished {
                return;
            }
            inner.finished = true;
            inner
                .observers
                .drain(..)
                .filter_map(|w| w.upgrade())
                .collect::<Vec<_>>()
        };
        trace!(observers = observers.len(), "will-change finished");
        for observer in &observers {
            if let Some(on_complete) = observer.on_complete.take() {
                on_complete();
            }
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.borrow().finished
    }

    /// Registered observers, including dead ones not yet pruned.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.borrow().observers.len()
    }

    /// Number of `send()` calls that reached observers.
    #[must_use]
    pub fn signals_sent(&self) -> u64 {
        self.inner.borrow().sent
    }
}

/// RAII guard for an observer attached to a [`WillChange`].
///
/// Dropping the handle has the same effect as [`UpstreamHandle::cancel`].
pub struct UpstreamHandle {
    observer: Option<Rc<Observer>>,
}

impl UpstreamHandle {
    /// Detach the observer. Idempotent.
    pub fn cancel(&mut self) {
        self.observer = None;
    }

    /// Whether the observer is still attached.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.observer.is_some()
    }
}

impl fmt::Debug for UpstreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Rc<Cell<u32>>, impl Fn() + 'static) {
        let count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&count);
        (count, move || count_clone.set(count_clone.get() + 1))
    }

    #[test]
    fn send_reaches_observer() {
        let signal = WillChange::new();
        let (signals, on_signal) = counter();
        let _handle = signal.subscribe(on_signal, || {});

        signal.send();
        signal.send();
        assert_eq!(signals.get(), 2);
        assert_eq!(signal.signals_sent(), 2);
    }

    #[test]
    fn registration_order() {
        let signal = WillChange::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut handles = Vec::new();
        for tag in ['A', 'B', 'C'] {
            let log = Rc::clone(&log);
            handles.push(signal.subscribe(move || log.borrow_mut().push(tag), || {}));
        }
        signal.send();
        assert_eq!(*log.borrow(), vec!['A', 'B', 'C']);
    }

    #[test]
    fn cancel_detaches() {
        let signal = WillChange::new();
        let (signals, on_signal) = counter();
        let mut handle = signal.subscribe(on_signal, || {});
        signal.send();
        handle.cancel();
        handle.cancel();
        assert!(!handle.is_active());
        signal.send();
        assert_eq!(signals.get(), 1);
    }

    #[test]
    fn drop_detaches_and_prunes_lazily() {
        let signal = WillChange::new();
        let handle = signal.subscribe(|| {}, || {});
        let _kept = signal.subscribe(|| {}, || {});
        drop(handle);
        assert_eq!(signal.observer_count(), 2);
        signal.send();
        assert_eq!(signal.observer_count(), 1);
    }

    #[test]
    fn finish_completes_once() {
        let signal = WillChange::new();
        let (completions, on_complete) = counter();
        let (signals, on_signal) = counter();
        let _handle = signal.subscribe(on_signal, on_complete);

        signal.finish();
        signal.finish();
        signal.send();
        assert_eq!(completions.get(), 1);
        assert_eq!(signals.get(), 0);
        assert!(signal.is_finished());
        assert_eq!(signal.observer_count(), 0);
    }

    #[test]
    fn finish_skips_cancelled_observer() {
        let signal = WillChange::new();
        let (completions, on_complete) = counter();
        let mut handle = signal.subscribe(|| {}, on_complete);
        handle.cancel();
        signal.finish();
        assert_eq!(completions.get(), 0);
    }

    #[test]
    fn subscribe_after_finish_completes_immediately() {
        let signal = WillChange::new();
        signal.finish();
        let (completions, on_complete) = counter();
        let handle = signal.subscribe(|| {}, on_complete);
        assert_eq!(completions.get(), 1);
        assert!(!handle.is_active());
    }

    #[test]
    fn reentrant_send_is_allowed() {
        let signal = WillChange::new();
        let (signals, bump) = counter();
        let nested = signal.clone();
        let depth = Rc::new(Cell::new(0u32));
        let _handle = signal.subscribe(
            move || {
                bump();
                if depth.get() == 0 {
                    depth.set(1);
                    nested.send();
                }
            },
            || {},
        );
        signal.send();
        assert_eq!(signals.get(), 2);
    }

    #[test]
    fn clone_shares_observers() {
        let signal = WillChange::new();
        let (signals, on_signal) = counter();
        let _handle = signal.subscribe(on_signal, || {});
        signal.clone().send();
        assert_eq!(signals.get(), 1);
    }
}
