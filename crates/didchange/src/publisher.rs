#![forbid(unsafe_code)]

//! The did-change publisher and the `observe` entry points.
//!
//! A [`DidChangePublisher`] is an immutable descriptor: a shared change
//! source, a shared scheduler and a value selector. Every
//! [`subscribe`](DidChangePublisher::subscribe) creates an independent
//! subscription that shares nothing mutable with its siblings.
//!
//! # Usage
//!
//! ```ignore
//! use std::rc::Rc;
//! use didchange::{Observe, ObservableObject, RunLoop};
//!
//! let run_loop = RunLoop::new();
//! let counter = Rc::new(ObservableObject::new(0));
//!
//! let _handle = counter
//!     .observe_map(run_loop.clone(), |c| c.get())
//!     .sink(|value| println!("settled at {value}"));
//! // prints "settled at 0"
//!
//! counter.set(1);
//! counter.set(2);
//! counter.set(3);
//! run_loop.run_until_idle()?;
//! // prints "settled at 3" once
//! ```

use std::fmt;
use std::rc::Rc;

use crate::scheduler::Scheduler;
use crate::source::ChangeSource;
use crate::subscriber::{Sink, Subscriber};
use crate::subscription::{Selector, SubscriptionCore, SubscriptionHandle};

/// Publishes a settled value after each burst of will-change signals.
///
/// The stream never fails. It either stays open or completes, and completes
/// only when the source finishes while no change is pending.
pub struct DidChangePublisher<S, T> {
    source: Rc<S>,
    scheduler: Rc<dyn Scheduler>,
    selector: Selector<S, T>,
}

impl<S, T> Clone for DidChangePublisher<S, T> {
    fn clone(&self) -> Self {
        Self {
            source: Rc::clone(&self.source),
            scheduler: Rc::clone(&self.scheduler),
            selector: Rc::clone(&self.selector),
        }
    }
}

impl<S, T> fmt::Debug for DidChangePublisher<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DidChangePublisher")
            .field("source_refs", &Rc::strong_count(&self.source))
            .finish_non_exhaustive()
    }
}

impl<S: ChangeSource + 'static, T: 'static> DidChangePublisher<S, T> {
    /// Publisher emitting `selector(&source)` at each settlement.
    pub fn new(
        source: Rc<S>,
        scheduler: impl Scheduler + 'static,
        selector: impl Fn(&S) -> T + 'static,
    ) -> Self {
        Self::from_parts(source, Rc::new(scheduler), Rc::new(move |s: &Rc<S>| selector(&**s)))
    }

    fn from_parts(source: Rc<S>, scheduler: Rc<dyn Scheduler>, selector: Selector<S, T>) -> Self {
        Self {
            source,
            scheduler,
            selector,
        }
    }

    #[must_use]
    pub fn source(&self) -> &Rc<S> {
        &self.source
    }

    /// Apply the selector to the source right now.
    #[must_use]
    pub fn observe_output(&self) -> T {
        (self.selector)(&self.source)
    }

    /// Attach `subscriber`.
    ///
    /// The subscription starts listening to the source immediately, before
    /// any demand, so an early change is not lost. The handle is passed to
    /// [`Subscriber::on_subscribe`] and also returned; the subscription lives
    /// as long as any clone of it does.
    pub fn subscribe(&self, subscriber: impl Subscriber<T> + 'static) -> SubscriptionHandle {
        SubscriptionCore::start(
            Rc::clone(&self.source),
            self.source.will_change(),
            Rc::clone(&self.selector),
            Rc::clone(&self.scheduler),
            Box::new(subscriber),
        )
    }

    /// Subscribe a closure with unlimited demand.
    ///
    /// The current value is delivered before this returns.
    #[must_use = "dropping the handle cancels the subscription"]
    pub fn sink(&self, on_value: impl FnMut(T) + 'static) -> SubscriptionHandle {
        self.subscribe(Sink::new(on_value))
    }

    /// Publisher of `f` applied to this publisher's output.
    #[must_use]
    pub fn map<U: 'static>(&self, f: impl Fn(T) -> U + 'static) -> DidChangePublisher<S, U> {
        let inner = Rc::clone(&self.selector);
        DidChangePublisher::from_parts(
            Rc::clone(&self.source),
            Rc::clone(&self.scheduler),
            Rc::new(move |s: &Rc<S>| f(inner(s))),
        )
    }
}

/// `observe` entry points on a shared change source.
pub trait Observe<S> {
    /// Publish the source itself at each settlement.
    fn observe(&self, scheduler: impl Scheduler + 'static) -> DidChangePublisher<S, Rc<S>>;

    /// Publish `selector(&source)` at each settlement. Use a field projection
    /// such as `|p| p.name.get()` to follow one property.
    fn observe_map<T: 'static>(
        &self,
        scheduler: impl Scheduler + 'static,
        selector: impl Fn(&S) -> T + 'static,
    ) -> DidChangePublisher<S, T>;
}

impl<S: ChangeSource + 'static> Observe<S> for Rc<S> {
    fn observe(&self, scheduler: impl Scheduler + 'static) -> DidChangePublisher<S, Rc<S>> {
        DidChangePublisher::from_parts(
            Rc::clone(self),
            Rc::new(scheduler),
            Rc::new(|s: &Rc<S>| Rc::clone(s)),
        )
    }

    fn observe_map<T: 'static>(
        &self,
        scheduler: impl Scheduler + 'static,
        selector: impl Fn(&S) -> T + 'static,
    ) -> DidChangePublisher<S, T> {
        DidChangePublisher::new(Rc::clone(self), scheduler, selector)
    }
}
