#![forbid(unsafe_code)]

//! Downstream consumers.
//!
//! A [`Subscriber`] receives a [`SubscriptionHandle`] once, then settled
//! values one at a time, and possibly a single completion. Each `on_next`
//! returns *additional* demand, which is how a consumer keeps pulling
//! without calling back into the handle.

use std::fmt;

use crate::demand::Demand;
use crate::subscription::SubscriptionHandle;

/// A consumer of settled values.
pub trait Subscriber<T> {
    /// Called once, before any value. Request demand here (or later) through
    /// the handle. A value requested here is delivered right after this
    /// method returns.
    fn on_subscribe(&mut self, subscription: SubscriptionHandle);

    /// A settled value. Returns demand to add on top of what is outstanding.
    fn on_next(&mut self, value: T) -> Demand;

    /// The upstream finished with nothing pending. No values follow.
    fn on_complete(&mut self);
}

impl<T, S: Subscriber<T> + ?Sized> Subscriber<T> for Box<S> {
    fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
        (**self).on_subscribe(subscription);
    }

    fn on_next(&mut self, value: T) -> Demand {
        (**self).on_next(value)
    }

    fn on_complete(&mut self) {
        (**self).on_complete();
    }
}

/// Closure-driven subscriber.
///
/// Requests [`Demand::UNLIMITED`] on subscribe unless configured otherwise.
/// The sink does not keep its subscription handle; whoever called
/// [`DidChangePublisher::sink`](crate::publisher::DidChangePublisher::sink)
/// owns it.
pub struct Sink<F> {
    on_value: F,
    on_complete: Option<Box<dyn FnOnce()>>,
    initial_demand: Demand,
    demand_per_value: Demand,
}

impl<F> fmt::Debug for Sink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("initial_demand", &self.initial_demand)
            .field("demand_per_value", &self.demand_per_value)
            .field("has_on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl<F> Sink<F> {
    #[must_use]
    pub fn new(on_value: F) -> Self {
        Self {
            on_value,
            on_complete: None,
            initial_demand: Demand::UNLIMITED,
            demand_per_value: Demand::NONE,
        }
    }

    /// Demand requested from `on_subscribe`.
    #[must_use]
    pub fn with_initial_demand(mut self, demand: Demand) -> Self {
        self.initial_demand = demand;
        self
    }

    /// Demand returned from every `on_next`.
    #[must_use]
    pub fn with_demand_per_value(mut self, demand: Demand) -> Self {
        self.demand_per_value = demand;
        self
    }

    /// Run `f` when the stream completes.
    #[must_use]
    pub fn with_on_complete(mut self, f: impl FnOnce() + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl<T, F: FnMut(T)> Subscriber<T> for Sink<F> {
    fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
        if self.initial_demand.is_positive() {
            subscription.request(self.initial_demand);
        }
    }

    fn on_next(&mut self, value: T) -> Demand {
        (self.on_value)(value);
        self.demand_per_value
    }

    fn on_complete(&mut self) {
        if let Some(f) = self.on_complete.take() {
            f();
        }
    }
}
