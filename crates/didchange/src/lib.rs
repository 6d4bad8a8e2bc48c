#![forbid(unsafe_code)]

//! Coalescing did-change notifications over will-change signals.
//!
//! # Role
//! `didchange` turns an eager "about to change" signal, which may fire many
//! times in a row, into one "change settled" value per burst. Consumers pull
//! values with explicit demand, and settlement is deferred through a
//! pluggable [`Scheduler`].
//!
//! # Primary responsibilities
//! - **DidChangePublisher**: immutable source + scheduler + selector; a
//!   factory for independent subscriptions.
//! - **SubscriptionHandle**: per-consumer demand and cancellation.
//! - **SettlementState**: the `Unchanged → WillChange → DidChange` machine.
//! - **Demand**: saturating, unsigned pull-protocol accounting.
//! - **WillChange / ChangeSource**: the upstream contract, plus
//!   [`ObservableObject`] and [`Published`] as ready-made sources.
//! - **RunLoop / ImmediateScheduler**: deferred and synchronous schedulers.
//!
//! # Threading
//! Everything is single-threaded (`Rc`/`RefCell`). A subscription and its
//! scheduler live on one logical execution context; the types are `!Send`,
//! so sharing a subscription across threads does not compile.

pub mod config;
pub mod demand;
pub mod publisher;
pub mod scheduler;
pub mod signal;
pub mod source;
pub mod state;
pub mod subscriber;
pub mod subscription;

pub use config::{ConfigError, RunLoopConfig};
pub use demand::Demand;
pub use publisher::{DidChangePublisher, Observe};
pub use scheduler::{ImmediateScheduler, RunLoop, RunLoopError, Scheduler};
pub use signal::{UpstreamHandle, WillChange};
pub use source::{ChangeSource, ObservableObject, Published};
pub use state::SettlementState;
pub use subscriber::{Sink, Subscriber};
pub use subscription::{SubscriptionHandle, SubscriptionStats};
