#![forbid(unsafe_code)]

//! Change sources: objects that announce mutations before they happen.
//!
//! [`ChangeSource`] is the only thing the did-change publisher needs from an
//! upstream object: access to its [`WillChange`] signal. Values are read
//! later, at settlement time, through the publisher's selector.
//!
//! Two building blocks are provided:
//!
//! - [`Published<T>`]: one field of a larger object. Mutations fire the
//!   owner's `WillChange` first, then store the new value.
//! - [`ObservableObject<T>`]: a self-contained single-value source.
//!
//! # Invariants
//!
//! 1. `will_change` is sent *before* the value is replaced.
//! 2. Setting a value equal to the current one is a no-op (no signal, no
//!    version bump).
//! 3. `version` increments by exactly 1 per value-changing mutation.
//!
//! # Failure Modes
//!
//! - **Reading during the signal**: an observer that reads the value from
//!   inside `will_change` sees the *old* value. That is why settlement goes
//!   through a scheduler: by the time it runs, the mutation has landed. With
//!   [`ImmediateScheduler`](crate::scheduler::ImmediateScheduler) the
//!   selector runs inside the signal and observes the pre-mutation value.
//! - **Re-entrant mutation**: calling `set()` from inside a `with()` closure
//!   panics (RefCell borrow rules).

use std::cell::{Cell, RefCell};
use std::fmt;

use crate::signal::WillChange;

/// An object observable for "about to change" signals.
pub trait ChangeSource {
    fn will_change(&self) -> &WillChange;
}

/// A field that announces changes through its owner's [`WillChange`].
///
/// ```ignore
/// struct Profile {
///     will_change: WillChange,
///     name: Published<String>,
///     age: Published<u32>,
/// }
///
/// impl Profile {
///     fn new() -> Self {
///         let will_change = WillChange::new();
///         Self {
///             name: Published::new(&will_change, String::new()),
///             age: Published::new(&will_change, 0),
///             will_change,
///         }
///     }
/// }
///
/// impl ChangeSource for Profile {
///     fn will_change(&self) -> &WillChange {
///         &self.will_change
///     }
/// }
/// ```
pub struct Published<T> {
    value: RefCell<T>,
    version: Cell<u64>,
    owner: WillChange,
}

impl<T: fmt::Debug> fmt::Debug for Published<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Published")
            .field("value", &*self.value.borrow())
            .field("version", &self.version.get())
            .finish()
    }
}

impl<T: Clone + PartialEq> Published<T> {
    /// Create a field that signals through `owner`.
    #[must_use]
    pub fn new(owner: &WillChange, value: T) -> Self {
        Self {
            value: RefCell::new(value),
            version: Cell::new(0),
            owner: owner.clone(),
        }
    }

    #[must_use]
    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Access the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.borrow())
    }

    /// Replace the value, signalling the owner first if it differs.
    pub fn set(&self, value: T) {
        if *self.value.borrow() == value {
            return;
        }
        self.owner.send();
        *self.value.borrow_mut() = value;
        self.version.set(self.version.get() + 1);
    }

    /// Modify the value in place. The closure runs on a copy so the owner
    /// can be signalled before anything observable changes.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get();
        f(&mut next);
        self.set(next);
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.get()
    }
}

/// A single value that is its own change source.
pub struct ObservableObject<T> {
    will_change: WillChange,
    value: Published<T>,
}

impl<T: fmt::Debug> fmt::Debug for ObservableObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableObject")
            .field("value", &*self.value.value.borrow())
            .field("version", &self.value.version.get())
            .field("will_change", &self.will_change)
            .finish()
    }
}

impl<T: Clone + PartialEq> ObservableObject<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        let will_change = WillChange::new();
        Self {
            value: Published::new(&will_change, value),
            will_change,
        }
    }

    #[must_use]
    pub fn get(&self) -> T {
        self.value.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.value.with(f)
    }

    /// Replace the value. Signals `will_change` first when it differs.
    pub fn set(&self, value: T) {
        self.value.set(value);
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.value.update(f);
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.value.version()
    }

    /// Complete the will-change signal; no further changes are announced.
    pub fn finish(&self) {
        self.will_change.finish();
    }
}

impl<T> ChangeSource for ObservableObject<T> {
    fn will_change(&self) -> &WillChange {
        &self.will_change
    }
}
