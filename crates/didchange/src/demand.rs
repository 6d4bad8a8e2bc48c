#![forbid(unsafe_code)]

//! Pull-protocol demand accounting.
//!
//! A [`Demand`] is the number of values a consumer has authorized the
//! producer to deliver. It is either a finite count or [`Demand::UNLIMITED`].
//! The count is unsigned, so "negative demand" cannot be expressed.
//!
//! # Invariants
//!
//! 1. Addition saturates at `UNLIMITED`; it never wraps.
//! 2. `UNLIMITED` absorbs both addition and consumption.
//! 3. Consuming from `NONE` is a caller bug (debug assertion) and stays `NONE`.

use std::fmt;
use std::ops::{Add, AddAssign};

/// Outstanding demand: requested but not yet delivered values.
///
/// Ordering treats every finite count as smaller than `Unlimited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Demand {
    /// At most this many further values.
    Max(u64),
    /// No limit.
    Unlimited,
}

impl Demand {
    /// No demand.
    pub const NONE: Self = Self::Max(0);

    /// Unbounded demand.
    pub const UNLIMITED: Self = Self::Unlimited;

    /// Finite demand of `n` values.
    #[must_use]
    pub const fn max(n: u64) -> Self {
        Self::Max(n)
    }

    /// Whether at least one value may be delivered.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        match self {
            Self::Max(n) => n > 0,
            Self::Unlimited => true,
        }
    }

    #[must_use]
    pub const fn is_unlimited(self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Finite count, or `None` when unlimited.
    #[must_use]
    pub const fn count(self) -> Option<u64> {
        match self {
            Self::Max(n) => Some(n),
            Self::Unlimited => None,
        }
    }

    /// Add two demands, saturating at [`Demand::UNLIMITED`].
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        match (self, other) {
            (Self::Max(a), Self::Max(b)) => match a.checked_add(b) {
                Some(sum) => Self::Max(sum),
                None => Self::Unlimited,
            },
            _ => Self::Unlimited,
        }
    }

    /// Demand left after one value is delivered.
    #[must_use]
    pub fn consume_one(self) -> Self {
        match self {
            Self::Max(n) => {
                debug_assert!(n > 0, "consumed a value without outstanding demand");
                Self::Max(n.saturating_sub(1))
            }
            Self::Unlimited => Self::Unlimited,
        }
    }
}

impl Default for Demand {
    fn default() -> Self {
        Self::NONE
    }
}

impl Add for Demand {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Demand {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl From<u64> for Demand {
    fn from(n: u64) -> Self {
        Self::Max(n)
    }
}

impl fmt::Display for Demand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Max(n) => write!(f, "max({n})"),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}
