//! Whole-unit amounts
//!
//! Gavel accounts in a single currency with no fractional units, so an
//! amount is a `u64` with overflow-checked arithmetic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Non-negative amount of currency units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    /// Zero amount
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Create an amount from whole units
    pub const fn new(units: u64) -> Self {
        Self(units)
    }

    /// Raw units
    pub const fn units(self) -> u64 {
        self.0
    }

    /// Checked addition; `None` on overflow
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction; `None` if the result would be negative
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

impl From<u64> for Amount {
    fn from(units: u64) -> Self {
        Self(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_sub_never_goes_negative() {
        assert_eq!(Amount::new(10).checked_sub(Amount::new(4)), Some(Amount::new(6)));
        assert_eq!(Amount::new(10).checked_sub(Amount::new(11)), None);
    }

    #[test]
    fn test_checked_add_overflow() {
        assert_eq!(Amount::new(u64::MAX).checked_add(Amount::new(1)), None);
    }
}
