//! Identity types for Gavel
//!
//! Identity types are strongly typed wrappers around small integers so a
//! connection id can never be confused with an item id.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate integer ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Create from a raw value
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Get the raw value
            pub const fn get(self) -> u32 {
                self.0
            }

            /// Convert from a signed wire integer, rejecting non-positive values
            pub fn from_wire(raw: i32) -> Option<Self> {
                u32::try_from(raw).ok().filter(|v| *v > 0).map(Self)
            }

            /// Convert to a signed wire integer
            pub fn to_wire(self) -> i32 {
                i32::try_from(self.0).unwrap_or(i32::MAX)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }
    };
}

define_id_type!(
    ConnectionId,
    "conn",
    "Bank-assigned identity of a House or Agent; doubles as its ledger account id"
);
define_id_type!(ItemId, "item", "Catalog identity of an item on sale");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_conversion_rejects_non_positive() {
        assert_eq!(ConnectionId::from_wire(0), None);
        assert_eq!(ConnectionId::from_wire(-4), None);
        assert_eq!(ConnectionId::from_wire(7), Some(ConnectionId::new(7)));
    }

    #[test]
    fn test_display_prefix() {
        assert_eq!(ConnectionId::new(3).to_string(), "conn_3");
        assert_eq!(ItemId::new(12).to_string(), "item_12");
    }

    #[test]
    fn test_serde_is_transparent() {
        let json = serde_json::to_string(&ItemId::new(9)).unwrap();
        assert_eq!(json, "9");
    }
}
