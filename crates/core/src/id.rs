//! Strongly-typed identifiers used across the stock domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::validation(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_id!(
    /// Actor identity (warehouse clerk, counter, approver).
    UserId,
    "UserId"
);
uuid_id!(ArticleId, "ArticleId");
uuid_id!(DepotId, "DepotId");
uuid_id!(SiteId, "SiteId");
uuid_id!(
    /// Storage location inside a depot.
    LocationId,
    "LocationId"
);
uuid_id!(LotId, "LotId");
uuid_id!(MovementId, "MovementId");
uuid_id!(
    /// Reservation identifier; callers may supply it to make `reserve` idempotent.
    ReservationId,
    "ReservationId"
);
uuid_id!(TransferId, "TransferId");
uuid_id!(
    /// Physical inventory (stock count) identifier.
    InventoryId,
    "InventoryId"
);
uuid_id!(AdjustmentId, "AdjustmentId");
