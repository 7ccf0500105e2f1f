use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque codes (e.g. "stock.transfer.validate").
/// The wildcard `"*"` grants every permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    /// Approve an inter-depot transfer.
    pub const TRANSFER_VALIDATE: Permission = Permission(Cow::Borrowed("stock.transfer.validate"));
    /// Validate a physical inventory and raise its adjustments.
    pub const INVENTORY_VALIDATE: Permission = Permission(Cow::Borrowed("stock.inventory.validate"));
    /// Chef-level approval of adjustments above the configured threshold.
    pub const ADJUSTMENT_APPROVE_SENIOR: Permission =
        Permission(Cow::Borrowed("stock.adjustment.approve_senior"));
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    /// True if holding `self` satisfies a check for `required`.
    pub fn covers(&self, required: &Permission) -> bool {
        self.is_wildcard() || self == required
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
