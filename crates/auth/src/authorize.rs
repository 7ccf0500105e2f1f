use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use stockledger_core::{DepotId, DomainError, SiteId, UserId};

use crate::Permission;

/// Context of a capability check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub depot: Option<DepotId>,
    pub site: Option<SiteId>,
    /// Monetary amount at stake (transfer value, absolute variance value).
    pub amount: Option<Decimal>,
}

impl AuthContext {
    pub fn depot(depot: DepotId) -> Self {
        Self {
            depot: Some(depot),
            ..Self::default()
        }
    }

    pub fn with_site(mut self, site: Option<SiteId>) -> Self {
        self.site = site;
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// Outcome of a capability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{permission}' ({reason})")]
    Forbidden { permission: String, reason: String },
}

impl From<AuthzError> for DomainError {
    fn from(value: AuthzError) -> Self {
        DomainError::Unauthorized(value.to_string())
    }
}

/// Access-control collaborator.
///
/// Anything other than an explicit [`Decision::Allow`] is a denial.
pub trait Authorizer: Send + Sync + 'static {
    fn authorize(&self, actor: UserId, permission: &Permission, context: &AuthContext) -> Decision;
}

/// Run a capability check and turn a denial into an error.
pub fn require<A>(
    authorizer: &A,
    actor: UserId,
    permission: &Permission,
    context: &AuthContext,
) -> Result<(), AuthzError>
where
    A: Authorizer + ?Sized,
{
    match authorizer.authorize(actor, permission, context) {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => {
            debug!(actor = %actor, permission = %permission, reason = %reason, "authorization denied");
            Err(AuthzError::Forbidden {
                permission: permission.as_str().to_string(),
                reason,
            })
        }
    }
}

/// One permission granted to an actor, optionally scoped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub permission: Permission,
    /// Restrict the grant to one depot.
    pub depot: Option<DepotId>,
    /// Ceiling on the amount the actor may approve.
    pub max_amount: Option<Decimal>,
}

impl Grant {
    pub fn new(permission: Permission) -> Self {
        Self {
            permission,
            depot: None,
            max_amount: None,
        }
    }

    pub fn for_depot(mut self, depot: DepotId) -> Self {
        self.depot = Some(depot);
        self
    }

    pub fn up_to(mut self, amount: Decimal) -> Self {
        self.max_amount = Some(amount);
        self
    }

    fn matches(&self, required: &Permission, context: &AuthContext) -> bool {
        if !self.permission.covers(required) {
            return false;
        }
        if let Some(depot) = self.depot {
            if context.depot != Some(depot) {
                return false;
            }
        }
        match (self.max_amount, context.amount) {
            (Some(max), Some(amount)) => amount.abs() <= max,
            _ => true,
        }
    }
}

/// In-memory grant table (tests, embedding, static deployments).
#[derive(Debug, Default)]
pub struct GrantAuthorizer {
    grants: RwLock<HashMap<UserId, Vec<Grant>>>,
}

impl GrantAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, actor: UserId, grant: Grant) {
        if let Ok(mut grants) = self.grants.write() {
            grants.entry(actor).or_default().push(grant);
        }
    }

    /// Builder-style helper for unscoped grants.
    pub fn with(self, actor: UserId, permission: Permission) -> Self {
        self.grant(actor, Grant::new(permission));
        self
    }
}

impl Authorizer for GrantAuthorizer {
    fn authorize(&self, actor: UserId, permission: &Permission, context: &AuthContext) -> Decision {
        let grants = match self.grants.read() {
            Ok(g) => g,
            Err(_) => return Decision::Deny("grant table unavailable".to_string()),
        };

        let Some(held) = grants.get(&actor) else {
            return Decision::Deny("actor holds no grants".to_string());
        };

        if held.iter().any(|g| g.matches(permission, context)) {
            Decision::Allow
        } else if held.iter().any(|g| g.permission.covers(permission)) {
            Decision::Deny("grant does not cover this depot or amount".to_string())
        } else {
            Decision::Deny(format!("no grant for '{permission}'"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn absence_of_grant_is_deny() {
        let authz = GrantAuthorizer::new();
        let ctx = AuthContext::default();
        assert!(!authz.authorize(UserId::new(), &Permission::TRANSFER_VALIDATE, &ctx).is_allowed());
    }

    #[test]
    fn wildcard_allows_everything() {
        let admin = UserId::new();
        let authz = GrantAuthorizer::new().with(admin, Permission::WILDCARD);
        let ctx = AuthContext::default().with_amount(dec!(1000000));
        assert!(authz.authorize(admin, &Permission::ADJUSTMENT_APPROVE_SENIOR, &ctx).is_allowed());
    }

    #[test]
    fn depot_and_amount_scopes_are_enforced() {
        let clerk = UserId::new();
        let depot = DepotId::new();
        let authz = GrantAuthorizer::new();
        authz.grant(
            clerk,
            Grant::new(Permission::INVENTORY_VALIDATE).for_depot(depot).up_to(dec!(100)),
        );

        let ok = AuthContext::depot(depot).with_amount(dec!(-80));
        assert!(authz.authorize(clerk, &Permission::INVENTORY_VALIDATE, &ok).is_allowed());

        let too_much = AuthContext::depot(depot).with_amount(dec!(150));
        assert!(require(&authz, clerk, &Permission::INVENTORY_VALIDATE, &too_much).is_err());

        let other_depot = AuthContext::depot(DepotId::new());
        assert!(!authz.authorize(clerk, &Permission::INVENTORY_VALIDATE, &other_depot).is_allowed());
    }
}
