//! `stockledger-auth`: capability checks consulted before approval transitions.
//!
//! This crate is intentionally decoupled from storage and transport: the
//! surrounding application supplies an [`Authorizer`]; the stock core only
//! asks it `allow|deny` questions.

pub mod authorize;
pub mod permissions;

pub use authorize::{AuthContext, Authorizer, AuthzError, Decision, Grant, GrantAuthorizer, require};
pub use permissions::Permission;
