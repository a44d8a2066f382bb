//! DCS authorization.
//!
//! Permissions are one capability-set mapping, `role -> {action}`, plus
//! user-to-role assignments. Every component asks the same
//! [`AuthorizationGate`]; denials are audited there.

#![deny(unsafe_code)]

mod gate;
pub mod roles;
mod store;

pub use gate::{AuthorizationGate, Grant, RoleRevocation, MAX_PERMISSION_TTL};
pub use store::{InMemoryRoleStore, RoleStore};
