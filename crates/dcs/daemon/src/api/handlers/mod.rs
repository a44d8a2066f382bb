//! API request handlers

mod audit;
mod contracts;
mod credentials;
mod health;
mod incidents;
mod lifecycle;
mod revocations;
mod signing;
mod templates;

pub use audit::*;
pub use contracts::*;
pub use credentials::*;
pub use health::*;
pub use incidents::*;
pub use lifecycle::*;
pub use revocations::*;
pub use signing::*;
pub use templates::*;

use dcs_storage::QueryWindow;
use serde::Deserialize;

/// Paging parameters shared by the search endpoints. A missing or zero
/// limit returns everything after the offset.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl Page {
    pub fn window(&self) -> QueryWindow {
        QueryWindow {
            limit: self.limit.unwrap_or(0),
            offset: self.offset.unwrap_or(0),
        }
    }
}

/// Body of the endpoints that only carry a reason.
#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

/// Body of the endpoints that approve in a role.
#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: dcs_types::Role,
}
