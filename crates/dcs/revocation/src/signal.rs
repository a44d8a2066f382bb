use chrono::{DateTime, Utc};
use dcs_types::{ActorId, CredentialId, EntityRef, Role};
use serde::{Deserialize, Serialize};

/// One revocation to propagate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RevocationSignal {
    Credential {
        id: CredentialId,
        reason: String,
        /// Effective time; the moment of processing when absent.
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    /// Withdraw a role from every holder.
    Role { role: Role },
    /// Withdraw one role from one actor.
    Assignment { actor: ActorId, role: Role },
}

impl RevocationSignal {
    pub fn entity(&self) -> EntityRef {
        match self {
            Self::Credential { id, .. } => EntityRef::Credential(id.clone()),
            Self::Role { role } => EntityRef::Role(role.clone()),
            Self::Assignment { actor, .. } => EntityRef::Actor(actor.clone()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Credential { .. } => "credential",
            Self::Role { .. } => "role",
            Self::Assignment { .. } => "assignment",
        }
    }
}
