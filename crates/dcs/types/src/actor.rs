use crate::ids::ActorId;
use serde::{Deserialize, Serialize};

/// Whoever initiates an operation: a person or an automated caller.
///
/// Roles come in human and `sys_` variants ("Contract Creator" and
/// "Sys. Contract Creator"). The kind lets audit entries tell the callers
/// apart; permissions are still resolved through roles.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub kind: ActorKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Human,
    System,
}

impl Actor {
    pub fn human(id: impl Into<String>) -> Self {
        Self {
            id: ActorId::new(id),
            kind: ActorKind::Human,
        }
    }

    pub fn system(id: impl Into<String>) -> Self {
        Self {
            id: ActorId::new(id),
            kind: ActorKind::System,
        }
    }

    /// The engine's own identity, used for sweepers and reactors.
    pub fn engine() -> Self {
        Self::system(ENGINE_ACTOR)
    }

    /// Identity under which configured role assignments are recorded.
    pub fn bootstrap() -> Self {
        Self::system(BOOTSTRAP_ACTOR)
    }

    /// Internal identities no external caller may claim.
    pub fn is_reserved(id: &str) -> bool {
        RESERVED_ACTORS.iter().any(|r| r.eq_ignore_ascii_case(id.trim()))
    }
}

pub const ENGINE_ACTOR: &str = "dcs-engine";
pub const BOOTSTRAP_ACTOR: &str = "dcs-bootstrap";
const RESERVED_ACTORS: &[&str] = &[ENGINE_ACTOR, BOOTSTRAP_ACTOR];

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}
