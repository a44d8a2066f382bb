use dcs_storage::{AuditAppend, Decision};
use dcs_types::{Action, Actor, ContentHash, EntityRef};
use serde_json::Value;

/// An audit record under construction. The ledger stamps time, sequence
/// and hashes when it is appended.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    actor: Actor,
    action: Action,
    entity: EntityRef,
    decision: Decision,
    prior_state: Option<String>,
    new_state: Option<String>,
    reason: Option<String>,
    content_hash: Option<ContentHash>,
    evidence: Value,
}

impl AuditEvent {
    pub fn allow(actor: &Actor, action: Action, entity: EntityRef) -> Self {
        Self {
            actor: actor.clone(),
            action,
            entity,
            decision: Decision::Allow,
            prior_state: None,
            new_state: None,
            reason: None,
            content_hash: None,
            evidence: Value::Null,
        }
    }

    /// A refused attempt. The reason is mandatory.
    pub fn deny(actor: &Actor, action: Action, entity: EntityRef, reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: Some(reason.into()),
            ..Self::allow(actor, action, entity)
        }
    }

    pub fn transition(mut self, from: impl ToString, to: impl ToString) -> Self {
        self.prior_state = Some(from.to_string());
        self.new_state = Some(to.to_string());
        self
    }

    /// State observed when the action did not move the entity.
    pub fn at_state(mut self, state: impl ToString) -> Self {
        self.prior_state = Some(state.to_string());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn content_hash(mut self, hash: ContentHash) -> Self {
        self.content_hash = Some(hash);
        self
    }

    pub fn evidence(mut self, evidence: Value) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub(crate) fn into_append(self, timestamp: chrono::DateTime<chrono::Utc>) -> AuditAppend {
        AuditAppend {
            timestamp,
            actor: self.actor,
            action: self.action,
            entity: self.entity,
            decision: self.decision,
            prior_state: self.prior_state,
            new_state: self.new_state,
            reason: self.reason,
            content_hash: self.content_hash,
            evidence: self.evidence,
        }
    }
}
