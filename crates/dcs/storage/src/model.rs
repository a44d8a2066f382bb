use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use dcs_types::{Action, Actor, ContentHash, Contract, ContractState, EntityRef, FlagKind, Template, TemplateId, TemplateStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
}

/// Audit append payload. Sequence and hashes are assigned by storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditAppend {
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub action: Action,
    pub entity: EntityRef,
    pub decision: Decision,
    pub prior_state: Option<String>,
    pub new_state: Option<String>,
    pub reason: Option<String>,
    pub content_hash: Option<ContentHash>,
    #[serde(default)]
    pub evidence: Value,
}

/// Persistent tamper-evident audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub action: Action,
    pub entity: EntityRef,
    pub decision: Decision,
    pub prior_state: Option<String>,
    pub new_state: Option<String>,
    pub reason: Option<String>,
    pub content_hash: Option<ContentHash>,
    pub evidence: Value,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

impl AuditEntry {
    /// Seal an append payload at `sequence` behind `previous_hash`.
    pub fn seal(
        event: AuditAppend,
        event_id: String,
        sequence: u64,
        previous_hash: Option<String>,
    ) -> StorageResult<Self> {
        let entry_hash = compute_entry_hash(&event, previous_hash.as_deref(), sequence)?;
        Ok(Self {
            event_id,
            sequence,
            timestamp: event.timestamp,
            actor: event.actor,
            action: event.action,
            entity: event.entity,
            decision: event.decision,
            prior_state: event.prior_state,
            new_state: event.new_state,
            reason: event.reason,
            content_hash: event.content_hash,
            evidence: event.evidence,
            previous_hash,
            entry_hash,
        })
    }

    /// The payload this entry was sealed from.
    pub fn body(&self) -> AuditAppend {
        AuditAppend {
            timestamp: self.timestamp,
            actor: self.actor.clone(),
            action: self.action,
            entity: self.entity.clone(),
            decision: self.decision,
            prior_state: self.prior_state.clone(),
            new_state: self.new_state.clone(),
            reason: self.reason.clone(),
            content_hash: self.content_hash.clone(),
            evidence: self.evidence.clone(),
        }
    }

    /// Recompute this entry's hash from its own content.
    pub fn recompute_hash(&self) -> StorageResult<String> {
        compute_entry_hash(&self.body(), self.previous_hash.as_deref(), self.sequence)
    }
}

/// Chain hash of an entry: BLAKE3 over the canonical JSON of its content,
/// its sequence number and its predecessor's hash.
pub fn compute_entry_hash(
    event: &AuditAppend,
    previous_hash: Option<&str>,
    sequence: u64,
) -> StorageResult<String> {
    let serializable = serde_json::json!({
        "previous_hash": previous_hash,
        "sequence": sequence,
        "timestamp": event.timestamp,
        "actor": event.actor,
        "action": event.action,
        "entity": event.entity.key(),
        "decision": event.decision,
        "prior_state": event.prior_state,
        "new_state": event.new_state,
        "reason": event.reason,
        "content_hash": event.content_hash,
        "evidence": event.evidence,
    });
    let serialized = serde_json::to_vec(&serializable)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(blake3::hash(&serialized).to_hex().to_string())
}

/// Contract search filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractQuery {
    pub state: Option<ContractState>,
    pub template: Option<TemplateId>,
    /// Matches party name or organization.
    pub party: Option<String>,
    pub flag: Option<FlagKind>,
}

impl ContractQuery {
    pub fn matches(&self, contract: &Contract) -> bool {
        if self.state.is_some_and(|s| s != contract.state) {
            return false;
        }
        if self
            .template
            .as_ref()
            .is_some_and(|t| t != &contract.template.template_id)
        {
            return false;
        }
        if let Some(party) = &self.party {
            let hit = contract
                .metadata
                .parties
                .iter()
                .any(|p| &p.name == party || &p.organization == party);
            if !hit {
                return false;
            }
        }
        if let Some(flag) = self.flag {
            if !contract.has_open_flag(flag) {
                return false;
            }
        }
        true
    }
}

/// Template search filter, applied to the latest version of each template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateQuery {
    pub name_contains: Option<String>,
    pub status: Option<TemplateStatus>,
}

impl TemplateQuery {
    pub fn matches(&self, template: &Template) -> bool {
        if self.status.is_some_and(|s| s != template.status) {
            return false;
        }
        match &self.name_contains {
            Some(needle) => template
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            None => true,
        }
    }
}
