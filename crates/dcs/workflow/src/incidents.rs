//! Compliance incidents and the ledger event feed.
//!
//! An incident is an `IncidentRecord` entry on a contract; its id is the
//! ledger sequence of that entry. Resolution is a later `IncidentResolve`
//! entry naming the incident. Nothing outside the ledger holds incident
//! state, so the incident list is a fold over the chain.

use crate::engine::{contract_entity, ContractWorkflowEngine};
use chrono::{DateTime, Utc};
use dcs_ledger::{AuditEntry, AuditEvent, AuditFilter};
use dcs_storage::Decision;
use dcs_types::{
    Action, Actor, ActorId, ComplianceFlag, Contract, ContractId, CredentialId, DcsError, DcsResult,
    EntityRef, FlagKind, SignerId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, instrument, warn};

pub const DEFAULT_MONITOR_LIMIT: usize = 100;
pub const MAX_MONITOR_LIMIT: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    NonCompliantSignature,
    ResignRequired,
    ComplianceCheckFailed,
    Reported,
}

impl From<FlagKind> for IncidentKind {
    fn from(kind: FlagKind) -> Self {
        match kind {
            FlagKind::NonCompliant => Self::NonCompliantSignature,
            FlagKind::ResignRequired => Self::ResignRequired,
        }
    }
}

/// Evidence carried by an `IncidentRecord` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IncidentDetails {
    kind: IncidentKind,
    source: Action,
    #[serde(default)]
    signer: Option<SignerId>,
    #[serde(default)]
    credential: Option<CredentialId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentResolution {
    pub resolved_by: ActorId,
    pub resolved_at: DateTime<Utc>,
    pub notes: String,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceIncident {
    /// Ledger sequence of the recording entry.
    pub id: u64,
    pub contract_id: ContractId,
    pub kind: IncidentKind,
    /// The action that raised it.
    pub source: Action,
    pub signer: Option<SignerId>,
    pub credential: Option<CredentialId>,
    pub description: String,
    pub raised_by: ActorId,
    pub raised_at: DateTime<Utc>,
    pub resolution: Option<IncidentResolution>,
}

impl ComplianceIncident {
    pub fn is_open(&self) -> bool {
        self.resolution.is_none()
    }

    fn from_entry(entry: &AuditEntry) -> Option<Self> {
        let EntityRef::Contract(contract_id) = &entry.entity else {
            return None;
        };
        let details: IncidentDetails = serde_json::from_value(entry.evidence.get("incident")?.clone()).ok()?;
        Some(Self {
            id: entry.sequence,
            contract_id: contract_id.clone(),
            kind: details.kind,
            source: details.source,
            signer: details.signer,
            credential: details.credential,
            description: entry.reason.clone().unwrap_or_default(),
            raised_by: entry.actor.id.clone(),
            raised_at: entry.timestamp,
            resolution: None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentFilter {
    #[serde(default)]
    pub contract: Option<ContractId>,
    #[serde(default)]
    pub open_only: bool,
}

/// One page of the event feed. Poll again with `after = next`.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorPage {
    pub events: Vec<AuditEntry>,
    pub next: u64,
}

fn resolved_incident(entry: &AuditEntry) -> Option<u64> {
    entry.evidence.get("incident").and_then(|v| v.as_u64())
}

impl ContractWorkflowEngine {
    /// Record one incident per flag raised by `source`. Runs after the
    /// flagging commit, so a lost entry is logged and not returned.
    pub(crate) async fn record_incidents(&self, actor: &Actor, contract: &Contract, source: Action, flags: &[ComplianceFlag]) {
        for flag in flags {
            let details = IncidentDetails {
                kind: flag.kind.into(),
                source,
                signer: Some(flag.signer.clone()),
                credential: flag.credential.clone(),
            };
            self.append_incident(actor, contract, details, &flag.reason).await;
        }
    }

    pub(crate) async fn record_check_failure(&self, actor: &Actor, contract: &Contract, findings: &[String]) {
        let details = IncidentDetails {
            kind: IncidentKind::ComplianceCheckFailed,
            source: Action::ComplianceCheck,
            signer: None,
            credential: None,
        };
        self.append_incident(actor, contract, details, &findings.join("; ")).await;
    }

    async fn append_incident(&self, actor: &Actor, contract: &Contract, details: IncidentDetails, description: &str) {
        let kind = details.kind;
        let event = AuditEvent::allow(actor, Action::IncidentRecord, contract_entity(&contract.id))
            .at_state(contract.state)
            .reason(description)
            .evidence(serde_json::json!({ "incident": details }));
        match self.ledger.append(event).await {
            Ok(entry) => {
                warn!(contract_id = %contract.id, incident = entry.sequence, kind = ?kind, "compliance incident recorded")
            }
            Err(err) => error!(contract_id = %contract.id, kind = ?kind, error = %err, "compliance incident lost"),
        }
    }

    /// File a finding against a contract by hand.
    #[instrument(skip(self, description), fields(actor = %actor, contract = %id))]
    pub async fn report_incident(&self, actor: &Actor, id: &ContractId, description: &str) -> DcsResult<ComplianceIncident> {
        let action = Action::IncidentRecord;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let _guard = self.locks.lock(id).await;
        let contract = self.load(id).await?;
        let description = description.trim();
        if description.is_empty() {
            let err = DcsError::InvalidInput("incident description is empty".to_string());
            return Err(self.deny(actor, action, &contract, err).await);
        }
        let details = IncidentDetails {
            kind: IncidentKind::Reported,
            source: action,
            signer: None,
            credential: None,
        };
        let entry = self
            .ledger
            .append(
                AuditEvent::allow(actor, action, contract_entity(id))
                    .at_state(contract.state)
                    .reason(description)
                    .evidence(serde_json::json!({ "incident": details })),
            )
            .await?;
        info!(contract_id = %id, incident = entry.sequence, "incident reported");
        Ok(ComplianceIncident {
            id: entry.sequence,
            contract_id: id.clone(),
            kind: IncidentKind::Reported,
            source: action,
            signer: None,
            credential: None,
            description: description.to_string(),
            raised_by: actor.id.clone(),
            raised_at: entry.timestamp,
            resolution: None,
        })
    }

    /// Close an open incident with the resolver's notes.
    #[instrument(skip(self, notes), fields(actor = %actor))]
    pub async fn resolve_incident(&self, actor: &Actor, incident: u64, notes: &str) -> DcsResult<ComplianceIncident> {
        let action = Action::IncidentResolve;
        self.gate.authorize(actor, action, &EntityRef::Ledger).await?;

        let Some(mut found) = self.find_incident(incident).await? else {
            let err = DcsError::NotFound(format!("incident {incident}"));
            warn!(actor = %actor, incident, "incident resolution denied");
            let event = AuditEvent::deny(actor, action, EntityRef::Ledger, err.to_string())
                .evidence(serde_json::json!({ "incident": incident, "code": err.code() }));
            return Err(match self.ledger.append(event).await {
                Ok(_) => err,
                Err(fatal) => fatal,
            });
        };
        let id = found.contract_id.clone();

        let _guard = self.locks.lock(&id).await;
        let contract = self.load(&id).await?;
        let notes = notes.trim();
        if notes.is_empty() {
            let err = DcsError::InvalidInput("resolution notes are empty".to_string());
            return Err(self.deny(actor, action, &contract, err).await);
        }
        if let Some(resolution) = self.resolution_of(&id, incident).await? {
            let err = DcsError::InvalidInput(format!(
                "incident {incident} was resolved by {} at sequence {}",
                resolution.resolved_by, resolution.sequence
            ));
            return Err(self.deny(actor, action, &contract, err).await);
        }
        let entry = self
            .ledger
            .append(
                AuditEvent::allow(actor, action, contract_entity(&id))
                    .at_state(contract.state)
                    .reason(notes)
                    .evidence(serde_json::json!({ "incident": incident })),
            )
            .await?;
        info!(contract_id = %id, incident, sequence = entry.sequence, "incident resolved");
        found.resolution = Some(IncidentResolution {
            resolved_by: actor.id.clone(),
            resolved_at: entry.timestamp,
            notes: notes.to_string(),
            sequence: entry.sequence,
        });
        Ok(found)
    }

    /// Incidents in ledger order with their resolutions folded in.
    pub async fn incidents(&self, actor: &Actor, filter: IncidentFilter) -> DcsResult<Vec<ComplianceIncident>> {
        self.gate.authorize(actor, Action::AuditQuery, &EntityRef::Ledger).await?;
        let mut query = match &filter.contract {
            Some(id) => AuditFilter::for_entity(contract_entity(id)),
            None => AuditFilter::default(),
        };
        query.decision = Some(Decision::Allow);
        query = query.with_action(Action::IncidentRecord).with_action(Action::IncidentResolve);

        let mut incidents: BTreeMap<u64, ComplianceIncident> = BTreeMap::new();
        let mut cursor = self.ledger.query(query);
        while let Some(entry) = cursor.next().await? {
            match entry.action {
                Action::IncidentRecord => {
                    if let Some(incident) = ComplianceIncident::from_entry(&entry) {
                        incidents.insert(incident.id, incident);
                    }
                }
                Action::IncidentResolve => {
                    let target = resolved_incident(&entry).and_then(|id| incidents.get_mut(&id));
                    if let Some(incident) = target {
                        incident.resolution.get_or_insert(IncidentResolution {
                            resolved_by: entry.actor.id.clone(),
                            resolved_at: entry.timestamp,
                            notes: entry.reason.clone().unwrap_or_default(),
                            sequence: entry.sequence,
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(incidents
            .into_values()
            .filter(|i| !filter.open_only || i.is_open())
            .collect())
    }

    /// Ledger entries after `after`, oldest first.
    pub async fn monitor(&self, actor: &Actor, after: u64, limit: Option<usize>) -> DcsResult<MonitorPage> {
        self.gate.authorize(actor, Action::AuditQuery, &EntityRef::Ledger).await?;
        let limit = limit.unwrap_or(DEFAULT_MONITOR_LIMIT).clamp(1, MAX_MONITOR_LIMIT);
        let mut cursor = self.ledger.query_after(AuditFilter::default(), after);
        let mut events = Vec::new();
        while events.len() < limit {
            match cursor.next().await? {
                Some(entry) => events.push(entry),
                None => break,
            }
        }
        Ok(MonitorPage {
            next: cursor.position(),
            events,
        })
    }

    async fn find_incident(&self, incident: u64) -> DcsResult<Option<ComplianceIncident>> {
        if incident == 0 {
            return Ok(None);
        }
        let mut cursor = self.ledger.query_after(AuditFilter::default(), incident - 1);
        Ok(match cursor.next().await? {
            Some(entry)
                if entry.sequence == incident
                    && entry.action == Action::IncidentRecord
                    && entry.decision == Decision::Allow =>
            {
                ComplianceIncident::from_entry(&entry)
            }
            _ => None,
        })
    }

    async fn resolution_of(&self, id: &ContractId, incident: u64) -> DcsResult<Option<IncidentResolution>> {
        let mut query = AuditFilter::for_entity(contract_entity(id)).with_action(Action::IncidentResolve);
        query.decision = Some(Decision::Allow);
        let mut cursor = self.ledger.query_after(query, incident);
        while let Some(entry) = cursor.next().await? {
            if resolved_incident(&entry) == Some(incident) {
                return Ok(Some(IncidentResolution {
                    resolved_by: entry.actor.id.clone(),
                    resolved_at: entry.timestamp,
                    notes: entry.reason.clone().unwrap_or_default(),
                    sequence: entry.sequence,
                }));
            }
        }
        Ok(None)
    }
}
