use crate::signal::RevocationSignal;
use dcs_authz::{AuthorizationGate, RoleRevocation};
use dcs_credentials::{CachedRevocationRegistry, InMemoryRevocationRegistry, Revocation};
use dcs_ledger::{AuditEvent, AuditLedger};
use dcs_types::{Action, Actor, ActorId, ContractId, DcsError, DcsResult};
use dcs_workflow::{ContractWorkflowEngine, CredentialRevocationReport};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// What propagating one signal changed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropagationReport {
    Credential(CredentialRevocationReport),
    Role {
        revocation: RoleRevocation,
        contracts: Vec<ContractId>,
    },
    Assignment {
        actor: ActorId,
        was_assigned: bool,
        contracts: Vec<ContractId>,
    },
}

pub struct RevocationPropagator {
    engine: Arc<ContractWorkflowEngine>,
    gate: Arc<AuthorizationGate>,
    ledger: Arc<AuditLedger>,
    registry: Arc<InMemoryRevocationRegistry>,
    cache: Option<Arc<CachedRevocationRegistry>>,
}

impl RevocationPropagator {
    pub fn new(
        engine: Arc<ContractWorkflowEngine>,
        registry: Arc<InMemoryRevocationRegistry>,
    ) -> Self {
        Self {
            gate: engine.gate().clone(),
            ledger: engine.ledger().clone(),
            engine,
            registry,
            cache: None,
        }
    }

    /// Push credential revocations into this cache as well so they win over
    /// any still-fresh `Good` answer.
    pub fn with_cache(mut self, cache: Arc<CachedRevocationRegistry>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[instrument(skip(self, signal), fields(actor = %actor, kind = signal.kind()))]
    pub async fn propagate(&self, actor: &Actor, signal: RevocationSignal) -> DcsResult<PropagationReport> {
        match signal {
            RevocationSignal::Credential { id, reason, at } => {
                let entity = dcs_types::EntityRef::Credential(id.clone());
                self.gate.authorize(actor, Action::RevocationApply, &entity).await?;
                if reason.trim().is_empty() {
                    let err = DcsError::InvalidInput("a revocation reason is required".into());
                    warn!(actor = %actor, credential = %id, "credential revocation refused");
                    self.ledger
                        .append(
                            AuditEvent::deny(actor, Action::RevocationApply, entity, err.to_string())
                                .evidence(serde_json::json!({ "code": err.code() })),
                        )
                        .await?;
                    return Err(err);
                }

                let revocation = Revocation {
                    revoked_at: at.unwrap_or_else(|| self.ledger.now()),
                    reason,
                };
                self.ledger
                    .append(
                        AuditEvent::allow(actor, Action::RevocationApply, entity)
                            .reason(revocation.reason.clone())
                            .evidence(serde_json::json!({ "revoked_at": revocation.revoked_at })),
                    )
                    .await?;
                if let Some(cache) = &self.cache {
                    cache.mark_revoked(id.clone(), revocation.clone());
                }
                self.registry.revoke(id.clone(), revocation.clone())?;

                let report = self.engine.apply_credential_revocation(actor, &id, &revocation).await?;
                info!(
                    credential = %id,
                    sessions = report.impacts.len(),
                    flagged = report.flagged_contracts.len(),
                    "credential revocation propagated"
                );
                Ok(PropagationReport::Credential(report))
            }
            RevocationSignal::Role { role } => {
                let revocation = self.gate.revoke_role(&role, actor).await?;
                let contracts = self
                    .engine
                    .apply_role_revocation(actor, &revocation.affected_actors, Some(&role))
                    .await?;
                info!(role = %role, contracts = contracts.len(), "role revocation propagated");
                Ok(PropagationReport::Role { revocation, contracts })
            }
            RevocationSignal::Assignment { actor: holder, role } => {
                let was_assigned = self.gate.revoke_assignment(&holder, &role, actor).await?;
                let contracts = if was_assigned {
                    self.engine
                        .apply_role_revocation(actor, std::slice::from_ref(&holder), Some(&role))
                        .await?
                } else {
                    Vec::new()
                };
                Ok(PropagationReport::Assignment {
                    actor: holder,
                    was_assigned,
                    contracts,
                })
            }
        }
    }
}
