//! Post-signing lifecycle: deployment, execution, renewal, termination and
//! evidence.

use crate::collaborators::{DeploymentPayload, DispatchReceipt};
use crate::config::CompliancePolicy;
use crate::engine::{contract_entity, outstanding_roles, ContractWorkflowEngine};
use crate::transitions::ContractEvent;
use chrono::{DateTime, Utc};
use dcs_ledger::AuditEvent;
use dcs_storage::{ContractQuery, QueryWindow};
use dcs_types::{
    Action, Actor, Approval, ContentHash, Contract, ContractId, ContractState, CorrelationId,
    CredentialId, DcsError, DcsResult, DeploymentAttempt, DeploymentStatus, Evidence,
    PendingChange, PendingKind, Renewal, Role, Termination,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvidence {
    pub kind: String,
    pub hash: ContentHash,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenewalRequest {
    #[serde(default)]
    pub renewed_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationRequest {
    pub effective_date: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Outcome of one deployment attempt as the engine sees it.
enum Resolution {
    Acknowledged(DateTime<Utc>),
    Failed(String),
}

impl ContractWorkflowEngine {
    async fn ensure_unflagged(&self, actor: &Actor, action: Action, contract: &Contract) -> DcsResult<()> {
        if self.config.compliance_policy != CompliancePolicy::BlockExecution {
            return Ok(());
        }
        let open: Vec<String> = contract.open_flags().map(|f| f.reason.clone()).collect();
        if open.is_empty() {
            return Ok(());
        }
        let err = DcsError::IllegalTransition(format!(
            "contract {} carries {} open compliance flag(s): {}",
            contract.id,
            open.len(),
            open.join("; ")
        ));
        Err(self.deny(actor, action, contract, err).await)
    }

    /// Dispatch the contract to the target system under a fresh correlation id.
    ///
    /// The attempt is recorded as `DeploymentPending` before dispatch. A
    /// synchronous acknowledgement moves it to `Deployed`; a rejection or
    /// timeout moves it to `Failed`; otherwise it waits for the callback.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn deploy(&self, actor: &Actor, id: &ContractId) -> DcsResult<Contract> {
        let action = Action::ContractDeploy;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let (payload, started) = {
            let _guard = self.locks.lock(id).await;
            let mut contract = self.load(id).await?;
            self.ensure_unflagged(actor, action, &contract).await?;
            let attempts = contract.deployments.len() as u32;
            if !self.config.retry_policy.allows(attempts) {
                let err = DcsError::RetryLimitExceeded(format!("{id} already has {attempts} deployment attempt(s)"));
                return Err(self.deny(actor, action, &contract, err).await);
            }
            let next = self.advance(actor, action, &contract, ContractEvent::Deploy).await?;

            let now = self.now();
            let attempt = DeploymentAttempt {
                correlation_id: CorrelationId::generate(),
                attempt: attempts + 1,
                target: self.target.name().to_string(),
                started_at: now,
                ack_deadline: now + self.config.timeouts.target_ack(),
                status: DeploymentStatus::Pending,
            };
            let payload = DeploymentPayload {
                contract_id: id.clone(),
                content: contract.content.clone(),
                content_hash: contract.content_hash.clone(),
                correlation_id: attempt.correlation_id.clone(),
                attempt: attempt.attempt,
            };
            let prior = contract.state;
            let event = AuditEvent::allow(actor, action, contract_entity(id))
                .transition(prior, next)
                .content_hash(contract.content_hash.clone())
                .evidence(serde_json::json!({
                    "correlation_id": attempt.correlation_id,
                    "attempt": attempt.attempt,
                    "target": attempt.target,
                    "ack_deadline": attempt.ack_deadline,
                }));
            contract.state = next;
            contract.deployments.push(attempt);
            let stored = self.commit(actor, contract, event).await?;
            (payload, stored)
        };

        let limit = self.config.timeouts.target_dispatch();
        let dispatched = match tokio::time::timeout(limit, self.target.dispatch(&payload)).await {
            Ok(result) => result,
            Err(_) => Err(DcsError::ExternalUnavailable(format!(
                "target {} did not answer within {limit:?}",
                self.target.name()
            ))),
        };
        let resolution = match dispatched {
            Ok(DispatchReceipt::Accepted) => {
                info!(contract_id = %id, correlation_id = %payload.correlation_id, "deployment dispatched; awaiting acknowledgement");
                return Ok(started);
            }
            Ok(DispatchReceipt::Acknowledged { at }) => Resolution::Acknowledged(at),
            Err(err) => Resolution::Failed(err.to_string()),
        };

        let _guard = self.locks.lock(id).await;
        let contract = self.load(id).await?;
        let still_pending = contract.state == ContractState::DeploymentPending
            && contract
                .pending_deployment()
                .is_some_and(|d| d.correlation_id == payload.correlation_id);
        if !still_pending {
            return Ok(contract);
        }
        let action = match resolution {
            Resolution::Acknowledged(_) => Action::DeploymentAcknowledge,
            Resolution::Failed(_) => Action::DeploymentFail,
        };
        self.resolve_deployment(actor, action, contract, &payload.correlation_id, resolution).await
    }

    async fn resolve_deployment(
        &self,
        actor: &Actor,
        action: Action,
        mut contract: Contract,
        correlation: &CorrelationId,
        resolution: Resolution,
    ) -> DcsResult<Contract> {
        let (event_kind, status) = match &resolution {
            Resolution::Acknowledged(at) => (ContractEvent::Acknowledge, DeploymentStatus::Acknowledged { at: *at }),
            Resolution::Failed(reason) => (
                ContractEvent::DeploymentFailed,
                DeploymentStatus::Failed {
                    reason: reason.clone(),
                    at: self.now(),
                },
            ),
        };
        let next = self.advance(actor, action, &contract, event_kind).await?;
        let prior = contract.state;
        let Some(attempt) = contract
            .deployments
            .iter_mut()
            .find(|d| &d.correlation_id == correlation)
        else {
            let err = DcsError::NotFound(format!("deployment {correlation} of {}", contract.id));
            return Err(self.deny(actor, action, &contract, err).await);
        };
        attempt.status = status;
        let attempt_no = attempt.attempt;
        contract.state = next;

        let mut event = AuditEvent::allow(actor, action, contract_entity(&contract.id))
            .transition(prior, next)
            .evidence(serde_json::json!({
                "correlation_id": correlation,
                "attempt": attempt_no,
            }));
        if let Resolution::Failed(reason) = &resolution {
            event = event.reason(reason.clone());
        }
        let stored = self.commit(actor, contract, event).await?;
        match resolution {
            Resolution::Acknowledged(_) => {
                info!(contract_id = %stored.id, correlation_id = %correlation, attempt = attempt_no, "deployment acknowledged")
            }
            Resolution::Failed(reason) => {
                warn!(contract_id = %stored.id, correlation_id = %correlation, attempt = attempt_no, reason = %reason, "deployment failed")
            }
        }
        Ok(stored)
    }

    /// Look up the attempt an external callback refers to. Callbacks for
    /// attempts already resolved the same way are answered with the contract
    /// unchanged.
    async fn callback_target(
        &self,
        actor: &Actor,
        action: Action,
        contract: &Contract,
        correlation: &CorrelationId,
    ) -> DcsResult<Option<DeploymentAttempt>> {
        let Some(attempt) = contract.deployments.iter().find(|d| &d.correlation_id == correlation) else {
            let err = DcsError::NotFound(format!("deployment {correlation} of {}", contract.id));
            return Err(self.deny(actor, action, contract, err).await);
        };
        match (&attempt.status, action) {
            (DeploymentStatus::Pending, _) if contract.state == ContractState::DeploymentPending => Ok(Some(attempt.clone())),
            (DeploymentStatus::Acknowledged { .. }, Action::DeploymentAcknowledge)
            | (DeploymentStatus::Failed { .. }, Action::DeploymentFail) => Ok(None),
            _ => {
                let err = DcsError::IllegalTransition(format!(
                    "deployment {correlation} is no longer pending in state {}",
                    contract.state
                ));
                Err(self.deny(actor, action, contract, err).await)
            }
        }
    }

    /// Target-system acknowledgement callback. An acknowledgement stamped
    /// after the attempt's deadline fails the attempt instead.
    pub async fn acknowledge_deployment(
        &self,
        actor: &Actor,
        id: &ContractId,
        correlation: &CorrelationId,
        at: DateTime<Utc>,
    ) -> DcsResult<Contract> {
        let action = Action::DeploymentAcknowledge;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let _guard = self.locks.lock(id).await;
        let contract = self.load(id).await?;
        let Some(attempt) = self.callback_target(actor, action, &contract, correlation).await? else {
            return Ok(contract);
        };
        if at > attempt.ack_deadline {
            let reason = format!("acknowledgement at {at} arrived after deadline {}", attempt.ack_deadline);
            return self
                .resolve_deployment(actor, Action::DeploymentFail, contract, correlation, Resolution::Failed(reason))
                .await;
        }
        self.resolve_deployment(actor, action, contract, correlation, Resolution::Acknowledged(at))
            .await
    }

    /// Target-system failure callback.
    pub async fn report_deployment_failure(
        &self,
        actor: &Actor,
        id: &ContractId,
        correlation: &CorrelationId,
        reason: &str,
    ) -> DcsResult<Contract> {
        let action = Action::DeploymentFail;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;
        let _guard = self.locks.lock(id).await;
        let contract = self.load(id).await?;
        if reason.trim().is_empty() {
            let err = DcsError::InvalidInput("a failure reason is required".into());
            return Err(self.deny(actor, action, &contract, err).await);
        }
        if self.callback_target(actor, action, &contract, correlation).await?.is_none() {
            return Ok(contract);
        }
        self.resolve_deployment(actor, action, contract, correlation, Resolution::Failed(reason.to_string()))
            .await
    }

    /// Fail every attempt whose acknowledgement deadline has passed.
    pub async fn expire_overdue_deployments(&self, actor: &Actor) -> DcsResult<Vec<ContractId>> {
        let query = ContractQuery {
            state: Some(ContractState::DeploymentPending),
            ..ContractQuery::default()
        };
        let mut failed = Vec::new();
        for candidate in self.contracts.list_contracts(&query, QueryWindow::default()).await? {
            let _guard = self.locks.lock(&candidate.id).await;
            let contract = self.load(&candidate.id).await?;
            let now = self.now();
            let overdue = match contract.pending_deployment() {
                Some(d) if contract.state == ContractState::DeploymentPending && now > d.ack_deadline => d.clone(),
                _ => continue,
            };
            let reason = format!("no acknowledgement from {} before {}", overdue.target, overdue.ack_deadline);
            let stored = self
                .resolve_deployment(
                    actor,
                    Action::DeploymentFail,
                    contract,
                    &overdue.correlation_id,
                    Resolution::Failed(reason),
                )
                .await?;
            failed.push(stored.id);
        }
        Ok(failed)
    }

    /// `Deployed -> Executed`.
    pub async fn confirm_execution(&self, actor: &Actor, id: &ContractId) -> DcsResult<Contract> {
        let action = Action::ExecutionConfirm;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let _guard = self.locks.lock(id).await;
        let mut contract = self.load(id).await?;
        let next = self.advance(actor, action, &contract, ContractEvent::ConfirmExecution).await?;
        self.ensure_unflagged(actor, action, &contract).await?;
        let prior = contract.state;
        contract.state = next;
        let event = AuditEvent::allow(actor, action, contract_entity(id))
            .transition(prior, next)
            .content_hash(contract.content_hash.clone());
        let stored = self.commit(actor, contract, event).await?;
        info!(contract_id = %id, "execution confirmed");
        Ok(stored)
    }

    async fn open_pending(
        &self,
        actor: &Actor,
        action: Action,
        id: &ContractId,
        kind: PendingKind,
        effective_date: Option<DateTime<Utc>>,
        reason: Option<String>,
    ) -> DcsResult<Contract> {
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let _guard = self.locks.lock(id).await;
        let mut contract = self.load(id).await?;
        let event_kind = match kind {
            PendingKind::Renewal => ContractEvent::RequestRenewal,
            PendingKind::Termination => ContractEvent::RequestTermination,
        };
        let next = self.advance(actor, action, &contract, event_kind).await?;
        let prior = contract.state;
        contract.pending = Some(PendingChange {
            kind,
            origin: prior,
            requested_by: actor.id.clone(),
            requested_at: self.now(),
            effective_date,
            reason: reason.clone(),
            approvals: Vec::new(),
        });
        contract.state = next;

        let mut event = AuditEvent::allow(actor, action, contract_entity(id))
            .transition(prior, next)
            .evidence(serde_json::json!({
                "origin": prior,
                "effective_date": effective_date,
                "required_roles": self.pending_roles(kind),
            }));
        if let Some(reason) = reason {
            event = event.reason(reason);
        }
        let stored = self.commit(actor, contract, event).await?;
        info!(contract_id = %id, from = %prior, to = %next, "lifecycle change requested");
        Ok(stored)
    }

    fn pending_roles(&self, kind: PendingKind) -> &[Role] {
        match kind {
            PendingKind::Renewal => &self.config.renewal_approver_roles,
            PendingKind::Termination => &self.config.termination_approver_roles,
        }
    }

    /// Enter `RenewalPending`; finalized once the renewal approvers agree.
    pub async fn request_renewal(&self, actor: &Actor, id: &ContractId, request: RenewalRequest) -> DcsResult<Contract> {
        self.open_pending(actor, Action::ContractRenew, id, PendingKind::Renewal, request.renewed_until, request.reason)
            .await
    }

    /// Enter `TerminationPending` with the requested effective date.
    pub async fn request_termination(&self, actor: &Actor, id: &ContractId, request: TerminationRequest) -> DcsResult<Contract> {
        self.open_pending(
            actor,
            Action::ContractTerminate,
            id,
            PendingKind::Termination,
            Some(request.effective_date),
            request.reason,
        )
        .await
    }

    /// Record an approval of the pending renewal or termination.
    #[instrument(skip(self), fields(actor = %actor, role = %role))]
    pub async fn approve_pending(&self, actor: &Actor, id: &ContractId, role: &Role) -> DcsResult<Contract> {
        let action = Action::PendingApprove;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let _guard = self.locks.lock(id).await;
        let mut contract = self.load(id).await?;
        let Some(kind) = contract.pending.as_ref().map(|p| p.kind) else {
            let err = DcsError::IllegalTransition(format!("{id} has no pending renewal or termination"));
            return Err(self.deny(actor, action, &contract, err).await);
        };
        let required = self.pending_roles(kind).to_vec();
        self.ensure_approver(actor, action, &contract, role, &required).await?;

        let now = self.now();
        let Some(pending) = contract.pending.as_mut() else {
            return Ok(contract);
        };
        if pending.approvals.iter().any(|a| &a.role == role) {
            return Ok(contract);
        }
        pending.approvals.push(Approval {
            approver: actor.id.clone(),
            role: role.clone(),
            at: now,
        });
        let outstanding = outstanding_roles(&required, &pending.approvals);
        let prior = contract.state;
        let evidence = serde_json::json!({ "role": role, "kind": kind, "outstanding": outstanding });
        if !outstanding.is_empty() {
            let event = AuditEvent::allow(actor, action, contract_entity(id))
                .at_state(prior)
                .evidence(evidence);
            return self.commit(actor, contract, event).await;
        }

        let event_kind = match kind {
            PendingKind::Renewal => ContractEvent::ApproveRenewal,
            PendingKind::Termination => ContractEvent::ApproveTermination,
        };
        let next = self.advance(actor, action, &contract, event_kind).await?;
        let pending = contract.pending.take();
        let effective_date = pending.as_ref().and_then(|p| p.effective_date);
        let reason = pending.as_ref().and_then(|p| p.reason.clone());
        match kind {
            PendingKind::Renewal => contract.renewals.push(Renewal {
                renewed_until: effective_date,
                renewed_at: now,
            }),
            PendingKind::Termination => {
                contract.termination = Some(Termination {
                    effective_date: effective_date.unwrap_or(now),
                    reason,
                    terminated_at: now,
                });
            }
        }
        contract.state = next;
        let event = AuditEvent::allow(actor, action, contract_entity(id))
            .transition(prior, next)
            .evidence(evidence);
        let stored = self.commit(actor, contract, event).await?;
        info!(contract_id = %id, to = %next, "lifecycle change finalized");

        // The termination is committed; a failed notification does not undo it.
        if stored.state == ContractState::Terminated {
            if let Err(err) = self.notify_termination(&stored).await {
                warn!(contract_id = %id, error = %err, "termination hook not notified");
            }
        }
        Ok(stored)
    }

    async fn notify_termination(&self, contract: &Contract) -> DcsResult<()> {
        if !self.config.revoke_credentials_on_termination {
            return Ok(());
        }
        let hook = self.termination_hook.read().ok().and_then(|h| h.clone());
        let Some(hook) = hook else {
            return Ok(());
        };
        let mut credentials: Vec<CredentialId> = Vec::new();
        for session in self.signatures.sessions_for_contract(&contract.id).await? {
            credentials.extend(session.credential_ids());
        }
        credentials.sort();
        credentials.dedup();
        let effective = contract
            .termination
            .as_ref()
            .map(|t| t.effective_date)
            .unwrap_or_else(|| self.now());
        if let Err(err) = hook.on_termination(&contract.id, credentials, effective).await {
            warn!(contract_id = %contract.id, error = %err, "termination hook failed");
        }
        Ok(())
    }

    /// Drop the pending change and return to the state it was requested from.
    pub async fn reject_pending(&self, actor: &Actor, id: &ContractId, reason: &str) -> DcsResult<Contract> {
        let action = Action::PendingReject;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;
        let _guard = self.locks.lock(id).await;
        let mut contract = self.load(id).await?;
        if reason.trim().is_empty() {
            let err = DcsError::InvalidInput("a rejection reason is required".into());
            return Err(self.deny(actor, action, &contract, err).await);
        }
        let next = self.advance(actor, action, &contract, ContractEvent::RejectPending).await?;
        let prior = contract.state;
        let kind = contract.pending.take().map(|p| p.kind);
        contract.state = next;
        let event = AuditEvent::allow(actor, action, contract_entity(id))
            .transition(prior, next)
            .reason(reason)
            .evidence(serde_json::json!({ "kind": kind }));
        let stored = self.commit(actor, contract, event).await?;
        info!(contract_id = %id, to = %next, "pending change rejected");
        Ok(stored)
    }

    /// Attach the hash of an evidentiary artifact to a signed contract.
    pub async fn store_evidence(&self, actor: &Actor, id: &ContractId, evidence: NewEvidence) -> DcsResult<Contract> {
        let action = Action::EvidenceStore;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;
        let _guard = self.locks.lock(id).await;
        let mut contract = self.load(id).await?;
        if evidence.kind.trim().is_empty() {
            let err = DcsError::InvalidInput("evidence needs a kind".into());
            return Err(self.deny(actor, action, &contract, err).await);
        }
        if !contract.state.is_post_signing() {
            let err = DcsError::IllegalTransition(format!("evidence is stored on signed contracts, {id} is {}", contract.state));
            return Err(self.deny(actor, action, &contract, err).await);
        }
        let event = AuditEvent::allow(actor, action, contract_entity(id))
            .at_state(contract.state)
            .content_hash(evidence.hash.clone())
            .evidence(serde_json::json!({ "kind": evidence.kind, "description": evidence.description }));
        contract.evidence.push(Evidence {
            kind: evidence.kind,
            hash: evidence.hash,
            description: evidence.description,
            stored_by: actor.id.clone(),
            stored_at: self.now(),
        });
        self.commit(actor, contract, event).await
    }
}
