use crate::collaborators::{ArchiveService, TargetSystem, TerminationHook};
use crate::config::EngineConfig;
use crate::transitions::{self, ContractEvent};
use chrono::{DateTime, Utc};
use dcs_authz::AuthorizationGate;
use dcs_ledger::{AuditEntry, AuditEvent, AuditFilter, AuditLedger};
use dcs_signature::SignatureManager;
use dcs_storage::{ContractQuery, ContractStore, QueryWindow};
use dcs_templates::TemplateSource;
use dcs_types::{
    diff_values, Action, Actor, Approval, Comment, ContentHash, Contract, ContractId,
    ContractMetadata, ContractState, DcsError, DcsResult, EntityRef, FieldChange, KeyedLocks,
    Rejection, Role, TemplateRef, TemplateStatus, VersionEntry,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::{error, info, instrument, warn};

pub struct EngineDeps {
    pub contracts: Arc<dyn ContractStore>,
    pub templates: Arc<dyn TemplateSource>,
    pub gate: Arc<AuthorizationGate>,
    pub ledger: Arc<AuditLedger>,
    pub signatures: Arc<SignatureManager>,
    pub archive: Arc<dyn ArchiveService>,
    pub target: Arc<dyn TargetSystem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContract {
    /// Chosen id; generated when absent.
    #[serde(default)]
    pub id: Option<ContractId>,
    pub template: TemplateRef,
    #[serde(default)]
    pub metadata: ContractMetadata,
    /// Initial content; the template body when absent.
    #[serde(default)]
    pub content: Option<Value>,
}

/// A proposed new version, based on the version the editor last saw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractEdit {
    pub base_version: u32,
    pub content: Value,
    #[serde(default)]
    pub summary: Option<String>,
}

/// The latest version with its diff against the previous one.
#[derive(Debug, Clone, Serialize)]
pub struct ContractReview {
    pub contract_id: ContractId,
    pub state: ContractState,
    pub latest: VersionEntry,
    pub previous_version: Option<u32>,
    pub diff: Vec<FieldChange>,
}

pub struct ContractWorkflowEngine {
    pub(crate) contracts: Arc<dyn ContractStore>,
    pub(crate) templates: Arc<dyn TemplateSource>,
    pub(crate) gate: Arc<AuthorizationGate>,
    pub(crate) ledger: Arc<AuditLedger>,
    pub(crate) signatures: Arc<SignatureManager>,
    pub(crate) archive: Arc<dyn ArchiveService>,
    pub(crate) target: Arc<dyn TargetSystem>,
    pub(crate) termination_hook: RwLock<Option<Arc<dyn TerminationHook>>>,
    pub(crate) config: EngineConfig,
    pub(crate) locks: KeyedLocks<ContractId>,
}

pub(crate) fn contract_entity(id: &ContractId) -> EntityRef {
    EntityRef::Contract(id.clone())
}

/// Roles from `required` that no recorded approval covers yet.
pub(crate) fn outstanding_roles(required: &[Role], approvals: &[Approval]) -> Vec<Role> {
    required
        .iter()
        .filter(|role| !approvals.iter().any(|a| &a.role == *role))
        .cloned()
        .collect()
}

impl ContractWorkflowEngine {
    pub fn new(deps: EngineDeps, config: EngineConfig) -> Self {
        Self {
            contracts: deps.contracts,
            templates: deps.templates,
            gate: deps.gate,
            ledger: deps.ledger,
            signatures: deps.signatures,
            archive: deps.archive,
            target: deps.target,
            termination_hook: RwLock::new(None),
            config,
            locks: KeyedLocks::new(),
        }
    }

    /// Install the hook told about finalized terminations.
    pub fn set_termination_hook(&self, hook: Arc<dyn TerminationHook>) {
        if let Ok(mut guard) = self.termination_hook.write() {
            *guard = Some(hook);
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    pub fn gate(&self) -> &Arc<AuthorizationGate> {
        &self.gate
    }

    pub fn signatures(&self) -> &Arc<SignatureManager> {
        &self.signatures
    }

    /// Release idle per-contract and per-session lock slots.
    pub fn prune_locks(&self) -> usize {
        self.locks.prune_idle() + self.signatures.prune_locks()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.ledger.now()
    }

    pub(crate) async fn load(&self, id: &ContractId) -> DcsResult<Contract> {
        self.contracts
            .get_contract(id)
            .await?
            .ok_or_else(|| DcsError::NotFound(format!("contract {id}")))
    }

    /// Record a refused attempt and hand back the error. If the record
    /// cannot be written the caller gets `StorageUnavailable` instead.
    pub(crate) async fn deny(&self, actor: &Actor, action: Action, contract: &Contract, err: DcsError) -> DcsError {
        warn!(contract_id = %contract.id, actor = %actor, action = action.as_str(), state = %contract.state, error = %err, "contract operation denied");
        let event = AuditEvent::deny(actor, action, contract_entity(&contract.id), err.to_string())
            .at_state(contract.state)
            .evidence(serde_json::json!({ "code": err.code() }));
        match self.ledger.append(event).await {
            Ok(_) => err,
            Err(fatal) => fatal,
        }
    }

    /// Next state for `event`, or an audited `IllegalTransition`.
    pub(crate) async fn advance(
        &self,
        actor: &Actor,
        action: Action,
        contract: &Contract,
        event: ContractEvent,
    ) -> DcsResult<ContractState> {
        let origin = contract.pending.as_ref().map(|p| p.origin);
        match transitions::apply(contract.state, event, origin) {
            Ok(next) => Ok(next),
            Err(err) => Err(self.deny(actor, action, contract, err).await),
        }
    }

    /// Audit, then persist against the revision the contract was loaded at.
    ///
    /// No change is persisted without its audit entry. When the write fails
    /// after the entry landed, a `CommitAborted` entry follows it.
    pub(crate) async fn commit(&self, actor: &Actor, mut contract: Contract, event: AuditEvent) -> DcsResult<Contract> {
        let expected = contract.revision;
        let action = event.action();
        contract.updated_at = self.now();
        let entry = self.ledger.append(event).await?;
        match self.contracts.update_contract(contract.clone(), expected).await {
            Ok(stored) => Ok(stored),
            Err(err) => {
                self.abort(actor, &contract.id, action, entry.sequence, &err.to_string()).await;
                Err(err.into())
            }
        }
    }

    pub(crate) async fn abort(&self, actor: &Actor, contract_id: &ContractId, action: Action, sequence: u64, cause: &str) {
        error!(contract_id = %contract_id, action = action.as_str(), sequence, cause, "commit aborted after audit");
        let compensation = AuditEvent::deny(
            actor,
            Action::CommitAborted,
            contract_entity(contract_id),
            format!("{} not persisted: {cause}", action.as_str()),
        )
        .evidence(serde_json::json!({ "aborted_sequence": sequence }));
        if let Err(err) = self.ledger.append(compensation).await {
            error!(contract_id = %contract_id, error = %err, "compensating audit entry lost");
        }
    }

    /// Create a contract in `Draft` from an approved template version.
    #[instrument(skip(self, request), fields(actor = %actor, template = %request.template))]
    pub async fn create(&self, actor: &Actor, request: NewContract) -> DcsResult<Contract> {
        let id = request.id.unwrap_or_else(ContractId::generate);
        let entity = contract_entity(&id);
        self.gate.authorize(actor, Action::ContractCreate, &entity).await?;

        let _guard = self.locks.lock(&id).await;
        if self.contracts.get_contract(&id).await?.is_some() {
            let err = DcsError::InvalidInput(format!("contract {id} already exists"));
            return Err(self.deny_creation(actor, &entity, err).await);
        }

        let template = match self.templates.resolve(&request.template).await? {
            Some(t) if t.status == TemplateStatus::Approved => t,
            Some(t) => {
                let err = DcsError::InvalidTemplateState(format!(
                    "template {} is {}, not approved",
                    request.template, t.status
                ));
                return Err(self.deny_creation(actor, &entity, err).await);
            }
            None => {
                let err = DcsError::InvalidTemplateState(format!("template {} does not exist", request.template));
                return Err(self.deny_creation(actor, &entity, err).await);
            }
        };

        let content = request.content.unwrap_or_else(|| template.body.clone());
        let content_hash = ContentHash::of_json(&content)?;
        let contract = Contract::draft(
            id.clone(),
            template.reference(),
            request.metadata,
            content,
            content_hash.clone(),
            actor.id.clone(),
            self.now(),
        );

        let entry = self
            .ledger
            .append(
                AuditEvent::allow(actor, Action::ContractCreate, entity)
                    .transition("none", ContractState::Draft)
                    .content_hash(content_hash)
                    .evidence(serde_json::json!({
                        "template": template.reference(),
                        "template_hash": template.content_hash,
                        "version": 1,
                    })),
            )
            .await?;
        match self.contracts.insert_contract(contract).await {
            Ok(stored) => {
                info!(contract_id = %stored.id, template = %stored.template, sequence = entry.sequence, "contract created");
                Ok(stored)
            }
            Err(err) => {
                self.abort(actor, &id, Action::ContractCreate, entry.sequence, &err.to_string()).await;
                Err(err.into())
            }
        }
    }

    async fn deny_creation(&self, actor: &Actor, entity: &EntityRef, err: DcsError) -> DcsError {
        warn!(actor = %actor, entity = %entity, error = %err, "contract creation denied");
        let event = AuditEvent::deny(actor, Action::ContractCreate, entity.clone(), err.to_string())
            .at_state("none")
            .evidence(serde_json::json!({ "code": err.code() }));
        match self.ledger.append(event).await {
            Ok(_) => err,
            Err(fatal) => fatal,
        }
    }

    /// Append a new version. Only `Draft` content is editable.
    #[instrument(skip(self, edit), fields(actor = %actor, base = edit.base_version))]
    pub async fn negotiate(&self, actor: &Actor, id: &ContractId, edit: ContractEdit) -> DcsResult<Contract> {
        let action = Action::ContractNegotiate;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let _guard = self.locks.lock(id).await;
        let mut contract = self.load(id).await?;
        self.ensure_editable(actor, action, &contract).await?;

        let current = contract.current_version();
        if edit.base_version != current {
            let err = DcsError::VersionConflict {
                base: u64::from(edit.base_version),
                current: u64::from(current),
            };
            return Err(self.deny(actor, action, &contract, err).await);
        }

        let diff = diff_values(&contract.content, &edit.content);
        if diff.is_empty() {
            let err = DcsError::InvalidInput("edit does not change the content".into());
            return Err(self.deny(actor, action, &contract, err).await);
        }

        let now = self.now();
        let content_hash = ContentHash::of_json(&edit.content)?;
        let version = current + 1;
        let changes = diff.len();
        contract.versions.push(VersionEntry {
            version,
            author: actor.id.clone(),
            timestamp: now,
            content: edit.content.clone(),
            content_hash: content_hash.clone(),
            diff,
            summary: edit.summary.clone(),
        });
        contract.content = edit.content;
        contract.content_hash = content_hash.clone();

        let event = AuditEvent::allow(actor, action, contract_entity(id))
            .at_state(contract.state)
            .content_hash(content_hash)
            .evidence(serde_json::json!({
                "from_version": current,
                "version": version,
                "changes": changes,
                "summary": edit.summary,
            }));
        let stored = self.commit(actor, contract, event).await?;
        info!(contract_id = %id, version, "contract version appended");
        Ok(stored)
    }

    async fn ensure_editable(&self, actor: &Actor, action: Action, contract: &Contract) -> DcsResult<()> {
        if contract.state.is_editable() {
            return Ok(());
        }
        let err = if contract.state.is_terminal() {
            DcsError::IllegalTransition(format!("contract {} is terminated", contract.id))
        } else {
            DcsError::ContentLocked(format!("content of {} is locked in state {}", contract.id, contract.state))
        };
        Err(self.deny(actor, action, contract, err).await)
    }

    /// Record review feedback without touching the content.
    pub async fn respond(&self, actor: &Actor, id: &ContractId, body: &str) -> DcsResult<Contract> {
        let action = Action::ContractRespond;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;
        let _guard = self.locks.lock(id).await;
        let mut contract = self.load(id).await?;
        if body.trim().is_empty() {
            let err = DcsError::InvalidInput("a comment needs a body".into());
            return Err(self.deny(actor, action, &contract, err).await);
        }
        if !matches!(contract.state, ContractState::Draft | ContractState::UnderReview) {
            let err = if contract.state.is_terminal() {
                DcsError::IllegalTransition(format!("contract {id} is terminated"))
            } else {
                DcsError::ContentLocked(format!("negotiation of {id} closed in state {}", contract.state))
            };
            return Err(self.deny(actor, action, &contract, err).await);
        }

        let version = contract.current_version();
        contract.comments.push(Comment {
            author: actor.id.clone(),
            version,
            body: body.to_string(),
            at: self.now(),
        });
        let event = AuditEvent::allow(actor, action, contract_entity(id))
            .at_state(contract.state)
            .evidence(serde_json::json!({ "version": version, "comments": contract.comments.len() }));
        self.commit(actor, contract, event).await
    }

    /// `Draft -> UnderReview`; locks the content.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn submit_for_approval(&self, actor: &Actor, id: &ContractId) -> DcsResult<Contract> {
        let action = Action::ContractSubmit;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let _guard = self.locks.lock(id).await;
        let mut contract = self.load(id).await?;
        let next = self.advance(actor, action, &contract, ContractEvent::SubmitForApproval).await?;
        let prior = contract.state;
        contract.state = next;
        contract.approvals.clear();

        let event = AuditEvent::allow(actor, action, contract_entity(id))
            .transition(prior, next)
            .content_hash(contract.content_hash.clone())
            .evidence(serde_json::json!({
                "version": contract.current_version(),
                "required_roles": self.config.approver_roles,
            }));
        let stored = self.commit(actor, contract, event).await?;
        info!(contract_id = %id, from = %prior, to = %next, "submitted for approval");
        Ok(stored)
    }

    /// Record an approval under `role`. The contract becomes `Approved` once
    /// every configured approver role has approved. Repeating an approval
    /// already on record changes nothing.
    #[instrument(skip(self), fields(actor = %actor, role = %role))]
    pub async fn approve(&self, actor: &Actor, id: &ContractId, role: &Role) -> DcsResult<Contract> {
        let action = Action::ContractApprove;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let _guard = self.locks.lock(id).await;
        let mut contract = self.load(id).await?;
        if contract.state != ContractState::UnderReview {
            let err = DcsError::IllegalTransition(format!("cannot approve a contract in state {}", contract.state));
            return Err(self.deny(actor, action, &contract, err).await);
        }
        self.ensure_approver(actor, action, &contract, role, &self.config.approver_roles).await?;
        if contract.approvals.iter().any(|a| &a.role == role) {
            return Ok(contract);
        }

        contract.approvals.push(Approval {
            approver: actor.id.clone(),
            role: role.clone(),
            at: self.now(),
        });
        let outstanding = outstanding_roles(&self.config.approver_roles, &contract.approvals);
        let prior = contract.state;
        let mut event = AuditEvent::allow(actor, action, contract_entity(id))
            .content_hash(contract.content_hash.clone())
            .evidence(serde_json::json!({ "role": role, "outstanding": outstanding }));
        if outstanding.is_empty() {
            let next = self.advance(actor, action, &contract, ContractEvent::Approve).await?;
            contract.state = next;
            event = event.transition(prior, next);
        } else {
            event = event.at_state(prior);
        }
        let stored = self.commit(actor, contract, event).await?;
        info!(contract_id = %id, role = %role, state = %stored.state, "approval recorded");
        Ok(stored)
    }

    pub(crate) async fn ensure_approver(
        &self,
        actor: &Actor,
        action: Action,
        contract: &Contract,
        role: &Role,
        configured: &[Role],
    ) -> DcsResult<()> {
        if !configured.contains(role) {
            let err = DcsError::AuthorizationDenied(format!("{role} is not a configured approver role"));
            return Err(self.deny(actor, action, contract, err).await);
        }
        if !self.gate.holds_role(&actor.id, role).await? {
            let err = DcsError::AuthorizationDenied(format!("{} does not hold {role}", actor.id));
            return Err(self.deny(actor, action, contract, err).await);
        }
        Ok(())
    }

    /// `UnderReview -> Draft` with the reason on record.
    pub async fn reject(&self, actor: &Actor, id: &ContractId, reason: &str) -> DcsResult<Contract> {
        let action = Action::ContractReject;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;
        let _guard = self.locks.lock(id).await;
        let mut contract = self.load(id).await?;
        if reason.trim().is_empty() {
            let err = DcsError::InvalidInput("a rejection reason is required".into());
            return Err(self.deny(actor, action, &contract, err).await);
        }
        let next = self.advance(actor, action, &contract, ContractEvent::Reject).await?;
        let prior = contract.state;
        contract.state = next;
        contract.approvals.clear();
        contract.last_rejection = Some(Rejection {
            by: actor.id.clone(),
            reason: reason.to_string(),
            at: self.now(),
        });

        let event = AuditEvent::allow(actor, action, contract_entity(id))
            .transition(prior, next)
            .reason(reason);
        let stored = self.commit(actor, contract, event).await?;
        info!(contract_id = %id, "contract rejected back to draft");
        Ok(stored)
    }

    pub async fn retrieve(&self, actor: &Actor, id: &ContractId) -> DcsResult<Contract> {
        self.gate.authorize(actor, Action::ContractRead, &contract_entity(id)).await?;
        self.load(id).await
    }

    pub async fn search(&self, actor: &Actor, query: &ContractQuery, window: QueryWindow) -> DcsResult<Vec<Contract>> {
        self.gate
            .authorize(actor, Action::ContractRead, &contract_entity(&ContractId::new("*")))
            .await?;
        Ok(self.contracts.list_contracts(query, window).await?)
    }

    /// The latest version and what it changed.
    pub async fn review(&self, actor: &Actor, id: &ContractId) -> DcsResult<ContractReview> {
        let contract = self.retrieve(actor, id).await?;
        let latest = contract
            .latest_version()
            .cloned()
            .ok_or_else(|| DcsError::NotFound(format!("versions of {id}")))?;
        let previous_version = latest.version.checked_sub(1).filter(|v| *v > 0);
        Ok(ContractReview {
            contract_id: contract.id.clone(),
            state: contract.state,
            diff: latest.diff.clone(),
            previous_version,
            latest,
        })
    }

    /// The contract's audit trail, oldest first.
    pub async fn history(&self, actor: &Actor, id: &ContractId) -> DcsResult<Vec<AuditEntry>> {
        self.gate.authorize(actor, Action::ContractRead, &contract_entity(id)).await?;
        self.ledger
            .query(AuditFilter::for_entity(contract_entity(id)))
            .collect_all()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outstanding_roles_ignores_approval_order() {
        let required = vec![Role::new("legal"), Role::new("finance")];
        let approvals = vec![Approval {
            approver: dcs_types::ActorId::new("fin"),
            role: Role::new("finance"),
            at: Utc::now(),
        }];
        assert_eq!(outstanding_roles(&required, &approvals), vec![Role::new("legal")]);
        assert!(outstanding_roles(&[], &approvals).is_empty());
    }
}
