use crate::collaborators::SignedArtifact;
use crate::config::ResignPolicy;
use crate::engine::{contract_entity, ContractWorkflowEngine};
use crate::transitions::{self, ContractEvent};
use chrono::{DateTime, Utc};
use dcs_authz::roles;
use dcs_credentials::Revocation;
use dcs_ledger::AuditEvent;
use dcs_signature::{RevocationImpact, SessionRequest, ValidationReport};
use dcs_storage::{ContractQuery, QueryWindow};
use dcs_types::{
    Action, Actor, ActorId, ComplianceFlag, Contract, ContractId, ContractState, CredentialId,
    DcsError, DcsResult, FlagKind, Role, SequencingMode, SessionId, SessionPurpose, SessionStatus,
    SignerId, SignerSpec, SigningSession,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningRequest {
    pub signers: Vec<SignerSpec>,
    #[serde(default = "default_mode")]
    pub mode: SequencingMode,
    pub deadline: DateTime<Utc>,
}

fn default_mode() -> SequencingMode {
    SequencingMode::Strict
}

#[derive(Debug, Clone, Serialize)]
pub struct SigningStarted {
    pub contract: Contract,
    pub session: SigningSession,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignatureOutcome {
    pub contract: Contract,
    pub session: SigningSession,
    pub signer_id: SignerId,
    pub newly_signed: bool,
    pub session_complete: bool,
    /// The archive accepted the completed session.
    pub finalized: bool,
    /// Why the archive handoff failed; retry with `finalize_signing`.
    pub handoff_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub contract_id: ContractId,
    pub checked_at: DateTime<Utc>,
    pub reports: Vec<ValidationReport>,
    /// Signers whose signature no longer matches the document.
    pub integrity_failures: Vec<SignerId>,
    pub compliant: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialRevocationReport {
    pub credential_id: CredentialId,
    pub impacts: Vec<RevocationImpact>,
    pub flagged_contracts: Vec<ContractId>,
    pub resign_sessions: Vec<SessionId>,
}

/// Add the flags not already open. Only signed contracts that are still in
/// force take new flags.
fn add_flags(contract: &mut Contract, flags: Vec<ComplianceFlag>) -> Vec<ComplianceFlag> {
    if !contract.state.is_post_signing() || contract.state.is_terminal() {
        return Vec::new();
    }
    let mut added = Vec::new();
    for flag in flags {
        let duplicate = contract
            .open_flags()
            .any(|f| f.kind == flag.kind && f.signer == flag.signer && f.credential == flag.credential);
        if !duplicate {
            contract.flags.push(flag.clone());
            added.push(flag);
        }
    }
    added
}

impl ContractWorkflowEngine {
    /// Audit, store the new session, then persist the contract.
    async fn commit_with_session(
        &self,
        actor: &Actor,
        mut contract: Contract,
        session: SigningSession,
        event: AuditEvent,
    ) -> DcsResult<(Contract, SigningSession)> {
        let expected = contract.revision;
        let action = event.action();
        contract.updated_at = self.now();
        let entry = self.ledger.append(event).await?;
        let session = match self.signatures.insert_session(session).await {
            Ok(s) => s,
            Err(err) => {
                self.abort(actor, &contract.id, action, entry.sequence, &err.to_string()).await;
                return Err(err);
            }
        };
        match self.contracts.update_contract(contract.clone(), expected).await {
            Ok(stored) => Ok((stored, session)),
            Err(err) => {
                self.abort(actor, &contract.id, action, entry.sequence, &err.to_string()).await;
                Err(err.into())
            }
        }
    }

    async fn ensure_signer(&self, actor: &Actor, action: Action, contract: &Contract, signer: &SignerId) -> DcsResult<()> {
        if actor.id.as_str() == signer.as_str() {
            return Ok(());
        }
        let system_signer = Role::new(format!("{}{}", roles::SYSTEM_PREFIX, roles::CONTRACT_SIGNER));
        if self.gate.holds_role(&actor.id, &system_signer).await? {
            return Ok(());
        }
        let err = DcsError::AuthorizationDenied(format!("{} may not sign for {signer}", actor.id));
        Err(self.deny(actor, action, contract, err).await)
    }

    async fn active_session(&self, actor: &Actor, action: Action, contract: &Contract) -> DcsResult<SessionId> {
        match &contract.active_session {
            Some(id) => Ok(id.clone()),
            None => {
                let err = DcsError::IllegalTransition(format!("no signing session is active for {}", contract.id));
                Err(self.deny(actor, action, contract, err).await)
            }
        }
    }

    /// `Approved -> SigningInProgress` with a new signing session.
    #[instrument(skip(self, request), fields(actor = %actor, signers = request.signers.len()))]
    pub async fn initiate_signing(&self, actor: &Actor, id: &ContractId, request: SigningRequest) -> DcsResult<SigningStarted> {
        let action = Action::SigningInitiate;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let _guard = self.locks.lock(id).await;
        let mut contract = self.load(id).await?;
        let next = self.advance(actor, action, &contract, ContractEvent::InitiateSigning).await?;
        let session = self.signatures.prepare_session(SessionRequest {
            contract_id: id.clone(),
            purpose: SessionPurpose::Initial,
            signers: request.signers,
            mode: request.mode,
            deadline: request.deadline,
            document_hash: contract.content_hash.clone(),
        });
        let session = match session {
            Ok(s) => s,
            Err(err) => return Err(self.deny(actor, action, &contract, err).await),
        };

        let prior = contract.state;
        contract.state = next;
        contract.signers = session.entries.iter().map(|e| e.signer_id.clone()).collect();
        contract.active_session = Some(session.id.clone());
        contract.sessions.push(session.id.clone());

        let event = AuditEvent::allow(actor, action, contract_entity(id))
            .transition(prior, next)
            .content_hash(contract.content_hash.clone())
            .evidence(serde_json::json!({
                "session_id": session.id,
                "mode": session.mode,
                "deadline": session.deadline,
                "signers": contract.signers,
            }));
        let (contract, session) = self.commit_with_session(actor, contract, session, event).await?;
        info!(contract_id = %id, session = %session.id, "signing initiated");
        Ok(SigningStarted { contract, session })
    }

    /// Bind credentials for `signer` in the active session.
    pub async fn request_credentials(&self, actor: &Actor, id: &ContractId, signer: &SignerId) -> DcsResult<dcs_types::SignerEntry> {
        let action = Action::CredentialsRequest;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;
        let contract = self.load(id).await?;
        self.ensure_signer(actor, action, &contract, signer).await?;
        let session_id = self.active_session(actor, action, &contract).await?;
        self.signatures.request_credentials(actor, &session_id, signer).await
    }

    /// Message to sign when presenting an externally produced signature.
    pub async fn signing_message(&self, actor: &Actor, id: &ContractId, signer: &SignerId) -> DcsResult<String> {
        let contract = self.retrieve(actor, id).await?;
        let session_id = self.active_session(actor, Action::ContractRead, &contract).await?;
        self.signatures.signing_message(&session_id, signer).await
    }

    /// Apply a signature. When it completes the session the signed artifact
    /// is handed to the archive; a failed handoff leaves the signatures in
    /// place and the contract where it was.
    #[instrument(skip(self, presented), fields(actor = %actor, signer = %signer))]
    pub async fn apply_signature(
        &self,
        actor: &Actor,
        id: &ContractId,
        signer: &SignerId,
        presented: Option<String>,
    ) -> DcsResult<SignatureOutcome> {
        let action = Action::SignatureApply;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let _guard = self.locks.lock(id).await;
        let contract = self.load(id).await?;
        self.ensure_signer(actor, action, &contract, signer).await?;
        let session_id = self.active_session(actor, action, &contract).await?;

        let signed = self
            .signatures
            .apply_signature(actor, &session_id, signer, presented)
            .await?;
        let session_complete = signed.session_complete();
        let mut outcome = SignatureOutcome {
            contract: contract.clone(),
            session: signed.session.clone(),
            signer_id: signer.clone(),
            newly_signed: signed.newly_signed,
            session_complete,
            finalized: false,
            handoff_error: None,
        };
        if signed.newly_signed && session_complete {
            match self.finalize_session(actor, contract, &signed.session).await {
                Ok(contract) => {
                    outcome.contract = contract;
                    outcome.finalized = true;
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(contract_id = %id, error = %err, "archive handoff failed; signatures kept");
                    outcome.handoff_error = Some(err.to_string());
                }
            }
        }
        Ok(outcome)
    }

    /// Retry the archive handoff of a completed session.
    pub async fn finalize_signing(&self, actor: &Actor, id: &ContractId) -> DcsResult<Contract> {
        let action = Action::SigningFinalize;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let _guard = self.locks.lock(id).await;
        let contract = self.load(id).await?;
        let session_id = self.active_session(actor, action, &contract).await?;
        let session = self.signatures.session(&session_id).await?;
        if session.status != SessionStatus::Complete {
            let err = DcsError::IllegalTransition(format!("session {session_id} is not complete"));
            return Err(self.deny(actor, action, &contract, err).await);
        }
        self.finalize_session(actor, contract, &session).await
    }

    async fn finalize_session(&self, actor: &Actor, mut contract: Contract, session: &SigningSession) -> DcsResult<Contract> {
        let action = Action::SigningFinalize;
        // A revocation can land between the last signature and a late handoff.
        let revoked = match self.signatures.revoked_signatures(session).await {
            Ok(revoked) => revoked,
            Err(err) => return Err(self.deny(actor, action, &contract, err).await),
        };
        let artifact = SignedArtifact {
            contract_id: contract.id.clone(),
            version: contract.current_version(),
            content: contract.content.clone(),
            content_hash: session.document_hash.clone(),
            session_id: session.id.clone(),
            signatures: session.entries.iter().filter_map(|e| e.signature.clone()).collect(),
        };
        let limit = self.config.timeouts.archive_handoff();
        let archived = match tokio::time::timeout(limit, self.archive.archive(&artifact)).await {
            Ok(result) => result,
            Err(_) => Err(DcsError::ExternalUnavailable(format!("archive handoff timed out after {limit:?}"))),
        };
        let archive_ref = match archived {
            Ok(r) => r,
            Err(err) => return Err(self.deny(actor, action, &contract, err).await),
        };

        let prior = contract.state;
        contract.archive_refs.push(archive_ref.clone());
        contract.active_session = None;
        match session.purpose {
            SessionPurpose::Initial => {
                let next = self.advance(actor, action, &contract, ContractEvent::CompleteSigning).await?;
                contract.state = next;
            }
            SessionPurpose::Resign => {
                let now = self.now();
                let resigned: HashSet<&SignerId> = session.entries.iter().map(|e| &e.signer_id).collect();
                for flag in contract
                    .flags
                    .iter_mut()
                    .filter(|f| f.is_open() && f.kind == FlagKind::ResignRequired && resigned.contains(&f.signer))
                {
                    flag.cleared_at = Some(now);
                }
            }
        }

        let auto_resign = session.purpose == SessionPurpose::Initial
            && matches!(self.config.resign_policy, ResignPolicy::AutoTrigger { .. });
        let added = if auto_resign {
            Vec::new()
        } else {
            let flags = revoked
                .iter()
                .map(|r| {
                    let reason = format!("credential {} revoked: {}", r.credential, r.revocation.reason);
                    self.non_compliant(&r.signer_id, Some(r.credential.clone()), reason)
                })
                .collect();
            add_flags(&mut contract, flags)
        };

        let signature_ids: Vec<_> = artifact.signatures.iter().map(|s| s.signature_id.clone()).collect();
        let mut event = AuditEvent::allow(actor, action, contract_entity(&contract.id))
            .content_hash(session.document_hash.clone())
            .evidence(serde_json::json!({
                "session_id": session.id,
                "purpose": session.purpose,
                "archive_ref": archive_ref,
                "signatures": signature_ids,
                "revoked": revoked,
                "flags": added,
            }));
        event = if contract.state == prior {
            event.at_state(prior)
        } else {
            event.transition(prior, contract.state)
        };
        let stored = self.commit(actor, contract, event).await?;
        info!(contract_id = %stored.id, archive = %archive_ref, state = %stored.state, "signing finalized");
        if !added.is_empty() {
            warn!(contract_id = %stored.id, flags = added.len(), "signed with revoked credentials");
        }
        self.record_incidents(actor, &stored, Action::SigningFinalize, &added).await;

        let Some(first) = revoked.first().filter(|_| auto_resign) else {
            return Ok(stored);
        };
        let mut impact = RevocationImpact {
            session_id: session.id.clone(),
            contract_id: stored.id.clone(),
            purpose: session.purpose,
            session_status: session.status,
            blocked_signers: Vec::new(),
            completed_signatures: Vec::new(),
        };
        for r in &revoked {
            if !impact.completed_signatures.iter().any(|(signer, _)| signer == &r.signer_id) {
                impact.completed_signatures.push((r.signer_id.clone(), r.signature_id.clone()));
            }
        }
        self.flag_revoked(actor, &impact, &first.credential, &first.revocation).await?;
        self.load(&stored.id).await
    }

    /// Latest session in which `signer` applied a signature.
    async fn signed_session(&self, contract: &Contract, signer: &SignerId) -> DcsResult<SigningSession> {
        self.signatures
            .sessions_for_contract(&contract.id)
            .await?
            .into_iter()
            .filter(|s| s.entry(signer).is_some_and(|e| e.signature.is_some()))
            .max_by_key(|s| s.created_at)
            .ok_or_else(|| DcsError::NotFound(format!("signature of {signer} on {}", contract.id)))
    }

    async fn validate_one(&self, actor: &Actor, contract: &Contract, signer: &SignerId) -> DcsResult<ValidationReport> {
        let session = self.signed_session(contract, signer).await?;
        self.signatures
            .validate_signature(actor, &session.id, signer, &contract.content_hash)
            .await
    }

    fn non_compliant(&self, signer: &SignerId, credential: Option<CredentialId>, reason: String) -> ComplianceFlag {
        ComplianceFlag {
            kind: FlagKind::NonCompliant,
            signer: signer.clone(),
            credential,
            reason,
            raised_at: self.now(),
            cleared_at: None,
        }
    }

    async fn commit_flags(&self, actor: &Actor, action: Action, mut contract: Contract, flags: Vec<ComplianceFlag>) -> DcsResult<Contract> {
        let added = add_flags(&mut contract, flags);
        if added.is_empty() {
            return Ok(contract);
        }
        let reason = added.iter().map(|f| f.reason.as_str()).collect::<Vec<_>>().join("; ");
        let event = AuditEvent::allow(actor, action, contract_entity(&contract.id))
            .at_state(contract.state)
            .reason(reason)
            .evidence(serde_json::json!({ "flags": added }));
        let stored = self.commit(actor, contract, event).await?;
        warn!(contract_id = %stored.id, flags = added.len(), "compliance flags raised");
        self.record_incidents(actor, &stored, action, &added).await;
        Ok(stored)
    }

    /// Validate the signer's latest signature against the current document.
    /// A non-compliant or tampered signature flags the contract.
    pub async fn validate_signature(&self, actor: &Actor, id: &ContractId, signer: &SignerId) -> DcsResult<ValidationReport> {
        let action = Action::SignatureValidate;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let _guard = self.locks.lock(id).await;
        let contract = self.load(id).await?;
        match self.validate_one(actor, &contract, signer).await {
            Ok(report) => {
                if !report.policy_compliant {
                    let flag = self.non_compliant(signer, Some(report.credential_id.clone()), report.findings.join("; "));
                    self.commit_flags(actor, Action::ComplianceFlag, contract, vec![flag]).await?;
                }
                Ok(report)
            }
            Err(DcsError::IntegrityViolation(msg)) => {
                let flag = self.non_compliant(signer, None, format!("document altered after signing: {msg}"));
                self.commit_flags(actor, Action::ComplianceFlag, contract, vec![flag]).await?;
                Err(DcsError::IntegrityViolation(msg))
            }
            Err(err) => Err(err),
        }
    }

    /// Withdraw a signature and flag the contract.
    pub async fn revoke_signature(&self, actor: &Actor, id: &ContractId, signer: &SignerId, reason: &str) -> DcsResult<Contract> {
        let action = Action::SignatureRevoke;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;
        let _guard = self.locks.lock(id).await;
        let contract = self.load(id).await?;
        if reason.trim().is_empty() {
            let err = DcsError::InvalidInput("a revocation reason is required".into());
            return Err(self.deny(actor, action, &contract, err).await);
        }
        if !contract.state.is_post_signing() {
            let err = DcsError::IllegalTransition(format!("signatures of {id} cannot be revoked in state {}", contract.state));
            return Err(self.deny(actor, action, &contract, err).await);
        }
        let session = self.signed_session(&contract, signer).await?;
        let record = self.signatures.revoke_signature(actor, &session.id, signer, reason).await?;
        let flag = self.non_compliant(signer, Some(record.identity_credential), format!("signature revoked: {reason}"));
        self.commit_flags(actor, action, contract, vec![flag]).await
    }

    /// Validate every applied signature and flag what fails.
    pub async fn compliance_check(&self, actor: &Actor, id: &ContractId) -> DcsResult<ComplianceReport> {
        let action = Action::ComplianceCheck;
        self.gate.authorize(actor, action, &contract_entity(id)).await?;

        let _guard = self.locks.lock(id).await;
        let mut contract = self.load(id).await?;
        let mut signers: Vec<SignerId> = Vec::new();
        for session in self.signatures.sessions_for_contract(id).await? {
            for entry in session.entries.iter().filter(|e| e.signature.is_some()) {
                if !signers.contains(&entry.signer_id) {
                    signers.push(entry.signer_id.clone());
                }
            }
        }

        let mut reports = Vec::new();
        let mut integrity_failures = Vec::new();
        let mut flags = Vec::new();
        for signer in &signers {
            match self.validate_one(actor, &contract, signer).await {
                Ok(report) => {
                    if !report.policy_compliant {
                        flags.push(self.non_compliant(signer, Some(report.credential_id.clone()), report.findings.join("; ")));
                    }
                    reports.push(report);
                }
                Err(DcsError::IntegrityViolation(msg)) => {
                    flags.push(self.non_compliant(signer, None, format!("document altered after signing: {msg}")));
                    integrity_failures.push(signer.clone());
                }
                Err(err) => return Err(err),
            }
        }

        let compliant = flags.is_empty();
        let added = add_flags(&mut contract, flags);
        let event = AuditEvent::allow(actor, action, contract_entity(id))
            .at_state(contract.state)
            .content_hash(contract.content_hash.clone())
            .evidence(serde_json::json!({
                "signers": signers,
                "compliant": compliant,
                "integrity_failures": integrity_failures,
                "flags": added,
            }));
        let contract = if added.is_empty() {
            self.ledger.append(event).await?;
            contract
        } else {
            let stored = self.commit(actor, contract, event).await?;
            self.record_incidents(actor, &stored, action, &added).await;
            stored
        };
        info!(contract_id = %id, signers = signers.len(), compliant, "compliance check complete");
        if !compliant {
            let mut findings: Vec<String> = reports
                .iter()
                .filter(|r| !r.policy_compliant)
                .map(|r| format!("{}: {}", r.signer_id, r.findings.join(", ")))
                .collect();
            findings.extend(integrity_failures.iter().map(|s| format!("{s}: document altered after signing")));
            self.record_check_failure(actor, &contract, &findings).await;
        }
        Ok(ComplianceReport {
            contract_id: id.clone(),
            checked_at: self.now(),
            reports,
            integrity_failures,
            compliant,
        })
    }

    /// Close overdue sessions. An expired initial session returns its
    /// contract to `Approved`.
    pub async fn expire_signing_sessions(&self, actor: &Actor) -> DcsResult<Vec<ContractId>> {
        let mut expired_contracts = Vec::new();
        for overdue in self.signatures.overdue_sessions().await? {
            let _guard = self.locks.lock(&overdue.contract_id).await;
            let Some(session) = self.signatures.expire_session(actor, &overdue.id).await? else {
                continue;
            };
            let mut contract = match self.load(&session.contract_id).await {
                Ok(c) => c,
                Err(DcsError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            if contract.active_session.as_ref() != Some(&session.id) {
                continue;
            }
            contract.active_session = None;
            let prior = contract.state;
            let mut event = AuditEvent::allow(actor, Action::SigningExpire, contract_entity(&contract.id))
                .reason(format!("session {} missed its deadline {}", session.id, session.deadline))
                .evidence(serde_json::json!({ "session_id": session.id, "purpose": session.purpose }));
            if session.purpose == SessionPurpose::Initial && prior == ContractState::SigningInProgress {
                let next = transitions::apply(prior, ContractEvent::ExpireSigning, None)?;
                contract.state = next;
                event = event.transition(prior, next);
            } else {
                event = event.at_state(prior);
            }
            let stored = self.commit(actor, contract, event).await?;
            info!(contract_id = %stored.id, session = %session.id, state = %stored.state, "signing session expired");
            expired_contracts.push(stored.id);
        }
        Ok(expired_contracts)
    }

    /// Cascade a credential revocation into every session that references
    /// it and every contract whose completed signature depended on it.
    #[instrument(skip(self, revocation), fields(actor = %actor, credential = %credential))]
    pub async fn apply_credential_revocation(
        &self,
        actor: &Actor,
        credential: &CredentialId,
        revocation: &Revocation,
    ) -> DcsResult<CredentialRevocationReport> {
        let mut report = CredentialRevocationReport {
            credential_id: credential.clone(),
            impacts: Vec::new(),
            flagged_contracts: Vec::new(),
            resign_sessions: Vec::new(),
        };
        for session in self.signatures.sessions_for_credential(credential).await? {
            let _guard = self.locks.lock(&session.contract_id).await;
            let impact = self
                .signatures
                .block_credential(actor, &session.id, credential, revocation)
                .await?;
            if !impact.completed_signatures.is_empty() {
                let (flagged, resign) = self.flag_revoked(actor, &impact, credential, revocation).await?;
                if flagged && !report.flagged_contracts.contains(&impact.contract_id) {
                    report.flagged_contracts.push(impact.contract_id.clone());
                }
                report.resign_sessions.extend(resign);
            }
            report.impacts.push(impact);
        }
        info!(
            credential = %credential,
            sessions = report.impacts.len(),
            flagged = report.flagged_contracts.len(),
            "credential revocation applied"
        );
        Ok(report)
    }

    async fn flag_revoked(
        &self,
        actor: &Actor,
        impact: &RevocationImpact,
        credential: &CredentialId,
        revocation: &Revocation,
    ) -> DcsResult<(bool, Option<SessionId>)> {
        let mut contract = match self.load(&impact.contract_id).await {
            Ok(c) => c,
            Err(DcsError::NotFound(_)) => return Ok((false, None)),
            Err(err) => return Err(err),
        };
        let now = self.now();
        let reason = format!("credential {credential} revoked: {}", revocation.reason);
        let window = match self.config.resign_policy {
            ResignPolicy::AutoTrigger { window_secs }
                if contract.state.is_post_signing()
                    && !contract.state.is_terminal()
                    && contract.active_session.is_none() =>
            {
                Some(window_secs)
            }
            _ => None,
        };
        let kind = if window.is_some() {
            FlagKind::ResignRequired
        } else {
            FlagKind::NonCompliant
        };
        let flags = impact
            .completed_signatures
            .iter()
            .map(|(signer, _)| ComplianceFlag {
                kind,
                signer: signer.clone(),
                credential: Some(credential.clone()),
                reason: reason.clone(),
                raised_at: now,
                cleared_at: None,
            })
            .collect();
        let added = add_flags(&mut contract, flags);
        if added.is_empty() {
            return Ok((false, None));
        }

        let event = AuditEvent::allow(actor, Action::RevocationApply, contract_entity(&contract.id))
            .at_state(contract.state)
            .reason(reason)
            .evidence(serde_json::json!({
                "credential": credential,
                "revoked_at": revocation.revoked_at,
                "flags": added,
                "session_id": impact.session_id,
            }));

        let Some(window_secs) = window else {
            let stored = self.commit(actor, contract, event).await?;
            warn!(contract_id = %impact.contract_id, credential = %credential, "contract flagged non-compliant");
            self.record_incidents(actor, &stored, Action::RevocationApply, &added).await;
            return Ok((true, None));
        };

        let original = self.signatures.session(&impact.session_id).await?;
        let signers: Vec<SignerSpec> = impact
            .completed_signatures
            .iter()
            .filter_map(|(signer, _)| original.entry(signer))
            .map(|e| SignerSpec::new(e.signer_id.as_str(), e.organization.clone()))
            .collect();
        let session = self.signatures.prepare_session(SessionRequest {
            contract_id: contract.id.clone(),
            purpose: SessionPurpose::Resign,
            signers,
            mode: original.mode,
            deadline: now + chrono::Duration::seconds(window_secs as i64),
            document_hash: contract.content_hash.clone(),
        })?;
        contract.active_session = Some(session.id.clone());
        contract.sessions.push(session.id.clone());
        let event = event.evidence(serde_json::json!({
            "credential": credential,
            "revoked_at": revocation.revoked_at,
            "flags": added,
            "session_id": impact.session_id,
            "resign_session": session.id,
        }));
        let (stored, session) = self.commit_with_session(actor, contract, session, event).await?;
        info!(contract_id = %impact.contract_id, session = %session.id, "re-signing session opened");
        self.record_incidents(actor, &stored, Action::RevocationApply, &added).await;
        Ok((true, Some(session.id)))
    }

    /// Drop approvals recorded by actors who lost `role` (any role when
    /// `None`) from contracts still waiting on approvals.
    pub async fn apply_role_revocation(&self, actor: &Actor, affected: &[ActorId], role: Option<&Role>) -> DcsResult<Vec<ContractId>> {
        let mut changed = Vec::new();
        if affected.is_empty() {
            return Ok(changed);
        }
        let lost = |approver: &ActorId, held: &Role| affected.contains(approver) && role.map_or(true, |r| r == held);
        for state in [ContractState::UnderReview, ContractState::RenewalPending, ContractState::TerminationPending] {
            let query = ContractQuery {
                state: Some(state),
                ..ContractQuery::default()
            };
            for candidate in self.contracts.list_contracts(&query, QueryWindow::default()).await? {
                let _guard = self.locks.lock(&candidate.id).await;
                let mut contract = self.load(&candidate.id).await?;
                let mut removed: BTreeMap<String, Vec<Role>> = BTreeMap::new();
                contract.approvals.retain(|a| {
                    let drop = lost(&a.approver, &a.role);
                    if drop {
                        removed.entry(a.approver.to_string()).or_default().push(a.role.clone());
                    }
                    !drop
                });
                if let Some(pending) = contract.pending.as_mut() {
                    pending.approvals.retain(|a| {
                        let drop = lost(&a.approver, &a.role);
                        if drop {
                            removed.entry(a.approver.to_string()).or_default().push(a.role.clone());
                        }
                        !drop
                    });
                }
                if removed.is_empty() {
                    continue;
                }
                let event = AuditEvent::allow(actor, Action::RevocationApply, contract_entity(&contract.id))
                    .at_state(contract.state)
                    .reason("approvals withdrawn after role revocation")
                    .evidence(serde_json::json!({ "removed": removed }));
                let stored = self.commit(actor, contract, event).await?;
                changed.push(stored.id);
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcs_types::{ContentHash, ContractMetadata, TemplateRef};

    fn contract(state: ContractState) -> Contract {
        let mut c = Contract::draft(
            ContractId::new("c-1"),
            TemplateRef::new("NDA", 1),
            ContractMetadata::default(),
            serde_json::json!({}),
            ContentHash::of_bytes(b"{}"),
            ActorId::new("alice"),
            Utc::now(),
        );
        c.state = state;
        c
    }

    fn flag(signer: &str, kind: FlagKind) -> ComplianceFlag {
        ComplianceFlag {
            kind,
            signer: SignerId::new(signer),
            credential: Some(CredentialId::new("cred-1")),
            reason: "revoked".into(),
            raised_at: Utc::now(),
            cleared_at: None,
        }
    }

    #[test]
    fn flags_are_deduplicated_while_open() {
        let mut c = contract(ContractState::Signed);
        assert_eq!(add_flags(&mut c, vec![flag("alice", FlagKind::NonCompliant)]).len(), 1);
        assert!(add_flags(&mut c, vec![flag("alice", FlagKind::NonCompliant)]).is_empty());
        assert_eq!(add_flags(&mut c, vec![flag("alice", FlagKind::ResignRequired)]).len(), 1);

        c.flags[0].cleared_at = Some(Utc::now());
        assert_eq!(add_flags(&mut c, vec![flag("alice", FlagKind::NonCompliant)]).len(), 1);
    }

    #[test]
    fn only_contracts_in_force_are_flagged() {
        for state in [ContractState::SigningInProgress, ContractState::Terminated] {
            let mut c = contract(state);
            assert!(add_flags(&mut c, vec![flag("alice", FlagKind::NonCompliant)]).is_empty());
            assert!(c.flags.is_empty());
        }
    }
}
