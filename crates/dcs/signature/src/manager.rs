use crate::digest::signing_digest;
use crate::timestamp::{verify_token, TimestampAuthority};
use crate::validation::{CertificateStatus, ValidationReport};
use crate::wallet::SigningWallet;
use dcs_credentials::{
    verify_hex, ContractScope, Credential, CredentialKind, CredentialSource, CredentialVerifier,
    Revocation, RevocationStatus, Verification,
};
use dcs_ledger::{AuditEvent, AuditLedger};
use dcs_storage::SessionStore;
use dcs_types::{
    Action, Actor, BlockReason, ContentHash, ContractId, CredentialId, DcsError, DcsResult,
    EntityRef, KeyedLocks, SequencingMode, SessionId, SessionPurpose, SessionStatus,
    SignatureId, SignatureRecord, SignatureRevocation, SignerEntry, SignerId, SignerSpec,
    SignerStatus, SigningSession,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Technical bounds on the calls the manager makes to collaborators.
#[derive(Debug, Clone, Copy)]
pub struct SignatureTimeouts {
    pub credential_fetch: Duration,
    pub wallet: Duration,
    pub timestamp: Duration,
}

impl Default for SignatureTimeouts {
    fn default() -> Self {
        Self {
            credential_fetch: Duration::from_secs(5),
            wallet: Duration::from_secs(10),
            timestamp: Duration::from_secs(5),
        }
    }
}

pub struct SignatureDeps {
    pub sessions: Arc<dyn SessionStore>,
    pub credentials: Arc<dyn CredentialSource>,
    pub verifier: Arc<CredentialVerifier>,
    pub wallet: Arc<dyn SigningWallet>,
    pub timestamps: Arc<dyn TimestampAuthority>,
    pub ledger: Arc<AuditLedger>,
}

/// Parameters of a new signing session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub contract_id: ContractId,
    pub purpose: SessionPurpose,
    pub signers: Vec<SignerSpec>,
    pub mode: SequencingMode,
    pub deadline: DateTime<Utc>,
    pub document_hash: ContentHash,
}

#[derive(Debug, Clone, Serialize)]
pub struct SigningOutcome {
    pub session: SigningSession,
    pub signer_id: SignerId,
    /// False when the entry was already signed and nothing changed.
    pub newly_signed: bool,
}

impl SigningOutcome {
    pub fn session_complete(&self) -> bool {
        self.session.status == SessionStatus::Complete
    }
}

/// What one credential revocation did to one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevocationImpact {
    pub session_id: SessionId,
    pub contract_id: ContractId,
    pub purpose: SessionPurpose,
    pub session_status: SessionStatus,
    /// Entries of an open session moved to Blocked.
    pub blocked_signers: Vec<SignerId>,
    /// Signatures of a completed session that used the credential.
    pub completed_signatures: Vec<(SignerId, SignatureId)>,
}

/// An applied signature whose identity or PoA credential is now revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevokedSignature {
    pub signer_id: SignerId,
    pub signature_id: SignatureId,
    pub credential: CredentialId,
    pub revocation: Revocation,
}

pub struct SignatureManager {
    sessions: Arc<dyn SessionStore>,
    credentials: Arc<dyn CredentialSource>,
    verifier: Arc<CredentialVerifier>,
    wallet: Arc<dyn SigningWallet>,
    timestamps: Arc<dyn TimestampAuthority>,
    ledger: Arc<AuditLedger>,
    timeouts: SignatureTimeouts,
    locks: KeyedLocks<SessionId>,
}

async fn bounded<T>(limit: Duration, what: &str, fut: impl Future<Output = DcsResult<T>>) -> DcsResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DcsError::ExternalUnavailable(format!("{what} timed out after {limit:?}"))),
    }
}

fn session_entity(id: &SessionId) -> EntityRef {
    EntityRef::Session(id.clone())
}

fn no_signer(session: &SigningSession, signer: &SignerId) -> DcsError {
    DcsError::NotFound(format!("signer {signer} in session {}", session.id))
}

impl SignatureManager {
    pub fn new(deps: SignatureDeps, timeouts: SignatureTimeouts) -> Self {
        Self {
            sessions: deps.sessions,
            credentials: deps.credentials,
            verifier: deps.verifier,
            wallet: deps.wallet,
            timestamps: deps.timestamps,
            ledger: deps.ledger,
            timeouts,
            locks: KeyedLocks::new(),
        }
    }

    /// Release lock slots for sessions nobody is working on.
    pub fn prune_locks(&self) -> usize {
        self.locks.prune_idle()
    }

    /// Validate a request and build the session without persisting it.
    pub fn prepare_session(&self, request: SessionRequest) -> DcsResult<SigningSession> {
        if request.signers.is_empty() {
            return Err(DcsError::InvalidInput("a signing session needs at least one signer".into()));
        }
        let mut seen = HashSet::new();
        for spec in &request.signers {
            if !seen.insert(spec.signer_id.clone()) {
                return Err(DcsError::InvalidInput(format!("signer {} listed twice", spec.signer_id)));
            }
        }
        let now = self.ledger.now();
        if request.deadline <= now {
            return Err(DcsError::DeadlineExpired {
                deadline: request.deadline,
            });
        }
        Ok(SigningSession::new(
            SessionId::generate(),
            request.contract_id,
            request.purpose,
            request.mode,
            request.deadline,
            request.signers,
            request.document_hash,
            now,
        ))
    }

    pub async fn insert_session(&self, session: SigningSession) -> DcsResult<SigningSession> {
        let stored = self.sessions.insert_session(session).await?;
        info!(session = %stored.id, contract = %stored.contract_id, signers = stored.entries.len(), "signing session opened");
        Ok(stored)
    }

    pub async fn session(&self, id: &SessionId) -> DcsResult<SigningSession> {
        self.sessions
            .get_session(id)
            .await?
            .ok_or_else(|| DcsError::NotFound(format!("session {id}")))
    }

    pub async fn sessions_for_contract(&self, contract: &ContractId) -> DcsResult<Vec<SigningSession>> {
        Ok(self.sessions.sessions_for_contract(contract).await?)
    }

    pub async fn sessions_for_credential(&self, credential: &CredentialId) -> DcsResult<Vec<SigningSession>> {
        Ok(self.sessions.sessions_for_credential(credential).await?)
    }

    /// Open sessions whose deadline has passed.
    pub async fn overdue_sessions(&self) -> DcsResult<Vec<SigningSession>> {
        let now = self.ledger.now();
        Ok(self
            .sessions
            .open_sessions()
            .await?
            .into_iter()
            .filter(|s| s.is_past_deadline(now))
            .collect())
    }

    pub async fn signing_message(&self, session_id: &SessionId, signer: &SignerId) -> DcsResult<String> {
        let session = self.session(session_id).await?;
        session.entry(signer).ok_or_else(|| no_signer(&session, signer))?;
        Ok(signing_digest(&session.document_hash, &session.id, signer))
    }

    async fn deny(&self, actor: &Actor, action: Action, session: &SigningSession, signer: &SignerId, err: DcsError) -> DcsError {
        let state = session
            .entry(signer)
            .map(|e| e.status.to_string())
            .unwrap_or_else(|| "unknown".into());
        warn!(session = %session.id, signer = %signer, action = action.as_str(), error = %err, "signing step denied");
        let event = AuditEvent::deny(actor, action, session_entity(&session.id), err.to_string())
            .at_state(state)
            .evidence(serde_json::json!({ "signer": signer, "code": err.code() }));
        match self.ledger.append(event).await {
            Ok(_) => err,
            Err(fatal) => fatal,
        }
    }

    /// Audit first, then persist; a failed write is compensated in the ledger.
    async fn commit(&self, session: SigningSession, expected_revision: u64, event: AuditEvent, actor: &Actor) -> DcsResult<SigningSession> {
        let action = event.action();
        self.ledger.append(event).await?;
        match self.sessions.update_session(session.clone(), expected_revision).await {
            Ok(stored) => Ok(stored),
            Err(err) => {
                let reason = format!("{} not persisted: {err}", action.as_str());
                error!(session = %session.id, action = action.as_str(), cause = %err, "session commit aborted after audit");
                if let Err(lost) = self
                    .ledger
                    .append(AuditEvent::deny(actor, Action::CommitAborted, session_entity(&session.id), reason))
                    .await
                {
                    error!(session = %session.id, error = %lost, "compensating audit entry lost");
                }
                Err(err.into())
            }
        }
    }

    /// Fetch and verify identity and PoA for one signer.
    ///
    /// A bind failure leaves the entry `Blocked` and returns the typed error.
    /// Transient failures (timeouts, unknown status) are retriable.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn request_credentials(&self, actor: &Actor, session_id: &SessionId, signer: &SignerId) -> DcsResult<SignerEntry> {
        let _guard = self.locks.lock(session_id).await;
        let mut session = self.session(session_id).await?;
        let action = Action::CredentialsRequest;

        if !session.is_open() {
            let err = DcsError::IllegalTransition(format!("session {} is {:?}", session.id, session.status));
            return Err(self.deny(actor, action, &session, signer, err).await);
        }
        let now = self.ledger.now();
        if session.is_past_deadline(now) {
            let err = DcsError::DeadlineExpired { deadline: session.deadline };
            return Err(self.deny(actor, action, &session, signer, err).await);
        }
        let entry = session.entry(signer).ok_or_else(|| no_signer(&session, signer))?.clone();
        let may_request = match entry.status {
            SignerStatus::Pending | SignerStatus::CredentialsRequested => true,
            SignerStatus::Blocked => entry.blocked.as_ref().is_some_and(|b| b.retriable),
            _ => false,
        };
        if !may_request {
            let err = DcsError::IllegalTransition(format!(
                "credentials cannot be requested for {signer} in state {}",
                entry.status
            ));
            return Err(self.deny(actor, action, &session, signer, err).await);
        }

        // Record the request before the suspension point.
        if entry.status != SignerStatus::CredentialsRequested {
            let revision = session.revision;
            let e = session.entry_mut(signer).ok_or_else(|| DcsError::NotFound(signer.to_string()))?;
            e.status = SignerStatus::CredentialsRequested;
            e.attempts += 1;
            e.blocked = None;
            e.updated_at = now;
            let attempt = e.attempts;
            let event = AuditEvent::allow(actor, action, session_entity(session_id))
                .transition(entry.status, SignerStatus::CredentialsRequested)
                .evidence(serde_json::json!({ "signer": signer, "attempt": attempt }));
            session = self.commit(session, revision, event, actor).await?;
        }

        let scope = ContractScope {
            contract_id: session.contract_id.clone(),
            organization: entry.organization.clone(),
        };
        let bound = self.bind(actor, &entry, &scope).await;
        if let Err((err, _)) = &bound {
            if err.is_fatal() {
                return Err(err.clone());
            }
        }

        let revision = session.revision;
        let now = self.ledger.now();
        let e = session.entry_mut(signer).ok_or_else(|| DcsError::NotFound(signer.to_string()))?;
        e.updated_at = now;
        match bound {
            Ok((identity, authority)) => {
                e.identity = Some(identity.binding());
                e.authority = Some(authority.binding());
                e.status = SignerStatus::CredentialsBound;
                let event = AuditEvent::allow(actor, action, session_entity(session_id))
                    .transition(SignerStatus::CredentialsRequested, SignerStatus::CredentialsBound)
                    .evidence(serde_json::json!({
                        "signer": signer,
                        "identity": identity.credential_id,
                        "identity_fingerprint": identity.fingerprint,
                        "poa": authority.credential_id,
                        "poa_fingerprint": authority.fingerprint,
                    }));
                let stored = self.commit(session, revision, event, actor).await?;
                info!(session = %session_id, signer = %signer, "credentials bound");
                stored
                    .entry(signer)
                    .cloned()
                    .ok_or_else(|| DcsError::NotFound(signer.to_string()))
            }
            Err((err, credential)) => {
                let retriable = matches!(err, DcsError::ExternalUnavailable(_));
                e.status = SignerStatus::Blocked;
                e.blocked = Some(BlockReason {
                    reason: err.to_string(),
                    retriable,
                    credential,
                    at: now,
                });
                let event = AuditEvent::deny(actor, action, session_entity(session_id), err.to_string())
                    .transition(SignerStatus::CredentialsRequested, SignerStatus::Blocked)
                    .evidence(serde_json::json!({ "signer": signer, "retriable": retriable }));
                self.commit(session, revision, event, actor).await?;
                warn!(session = %session_id, signer = %signer, retriable, error = %err, "signer blocked");
                Err(err)
            }
        }
    }

    async fn fetch(&self, hint: Option<&CredentialId>, subject: &SignerId, kind: CredentialKind) -> Result<Credential, (DcsError, Option<CredentialId>)> {
        let fetched = match hint {
            Some(id) => {
                bounded(self.timeouts.credential_fetch, "credential fetch", self.credentials.fetch(id)).await
            }
            None => {
                bounded(
                    self.timeouts.credential_fetch,
                    "credential fetch",
                    self.credentials.current_for(subject.as_str(), kind),
                )
                .await
            }
        };
        match fetched {
            Ok(Some(credential)) => Ok(credential),
            Ok(None) => Err((
                DcsError::CredentialInvalid(format!("no {kind:?} credential available for {subject}")),
                hint.cloned(),
            )),
            Err(DcsError::ExternalUnavailable(msg)) => Err((DcsError::ExternalUnavailable(msg), hint.cloned())),
            Err(other) => Err((DcsError::ExternalUnavailable(other.to_string()), hint.cloned())),
        }
    }

    async fn bind(
        &self,
        actor: &Actor,
        entry: &SignerEntry,
        scope: &ContractScope,
    ) -> Result<(dcs_credentials::VerifiedCredential, dcs_credentials::VerifiedCredential), (DcsError, Option<CredentialId>)> {
        let identity = self
            .fetch(entry.credential_hint.as_ref(), &entry.signer_id, CredentialKind::Identity)
            .await?;
        let poa = self
            .fetch(entry.poa_hint.as_ref(), &entry.signer_id, CredentialKind::PowerOfAttorney)
            .await?;

        if identity.subject != entry.signer_id.as_str() || poa.subject != entry.signer_id.as_str() {
            return Err((
                DcsError::CredentialInvalid(format!("credentials are not issued to {}", entry.signer_id)),
                Some(identity.id.clone()),
            ));
        }

        let identity_id = identity.id.clone();
        let identity = self
            .verifier
            .verify_identity(&identity, actor)
            .await
            .map_err(|e| (e, Some(identity_id.clone())))?;
        let identity = fail_closed(identity).map_err(|e| (e, Some(identity_id)))?;

        let poa_id = poa.id.clone();
        let authority = self
            .verifier
            .verify_authority(&poa, scope, actor)
            .await
            .map_err(|e| (e, Some(poa_id.clone())))?;
        let authority = fail_closed(authority).map_err(|e| (e, Some(poa_id)))?;
        Ok((identity, authority))
    }

    /// Apply the signer's signature.
    ///
    /// With `presented` the caller supplies a hex signature over
    /// [`SignatureManager::signing_message`]; otherwise the wallet signs.
    /// Re-applying for an already signed entry changes nothing.
    #[instrument(skip(self, presented), fields(actor = %actor))]
    pub async fn apply_signature(
        &self,
        actor: &Actor,
        session_id: &SessionId,
        signer: &SignerId,
        presented: Option<String>,
    ) -> DcsResult<SigningOutcome> {
        let _guard = self.locks.lock(session_id).await;
        let mut session = self.session(session_id).await?;
        let action = Action::SignatureApply;
        let entry = session.entry(signer).ok_or_else(|| no_signer(&session, signer))?.clone();

        if entry.status == SignerStatus::Signed {
            debug!(session = %session_id, signer = %signer, "signature already applied");
            return Ok(SigningOutcome {
                session,
                signer_id: signer.clone(),
                newly_signed: false,
            });
        }
        if session.status == SessionStatus::Expired {
            let err = DcsError::DeadlineExpired { deadline: session.deadline };
            return Err(self.deny(actor, action, &session, signer, err).await);
        }
        if !session.is_open() {
            let err = DcsError::IllegalTransition(format!("session {} is {:?}", session.id, session.status));
            return Err(self.deny(actor, action, &session, signer, err).await);
        }
        if entry.status != SignerStatus::CredentialsBound {
            let err = DcsError::IllegalTransition(format!(
                "{signer} cannot sign in state {}; credentials must be bound first",
                entry.status
            ));
            return Err(self.deny(actor, action, &session, signer, err).await);
        }
        if session.mode == SequencingMode::Strict {
            let waiting_on: Vec<String> = session
                .unsigned_predecessors(signer)
                .into_iter()
                .map(|s| s.to_string())
                .collect();
            if !waiting_on.is_empty() {
                let err = DcsError::OrderDependencyNotMet {
                    signer: signer.to_string(),
                    waiting_on,
                };
                return Err(self.deny(actor, action, &session, signer, err).await);
            }
        }
        let now = self.ledger.now();
        if session.is_past_deadline(now) {
            let err = DcsError::DeadlineExpired { deadline: session.deadline };
            return Err(self.deny(actor, action, &session, signer, err).await);
        }

        let (Some(identity), Some(authority)) = (entry.identity.clone(), entry.authority.clone()) else {
            let err = DcsError::CredentialInvalid(format!("{signer} has no bound credentials"));
            return Err(self.deny(actor, action, &session, signer, err).await);
        };

        // Revocation may have landed since binding.
        for credential in [&identity.credential_id, &authority.credential_id] {
            match self.verifier.revocation_status(credential).await {
                Ok(RevocationStatus::Good) => {}
                Ok(RevocationStatus::Revoked(r)) => {
                    let err = DcsError::CredentialInvalid(format!("{credential} revoked at {}: {}", r.revoked_at, r.reason));
                    let revision = session.revision;
                    if let Some(e) = session.entry_mut(signer) {
                        e.status = SignerStatus::Blocked;
                        e.blocked = Some(BlockReason {
                            reason: err.to_string(),
                            retriable: false,
                            credential: Some(credential.clone()),
                            at: now,
                        });
                        e.updated_at = now;
                    }
                    let event = AuditEvent::deny(actor, action, session_entity(session_id), err.to_string())
                        .transition(SignerStatus::CredentialsBound, SignerStatus::Blocked)
                        .evidence(serde_json::json!({ "signer": signer, "credential": credential }));
                    self.commit(session, revision, event, actor).await?;
                    return Err(err);
                }
                Err(err) => return Err(self.deny(actor, action, &session, signer, err).await),
            }
        }

        let digest = signing_digest(&session.document_hash, &session.id, signer);
        let signature = match presented {
            Some(sig) => sig,
            None => match bounded(
                self.timeouts.wallet,
                "wallet",
                self.wallet.sign(signer, &identity, digest.as_bytes()),
            )
            .await
            {
                Ok(s) => s.signature,
                Err(err) => return Err(self.deny(actor, action, &session, signer, err).await),
            },
        };
        if let Err(e) = verify_hex(&identity.public_key, digest.as_bytes(), &signature) {
            let err = DcsError::CredentialInvalid(format!("signature does not verify against the bound identity key: {e}"));
            return Err(self.deny(actor, action, &session, signer, err).await);
        }
        let token = match bounded(self.timeouts.timestamp, "timestamp authority", self.timestamps.stamp(&digest)).await {
            Ok(token) => token,
            Err(err) => return Err(self.deny(actor, action, &session, signer, err).await),
        };

        let record = SignatureRecord {
            signature_id: SignatureId::generate(),
            signer_id: signer.clone(),
            document_hash: session.document_hash.clone(),
            digest,
            signature,
            public_key: identity.public_key.clone(),
            identity_credential: identity.credential_id.clone(),
            poa_credential: authority.credential_id.clone(),
            certificate_ref: identity.fingerprint.clone(),
            timestamp: token,
            signed_at: now,
            revocation: None,
        };

        let revision = session.revision;
        let e = session.entry_mut(signer).ok_or_else(|| DcsError::NotFound(signer.to_string()))?;
        e.status = SignerStatus::Signed;
        e.signature = Some(record.clone());
        e.updated_at = now;
        let complete = session.all_signed();
        if complete {
            session.status = SessionStatus::Complete;
            session.completed_at = Some(now);
        }

        let event = AuditEvent::allow(actor, action, session_entity(session_id))
            .transition(SignerStatus::CredentialsBound, SignerStatus::Signed)
            .content_hash(record.document_hash.clone())
            .evidence(serde_json::json!({
                "signer": signer,
                "signature_id": record.signature_id,
                "identity": record.identity_credential,
                "poa": record.poa_credential,
                "certificate_ref": record.certificate_ref,
                "timestamp": record.timestamp.time,
                "session_complete": complete,
            }));
        let stored = self.commit(session, revision, event, actor).await?;
        info!(session = %session_id, signer = %signer, signature = %record.signature_id, complete, "signature applied");
        Ok(SigningOutcome {
            session: stored,
            signer_id: signer.clone(),
            newly_signed: true,
        })
    }

    /// Validate an applied signature against the current document hash.
    ///
    /// A changed document is an `IntegrityViolation`. Otherwise the report
    /// carries crypto, certificate and policy status.
    pub async fn validate_signature(
        &self,
        actor: &Actor,
        session_id: &SessionId,
        signer: &SignerId,
        current_hash: &ContentHash,
    ) -> DcsResult<ValidationReport> {
        let session = self.session(session_id).await?;
        let entry = session.entry(signer).ok_or_else(|| no_signer(&session, signer))?;
        let record = entry
            .signature
            .clone()
            .ok_or_else(|| DcsError::NotFound(format!("signature of {signer} in session {session_id}")))?;
        let action = Action::SignatureValidate;

        if &record.document_hash != current_hash {
            let err = DcsError::IntegrityViolation(format!(
                "document changed after {signer} signed: expected {}, found {}",
                record.document_hash, current_hash
            ));
            return Err(self.deny(actor, action, &session, signer, err).await);
        }

        let now = self.ledger.now();
        let mut findings = Vec::new();
        let expected_digest = signing_digest(&record.document_hash, &session.id, signer);
        let signature_ok = record.digest == expected_digest
            && verify_hex(&record.public_key, record.digest.as_bytes(), &record.signature).is_ok();
        if !signature_ok {
            findings.push("signature does not verify".to_string());
        }
        let token_ok = verify_token(&record.timestamp, &record.digest);
        if !token_ok {
            findings.push("timestamp token does not verify".to_string());
        }
        let crypto_valid = signature_ok && token_ok;

        let certificate_status = self.certificate_status(entry, &record, now, &mut findings).await;
        if let Some(revocation) = &record.revocation {
            findings.push(format!("signature revoked: {}", revocation.reason));
        }
        let policy_compliant = crypto_valid
            && matches!(certificate_status, CertificateStatus::Good | CertificateStatus::Expired { .. })
            && record.revocation.is_none();

        let report = ValidationReport {
            session_id: session.id.clone(),
            signer_id: signer.clone(),
            signature_id: record.signature_id.clone(),
            credential_id: record.identity_credential.clone(),
            signed_at: record.signed_at,
            crypto_valid,
            document_intact: true,
            certificate_status,
            policy_compliant,
            findings,
            validated_at: now,
        };

        let evidence = serde_json::to_value(&report).map_err(|e| DcsError::InvalidInput(e.to_string()))?;
        let event = if report.policy_compliant {
            AuditEvent::allow(actor, action, session_entity(&session.id))
        } else {
            AuditEvent::deny(actor, action, session_entity(&session.id), report.findings.join("; "))
        };
        self.ledger
            .append(event.content_hash(current_hash.clone()).evidence(evidence))
            .await?;
        Ok(report)
    }

    async fn certificate_status(
        &self,
        entry: &SignerEntry,
        record: &SignatureRecord,
        now: DateTime<Utc>,
        findings: &mut Vec<String>,
    ) -> CertificateStatus {
        for credential in [&record.identity_credential, &record.poa_credential] {
            match self.verifier.revocation_status(credential).await {
                Ok(RevocationStatus::Good) => {}
                Ok(RevocationStatus::Revoked(r)) => {
                    findings.push(format!("{credential} revoked at {}", r.revoked_at));
                    return CertificateStatus::Revoked {
                        at: r.revoked_at,
                        reason: r.reason,
                    };
                }
                Err(err) => {
                    findings.push(format!("revocation status of {credential} unknown"));
                    return CertificateStatus::Unknown {
                        reason: err.to_string(),
                    };
                }
            }
        }
        let expiry = [entry.identity.as_ref(), entry.authority.as_ref()]
            .into_iter()
            .flatten()
            .map(|b| b.valid_until)
            .min();
        match expiry {
            Some(until) if until < now => {
                if record.signed_at > until {
                    findings.push("signed after credential expiry".to_string());
                    return CertificateStatus::Unknown {
                        reason: "signed after credential expiry".into(),
                    };
                }
                CertificateStatus::Expired { at: until }
            }
            _ => CertificateStatus::Good,
        }
    }

    /// Applied signatures in `session` that depend on a credential revoked
    /// since. An unknown status is an error, never a clean result.
    pub async fn revoked_signatures(&self, session: &SigningSession) -> DcsResult<Vec<RevokedSignature>> {
        let mut revoked = Vec::new();
        for entry in &session.entries {
            let Some(record) = &entry.signature else {
                continue;
            };
            for credential in [&record.identity_credential, &record.poa_credential] {
                if let RevocationStatus::Revoked(revocation) = self.verifier.revocation_status(credential).await? {
                    revoked.push(RevokedSignature {
                        signer_id: entry.signer_id.clone(),
                        signature_id: record.signature_id.clone(),
                        credential: credential.clone(),
                        revocation,
                    });
                }
            }
        }
        if !revoked.is_empty() {
            debug!(session = %session.id, revoked = revoked.len(), "signatures depend on revoked credentials");
        }
        Ok(revoked)
    }

    /// Block every entry referencing a revoked credential.
    ///
    /// Open sessions get their entries moved to `Blocked`, signed ones
    /// included. Completed sessions are left as they are and reported so
    /// the contract can be flagged.
    pub async fn block_credential(
        &self,
        actor: &Actor,
        session_id: &SessionId,
        credential: &CredentialId,
        revocation: &Revocation,
    ) -> DcsResult<RevocationImpact> {
        let _guard = self.locks.lock(session_id).await;
        let mut session = self.session(session_id).await?;
        let now = self.ledger.now();
        let mut impact = RevocationImpact {
            session_id: session.id.clone(),
            contract_id: session.contract_id.clone(),
            purpose: session.purpose,
            session_status: session.status,
            blocked_signers: Vec::new(),
            completed_signatures: Vec::new(),
        };

        match session.status {
            SessionStatus::Open => {
                let reason = format!("credential {credential} revoked: {}", revocation.reason);
                for e in session.entries.iter_mut().filter(|e| e.references(credential)) {
                    if e.status == SignerStatus::Blocked || !e.status.can_transition_to(SignerStatus::Blocked) {
                        continue;
                    }
                    e.status = SignerStatus::Blocked;
                    e.blocked = Some(BlockReason {
                        reason: reason.clone(),
                        retriable: false,
                        credential: Some(credential.clone()),
                        at: now,
                    });
                    e.updated_at = now;
                    impact.blocked_signers.push(e.signer_id.clone());
                }
                if impact.blocked_signers.is_empty() {
                    return Ok(impact);
                }
                let revision = session.revision;
                let event = AuditEvent::allow(actor, Action::RevocationApply, session_entity(&session.id))
                    .reason(reason)
                    .evidence(serde_json::json!({
                        "credential": credential,
                        "blocked": impact.blocked_signers,
                    }));
                self.commit(session, revision, event, actor).await?;
                warn!(session = %session_id, credential = %credential, blocked = impact.blocked_signers.len(), "signers blocked by revocation");
            }
            SessionStatus::Complete => {
                for e in &session.entries {
                    if let Some(sig) = &e.signature {
                        if &sig.identity_credential == credential || &sig.poa_credential == credential {
                            impact
                                .completed_signatures
                                .push((e.signer_id.clone(), sig.signature_id.clone()));
                        }
                    }
                }
            }
            SessionStatus::Expired => {}
        }
        Ok(impact)
    }

    /// Withdraw an applied signature. The entry stays signed; the record
    /// carries the withdrawal.
    pub async fn revoke_signature(
        &self,
        actor: &Actor,
        session_id: &SessionId,
        signer: &SignerId,
        reason: &str,
    ) -> DcsResult<SignatureRecord> {
        let _guard = self.locks.lock(session_id).await;
        let mut session = self.session(session_id).await?;
        let now = self.ledger.now();
        let revision = session.revision;
        let entry = session.entry_mut(signer).ok_or_else(|| DcsError::NotFound(format!("signer {signer}")))?;
        let Some(record) = entry.signature.as_mut() else {
            return Err(DcsError::NotFound(format!("signature of {signer} in session {session_id}")));
        };
        if record.revocation.is_some() {
            return Ok(record.clone());
        }
        record.revocation = Some(SignatureRevocation {
            reason: reason.to_string(),
            by: actor.id.clone(),
            at: now,
        });
        let record = record.clone();
        let event = AuditEvent::allow(actor, Action::SignatureRevoke, session_entity(session_id))
            .reason(reason)
            .evidence(serde_json::json!({ "signer": signer, "signature_id": record.signature_id }));
        self.commit(session, revision, event, actor).await?;
        warn!(session = %session_id, signer = %signer, "signature revoked");
        Ok(record)
    }

    /// Close an open session whose deadline has passed.
    pub async fn expire_session(&self, actor: &Actor, session_id: &SessionId) -> DcsResult<Option<SigningSession>> {
        let _guard = self.locks.lock(session_id).await;
        let mut session = self.session(session_id).await?;
        let now = self.ledger.now();
        if !session.is_open() || !session.is_past_deadline(now) {
            return Ok(None);
        }
        let revision = session.revision;
        session.status = SessionStatus::Expired;
        let unsigned: Vec<SignerId> = session
            .entries
            .iter()
            .filter(|e| e.status != SignerStatus::Signed)
            .map(|e| e.signer_id.clone())
            .collect();
        let event = AuditEvent::allow(actor, Action::SigningExpire, session_entity(session_id))
            .transition("open", "expired")
            .reason(format!("deadline {} passed", session.deadline))
            .evidence(serde_json::json!({ "unsigned": unsigned }));
        let stored = self.commit(session, revision, event, actor).await?;
        info!(session = %session_id, "signing session expired");
        Ok(Some(stored))
    }
}

fn fail_closed(outcome: Verification) -> DcsResult<dcs_credentials::VerifiedCredential> {
    match outcome {
        Verification::Unknown { reason } => Err(DcsError::ExternalUnavailable(format!("credential status unknown: {reason}"))),
        other => other.into_result(),
    }
}
