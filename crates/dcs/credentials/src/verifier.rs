use crate::credential::{Credential, CredentialKind};
use crate::error::verify_hex;
use crate::registry::{RevocationRegistry, RevocationStatus};
use crate::trust::TrustStore;
use chrono::{DateTime, Utc};
use dcs_ledger::{AuditEvent, AuditLedger};
use dcs_types::{Action, Actor, ContractId, CredentialBinding, CredentialId, DcsError, DcsResult, EntityRef, IssuerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The contract and organization a PoA must cover.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractScope {
    pub contract_id: ContractId,
    pub organization: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    WrongKind,
    UntrustedIssuer,
    BadSignature,
    NotYetValid,
    Expired,
    Revoked,
    ScopeMismatch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub detail: String,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            RejectionKind::ScopeMismatch => write!(f, "ScopeMismatch: {}", self.detail),
            _ => f.write_str(&self.detail),
        }
    }
}

/// A credential that passed every check, reduced to its fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedCredential {
    pub credential_id: CredentialId,
    pub kind: CredentialKind,
    pub fingerprint: String,
    pub issuer: IssuerId,
    pub subject: String,
    pub public_key: String,
    pub valid_until: DateTime<Utc>,
    pub chain: Vec<IssuerId>,
    pub verified_at: DateTime<Utc>,
}

impl VerifiedCredential {
    pub fn binding(&self) -> CredentialBinding {
        CredentialBinding {
            credential_id: self.credential_id.clone(),
            fingerprint: self.fingerprint.clone(),
            issuer: self.issuer.clone(),
            subject: self.subject.clone(),
            public_key: self.public_key.clone(),
            valid_until: self.valid_until,
            verified_at: self.verified_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Verification {
    Valid(VerifiedCredential),
    Invalid(Rejection),
    /// The answer could not be determined. Treated as invalid.
    Unknown { reason: String },
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid(_))
    }

    /// Fail closed: anything but `Valid` becomes an error.
    pub fn into_result(self) -> DcsResult<VerifiedCredential> {
        match self {
            Verification::Valid(v) => Ok(v),
            Verification::Invalid(r) if r.kind == RejectionKind::ScopeMismatch => {
                Err(DcsError::ScopeMismatch(r.detail))
            }
            Verification::Invalid(r) => Err(DcsError::CredentialInvalid(r.to_string())),
            Verification::Unknown { reason } => {
                Err(DcsError::CredentialInvalid(format!("status unknown: {reason}")))
            }
        }
    }
}

/// Stateless per call; the only side effect is one audit entry per attempt.
pub struct CredentialVerifier {
    trust: Arc<TrustStore>,
    registry: Arc<dyn RevocationRegistry>,
    ledger: Arc<AuditLedger>,
    timeout: Duration,
}

impl CredentialVerifier {
    pub fn new(
        trust: Arc<TrustStore>,
        registry: Arc<dyn RevocationRegistry>,
        ledger: Arc<AuditLedger>,
        timeout: Duration,
    ) -> Self {
        Self {
            trust,
            registry,
            ledger,
            timeout,
        }
    }

    pub fn registry(&self) -> &Arc<dyn RevocationRegistry> {
        &self.registry
    }

    pub async fn verify_identity(&self, credential: &Credential, actor: &Actor) -> DcsResult<Verification> {
        let outcome = self.evaluate(credential, CredentialKind::Identity, None).await;
        self.record(credential, actor, &outcome, None).await?;
        Ok(outcome)
    }

    pub async fn verify_authority(
        &self,
        poa: &Credential,
        scope: &ContractScope,
        actor: &Actor,
    ) -> DcsResult<Verification> {
        let outcome = self
            .evaluate(poa, CredentialKind::PowerOfAttorney, Some(scope))
            .await;
        self.record(poa, actor, &outcome, Some(scope)).await?;
        Ok(outcome)
    }

    /// Current revocation status, bounded by the verification timeout.
    pub async fn revocation_status(&self, credential: &CredentialId) -> DcsResult<RevocationStatus> {
        match tokio::time::timeout(self.timeout, self.registry.status(credential)).await {
            Ok(result) => result,
            Err(_) => Err(DcsError::ExternalUnavailable(format!(
                "revocation registry timed out for {credential}"
            ))),
        }
    }

    async fn evaluate(
        &self,
        credential: &Credential,
        expected: CredentialKind,
        scope: Option<&ContractScope>,
    ) -> Verification {
        let reject = |kind, detail: String| Verification::Invalid(Rejection { kind, detail });

        if credential.kind != expected {
            return reject(
                RejectionKind::WrongKind,
                format!("expected {expected:?} credential, got {:?}", credential.kind),
            );
        }

        let (issuer_key, chain) = match self.trust.resolve(&credential.issuer) {
            Ok(resolved) => resolved,
            Err(reason) => return reject(RejectionKind::UntrustedIssuer, reason),
        };

        let payload = match credential.signing_payload() {
            Ok(p) => p,
            Err(e) => return reject(RejectionKind::BadSignature, e.to_string()),
        };
        if let Err(e) = verify_hex(&issuer_key, &payload, &credential.issuer_signature) {
            return reject(
                RejectionKind::BadSignature,
                format!("issuer signature invalid: {e}"),
            );
        }

        let now = self.ledger.now();
        if now < credential.valid_from {
            return reject(
                RejectionKind::NotYetValid,
                format!("valid from {}", credential.valid_from),
            );
        }
        if now > credential.valid_until {
            return reject(
                RejectionKind::Expired,
                format!("expired at {}", credential.valid_until),
            );
        }

        match self.revocation_status(&credential.id).await {
            Ok(RevocationStatus::Good) => {}
            Ok(RevocationStatus::Revoked(r)) => {
                return reject(
                    RejectionKind::Revoked,
                    format!("revoked at {}: {}", r.revoked_at, r.reason),
                )
            }
            Err(err) => {
                return Verification::Unknown {
                    reason: err.to_string(),
                }
            }
        }

        if let Some(scope) = scope {
            if !credential.scope.covers(&scope.organization, &scope.contract_id) {
                return reject(
                    RejectionKind::ScopeMismatch,
                    format!(
                        "{} does not cover {} for {}",
                        credential.id, scope.organization, scope.contract_id
                    ),
                );
            }
        }

        let fingerprint = match credential.fingerprint() {
            Ok(f) => f,
            Err(e) => return reject(RejectionKind::BadSignature, e.to_string()),
        };
        Verification::Valid(VerifiedCredential {
            credential_id: credential.id.clone(),
            kind: credential.kind,
            fingerprint,
            issuer: credential.issuer.clone(),
            subject: credential.subject.clone(),
            public_key: credential.public_key.clone(),
            valid_until: credential.valid_until,
            chain,
            verified_at: now,
        })
    }

    async fn record(
        &self,
        credential: &Credential,
        actor: &Actor,
        outcome: &Verification,
        scope: Option<&ContractScope>,
    ) -> DcsResult<()> {
        let entity = EntityRef::Credential(credential.id.clone());
        let evidence = serde_json::json!({
            "kind": credential.kind,
            "issuer": credential.issuer,
            "subject": credential.subject,
            "scope": scope,
        });
        let event = match outcome {
            Verification::Valid(v) => {
                debug!(credential = %credential.id, "credential verified");
                AuditEvent::allow(actor, Action::CredentialVerify, entity)
                    .reason("valid")
                    .evidence(serde_json::json!({ "fingerprint": v.fingerprint, "attempt": evidence }))
            }
            Verification::Invalid(r) => {
                warn!(credential = %credential.id, reason = %r, "credential rejected");
                AuditEvent::deny(actor, Action::CredentialVerify, entity, r.to_string())
                    .evidence(evidence)
            }
            Verification::Unknown { reason } => {
                warn!(credential = %credential.id, reason = %reason, "credential status unknown");
                AuditEvent::deny(actor, Action::CredentialVerify, entity, format!("unknown: {reason}"))
                    .evidence(evidence)
            }
        };
        self.ledger.append(event).await?;
        Ok(())
    }
}
