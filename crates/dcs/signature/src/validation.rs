use chrono::{DateTime, Utc};
use dcs_types::{CredentialId, SessionId, SignatureId, SignerId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CertificateStatus {
    Good,
    Expired { at: DateTime<Utc> },
    Revoked { at: DateTime<Utc>, reason: String },
    Unknown { reason: String },
}

/// Outcome of validating one applied signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub session_id: SessionId,
    pub signer_id: SignerId,
    pub signature_id: SignatureId,
    pub credential_id: CredentialId,
    pub signed_at: DateTime<Utc>,
    /// Signature and timestamp token verify over the recorded digest.
    pub crypto_valid: bool,
    /// The document hash still matches the one captured at signing.
    pub document_intact: bool,
    pub certificate_status: CertificateStatus,
    /// Usable as evidence: crypto-valid, intact, credentials good and the
    /// signature not withdrawn.
    pub policy_compliant: bool,
    pub findings: Vec<String>,
    pub validated_at: DateTime<Utc>,
}
