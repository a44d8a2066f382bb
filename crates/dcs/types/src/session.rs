//! Signing sessions and the per-signer entry state machine.

use crate::hash::ContentHash;
use crate::ids::{ActorId, ContractId, CredentialId, IssuerId, SessionId, SignatureId, SignerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencingMode {
    /// Signers may sign in any order.
    Parallel,
    /// A signer may sign only after every lower-ordered signer has signed.
    Strict,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPurpose {
    Initial,
    /// Opened after a credential behind a completed signature was revoked.
    Resign,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Complete,
    Expired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerStatus {
    Pending,
    CredentialsRequested,
    CredentialsBound,
    Signed,
    Blocked,
}

impl SignerStatus {
    /// Allowed entry transitions.
    ///
    /// `Blocked -> CredentialsRequested` is the retry path for retriable
    /// blocks. `Signed -> Blocked` happens only while the session is still
    /// open, when the credential behind the signature is revoked.
    pub fn can_transition_to(self, next: SignerStatus) -> bool {
        use SignerStatus::*;
        matches!(
            (self, next),
            (Pending, CredentialsRequested)
                | (Pending, Blocked)
                | (CredentialsRequested, CredentialsBound)
                | (CredentialsRequested, Blocked)
                | (CredentialsBound, Signed)
                | (CredentialsBound, Blocked)
                | (Signed, Blocked)
                | (Blocked, CredentialsRequested)
        )
    }
}

impl std::fmt::Display for SignerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignerStatus::Pending => "pending",
            SignerStatus::CredentialsRequested => "credentials_requested",
            SignerStatus::CredentialsBound => "credentials_bound",
            SignerStatus::Signed => "signed",
            SignerStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// A required signer as named by the caller of `initiate_signing`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerSpec {
    pub signer_id: SignerId,
    /// Organization the signer binds; the PoA scope must cover it.
    pub organization: String,
    #[serde(default)]
    pub credential_hint: Option<CredentialId>,
    #[serde(default)]
    pub poa_hint: Option<CredentialId>,
}

impl SignerSpec {
    pub fn new(signer_id: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            signer_id: SignerId::new(signer_id),
            organization: organization.into(),
            credential_hint: None,
            poa_hint: None,
        }
    }

    pub fn with_credentials(mut self, identity: CredentialId, poa: CredentialId) -> Self {
        self.credential_hint = Some(identity);
        self.poa_hint = Some(poa);
        self
    }
}

/// The verification fingerprint of a credential; the credential itself is
/// never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBinding {
    pub credential_id: CredentialId,
    pub fingerprint: String,
    pub issuer: IssuerId,
    pub subject: String,
    /// Hex-encoded ed25519 verifying key of the subject.
    pub public_key: String,
    pub valid_until: DateTime<Utc>,
    pub verified_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReason {
    pub reason: String,
    /// Whether `request_credentials` may be attempted again.
    pub retriable: bool,
    pub credential: Option<CredentialId>,
    pub at: DateTime<Utc>,
}

/// A signed statement from the timestamp authority over a signature digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampToken {
    pub time: DateTime<Utc>,
    pub digest: String,
    pub authority: String,
    pub authority_key: String,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRevocation {
    pub reason: String,
    pub by: ActorId,
    pub at: DateTime<Utc>,
}

/// Stored metadata of an applied signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub signature_id: SignatureId,
    pub signer_id: SignerId,
    /// Document hash captured at signing time.
    pub document_hash: ContentHash,
    /// Hex digest that was actually signed.
    pub digest: String,
    pub signature: String,
    pub public_key: String,
    pub identity_credential: CredentialId,
    pub poa_credential: CredentialId,
    pub certificate_ref: String,
    pub timestamp: TimestampToken,
    pub signed_at: DateTime<Utc>,
    pub revocation: Option<SignatureRevocation>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerEntry {
    pub order: u32,
    pub signer_id: SignerId,
    pub organization: String,
    pub credential_hint: Option<CredentialId>,
    pub poa_hint: Option<CredentialId>,
    pub status: SignerStatus,
    pub identity: Option<CredentialBinding>,
    pub authority: Option<CredentialBinding>,
    pub signature: Option<SignatureRecord>,
    pub blocked: Option<BlockReason>,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl SignerEntry {
    pub fn references(&self, credential: &CredentialId) -> bool {
        let bound = |b: &Option<CredentialBinding>| {
            b.as_ref().is_some_and(|b| &b.credential_id == credential)
        };
        bound(&self.identity)
            || bound(&self.authority)
            || self.credential_hint.as_ref() == Some(credential)
            || self.poa_hint.as_ref() == Some(credential)
    }

    pub fn credential_ids(&self) -> Vec<CredentialId> {
        let mut ids: Vec<CredentialId> = [
            self.identity.as_ref().map(|b| b.credential_id.clone()),
            self.authority.as_ref().map(|b| b.credential_id.clone()),
            self.credential_hint.clone(),
            self.poa_hint.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// The bounded process coordinating signers of one contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningSession {
    pub id: SessionId,
    pub contract_id: ContractId,
    pub purpose: SessionPurpose,
    pub mode: SequencingMode,
    pub deadline: DateTime<Utc>,
    pub status: SessionStatus,
    pub entries: Vec<SignerEntry>,
    /// Content hash of the contract version being signed.
    pub document_hash: ContentHash,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub revision: u64,
}

impl SigningSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        contract_id: ContractId,
        purpose: SessionPurpose,
        mode: SequencingMode,
        deadline: DateTime<Utc>,
        signers: Vec<SignerSpec>,
        document_hash: ContentHash,
        now: DateTime<Utc>,
    ) -> Self {
        let entries = signers
            .into_iter()
            .enumerate()
            .map(|(i, spec)| SignerEntry {
                order: i as u32,
                signer_id: spec.signer_id,
                organization: spec.organization,
                credential_hint: spec.credential_hint,
                poa_hint: spec.poa_hint,
                status: SignerStatus::Pending,
                identity: None,
                authority: None,
                signature: None,
                blocked: None,
                attempts: 0,
                updated_at: now,
            })
            .collect();
        Self {
            id,
            contract_id,
            purpose,
            mode,
            deadline,
            status: SessionStatus::Open,
            entries,
            document_hash,
            created_at: now,
            completed_at: None,
            revision: 0,
        }
    }

    pub fn entry(&self, signer: &SignerId) -> Option<&SignerEntry> {
        self.entries.iter().find(|e| &e.signer_id == signer)
    }

    pub fn entry_mut(&mut self, signer: &SignerId) -> Option<&mut SignerEntry> {
        self.entries.iter_mut().find(|e| &e.signer_id == signer)
    }

    /// Lower-ordered signers that have not signed yet.
    pub fn unsigned_predecessors(&self, signer: &SignerId) -> Vec<SignerId> {
        let Some(order) = self.entry(signer).map(|e| e.order) else {
            return Vec::new();
        };
        self.entries
            .iter()
            .filter(|e| e.order < order && e.status != SignerStatus::Signed)
            .map(|e| e.signer_id.clone())
            .collect()
    }

    pub fn all_signed(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|e| e.status == SignerStatus::Signed)
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    pub fn references(&self, credential: &CredentialId) -> bool {
        self.entries.iter().any(|e| e.references(credential))
    }

    pub fn credential_ids(&self) -> Vec<CredentialId> {
        let mut ids: Vec<CredentialId> =
            self.entries.iter().flat_map(|e| e.credential_ids()).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
