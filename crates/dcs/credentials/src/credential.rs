use crate::error::CredentialError;
use chrono::{DateTime, Utc};
use dcs_types::{ContractId, CredentialId, IssuerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Identity,
    /// Proof of authority to bind an organization.
    PowerOfAttorney,
}

/// What a PoA may bind. An empty contract set covers every contract of the
/// listed organizations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialScope {
    #[serde(default)]
    pub organizations: BTreeSet<String>,
    #[serde(default)]
    pub contracts: BTreeSet<ContractId>,
}

impl CredentialScope {
    pub fn organization(org: impl Into<String>) -> Self {
        Self {
            organizations: [org.into()].into_iter().collect(),
            contracts: BTreeSet::new(),
        }
    }

    pub fn restricted_to(mut self, contract: ContractId) -> Self {
        self.contracts.insert(contract);
        self
    }

    pub fn covers(&self, organization: &str, contract: &ContractId) -> bool {
        self.organizations.contains(organization)
            && (self.contracts.is_empty() || self.contracts.contains(contract))
    }
}

/// An externally issued credential as presented for verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub kind: CredentialKind,
    pub issuer: IssuerId,
    pub subject: String,
    #[serde(default)]
    pub scope: CredentialScope,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// Hex ed25519 verifying key of the subject.
    pub public_key: String,
    /// Hex ed25519 signature of the issuer over [`Credential::signing_payload`].
    pub issuer_signature: String,
}

impl Credential {
    /// Canonical bytes covered by the issuer signature.
    pub fn signing_payload(&self) -> Result<Vec<u8>, CredentialError> {
        serde_json::to_vec(&serde_json::json!({
            "id": self.id,
            "kind": self.kind,
            "issuer": self.issuer,
            "subject": self.subject,
            "scope": self.scope,
            "valid_from": self.valid_from,
            "valid_until": self.valid_until,
            "public_key": self.public_key,
        }))
        .map_err(|e| CredentialError::Serialization(e.to_string()))
    }

    /// Verification fingerprint; the only form in which a credential is kept.
    pub fn fingerprint(&self) -> Result<String, CredentialError> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.signing_payload()?);
        hasher.update(self.issuer_signature.as_bytes());
        Ok(hasher.finalize().to_hex().to_string())
    }

    pub fn is_within_validity(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at <= self.valid_until
    }
}
