//! Issuers and subjects for tests.

use crate::credential::{Credential, CredentialKind, CredentialScope};
use crate::trust::{Endorsement, TrustStore};
use chrono::{DateTime, Duration, Utc};
use dcs_types::{CredentialId, IssuerId};
use ed25519_dalek::{Signer, SigningKey};
use std::sync::atomic::{AtomicU64, Ordering};

fn fresh_key() -> SigningKey {
    SigningKey::from_bytes(&rand::random::<[u8; 32]>())
}

/// A credential subject holding its own signing key.
pub struct TestSubject {
    pub name: String,
    key: SigningKey,
}

impl TestSubject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: fresh_key(),
        }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }
}

pub struct TestIssuer {
    pub id: IssuerId,
    key: SigningKey,
    issued: AtomicU64,
}

impl TestIssuer {
    /// Not registered in any trust store.
    pub fn untrusted(id: impl Into<String>) -> Self {
        Self {
            id: IssuerId::new(id),
            key: fresh_key(),
            issued: AtomicU64::new(0),
        }
    }

    /// Registered as a trusted root.
    pub fn root(id: impl Into<String>, trust: &TrustStore) -> Self {
        let issuer = Self::untrusted(id);
        trust.add_root(issuer.id.clone(), issuer.public_key_hex());
        issuer
    }

    /// A child issuer endorsed by this one.
    pub fn endorse(&self, child: impl Into<String>, trust: &TrustStore) -> TestIssuer {
        let child = Self::untrusted(child);
        let public_key = child.public_key_hex();
        let payload = Endorsement::signing_payload(&child.id, &public_key);
        trust.add_endorsement(Endorsement {
            issuer: child.id.clone(),
            public_key,
            endorsed_by: self.id.clone(),
            signature: hex::encode(self.key.sign(&payload).to_bytes()),
        });
        child
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    pub fn issue(
        &self,
        kind: CredentialKind,
        subject: &TestSubject,
        scope: CredentialScope,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Credential {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let label = match kind {
            CredentialKind::Identity => "identity",
            CredentialKind::PowerOfAttorney => "poa",
        };
        let mut credential = Credential {
            id: CredentialId::new(format!("{}/{}/{}/{}", self.id, subject.name, label, n)),
            kind,
            issuer: self.id.clone(),
            subject: subject.name.clone(),
            scope,
            valid_from,
            valid_until,
            public_key: subject.public_key_hex(),
            issuer_signature: String::new(),
        };
        let payload = credential.signing_payload().unwrap_or_default();
        credential.issuer_signature = hex::encode(self.key.sign(&payload).to_bytes());
        credential
    }

    /// Identity valid from a day before `now` for a year.
    pub fn identity(&self, subject: &TestSubject, now: DateTime<Utc>) -> Credential {
        self.issue(
            CredentialKind::Identity,
            subject,
            CredentialScope::default(),
            now - Duration::days(1),
            now + Duration::days(365),
        )
    }

    pub fn poa(&self, subject: &TestSubject, scope: CredentialScope, now: DateTime<Utc>) -> Credential {
        self.issue(
            CredentialKind::PowerOfAttorney,
            subject,
            scope,
            now - Duration::days(1),
            now + Duration::days(365),
        )
    }
}
