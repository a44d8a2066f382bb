use crate::error::{verify_hex, CredentialError};
use dcs_types::IssuerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Longest issuer chain walked before giving up.
pub const MAX_CHAIN_DEPTH: usize = 8;

/// A statement by `endorsed_by` that `issuer` holds `public_key`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endorsement {
    pub issuer: IssuerId,
    pub public_key: String,
    pub endorsed_by: IssuerId,
    pub signature: String,
}

impl Endorsement {
    pub fn signing_payload(issuer: &IssuerId, public_key: &str) -> Vec<u8> {
        format!("dcs-endorsement:{}:{}", issuer, public_key).into_bytes()
    }
}

#[derive(Default)]
struct TrustTables {
    roots: HashMap<IssuerId, String>,
    endorsements: HashMap<IssuerId, Endorsement>,
}

/// Trusted root issuers and the endorsements that extend trust below them.
#[derive(Default)]
pub struct TrustStore {
    tables: RwLock<TrustTables>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(&self, issuer: IssuerId, public_key: impl Into<String>) {
        if let Ok(mut t) = self.tables.write() {
            t.roots.insert(issuer, public_key.into());
        }
    }

    pub fn add_endorsement(&self, endorsement: Endorsement) {
        if let Ok(mut t) = self.tables.write() {
            t.endorsements.insert(endorsement.issuer.clone(), endorsement);
        }
    }

    /// Withdraw trust from an issuer, root or endorsed.
    pub fn remove_issuer(&self, issuer: &IssuerId) -> bool {
        match self.tables.write() {
            Ok(mut t) => t.roots.remove(issuer).is_some() | t.endorsements.remove(issuer).is_some(),
            Err(_) => false,
        }
    }

    /// Walk from `issuer` up to a root, verifying each endorsement.
    ///
    /// Returns the issuer's key and the chain from the issuer to the root.
    pub fn resolve(&self, issuer: &IssuerId) -> Result<(String, Vec<IssuerId>), String> {
        let tables = self
            .tables
            .read()
            .map_err(|_| "trust store lock poisoned".to_string())?;

        let mut chain = vec![issuer.clone()];
        let mut links: Vec<&Endorsement> = Vec::new();
        let mut current = issuer.clone();
        let root_key = loop {
            if let Some(key) = tables.roots.get(&current) {
                break key.clone();
            }
            if chain.len() > MAX_CHAIN_DEPTH {
                return Err(format!("issuer chain of {issuer} exceeds depth {MAX_CHAIN_DEPTH}"));
            }
            let endorsement = tables
                .endorsements
                .get(&current)
                .ok_or_else(|| format!("issuer {current} is not trusted"))?;
            if chain.contains(&endorsement.endorsed_by) {
                return Err(format!("issuer chain of {issuer} is cyclic"));
            }
            links.push(endorsement);
            current = endorsement.endorsed_by.clone();
            chain.push(current.clone());
        };

        // Verify top-down so each endorser's key is established before use.
        let mut endorser_key = root_key;
        for link in links.iter().rev() {
            verify_hex(
                &endorser_key,
                &Endorsement::signing_payload(&link.issuer, &link.public_key),
                &link.signature,
            )
            .map_err(|e: CredentialError| {
                format!("endorsement of {} by {} invalid: {e}", link.issuer, link.endorsed_by)
            })?;
            endorser_key = link.public_key.clone();
        }
        Ok((endorser_key, chain))
    }
}
