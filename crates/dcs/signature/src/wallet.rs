use async_trait::async_trait;
use dcs_types::{CredentialBinding, DcsError, DcsResult, SignerId};
use ed25519_dalek::{Signer, SigningKey};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSignature {
    pub signature: String,
    pub public_key: String,
}

/// Holds signer keys and produces signatures on their behalf.
#[async_trait]
pub trait SigningWallet: Send + Sync {
    async fn sign(&self, signer: &SignerId, binding: &CredentialBinding, message: &[u8]) -> DcsResult<WalletSignature>;
}

/// Keys held in process, keyed by signer.
#[derive(Default)]
pub struct LocalWallet {
    keys: RwLock<HashMap<SignerId, SigningKey>>,
}

impl LocalWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, signer: SignerId, key: SigningKey) -> DcsResult<()> {
        self.keys
            .write()
            .map_err(|_| DcsError::StorageUnavailable("wallet lock poisoned".into()))?
            .insert(signer, key);
        Ok(())
    }
}

#[async_trait]
impl SigningWallet for LocalWallet {
    async fn sign(&self, signer: &SignerId, binding: &CredentialBinding, message: &[u8]) -> DcsResult<WalletSignature> {
        let key = {
            let keys = self
                .keys
                .read()
                .map_err(|_| DcsError::StorageUnavailable("wallet lock poisoned".into()))?;
            keys.get(signer)
                .cloned()
                .ok_or_else(|| DcsError::ExternalUnavailable(format!("wallet holds no key for {signer}")))?
        };
        let public_key = hex::encode(key.verifying_key().to_bytes());
        if public_key != binding.public_key {
            return Err(DcsError::CredentialInvalid(format!(
                "wallet key for {signer} does not match the bound identity"
            )));
        }
        Ok(WalletSignature {
            signature: hex::encode(key.sign(message).to_bytes()),
            public_key,
        })
    }
}
