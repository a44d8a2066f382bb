use crate::credential::{Credential, CredentialKind};
use async_trait::async_trait;
use dcs_types::{CredentialId, DcsError, DcsResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// Supplies verifiable credentials on demand.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self, id: &CredentialId) -> DcsResult<Option<Credential>>;

    /// The most recently issued credential of `kind` for `subject`.
    async fn current_for(&self, subject: &str, kind: CredentialKind) -> DcsResult<Option<Credential>>;
}

#[derive(Default)]
pub struct InMemoryCredentialSource {
    credentials: RwLock<HashMap<CredentialId, Credential>>,
    latest: RwLock<HashMap<(String, CredentialKind), CredentialId>>,
}

impl InMemoryCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, credential: Credential) -> DcsResult<()> {
        let key = (credential.subject.clone(), credential.kind);
        let id = credential.id.clone();
        self.credentials
            .write()
            .map_err(|_| DcsError::StorageUnavailable("credentials lock poisoned".into()))?
            .insert(id.clone(), credential);
        self.latest
            .write()
            .map_err(|_| DcsError::StorageUnavailable("credentials lock poisoned".into()))?
            .insert(key, id);
        Ok(())
    }
}

#[async_trait]
impl CredentialSource for InMemoryCredentialSource {
    async fn fetch(&self, id: &CredentialId) -> DcsResult<Option<Credential>> {
        let guard = self
            .credentials
            .read()
            .map_err(|_| DcsError::StorageUnavailable("credentials lock poisoned".into()))?;
        Ok(guard.get(id).cloned())
    }

    async fn current_for(&self, subject: &str, kind: CredentialKind) -> DcsResult<Option<Credential>> {
        let id = {
            let latest = self
                .latest
                .read()
                .map_err(|_| DcsError::StorageUnavailable("credentials lock poisoned".into()))?;
            latest.get(&(subject.to_string(), kind)).cloned()
        };
        match id {
            Some(id) => self.fetch(&id).await,
            None => Ok(None),
        }
    }
}
