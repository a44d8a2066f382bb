use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dcs_types::{Clock, CredentialId, DcsError, DcsResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Upper bound on revocation-status staleness.
pub const MAX_REVOCATION_TTL: std::time::Duration = std::time::Duration::from_secs(5);

const MAX_CACHED_STATUSES: usize = 50_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub revoked_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RevocationStatus {
    Good,
    Revoked(Revocation),
}

impl RevocationStatus {
    pub fn is_revoked(&self) -> bool {
        matches!(self, RevocationStatus::Revoked(_))
    }

    /// Whether a credential with this status was usable at `at`.
    pub fn was_good_at(&self, at: DateTime<Utc>) -> bool {
        match self {
            RevocationStatus::Good => true,
            RevocationStatus::Revoked(r) => at < r.revoked_at,
        }
    }
}

/// Current revocation status of credentials.
#[async_trait]
pub trait RevocationRegistry: Send + Sync {
    async fn status(&self, credential: &CredentialId) -> DcsResult<RevocationStatus>;
}

/// Registry held in process; also the target of administrative revocations.
#[derive(Default)]
pub struct InMemoryRevocationRegistry {
    revoked: RwLock<HashMap<CredentialId, Revocation>>,
}

impl InMemoryRevocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revoke(&self, credential: CredentialId, revocation: Revocation) -> DcsResult<()> {
        let mut guard = self
            .revoked
            .write()
            .map_err(|_| DcsError::StorageUnavailable("revocations lock poisoned".into()))?;
        guard.entry(credential).or_insert(revocation);
        Ok(())
    }
}

#[async_trait]
impl RevocationRegistry for InMemoryRevocationRegistry {
    async fn status(&self, credential: &CredentialId) -> DcsResult<RevocationStatus> {
        let guard = self
            .revoked
            .read()
            .map_err(|_| DcsError::StorageUnavailable("revocations lock poisoned".into()))?;
        Ok(match guard.get(credential) {
            Some(r) => RevocationStatus::Revoked(r.clone()),
            None => RevocationStatus::Good,
        })
    }
}

/// Read-mostly cache in front of a slower registry.
///
/// `Good` answers are reused for at most [`MAX_REVOCATION_TTL`]. A pushed
/// revocation recorded with [`CachedRevocationRegistry::mark_revoked`] wins
/// over any cached answer and never expires.
pub struct CachedRevocationRegistry {
    inner: Arc<dyn RevocationRegistry>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cache: RwLock<HashMap<CredentialId, (RevocationStatus, DateTime<Utc>)>>,
    tombstones: RwLock<HashMap<CredentialId, Revocation>>,
}

impl CachedRevocationRegistry {
    pub fn new(inner: Arc<dyn RevocationRegistry>, clock: Arc<dyn Clock>, ttl: std::time::Duration) -> Self {
        let ttl = ttl.min(MAX_REVOCATION_TTL);
        Self {
            inner,
            clock,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::zero()),
            cache: RwLock::new(HashMap::new()),
            tombstones: RwLock::new(HashMap::new()),
        }
    }

    pub fn mark_revoked(&self, credential: CredentialId, revocation: Revocation) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&credential);
        }
        if let Ok(mut tombs) = self.tombstones.write() {
            tombs.entry(credential).or_insert(revocation);
        }
    }

    pub fn invalidate(&self, credential: &CredentialId) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(credential);
        }
    }
}

#[async_trait]
impl RevocationRegistry for CachedRevocationRegistry {
    async fn status(&self, credential: &CredentialId) -> DcsResult<RevocationStatus> {
        if let Ok(tombs) = self.tombstones.read() {
            if let Some(r) = tombs.get(credential) {
                return Ok(RevocationStatus::Revoked(r.clone()));
            }
        }
        let now = self.clock.now();
        if let Ok(cache) = self.cache.read() {
            if let Some((status, at)) = cache.get(credential) {
                if now - *at < self.ttl {
                    debug!(credential = %credential, "revocation status from cache");
                    return Ok(status.clone());
                }
            }
        }

        let status = self.inner.status(credential).await?;
        if let Ok(mut cache) = self.cache.write() {
            if cache.len() >= MAX_CACHED_STATUSES {
                cache.clear();
            }
            cache.insert(credential.clone(), (status.clone(), now));
        }
        Ok(status)
    }
}
