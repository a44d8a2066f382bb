//! External collaborators of the engine and their in-memory versions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dcs_types::{
    ArchiveRef, Clock, ContentHash, ContractId, CorrelationId, CredentialId, DcsError, DcsResult,
    SessionId, SignatureRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// What the archive receives when a session completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedArtifact {
    pub contract_id: ContractId,
    pub version: u32,
    pub content: Value,
    pub content_hash: ContentHash,
    pub session_id: SessionId,
    pub signatures: Vec<SignatureRecord>,
}

#[async_trait]
pub trait ArchiveService: Send + Sync {
    async fn archive(&self, artifact: &SignedArtifact) -> DcsResult<ArchiveRef>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPayload {
    pub contract_id: ContractId,
    pub content: Value,
    pub content_hash: ContentHash,
    pub correlation_id: CorrelationId,
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "receipt", rename_all = "snake_case")]
pub enum DispatchReceipt {
    /// Accepted; the acknowledgement follows by callback.
    Accepted,
    Acknowledged { at: DateTime<Utc> },
}

#[async_trait]
pub trait TargetSystem: Send + Sync {
    fn name(&self) -> &str;

    async fn dispatch(&self, payload: &DeploymentPayload) -> DcsResult<DispatchReceipt>;
}

/// Notified after a termination is finalized.
#[async_trait]
pub trait TerminationHook: Send + Sync {
    async fn on_termination(
        &self,
        contract_id: &ContractId,
        credentials: Vec<CredentialId>,
        effective_date: DateTime<Utc>,
    ) -> DcsResult<()>;
}

#[derive(Default)]
pub struct InMemoryArchive {
    artifacts: RwLock<Vec<(ArchiveRef, SignedArtifact)>>,
    failing: AtomicBool,
    hanging: AtomicBool,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Never answer, so the caller's timeout fires.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn artifacts(&self) -> Vec<(ArchiveRef, SignedArtifact)> {
        self.artifacts
            .read()
            .map(|a| a.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArchiveService for InMemoryArchive {
    async fn archive(&self, artifact: &SignedArtifact) -> DcsResult<ArchiveRef> {
        if self.hanging.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DcsError::ExternalUnavailable("archive unavailable".into()));
        }
        let mut guard = self
            .artifacts
            .write()
            .map_err(|_| DcsError::StorageUnavailable("archive lock poisoned".into()))?;
        let reference = ArchiveRef::new(format!(
            "archive://{}/{}",
            artifact.contract_id,
            guard.len() + 1
        ));
        guard.push((reference.clone(), artifact.clone()));
        Ok(reference)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetMode {
    /// Accept and acknowledge later by callback.
    Accept,
    /// Acknowledge synchronously.
    Acknowledge,
    Reject(String),
    Hang,
}

pub struct InMemoryTarget {
    name: String,
    mode: RwLock<TargetMode>,
    payloads: RwLock<Vec<DeploymentPayload>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTarget {
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            mode: RwLock::new(TargetMode::Accept),
            payloads: RwLock::new(Vec::new()),
            clock,
        }
    }

    pub fn set_mode(&self, mode: TargetMode) {
        if let Ok(mut guard) = self.mode.write() {
            *guard = mode;
        }
    }

    pub fn payloads(&self) -> Vec<DeploymentPayload> {
        self.payloads.read().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TargetSystem for InMemoryTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dispatch(&self, payload: &DeploymentPayload) -> DcsResult<DispatchReceipt> {
        let mode = self
            .mode
            .read()
            .map(|m| m.clone())
            .map_err(|_| DcsError::StorageUnavailable("target lock poisoned".into()))?;
        if let Ok(mut payloads) = self.payloads.write() {
            payloads.push(payload.clone());
        }
        match mode {
            TargetMode::Accept => Ok(DispatchReceipt::Accepted),
            TargetMode::Acknowledge => Ok(DispatchReceipt::Acknowledged {
                at: self.clock.now(),
            }),
            TargetMode::Reject(reason) => Err(DcsError::ExternalUnavailable(reason)),
            TargetMode::Hang => std::future::pending().await,
        }
    }
}
