use crate::error::{StorageError, StorageResult};
use crate::model::{AuditAppend, AuditEntry, ContractQuery, TemplateQuery};
use crate::traits::{AuditStore, ContractStore, QueryWindow, SessionStore, TemplateStore};
use async_trait::async_trait;
use dcs_types::{Contract, ContractId, CredentialId, SessionId, SessionStatus, SigningSession, Template, TemplateId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct AuditChain {
    entries: Vec<AuditEntry>,
    by_entity: HashMap<String, Vec<usize>>,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<SessionId, SigningSession>,
    by_contract: HashMap<ContractId, BTreeSet<SessionId>>,
    by_credential: HashMap<CredentialId, BTreeSet<SessionId>>,
}

/// In-memory storage adapter for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryDcsStorage {
    contracts: RwLock<HashMap<ContractId, Contract>>,
    templates: RwLock<HashMap<TemplateId, BTreeMap<u32, Template>>>,
    sessions: RwLock<SessionTable>,
    audit: RwLock<AuditChain>,
    fail_audit: AtomicBool,
    fail_contract_writes: AtomicBool,
    fail_session_listing: AtomicBool,
    fail_session_writes: AtomicBool,
}

impl InMemoryDcsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every audit append fail with a backend error until reset.
    pub fn fail_audit_appends(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Make every contract insert/update fail with a backend error until reset.
    pub fn fail_contract_writes(&self, fail: bool) {
        self.fail_contract_writes.store(fail, Ordering::SeqCst);
    }

    /// Make listing a contract's sessions fail until reset.
    pub fn fail_session_listing(&self, fail: bool) {
        self.fail_session_listing.store(fail, Ordering::SeqCst);
    }

    /// Make every session update fail until reset.
    pub fn fail_session_writes(&self, fail: bool) {
        self.fail_session_writes.store(fail, Ordering::SeqCst);
    }

    fn check_contract_writes(&self) -> StorageResult<()> {
        if self.fail_contract_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("contract store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContractStore for InMemoryDcsStorage {
    async fn insert_contract(&self, mut contract: Contract) -> StorageResult<Contract> {
        self.check_contract_writes()?;
        let mut guard = self
            .contracts
            .write()
            .map_err(|_| StorageError::Backend("contracts lock poisoned".to_string()))?;
        if guard.contains_key(&contract.id) {
            return Err(StorageError::Duplicate(format!("contract {}", contract.id)));
        }
        contract.revision = 1;
        guard.insert(contract.id.clone(), contract.clone());
        Ok(contract)
    }

    async fn update_contract(
        &self,
        mut contract: Contract,
        expected_revision: u64,
    ) -> StorageResult<Contract> {
        self.check_contract_writes()?;
        let mut guard = self
            .contracts
            .write()
            .map_err(|_| StorageError::Backend("contracts lock poisoned".to_string()))?;
        let stored = guard
            .get_mut(&contract.id)
            .ok_or_else(|| StorageError::NotFound(format!("contract {}", contract.id)))?;
        if stored.revision != expected_revision {
            return Err(StorageError::RevisionConflict {
                entity: format!("contract {}", contract.id),
                expected: expected_revision,
                actual: stored.revision,
            });
        }
        contract.revision = expected_revision + 1;
        *stored = contract.clone();
        Ok(contract)
    }

    async fn get_contract(&self, contract_id: &ContractId) -> StorageResult<Option<Contract>> {
        let guard = self
            .contracts
            .read()
            .map_err(|_| StorageError::Backend("contracts lock poisoned".to_string()))?;
        Ok(guard.get(contract_id).cloned())
    }

    async fn list_contracts(
        &self,
        query: &ContractQuery,
        window: QueryWindow,
    ) -> StorageResult<Vec<Contract>> {
        let guard = self
            .contracts
            .read()
            .map_err(|_| StorageError::Backend("contracts lock poisoned".to_string()))?;
        let mut values: Vec<Contract> = guard.values().filter(|c| query.matches(c)).cloned().collect();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(apply_window(values, window))
    }
}

#[async_trait]
impl TemplateStore for InMemoryDcsStorage {
    async fn insert_template_version(&self, template: Template) -> StorageResult<()> {
        let mut guard = self
            .templates
            .write()
            .map_err(|_| StorageError::Backend("templates lock poisoned".to_string()))?;
        let versions = guard.entry(template.id.clone()).or_default();
        if versions.contains_key(&template.version) {
            return Err(StorageError::Duplicate(format!(
                "template {}@v{}",
                template.id, template.version
            )));
        }
        if let Some((&latest, _)) = versions.last_key_value() {
            if template.version <= latest {
                return Err(StorageError::InvariantViolation(format!(
                    "template {} version {} is not above {}",
                    template.id, template.version, latest
                )));
            }
        }
        versions.insert(template.version, template);
        Ok(())
    }

    async fn update_template_status(&self, template: Template) -> StorageResult<()> {
        let mut guard = self
            .templates
            .write()
            .map_err(|_| StorageError::Backend("templates lock poisoned".to_string()))?;
        let stored = guard
            .get_mut(&template.id)
            .and_then(|versions| versions.get_mut(&template.version))
            .ok_or_else(|| {
                StorageError::NotFound(format!("template {}@v{}", template.id, template.version))
            })?;
        if stored.content_hash != template.content_hash {
            return Err(StorageError::InvariantViolation(format!(
                "template {}@v{} body is immutable",
                template.id, template.version
            )));
        }
        *stored = template;
        Ok(())
    }

    async fn get_template(
        &self,
        template_id: &TemplateId,
        version: u32,
    ) -> StorageResult<Option<Template>> {
        let guard = self
            .templates
            .read()
            .map_err(|_| StorageError::Backend("templates lock poisoned".to_string()))?;
        Ok(guard.get(template_id).and_then(|v| v.get(&version)).cloned())
    }

    async fn latest_template(&self, template_id: &TemplateId) -> StorageResult<Option<Template>> {
        let guard = self
            .templates
            .read()
            .map_err(|_| StorageError::Backend("templates lock poisoned".to_string()))?;
        Ok(guard
            .get(template_id)
            .and_then(|v| v.last_key_value())
            .map(|(_, t)| t.clone()))
    }

    async fn template_history(&self, template_id: &TemplateId) -> StorageResult<Vec<Template>> {
        let guard = self
            .templates
            .read()
            .map_err(|_| StorageError::Backend("templates lock poisoned".to_string()))?;
        Ok(guard
            .get(template_id)
            .map(|v| v.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_templates(
        &self,
        query: &TemplateQuery,
        window: QueryWindow,
    ) -> StorageResult<Vec<Template>> {
        let guard = self
            .templates
            .read()
            .map_err(|_| StorageError::Backend("templates lock poisoned".to_string()))?;
        let mut values: Vec<Template> = guard
            .values()
            .filter_map(|v| v.last_key_value().map(|(_, t)| t))
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        values.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(apply_window(values, window))
    }
}

impl SessionTable {
    fn index(&mut self, session: &SigningSession) {
        self.by_contract
            .entry(session.contract_id.clone())
            .or_default()
            .insert(session.id.clone());
        for credential in session.credential_ids() {
            self.by_credential
                .entry(credential)
                .or_default()
                .insert(session.id.clone());
        }
    }

    fn collect<'a>(&self, ids: impl IntoIterator<Item = &'a SessionId>) -> Vec<SigningSession> {
        let mut out: Vec<SigningSession> = ids
            .into_iter()
            .filter_map(|id| self.sessions.get(id).cloned())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }
}

#[async_trait]
impl SessionStore for InMemoryDcsStorage {
    async fn insert_session(&self, mut session: SigningSession) -> StorageResult<SigningSession> {
        let mut guard = self
            .sessions
            .write()
            .map_err(|_| StorageError::Backend("sessions lock poisoned".to_string()))?;
        if guard.sessions.contains_key(&session.id) {
            return Err(StorageError::Duplicate(format!("session {}", session.id)));
        }
        session.revision = 1;
        guard.index(&session);
        guard.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn update_session(
        &self,
        mut session: SigningSession,
        expected_revision: u64,
    ) -> StorageResult<SigningSession> {
        if self.fail_session_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("session store unavailable".to_string()));
        }
        let mut guard = self
            .sessions
            .write()
            .map_err(|_| StorageError::Backend("sessions lock poisoned".to_string()))?;
        let actual = guard
            .sessions
            .get(&session.id)
            .map(|s| s.revision)
            .ok_or_else(|| StorageError::NotFound(format!("session {}", session.id)))?;
        if actual != expected_revision {
            return Err(StorageError::RevisionConflict {
                entity: format!("session {}", session.id),
                expected: expected_revision,
                actual,
            });
        }
        session.revision = expected_revision + 1;
        guard.index(&session);
        guard.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: &SessionId) -> StorageResult<Option<SigningSession>> {
        let guard = self
            .sessions
            .read()
            .map_err(|_| StorageError::Backend("sessions lock poisoned".to_string()))?;
        Ok(guard.sessions.get(session_id).cloned())
    }

    async fn sessions_for_contract(
        &self,
        contract_id: &ContractId,
    ) -> StorageResult<Vec<SigningSession>> {
        if self.fail_session_listing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("session index unavailable".to_string()));
        }
        let guard = self
            .sessions
            .read()
            .map_err(|_| StorageError::Backend("sessions lock poisoned".to_string()))?;
        Ok(guard
            .by_contract
            .get(contract_id)
            .map(|ids| guard.collect(ids))
            .unwrap_or_default())
    }

    async fn sessions_for_credential(
        &self,
        credential_id: &CredentialId,
    ) -> StorageResult<Vec<SigningSession>> {
        let guard = self
            .sessions
            .read()
            .map_err(|_| StorageError::Backend("sessions lock poisoned".to_string()))?;
        Ok(guard
            .by_credential
            .get(credential_id)
            .map(|ids| guard.collect(ids))
            .unwrap_or_default())
    }

    async fn open_sessions(&self) -> StorageResult<Vec<SigningSession>> {
        let guard = self
            .sessions
            .read()
            .map_err(|_| StorageError::Backend("sessions lock poisoned".to_string()))?;
        Ok(guard.collect(
            guard
                .sessions
                .values()
                .filter(|s| s.status == SessionStatus::Open)
                .map(|s| &s.id),
        ))
    }
}

#[async_trait]
impl AuditStore for InMemoryDcsStorage {
    async fn append_audit(&self, event: AuditAppend) -> StorageResult<AuditEntry> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("audit store unavailable".to_string()));
        }
        let mut guard = self
            .audit
            .write()
            .map_err(|_| StorageError::Backend("audit lock poisoned".to_string()))?;

        let previous_hash = guard.entries.last().map(|e| e.entry_hash.clone());
        let sequence = guard.entries.len() as u64 + 1;
        let entry = AuditEntry::seal(
            event,
            format!("audit-{}", Uuid::new_v4()),
            sequence,
            previous_hash,
        )?;

        let position = guard.entries.len();
        guard
            .by_entity
            .entry(entry.entity.key())
            .or_default()
            .push(position);
        guard.entries.push(entry.clone());
        Ok(entry)
    }

    async fn read_audit(&self, after_sequence: u64, limit: usize) -> StorageResult<Vec<AuditEntry>> {
        let guard = self
            .audit
            .read()
            .map_err(|_| StorageError::Backend("audit lock poisoned".to_string()))?;
        // Sequences are 1-based and gapless, so the position is the sequence.
        let start = (after_sequence as usize).min(guard.entries.len());
        let iter = guard.entries[start..].iter().cloned();
        Ok(if limit == 0 {
            iter.collect()
        } else {
            iter.take(limit).collect()
        })
    }

    async fn audit_for_entity(
        &self,
        entity_key: &str,
        after_sequence: u64,
        limit: usize,
    ) -> StorageResult<Vec<AuditEntry>> {
        let guard = self
            .audit
            .read()
            .map_err(|_| StorageError::Backend("audit lock poisoned".to_string()))?;
        let Some(positions) = guard.by_entity.get(entity_key) else {
            return Ok(Vec::new());
        };
        let iter = positions
            .iter()
            .map(|&p| &guard.entries[p])
            .filter(|e| e.sequence > after_sequence)
            .cloned();
        Ok(if limit == 0 {
            iter.collect()
        } else {
            iter.take(limit).collect()
        })
    }

    async fn latest_audit_hash(&self) -> StorageResult<Option<String>> {
        let guard = self
            .audit
            .read()
            .map_err(|_| StorageError::Backend("audit lock poisoned".to_string()))?;
        Ok(guard.entries.last().map(|e| e.entry_hash.clone()))
    }

    async fn audit_len(&self) -> StorageResult<u64> {
        let guard = self
            .audit
            .read()
            .map_err(|_| StorageError::Backend("audit lock poisoned".to_string()))?;
        Ok(guard.entries.len() as u64)
    }
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Decision;
    use chrono::{Duration, Utc};
    use dcs_types::{
        Action, Actor, ContentHash, ContractMetadata, EntityRef, SequencingMode, SessionPurpose,
        SignerSpec, TemplateRef,
    };
    use serde_json::json;

    fn event(action: Action, entity: EntityRef) -> AuditAppend {
        AuditAppend {
            timestamp: Utc::now(),
            actor: Actor::human("alice"),
            action,
            entity,
            decision: Decision::Allow,
            prior_state: None,
            new_state: Some("draft".into()),
            reason: None,
            content_hash: None,
            evidence: json!({}),
        }
    }

    fn contract(id: &str) -> Contract {
        Contract::draft(
            ContractId::new(id),
            TemplateRef::new("NDA", 1),
            ContractMetadata::default(),
            json!({"x": 1}),
            ContentHash::of_bytes(b"x"),
            dcs_types::ActorId::new("alice"),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn audit_chain_hashes_are_linked() {
        let storage = InMemoryDcsStorage::new();
        let c1 = EntityRef::Contract(ContractId::new("c-1"));
        let first = storage
            .append_audit(event(Action::ContractCreate, c1.clone()))
            .await
            .unwrap();
        let second = storage
            .append_audit(event(Action::ContractNegotiate, c1))
            .await
            .unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.previous_hash, Some(first.entry_hash.clone()));
        assert_eq!(second.recompute_hash().unwrap(), second.entry_hash);
    }

    #[tokio::test]
    async fn entity_partition_and_cursor_reads() {
        let storage = InMemoryDcsStorage::new();
        for i in 0..5 {
            let entity = EntityRef::Contract(ContractId::new(format!("c-{}", i % 2)));
            storage
                .append_audit(event(Action::ContractRead, entity))
                .await
                .unwrap();
        }

        let c0 = storage.audit_for_entity("contract:c-0", 0, 0).await.unwrap();
        assert_eq!(c0.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 3, 5]);

        let page = storage.read_audit(2, 2).await.unwrap();
        assert_eq!(page.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![3, 4]);
        assert!(storage.read_audit(9, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_audit_store_rejects_appends() {
        let storage = InMemoryDcsStorage::new();
        storage.fail_audit_appends(true);
        let err = storage
            .append_audit(event(Action::ContractCreate, EntityRef::Contract(ContractId::new("c"))))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
        assert_eq!(storage.audit_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_contract_update_is_rejected() {
        let storage = InMemoryDcsStorage::new();
        let stored = storage.insert_contract(contract("c-1")).await.unwrap();
        assert_eq!(stored.revision, 1);

        let updated = storage.update_contract(stored.clone(), 1).await.unwrap();
        assert_eq!(updated.revision, 2);

        let err = storage.update_contract(stored, 1).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::RevisionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn sessions_are_indexed_by_credential() {
        let storage = InMemoryDcsStorage::new();
        let now = Utc::now();
        let cred = CredentialId::new("id-alice");
        let session = SigningSession::new(
            SessionId::new("s-1"),
            ContractId::new("c-1"),
            SessionPurpose::Initial,
            SequencingMode::Parallel,
            now + Duration::days(1),
            vec![SignerSpec::new("alice", "acme")],
            ContentHash::of_bytes(b"doc"),
            now,
        );
        let mut stored = storage.insert_session(session).await.unwrap();
        assert!(storage.sessions_for_credential(&cred).await.unwrap().is_empty());

        stored.entries[0].credential_hint = Some(cred.clone());
        storage.update_session(stored.clone(), stored.revision).await.unwrap();

        let found = storage.sessions_for_credential(&cred).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(storage.open_sessions().await.unwrap().len(), 1);
        assert_eq!(
            storage
                .sessions_for_contract(&ContractId::new("c-1"))
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
