use crate::model::{AuditAppend, AuditEntry, ContractQuery, TemplateQuery};
use crate::StorageResult;
use async_trait::async_trait;
use dcs_types::{Contract, ContractId, CredentialId, SessionId, SigningSession, Template, TemplateId};

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Storage interface for contract records.
#[async_trait]
pub trait ContractStore: Send + Sync {
    /// Insert a new contract. The stored record starts at revision 1.
    async fn insert_contract(&self, contract: Contract) -> StorageResult<Contract>;

    /// Replace a contract if its stored revision equals `expected_revision`.
    /// Returns the stored record with its revision incremented.
    async fn update_contract(
        &self,
        contract: Contract,
        expected_revision: u64,
    ) -> StorageResult<Contract>;

    async fn get_contract(&self, contract_id: &ContractId) -> StorageResult<Option<Contract>>;

    /// Matching contracts ordered by creation time.
    async fn list_contracts(
        &self,
        query: &ContractQuery,
        window: QueryWindow,
    ) -> StorageResult<Vec<Contract>>;
}

/// Storage interface for template versions.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Insert a new version. Fails if (id, version) already exists.
    async fn insert_template_version(&self, template: Template) -> StorageResult<()>;

    /// Replace the review status of an existing version. The body of a
    /// stored version can never change.
    async fn update_template_status(&self, template: Template) -> StorageResult<()>;

    async fn get_template(
        &self,
        template_id: &TemplateId,
        version: u32,
    ) -> StorageResult<Option<Template>>;

    async fn latest_template(&self, template_id: &TemplateId) -> StorageResult<Option<Template>>;

    /// All versions, oldest first.
    async fn template_history(&self, template_id: &TemplateId) -> StorageResult<Vec<Template>>;

    /// Latest version of every template matching the query.
    async fn list_templates(
        &self,
        query: &TemplateQuery,
        window: QueryWindow,
    ) -> StorageResult<Vec<Template>>;
}

/// Storage interface for signing sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session. The stored record starts at revision 1.
    async fn insert_session(&self, session: SigningSession) -> StorageResult<SigningSession>;

    async fn update_session(
        &self,
        session: SigningSession,
        expected_revision: u64,
    ) -> StorageResult<SigningSession>;

    async fn get_session(&self, session_id: &SessionId) -> StorageResult<Option<SigningSession>>;

    async fn sessions_for_contract(
        &self,
        contract_id: &ContractId,
    ) -> StorageResult<Vec<SigningSession>>;

    /// Every session with an entry referencing the credential, open or not.
    async fn sessions_for_credential(
        &self,
        credential_id: &CredentialId,
    ) -> StorageResult<Vec<SigningSession>>;

    async fn open_sessions(&self) -> StorageResult<Vec<SigningSession>>;
}

/// Storage interface for the append-only audit chain.
///
/// Entries are never updated or removed.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Atomically assign the next sequence number, link the chain and store.
    async fn append_audit(&self, event: AuditAppend) -> StorageResult<AuditEntry>;

    /// Entries with sequence greater than `after_sequence`, ascending.
    /// A `limit` of 0 means no limit.
    async fn read_audit(&self, after_sequence: u64, limit: usize) -> StorageResult<Vec<AuditEntry>>;

    /// Entries of one entity partition, ascending.
    async fn audit_for_entity(
        &self,
        entity_key: &str,
        after_sequence: u64,
        limit: usize,
    ) -> StorageResult<Vec<AuditEntry>>;

    async fn latest_audit_hash(&self) -> StorageResult<Option<String>>;

    async fn audit_len(&self) -> StorageResult<u64>;
}

/// Unified storage bundle used by the DCS components.
pub trait DcsStorage: ContractStore + TemplateStore + SessionStore + AuditStore + Send + Sync {}

impl<T> DcsStorage for T where
    T: ContractStore + TemplateStore + SessionStore + AuditStore + Send + Sync
{
}
