//! The contract record and its lifecycle states.

use crate::hash::ContentHash;
use crate::ids::{ActorId, ArchiveRef, ContractId, CorrelationId, CredentialId, Role, SessionId, SignerId, TemplateRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Lifecycle state of a contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractState {
    Draft,
    UnderReview,
    Approved,
    SigningInProgress,
    Signed,
    DeploymentPending,
    Deployed,
    Executed,
    Failed,
    RenewalPending,
    Renewed,
    TerminationPending,
    Terminated,
}

impl ContractState {
    pub const ALL: &'static [ContractState] = &[
        ContractState::Draft,
        ContractState::UnderReview,
        ContractState::Approved,
        ContractState::SigningInProgress,
        ContractState::Signed,
        ContractState::DeploymentPending,
        ContractState::Deployed,
        ContractState::Executed,
        ContractState::Failed,
        ContractState::RenewalPending,
        ContractState::Renewed,
        ContractState::TerminationPending,
        ContractState::Terminated,
    ];

    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, ContractState::Terminated)
    }

    /// Content may only change here.
    pub fn is_editable(self) -> bool {
        matches!(self, ContractState::Draft)
    }

    /// States in which the contract carries completed signatures.
    pub fn is_post_signing(self) -> bool {
        !matches!(
            self,
            ContractState::Draft
                | ContractState::UnderReview
                | ContractState::Approved
                | ContractState::SigningInProgress
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContractState::Draft => "draft",
            ContractState::UnderReview => "under_review",
            ContractState::Approved => "approved",
            ContractState::SigningInProgress => "signing_in_progress",
            ContractState::Signed => "signed",
            ContractState::DeploymentPending => "deployment_pending",
            ContractState::Deployed => "deployed",
            ContractState::Executed => "executed",
            ContractState::Failed => "failed",
            ContractState::RenewalPending => "renewal_pending",
            ContractState::Renewed => "renewed",
            ContractState::TerminationPending => "termination_pending",
            ContractState::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for ContractState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub organization: String,
}

/// Descriptive data supplied at creation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractMetadata {
    pub title: String,
    #[serde(default)]
    pub parties: Vec<Party>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// One changed leaf between two versions, addressed by a JSON pointer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub path: String,
    pub change: ChangeKind,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Structural diff of two JSON documents. Objects are compared key by key;
/// any other differing value is reported as a whole.
pub fn diff_values(old: &Value, new: &Value) -> Vec<FieldChange> {
    let mut out = Vec::new();
    diff_at("", old, new, &mut out);
    out
}

fn diff_at(path: &str, old: &Value, new: &Value, out: &mut Vec<FieldChange>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, before) in a {
                let child = format!("{}/{}", path, escape_pointer(key));
                match b.get(key) {
                    Some(after) => diff_at(&child, before, after, out),
                    None => out.push(FieldChange {
                        path: child,
                        change: ChangeKind::Removed,
                        before: Some(before.clone()),
                        after: None,
                    }),
                }
            }
            for (key, after) in b {
                if !a.contains_key(key) {
                    out.push(FieldChange {
                        path: format!("{}/{}", path, escape_pointer(key)),
                        change: ChangeKind::Added,
                        before: None,
                        after: Some(after.clone()),
                    });
                }
            }
        }
        (a, b) if a != b => out.push(FieldChange {
            path: if path.is_empty() { "/".into() } else { path.into() },
            change: ChangeKind::Modified,
            before: Some(a.clone()),
            after: Some(b.clone()),
        }),
        _ => {}
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// An immutable entry in the contract's version chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: u32,
    pub author: ActorId,
    pub timestamp: DateTime<Utc>,
    pub content: Value,
    pub content_hash: ContentHash,
    pub diff: Vec<FieldChange>,
    pub summary: Option<String>,
}

/// Negotiation or review feedback that leaves content untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub author: ActorId,
    pub version: u32,
    pub body: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approver: ActorId,
    pub role: Role,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub by: ActorId,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingKind {
    Renewal,
    Termination,
}

/// A renewal or termination awaiting approvals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub kind: PendingKind,
    /// State restored if the request is rejected.
    pub origin: ContractState,
    pub requested_by: ActorId,
    pub requested_at: DateTime<Utc>,
    pub effective_date: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub approvals: Vec<Approval>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Acknowledged { at: DateTime<Utc> },
    Failed { reason: String, at: DateTime<Utc> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    pub correlation_id: CorrelationId,
    pub attempt: u32,
    pub target: String,
    pub started_at: DateTime<Utc>,
    /// Acknowledgement must arrive before this instant.
    pub ack_deadline: DateTime<Utc>,
    pub status: DeploymentStatus,
}

/// Hash of an evidentiary artifact attached to the contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: String,
    pub hash: ContentHash,
    pub description: Option<String>,
    pub stored_by: ActorId,
    pub stored_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    NonCompliant,
    ResignRequired,
}

/// Cross-cutting compliance marker. It is not a lifecycle state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFlag {
    pub kind: FlagKind,
    pub signer: SignerId,
    pub credential: Option<CredentialId>,
    pub reason: String,
    pub raised_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
}

impl ComplianceFlag {
    pub fn is_open(&self) -> bool {
        self.cleared_at.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Termination {
    pub effective_date: DateTime<Utc>,
    pub reason: Option<String>,
    pub terminated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renewal {
    pub renewed_until: Option<DateTime<Utc>>,
    pub renewed_at: DateTime<Utc>,
}

/// The contract record.
///
/// Never deleted: terminal records stay for audit. `revision` increments on
/// every persisted change and guards against lost updates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub state: ContractState,
    pub template: TemplateRef,
    pub metadata: ContractMetadata,
    pub content: Value,
    pub content_hash: ContentHash,
    pub versions: Vec<VersionEntry>,
    pub comments: Vec<Comment>,
    pub approvals: Vec<Approval>,
    pub last_rejection: Option<Rejection>,
    pub signers: Vec<SignerId>,
    pub active_session: Option<SessionId>,
    pub sessions: Vec<SessionId>,
    pub pending: Option<PendingChange>,
    pub deployments: Vec<DeploymentAttempt>,
    pub archive_refs: Vec<ArchiveRef>,
    pub evidence: Vec<Evidence>,
    pub flags: Vec<ComplianceFlag>,
    pub renewals: Vec<Renewal>,
    pub termination: Option<Termination>,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revision: u64,
}

impl Contract {
    /// A fresh draft with its first version entry.
    pub fn draft(
        id: ContractId,
        template: TemplateRef,
        metadata: ContractMetadata,
        content: Value,
        content_hash: ContentHash,
        author: ActorId,
        now: DateTime<Utc>,
    ) -> Self {
        let first = VersionEntry {
            version: 1,
            author: author.clone(),
            timestamp: now,
            content: content.clone(),
            content_hash: content_hash.clone(),
            diff: Vec::new(),
            summary: Some(format!("created from template {}", template)),
        };
        Self {
            id,
            state: ContractState::Draft,
            template,
            metadata,
            content,
            content_hash,
            versions: vec![first],
            comments: Vec::new(),
            approvals: Vec::new(),
            last_rejection: None,
            signers: Vec::new(),
            active_session: None,
            sessions: Vec::new(),
            pending: None,
            deployments: Vec::new(),
            archive_refs: Vec::new(),
            evidence: Vec::new(),
            flags: Vec::new(),
            renewals: Vec::new(),
            termination: None,
            created_by: author,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn current_version(&self) -> u32 {
        self.versions.last().map(|v| v.version).unwrap_or(0)
    }

    pub fn latest_version(&self) -> Option<&VersionEntry> {
        self.versions.last()
    }

    pub fn version(&self, version: u32) -> Option<&VersionEntry> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn open_flags(&self) -> impl Iterator<Item = &ComplianceFlag> {
        self.flags.iter().filter(|f| f.is_open())
    }

    pub fn has_open_flag(&self, kind: FlagKind) -> bool {
        self.open_flags().any(|f| f.kind == kind)
    }

    /// Latest deployment attempt still awaiting acknowledgement.
    pub fn pending_deployment(&self) -> Option<&DeploymentAttempt> {
        self.deployments
            .iter()
            .rev()
            .find(|d| d.status == DeploymentStatus::Pending)
    }

    pub fn organizations(&self) -> Vec<String> {
        self.metadata
            .parties
            .iter()
            .map(|p| p.organization.clone())
            .collect()
    }
}
