//! The action vocabulary.
//!
//! One enum serves both sides of accountability: the authorization gate
//! maps roles to sets of [`Action`]s, and every audit entry names the
//! [`Action`] it records.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    // Templates
    TemplateCreate,
    TemplateUpdate,
    TemplateSubmit,
    TemplateApprove,
    TemplateReject,
    TemplateDeprecate,
    TemplateRead,

    // Contract drafting and approval
    ContractCreate,
    ContractNegotiate,
    ContractRespond,
    ContractSubmit,
    ContractApprove,
    ContractReject,
    ContractRead,

    // Signing
    SigningInitiate,
    CredentialsRequest,
    SignatureApply,
    SignatureValidate,
    SignatureRevoke,
    SigningFinalize,
    SigningExpire,
    ComplianceCheck,
    ComplianceFlag,

    // Post-signing lifecycle
    ContractDeploy,
    DeploymentAcknowledge,
    DeploymentFail,
    ExecutionConfirm,
    ContractRenew,
    ContractTerminate,
    PendingApprove,
    PendingReject,
    EvidenceStore,

    // Trust and revocation
    CredentialVerify,
    RevocationApply,
    RoleAssign,
    RoleRevoke,

    // Compliance incidents
    IncidentRecord,
    IncidentResolve,

    // Ledger
    AuditQuery,
    AuditExport,
    CommitAborted,
}

impl Action {
    pub const ALL: &'static [Action] = &[
        Action::TemplateCreate,
        Action::TemplateUpdate,
        Action::TemplateSubmit,
        Action::TemplateApprove,
        Action::TemplateReject,
        Action::TemplateDeprecate,
        Action::TemplateRead,
        Action::ContractCreate,
        Action::ContractNegotiate,
        Action::ContractRespond,
        Action::ContractSubmit,
        Action::ContractApprove,
        Action::ContractReject,
        Action::ContractRead,
        Action::SigningInitiate,
        Action::CredentialsRequest,
        Action::SignatureApply,
        Action::SignatureValidate,
        Action::SignatureRevoke,
        Action::SigningFinalize,
        Action::SigningExpire,
        Action::ComplianceCheck,
        Action::ComplianceFlag,
        Action::ContractDeploy,
        Action::DeploymentAcknowledge,
        Action::DeploymentFail,
        Action::ExecutionConfirm,
        Action::ContractRenew,
        Action::ContractTerminate,
        Action::PendingApprove,
        Action::PendingReject,
        Action::EvidenceStore,
        Action::CredentialVerify,
        Action::RevocationApply,
        Action::RoleAssign,
        Action::RoleRevoke,
        Action::IncidentRecord,
        Action::IncidentResolve,
        Action::AuditQuery,
        Action::AuditExport,
        Action::CommitAborted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TemplateCreate => "template_create",
            Self::TemplateUpdate => "template_update",
            Self::TemplateSubmit => "template_submit",
            Self::TemplateApprove => "template_approve",
            Self::TemplateReject => "template_reject",
            Self::TemplateDeprecate => "template_deprecate",
            Self::TemplateRead => "template_read",
            Self::ContractCreate => "contract_create",
            Self::ContractNegotiate => "contract_negotiate",
            Self::ContractRespond => "contract_respond",
            Self::ContractSubmit => "contract_submit",
            Self::ContractApprove => "contract_approve",
            Self::ContractReject => "contract_reject",
            Self::ContractRead => "contract_read",
            Self::SigningInitiate => "signing_initiate",
            Self::CredentialsRequest => "credentials_request",
            Self::SignatureApply => "signature_apply",
            Self::SignatureValidate => "signature_validate",
            Self::SignatureRevoke => "signature_revoke",
            Self::SigningFinalize => "signing_finalize",
            Self::SigningExpire => "signing_expire",
            Self::ComplianceCheck => "compliance_check",
            Self::ComplianceFlag => "compliance_flag",
            Self::ContractDeploy => "contract_deploy",
            Self::DeploymentAcknowledge => "deployment_acknowledge",
            Self::DeploymentFail => "deployment_fail",
            Self::ExecutionConfirm => "execution_confirm",
            Self::ContractRenew => "contract_renew",
            Self::ContractTerminate => "contract_terminate",
            Self::PendingApprove => "pending_approve",
            Self::PendingReject => "pending_reject",
            Self::EvidenceStore => "evidence_store",
            Self::CredentialVerify => "credential_verify",
            Self::RevocationApply => "revocation_apply",
            Self::RoleAssign => "role_assign",
            Self::RoleRevoke => "role_revoke",
            Self::IncidentRecord => "incident_record",
            Self::IncidentResolve => "incident_resolve",
            Self::AuditQuery => "audit_query",
            Self::AuditExport => "audit_export",
            Self::CommitAborted => "commit_aborted",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
