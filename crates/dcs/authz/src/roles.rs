//! The standard role table.

use dcs_types::{Action, Role};
use std::collections::BTreeSet;

pub const CONTRACT_CREATOR: &str = "contract_creator";
pub const CONTRACT_NEGOTIATOR: &str = "contract_negotiator";
pub const CONTRACT_REVIEWER: &str = "contract_reviewer";
pub const CONTRACT_APPROVER: &str = "contract_approver";
pub const CONTRACT_MANAGER: &str = "contract_manager";
pub const CONTRACT_SIGNER: &str = "contract_signer";
pub const CONTRACT_OBSERVER: &str = "contract_observer";
pub const TEMPLATE_CREATOR: &str = "template_creator";
pub const TEMPLATE_REVIEWER: &str = "template_reviewer";
pub const TEMPLATE_APPROVER: &str = "template_approver";
pub const TEMPLATE_MANAGER: &str = "template_manager";
pub const ARCHIVE_MANAGER: &str = "archive_manager";
pub const COMPLIANCE_OFFICER: &str = "compliance_officer";
pub const AUDITOR: &str = "auditor";
pub const SECURITY_ADMINISTRATOR: &str = "security_administrator";

/// Prefix of the automated-caller variant of a role ("Sys. Contract Manager").
pub const SYSTEM_PREFIX: &str = "sys_";

/// Roles with an automated-caller variant carrying the same capabilities.
const SYSTEM_VARIANTS: &[&str] = &[
    CONTRACT_CREATOR,
    CONTRACT_REVIEWER,
    CONTRACT_APPROVER,
    CONTRACT_MANAGER,
    CONTRACT_SIGNER,
];

fn actions(role: &str) -> &'static [Action] {
    use Action::*;
    match role {
        CONTRACT_CREATOR => &[
            ContractCreate,
            ContractRead,
            ContractNegotiate,
            ContractRespond,
            ContractSubmit,
            TemplateRead,
        ],
        CONTRACT_NEGOTIATOR => &[ContractRead, ContractNegotiate, ContractRespond, ContractSubmit],
        CONTRACT_REVIEWER => &[ContractRead, ContractRespond, TemplateRead],
        CONTRACT_APPROVER => &[
            ContractRead,
            ContractApprove,
            ContractReject,
            PendingApprove,
            PendingReject,
        ],
        CONTRACT_MANAGER => &[
            ContractRead,
            ContractRespond,
            SigningInitiate,
            SigningFinalize,
            SignatureValidate,
            SignatureRevoke,
            ComplianceCheck,
            ContractDeploy,
            DeploymentAcknowledge,
            DeploymentFail,
            ExecutionConfirm,
            ContractRenew,
            ContractTerminate,
            EvidenceStore,
        ],
        CONTRACT_SIGNER => &[ContractRead, CredentialsRequest, SignatureApply, SignatureValidate],
        CONTRACT_OBSERVER => &[ContractRead, TemplateRead],
        TEMPLATE_CREATOR => &[TemplateCreate, TemplateUpdate, TemplateSubmit, TemplateRead],
        TEMPLATE_REVIEWER => &[TemplateRead, TemplateReject],
        TEMPLATE_APPROVER => &[TemplateRead, TemplateApprove, TemplateReject],
        TEMPLATE_MANAGER => &[TemplateRead, TemplateUpdate, TemplateSubmit, TemplateDeprecate],
        ARCHIVE_MANAGER => &[ContractRead, SigningFinalize, EvidenceStore, AuditQuery],
        COMPLIANCE_OFFICER => &[
            ContractRead,
            SignatureValidate,
            ComplianceCheck,
            ComplianceFlag,
            RevocationApply,
            IncidentRecord,
            IncidentResolve,
            AuditQuery,
            AuditExport,
        ],
        AUDITOR => &[AuditQuery, AuditExport, ContractRead, TemplateRead],
        SECURITY_ADMINISTRATOR => &[RevocationApply, RoleAssign, RoleRevoke, CredentialVerify, AuditQuery],
        _ => &[],
    }
}

/// Every standard role with its capability set, including `sys_` variants.
pub fn standard_roles() -> Vec<(Role, BTreeSet<Action>)> {
    let base = [
        CONTRACT_CREATOR,
        CONTRACT_NEGOTIATOR,
        CONTRACT_REVIEWER,
        CONTRACT_APPROVER,
        CONTRACT_MANAGER,
        CONTRACT_SIGNER,
        CONTRACT_OBSERVER,
        TEMPLATE_CREATOR,
        TEMPLATE_REVIEWER,
        TEMPLATE_APPROVER,
        TEMPLATE_MANAGER,
        ARCHIVE_MANAGER,
        COMPLIANCE_OFFICER,
        AUDITOR,
        SECURITY_ADMINISTRATOR,
    ];
    let mut out: Vec<(Role, BTreeSet<Action>)> = base
        .iter()
        .map(|name| (Role::new(*name), actions(name).iter().copied().collect()))
        .collect();
    for name in SYSTEM_VARIANTS {
        out.push((
            Role::new(format!("{SYSTEM_PREFIX}{name}")),
            actions(name).iter().copied().collect(),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_variants_mirror_human_roles() {
        let table = standard_roles();
        let lookup = |name: &str| {
            table
                .iter()
                .find(|(r, _)| r.as_str() == name)
                .map(|(_, a)| a.clone())
                .unwrap()
        };
        assert_eq!(lookup("sys_contract_manager"), lookup(CONTRACT_MANAGER));
        assert!(lookup(CONTRACT_SIGNER).contains(&Action::SignatureApply));
        assert!(!lookup(CONTRACT_OBSERVER).contains(&Action::ContractNegotiate));
    }

    #[test]
    fn every_standard_role_grants_something() {
        assert!(standard_roles().iter().all(|(_, actions)| !actions.is_empty()));
    }
}
