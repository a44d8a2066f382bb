use dcs_authz::roles;
use dcs_types::Role;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often a failed deployment may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    Unlimited,
    MaxAttempts { attempts: u32 },
}

impl RetryPolicy {
    pub fn allows(&self, attempts_so_far: u32) -> bool {
        match self {
            RetryPolicy::Unlimited => true,
            RetryPolicy::MaxAttempts { attempts } => attempts_so_far < *attempts,
        }
    }
}

/// Effect of an open compliance flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompliancePolicy {
    /// Flags are recorded; human re-signing is expected.
    Advisory,
    /// Open flags block deployment and execution confirmation.
    BlockExecution,
}

/// What happens when a credential behind a completed signature is revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResignPolicy {
    /// Flag the contract `NonCompliant`.
    Manual,
    /// Open a re-signing session with this deadline window.
    AutoTrigger { window_secs: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineTimeouts {
    pub archive_handoff_ms: u64,
    pub target_dispatch_ms: u64,
    /// How long a dispatched deployment may wait for its acknowledgement.
    pub target_ack_secs: u64,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            archive_handoff_ms: 5_000,
            target_dispatch_ms: 5_000,
            target_ack_secs: 300,
        }
    }
}

impl EngineTimeouts {
    pub fn archive_handoff(&self) -> Duration {
        Duration::from_millis(self.archive_handoff_ms)
    }

    pub fn target_dispatch(&self) -> Duration {
        Duration::from_millis(self.target_dispatch_ms)
    }

    pub fn target_ack(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.target_ack_secs as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Every listed role must approve before a contract is `Approved`.
    pub approver_roles: Vec<Role>,
    pub renewal_approver_roles: Vec<Role>,
    pub termination_approver_roles: Vec<Role>,
    pub retry_policy: RetryPolicy,
    pub compliance_policy: CompliancePolicy,
    pub resign_policy: ResignPolicy,
    /// Hand the contract's signer credentials to the termination hook.
    pub revoke_credentials_on_termination: bool,
    pub timeouts: EngineTimeouts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let approver = vec![Role::new(roles::CONTRACT_APPROVER)];
        Self {
            approver_roles: approver.clone(),
            renewal_approver_roles: approver.clone(),
            termination_approver_roles: approver,
            retry_policy: RetryPolicy::MaxAttempts { attempts: 3 },
            compliance_policy: CompliancePolicy::Advisory,
            resign_policy: ResignPolicy::Manual,
            revoke_credentials_on_termination: false,
            timeouts: EngineTimeouts::default(),
        }
    }
}
