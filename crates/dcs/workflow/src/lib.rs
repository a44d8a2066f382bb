//! DCS Contract Workflow Engine.
//!
//! The central coordinator of the contract lifecycle. It owns the contract
//! state machine ([`transitions`]), drives signing through the
//! [`dcs_signature::SignatureManager`], hands signed artifacts to the
//! archive, tracks deployment attempts against the target system and runs
//! renewal and termination through approval-gated pending states.
//!
//! Every operation is authorized through one gate and every transition,
//! allowed or denied, lands in the audit ledger before it is persisted.
//! Operations on one contract are linearized by a per-contract lock;
//! different contracts proceed in parallel.

#![deny(unsafe_code)]

mod audit;
mod collaborators;
mod config;
mod engine;
mod incidents;
mod lifecycle;
mod signing;
pub mod transitions;

pub use collaborators::{
    ArchiveService, DeploymentPayload, DispatchReceipt, InMemoryArchive, InMemoryTarget,
    SignedArtifact, TargetMode, TargetSystem, TerminationHook,
};
pub use config::{CompliancePolicy, EngineConfig, EngineTimeouts, ResignPolicy, RetryPolicy};
pub use engine::{ContractEdit, ContractReview, ContractWorkflowEngine, EngineDeps, NewContract};
pub use incidents::{
    ComplianceIncident, IncidentFilter, IncidentKind, IncidentResolution, MonitorPage,
    DEFAULT_MONITOR_LIMIT, MAX_MONITOR_LIMIT,
};
pub use lifecycle::{NewEvidence, RenewalRequest, TerminationRequest};
pub use signing::{
    ComplianceReport, CredentialRevocationReport, SignatureOutcome, SigningRequest, SigningStarted,
};
pub use transitions::ContractEvent;
