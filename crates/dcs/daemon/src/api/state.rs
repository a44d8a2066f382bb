//! Application state for API handlers

use crate::services::Services;
use dcs_authz::AuthorizationGate;
use dcs_credentials::InMemoryCredentialSource;
use dcs_revocation::RevocationHandle;
use dcs_templates::TemplateRepository;
use dcs_types::Clock;
use dcs_workflow::ContractWorkflowEngine;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ContractWorkflowEngine>,
    pub templates: Arc<TemplateRepository>,
    pub gate: Arc<AuthorizationGate>,

    /// Where signers publish the credentials they bind at signing
    pub credentials: Arc<InMemoryCredentialSource>,

    /// Revocation reactor handle
    pub revocations: RevocationHandle,

    pub clock: Arc<dyn Clock>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(services: &Services) -> Self {
        Self {
            engine: services.engine.clone(),
            templates: services.templates.clone(),
            gate: services.gate.clone(),
            credentials: services.source.clone(),
            revocations: services.revocations.clone(),
            started_at: services.clock.now(),
            clock: services.clock.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (self.clock.now() - self.started_at).num_seconds().max(0);

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
