//! Assembly of the service graph from configuration

use crate::config::{DcsConfig, TargetConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::sweeper::Sweeper;
use crate::target::HttpTargetSystem;
use dcs_authz::{AuthorizationGate, InMemoryRoleStore};
use dcs_credentials::{
    CachedRevocationRegistry, CredentialVerifier, InMemoryCredentialSource,
    InMemoryRevocationRegistry, TrustStore,
};
use dcs_ledger::AuditLedger;
use dcs_revocation::{RevocationHandle, RevocationPropagator};
use dcs_signature::{LocalTimestampAuthority, LocalWallet, SignatureDeps, SignatureManager};
use dcs_storage::InMemoryDcsStorage;
use dcs_templates::TemplateRepository;
use dcs_types::{Actor, ActorId, Clock, IssuerId, Role};
use dcs_workflow::{
    ContractWorkflowEngine, EngineDeps, InMemoryArchive, InMemoryTarget, TargetSystem,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Every long-lived component of one daemon instance.
pub struct Services {
    pub clock: Arc<dyn Clock>,
    pub storage: Arc<InMemoryDcsStorage>,
    pub ledger: Arc<AuditLedger>,
    pub gate: Arc<AuthorizationGate>,
    pub templates: Arc<TemplateRepository>,
    pub trust: Arc<TrustStore>,
    pub registry: Arc<InMemoryRevocationRegistry>,
    pub source: Arc<InMemoryCredentialSource>,
    pub archive: Arc<InMemoryArchive>,
    pub engine: Arc<ContractWorkflowEngine>,
    pub revocations: RevocationHandle,
    reactor: Option<JoinHandle<()>>,
}

impl Services {
    /// Build the graph and start the revocation reactor. Must run inside a
    /// tokio runtime.
    pub async fn build(config: &DcsConfig, clock: Arc<dyn Clock>) -> DaemonResult<Self> {
        let storage = Arc::new(InMemoryDcsStorage::new());
        let ledger = Arc::new(AuditLedger::new(storage.clone(), clock.clone()));

        let gate = Arc::new(AuthorizationGate::new(
            Arc::new(InMemoryRoleStore::with_standard_roles()),
            ledger.clone(),
            config.authz.permission_ttl(),
        ));
        let engine_id = Actor::engine().id;
        for role in &config.authz.engine_roles {
            gate.provision(&engine_id, Role::new(role.as_str())).await?;
        }
        for assignment in &config.authz.assignments {
            gate.provision(&ActorId::new(assignment.actor.as_str()), Role::new(assignment.role.as_str()))
                .await?;
        }

        let templates = Arc::new(TemplateRepository::new(storage.clone(), gate.clone(), ledger.clone()));

        let trust = Arc::new(TrustStore::new());
        for anchor in &config.credentials.trust_anchors {
            let key_len = hex::decode(&anchor.public_key).map(|k| k.len()).unwrap_or(0);
            if key_len != 32 {
                return Err(DaemonError::Config(format!(
                    "trust anchor {} needs a hex ed25519 public key",
                    anchor.issuer
                )));
            }
            trust.add_root(IssuerId::new(anchor.issuer.as_str()), anchor.public_key.as_str());
        }
        let registry = Arc::new(InMemoryRevocationRegistry::new());
        let cache = Arc::new(CachedRevocationRegistry::new(
            registry.clone(),
            clock.clone(),
            config.revocation.cache_ttl(),
        ));
        let verifier = Arc::new(CredentialVerifier::new(
            trust.clone(),
            cache.clone(),
            ledger.clone(),
            config.timeouts.credential_verify(),
        ));
        let source = Arc::new(InMemoryCredentialSource::new());

        // Signers present their own signatures over HTTP; the wallet stays empty.
        let signatures = Arc::new(SignatureManager::new(
            SignatureDeps {
                sessions: storage.clone(),
                credentials: source.clone(),
                verifier,
                wallet: Arc::new(LocalWallet::new()),
                timestamps: Arc::new(LocalTimestampAuthority::generate("dcs-tsa", clock.clone())),
                ledger: ledger.clone(),
            },
            config.timeouts.signature(),
        ));

        let archive = Arc::new(InMemoryArchive::new());
        let target: Arc<dyn TargetSystem> = match &config.target {
            TargetConfig::Memory { name } => Arc::new(InMemoryTarget::new(name.as_str(), clock.clone())),
            TargetConfig::Http {
                name,
                url,
                timeout_secs,
            } => Arc::new(HttpTargetSystem::new(
                name.as_str(),
                url.as_str(),
                Duration::from_secs(*timeout_secs),
            )?),
        };
        info!(target_system = target.name(), "deployment target configured");

        let engine = Arc::new(ContractWorkflowEngine::new(
            EngineDeps {
                contracts: storage.clone(),
                templates: templates.clone(),
                gate: gate.clone(),
                ledger: ledger.clone(),
                signatures,
                archive: archive.clone(),
                target,
            },
            config.engine.clone(),
        ));

        let propagator = Arc::new(RevocationPropagator::new(engine.clone(), registry.clone()).with_cache(cache));
        let (revocations, reactor) = dcs_revocation::spawn(propagator, config.revocation.queue_capacity);
        engine.set_termination_hook(Arc::new(revocations.clone()));

        Ok(Self {
            clock,
            storage,
            ledger,
            gate,
            templates,
            trust,
            registry,
            source,
            archive,
            engine,
            revocations,
            reactor: Some(reactor),
        })
    }

    pub fn sweeper(&self, interval: Duration) -> Sweeper {
        Sweeper::new(self.engine.clone(), interval).with_templates(self.templates.clone())
    }

    /// Drain the reactor, then close the ledger to further appends.
    pub async fn shutdown(mut self) -> DaemonResult<()> {
        self.revocations.shutdown().await;
        if let Some(reactor) = self.reactor.take() {
            reactor
                .await
                .map_err(|e| DaemonError::Server(format!("revocation reactor: {e}")))?;
        }
        self.ledger.close();
        info!("services stopped");
        Ok(())
    }
}
