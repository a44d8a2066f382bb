#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use dcs_authz::{roles, AuthorizationGate, InMemoryRoleStore};
use dcs_credentials::testing::{TestIssuer, TestSubject};
use dcs_credentials::{
    Credential, CredentialScope, CredentialVerifier, InMemoryCredentialSource,
    InMemoryRevocationRegistry, TrustStore,
};
use dcs_ledger::AuditLedger;
use dcs_signature::{LocalTimestampAuthority, LocalWallet, SignatureDeps, SignatureManager, SignatureTimeouts};
use dcs_storage::InMemoryDcsStorage;
use dcs_templates::{NewTemplate, TemplateRepository};
use dcs_types::{
    Actor, ActorId, Clock, Contract, ContractId, ContractMetadata, ContractState, ManualClock,
    Party, Role, SequencingMode, SignerId, SignerSpec, TemplateId, TemplateRef,
};
use dcs_workflow::{
    ContractWorkflowEngine, EngineConfig, EngineDeps, InMemoryArchive, InMemoryTarget, NewContract,
    SigningRequest,
};
use std::sync::Arc;

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub storage: Arc<InMemoryDcsStorage>,
    pub ledger: Arc<AuditLedger>,
    pub gate: Arc<AuthorizationGate>,
    pub templates: Arc<TemplateRepository>,
    pub registry: Arc<InMemoryRevocationRegistry>,
    pub source: Arc<InMemoryCredentialSource>,
    pub issuer: TestIssuer,
    pub alice: TestSubject,
    pub bob: TestSubject,
    pub alice_identity: Credential,
    pub bob_identity: Credential,
    pub archive: Arc<InMemoryArchive>,
    pub target: Arc<InMemoryTarget>,
    pub engine: Arc<ContractWorkflowEngine>,
}

pub fn creator() -> Actor {
    Actor::human("carol")
}

pub fn negotiator() -> Actor {
    Actor::human("dave")
}

pub fn approver() -> Actor {
    Actor::human("legal")
}

pub fn manager() -> Actor {
    Actor::human("mgr")
}

pub fn alice() -> Actor {
    Actor::human("alice")
}

pub fn bob() -> Actor {
    Actor::human("bob")
}

pub fn security() -> Actor {
    Actor::human("secadmin")
}

pub fn approver_role() -> Role {
    Role::new(roles::CONTRACT_APPROVER)
}

pub fn nda() -> TemplateRef {
    TemplateRef::new("NDA", 1)
}

pub async fn harness() -> Harness {
    harness_with(EngineConfig::default()).await
}

pub async fn harness_with(config: EngineConfig) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let storage = Arc::new(InMemoryDcsStorage::new());
    let ledger = Arc::new(AuditLedger::new(storage.clone(), clock.clone()));
    let gate = Arc::new(AuthorizationGate::new(
        Arc::new(InMemoryRoleStore::with_standard_roles()),
        ledger.clone(),
        std::time::Duration::from_secs(1),
    ));
    for (actor, role) in [
        ("carol", roles::CONTRACT_CREATOR),
        ("carol", roles::TEMPLATE_CREATOR),
        ("dave", roles::CONTRACT_NEGOTIATOR),
        ("tpl-approver", roles::TEMPLATE_APPROVER),
        ("legal", roles::CONTRACT_APPROVER),
        ("mgr", roles::CONTRACT_MANAGER),
        ("mgr", roles::ARCHIVE_MANAGER),
        ("alice", roles::CONTRACT_SIGNER),
        ("bob", roles::CONTRACT_SIGNER),
        ("secadmin", roles::SECURITY_ADMINISTRATOR),
        ("secadmin", roles::COMPLIANCE_OFFICER),
    ] {
        gate.provision(&ActorId::new(actor), Role::new(role)).await.unwrap();
    }

    let templates = Arc::new(TemplateRepository::new(storage.clone(), gate.clone(), ledger.clone()));
    let tpl_approver = Actor::human("tpl-approver");
    templates
        .create(
            &creator(),
            NewTemplate {
                id: Some(TemplateId::new("NDA")),
                name: "Mutual NDA".into(),
                schema_ref: "schemas/nda.json".into(),
                body: serde_json::json!({ "term_months": 12, "jurisdiction": "DE" }),
            },
        )
        .await
        .unwrap();
    templates.submit_for_review(&creator(), &TemplateId::new("NDA")).await.unwrap();
    templates
        .approve(&tpl_approver, &TemplateId::new("NDA"), Some("ok".into()))
        .await
        .unwrap();

    let trust = Arc::new(TrustStore::new());
    let issuer = TestIssuer::root("gov-ca", &trust);
    let registry = Arc::new(InMemoryRevocationRegistry::new());
    let verifier = Arc::new(CredentialVerifier::new(
        trust,
        registry.clone(),
        ledger.clone(),
        std::time::Duration::from_millis(200),
    ));
    let source = Arc::new(InMemoryCredentialSource::new());
    let wallet = Arc::new(LocalWallet::new());
    let now = clock.now();
    let alice = TestSubject::new("alice");
    let bob = TestSubject::new("bob");
    let alice_identity = issuer.identity(&alice, now);
    let bob_identity = issuer.identity(&bob, now);
    source.publish(alice_identity.clone()).unwrap();
    source
        .publish(issuer.poa(&alice, CredentialScope::organization("acme"), now))
        .unwrap();
    source.publish(bob_identity.clone()).unwrap();
    source
        .publish(issuer.poa(&bob, CredentialScope::organization("globex"), now))
        .unwrap();
    wallet.register(SignerId::new("alice"), alice.signing_key().clone()).unwrap();
    wallet.register(SignerId::new("bob"), bob.signing_key().clone()).unwrap();

    let signatures = Arc::new(SignatureManager::new(
        SignatureDeps {
            sessions: storage.clone(),
            credentials: source.clone(),
            verifier,
            wallet,
            timestamps: Arc::new(LocalTimestampAuthority::generate("tsa", clock.clone())),
            ledger: ledger.clone(),
        },
        SignatureTimeouts::default(),
    ));
    let archive = Arc::new(InMemoryArchive::new());
    let target = Arc::new(InMemoryTarget::new("erp", clock.clone()));
    let engine = Arc::new(ContractWorkflowEngine::new(
        EngineDeps {
            contracts: storage.clone(),
            templates: templates.clone(),
            gate: gate.clone(),
            ledger: ledger.clone(),
            signatures,
            archive: archive.clone(),
            target: target.clone(),
        },
        config,
    ));

    Harness {
        clock,
        storage,
        ledger,
        gate,
        templates,
        registry,
        source,
        issuer,
        alice,
        bob,
        alice_identity,
        bob_identity,
        archive,
        target,
        engine,
    }
}

pub fn metadata() -> ContractMetadata {
    ContractMetadata {
        title: "Acme / Globex NDA".into(),
        parties: vec![
            Party {
                name: "Acme GmbH".into(),
                organization: "acme".into(),
            },
            Party {
                name: "Globex Inc".into(),
                organization: "globex".into(),
            },
        ],
        ..ContractMetadata::default()
    }
}

impl Harness {
    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn draft(&self) -> Contract {
        self.engine
            .create(
                &creator(),
                NewContract {
                    id: None,
                    template: nda(),
                    metadata: metadata(),
                    content: None,
                },
            )
            .await
            .unwrap()
    }

    pub async fn approved(&self) -> Contract {
        let contract = self.draft().await;
        self.engine.submit_for_approval(&creator(), &contract.id).await.unwrap();
        let approved = self.engine.approve(&approver(), &contract.id, &approver_role()).await.unwrap();
        assert_eq!(approved.state, ContractState::Approved);
        approved
    }

    pub fn signing_request(&self, mode: SequencingMode) -> SigningRequest {
        SigningRequest {
            signers: vec![SignerSpec::new("alice", "acme"), SignerSpec::new("bob", "globex")],
            mode,
            deadline: self.clock.now() + Duration::days(7),
        }
    }

    pub async fn in_signing(&self, mode: SequencingMode) -> Contract {
        let contract = self.approved().await;
        self.engine
            .initiate_signing(&manager(), &contract.id, self.signing_request(mode))
            .await
            .unwrap()
            .contract
    }

    pub async fn sign(&self, id: &ContractId, who: &Actor) -> dcs_workflow::SignatureOutcome {
        let signer = SignerId::new(who.id.as_str());
        self.engine.request_credentials(who, id, &signer).await.unwrap();
        self.engine.apply_signature(who, id, &signer, None).await.unwrap()
    }

    pub async fn signed(&self) -> Contract {
        let contract = self.in_signing(SequencingMode::Strict).await;
        self.sign(&contract.id, &alice()).await;
        let outcome = self.sign(&contract.id, &bob()).await;
        assert!(outcome.finalized);
        assert_eq!(outcome.contract.state, ContractState::Signed);
        outcome.contract
    }

    pub async fn contract(&self, id: &ContractId) -> Contract {
        self.engine.retrieve(&manager(), id).await.unwrap()
    }
}
