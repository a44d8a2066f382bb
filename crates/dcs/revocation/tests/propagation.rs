use chrono::Duration;
use dcs_authz::{roles, AuthorizationGate, InMemoryRoleStore};
use dcs_credentials::testing::{TestIssuer, TestSubject};
use dcs_credentials::{
    CachedRevocationRegistry, Credential, CredentialScope, CredentialVerifier, InMemoryCredentialSource,
    InMemoryRevocationRegistry, RevocationRegistry, TrustStore,
};
use dcs_ledger::{AuditFilter, AuditLedger};
use dcs_revocation::{spawn, PropagationReport, RevocationHandle, RevocationPropagator, RevocationSignal};
use dcs_signature::{LocalTimestampAuthority, LocalWallet, SignatureDeps, SignatureManager, SignatureTimeouts};
use dcs_storage::{Decision, InMemoryDcsStorage};
use dcs_templates::{NewTemplate, TemplateRepository};
use dcs_types::{
    Action, Actor, ActorId, Clock, Contract, ContractMetadata, ContractState, DcsError, EntityRef, FlagKind, ManualClock,
    Party, Role, SequencingMode, SignerId, SignerSpec, TemplateId, TemplateRef,
};
use dcs_workflow::{
    ContractWorkflowEngine, EngineConfig, EngineDeps, InMemoryArchive, InMemoryTarget, NewContract,
    SigningRequest, TerminationRequest,
};
use std::sync::Arc;

struct Fixture {
    clock: Arc<ManualClock>,
    registry: Arc<InMemoryRevocationRegistry>,
    cache: Arc<CachedRevocationRegistry>,
    alice_identity: Credential,
    bob_identity: Credential,
    engine: Arc<ContractWorkflowEngine>,
    handle: RevocationHandle,
    _keys: (TestIssuer, TestSubject, TestSubject),
}

fn manager() -> Actor {
    Actor::human("mgr")
}

fn approver() -> Actor {
    Actor::human("legal")
}

fn security() -> Actor {
    Actor::human("secadmin")
}

async fn fixture(config: EngineConfig) -> Fixture {
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
        ("tpl-approver", roles::TEMPLATE_APPROVER),
        ("legal", roles::CONTRACT_APPROVER),
        ("mgr", roles::CONTRACT_MANAGER),
        ("mgr", roles::ARCHIVE_MANAGER),
        ("alice", roles::CONTRACT_SIGNER),
        ("bob", roles::CONTRACT_SIGNER),
        ("secadmin", roles::SECURITY_ADMINISTRATOR),
        ("dcs-engine", roles::SECURITY_ADMINISTRATOR),
    ] {
        gate.provision(&ActorId::new(actor), Role::new(role)).await.unwrap();
    }

    let templates = Arc::new(TemplateRepository::new(storage.clone(), gate.clone(), ledger.clone()));
    let carol = Actor::human("carol");
    let nda = TemplateId::new("NDA");
    templates
        .create(
            &carol,
            NewTemplate {
                id: Some(nda.clone()),
                name: "Mutual NDA".into(),
                schema_ref: "schemas/nda.json".into(),
                body: serde_json::json!({ "term_months": 12 }),
            },
        )
        .await
        .unwrap();
    templates.submit_for_review(&carol, &nda).await.unwrap();
    templates
        .approve(&Actor::human("tpl-approver"), &nda, None)
        .await
        .unwrap();

    let trust = Arc::new(TrustStore::new());
    let issuer = TestIssuer::root("gov-ca", &trust);
    let registry = Arc::new(InMemoryRevocationRegistry::new());
    let cache = Arc::new(CachedRevocationRegistry::new(
        registry.clone(),
        clock.clone(),
        std::time::Duration::from_secs(5),
    ));
    let verifier = Arc::new(CredentialVerifier::new(
        trust,
        cache.clone(),
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
    source.publish(issuer.poa(&alice, CredentialScope::organization("acme"), now)).unwrap();
    source.publish(bob_identity.clone()).unwrap();
    source.publish(issuer.poa(&bob, CredentialScope::organization("globex"), now)).unwrap();
    wallet.register(SignerId::new("alice"), alice.signing_key().clone()).unwrap();
    wallet.register(SignerId::new("bob"), bob.signing_key().clone()).unwrap();

    let signatures = Arc::new(SignatureManager::new(
        SignatureDeps {
            sessions: storage.clone(),
            credentials: source,
            verifier,
            wallet,
            timestamps: Arc::new(LocalTimestampAuthority::generate("tsa", clock.clone())),
            ledger: ledger.clone(),
        },
        SignatureTimeouts::default(),
    ));
    let engine = Arc::new(ContractWorkflowEngine::new(
        EngineDeps {
            contracts: storage.clone(),
            templates,
            gate,
            ledger,
            signatures,
            archive: Arc::new(InMemoryArchive::new()),
            target: Arc::new(InMemoryTarget::new("erp", clock.clone())),
        },
        config,
    ));
    let propagator = RevocationPropagator::new(engine.clone(), registry.clone()).with_cache(cache.clone());
    let (handle, _task) = spawn(Arc::new(propagator), 64);
    engine.set_termination_hook(Arc::new(handle.clone()));

    Fixture {
        clock,
        registry,
        cache,
        alice_identity,
        bob_identity,
        engine,
        handle,
        _keys: (issuer, alice, bob),
    }
}

impl Fixture {
    async fn signed(&self) -> Contract {
        let carol = Actor::human("carol");
        let contract = self
            .engine
            .create(
                &carol,
                NewContract {
                    id: None,
                    template: TemplateRef::new("NDA", 1),
                    metadata: ContractMetadata {
                        title: "NDA".into(),
                        parties: vec![
                            Party {
                                name: "Acme".into(),
                                organization: "acme".into(),
                            },
                            Party {
                                name: "Globex".into(),
                                organization: "globex".into(),
                            },
                        ],
                        ..ContractMetadata::default()
                    },
                    content: None,
                },
            )
            .await
            .unwrap();
        let id = contract.id;
        self.engine.submit_for_approval(&carol, &id).await.unwrap();
        self.engine
            .approve(&approver(), &id, &Role::new(roles::CONTRACT_APPROVER))
            .await
            .unwrap();
        self.engine
            .initiate_signing(
                &manager(),
                &id,
                SigningRequest {
                    signers: vec![SignerSpec::new("alice", "acme"), SignerSpec::new("bob", "globex")],
                    mode: SequencingMode::Strict,
                    deadline: self.clock.now() + Duration::days(7),
                },
            )
            .await
            .unwrap();
        let mut last = None;
        for who in ["alice", "bob"] {
            let actor = Actor::human(who);
            let signer = SignerId::new(who);
            self.engine.request_credentials(&actor, &id, &signer).await.unwrap();
            last = Some(self.engine.apply_signature(&actor, &id, &signer, None).await.unwrap());
        }
        let outcome = last.unwrap();
        assert_eq!(outcome.contract.state, ContractState::Signed);
        outcome.contract
    }

    /// Everything queued before this returns has been propagated.
    async fn drain(&self) {
        let report = self
            .handle
            .submit_and_wait(
                security(),
                RevocationSignal::Assignment {
                    actor: ActorId::new("nobody"),
                    role: Role::new(roles::CONTRACT_OBSERVER),
                },
            )
            .await
            .unwrap();
        assert!(matches!(report, PropagationReport::Assignment { was_assigned: false, .. }));
    }
}

#[tokio::test]
async fn credential_signal_reaches_cache_registry_and_contracts() {
    let f = fixture(EngineConfig::default()).await;
    let contract = f.signed().await;
    assert!(!f.cache.status(&f.alice_identity.id).await.unwrap().is_revoked());

    let report = f
        .handle
        .submit_and_wait(
            security(),
            RevocationSignal::Credential {
                id: f.alice_identity.id.clone(),
                reason: "key compromise".into(),
                at: None,
            },
        )
        .await
        .unwrap();
    let PropagationReport::Credential(report) = report else {
        panic!("unexpected report {report:?}");
    };
    assert_eq!(report.flagged_contracts, vec![contract.id.clone()]);

    // Seen immediately despite the cached Good answer.
    assert!(f.cache.status(&f.alice_identity.id).await.unwrap().is_revoked());
    assert!(f.registry.status(&f.alice_identity.id).await.unwrap().is_revoked());

    let flagged = f.engine.retrieve(&manager(), &contract.id).await.unwrap();
    assert!(flagged.has_open_flag(FlagKind::NonCompliant));
}

#[tokio::test]
async fn signals_need_revocation_authority() {
    let f = fixture(EngineConfig::default()).await;
    let err = f
        .handle
        .submit_and_wait(
            manager(),
            RevocationSignal::Credential {
                id: f.bob_identity.id.clone(),
                reason: "no reason".into(),
                at: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DcsError::AuthorizationDenied(_)));
    assert!(!f.registry.status(&f.bob_identity.id).await.unwrap().is_revoked());

    let err = f
        .handle
        .submit_and_wait(
            security(),
            RevocationSignal::Credential {
                id: f.bob_identity.id.clone(),
                reason: "  ".into(),
                at: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DcsError::InvalidInput(_)));

    // Both refusals are on record against the credential.
    let denials = f
        .engine
        .ledger()
        .query(AuditFilter {
            decision: Some(Decision::Deny),
            ..AuditFilter::for_entity(EntityRef::Credential(f.bob_identity.id.clone()))
        })
        .collect_all()
        .await
        .unwrap();
    assert_eq!(denials.len(), 2);
    assert!(denials.iter().all(|e| e.action == Action::RevocationApply));
    assert!(denials[1].reason.as_deref().unwrap().contains("reason is required"));
}

#[tokio::test]
async fn role_signal_withdraws_approvals_under_review() {
    let f = fixture(EngineConfig {
        approver_roles: vec![Role::new(roles::CONTRACT_APPROVER), Role::new(roles::COMPLIANCE_OFFICER)],
        ..EngineConfig::default()
    })
    .await;
    let carol = Actor::human("carol");
    let contract = f
        .engine
        .create(
            &carol,
            NewContract {
                id: None,
                template: TemplateRef::new("NDA", 1),
                metadata: ContractMetadata::default(),
                content: None,
            },
        )
        .await
        .unwrap();
    f.engine.submit_for_approval(&carol, &contract.id).await.unwrap();
    f.engine
        .approve(&approver(), &contract.id, &Role::new(roles::CONTRACT_APPROVER))
        .await
        .unwrap();

    let report = f
        .handle
        .submit_and_wait(
            security(),
            RevocationSignal::Assignment {
                actor: ActorId::new("legal"),
                role: Role::new(roles::CONTRACT_APPROVER),
            },
        )
        .await
        .unwrap();
    match report {
        PropagationReport::Assignment {
            was_assigned,
            contracts,
            ..
        } => {
            assert!(was_assigned);
            assert_eq!(contracts, vec![contract.id.clone()]);
        }
        other => panic!("unexpected report {other:?}"),
    }
    let current = f.engine.retrieve(&manager(), &contract.id).await.unwrap();
    assert!(current.approvals.is_empty());
}

#[tokio::test]
async fn termination_revokes_signer_credentials_through_the_reactor() {
    let f = fixture(EngineConfig {
        revoke_credentials_on_termination: true,
        ..EngineConfig::default()
    })
    .await;
    let ending = f.signed().await;
    let other = f.signed().await;

    f.engine
        .request_termination(
            &manager(),
            &ending.id,
            TerminationRequest {
                effective_date: f.clock.now(),
                reason: Some("mutual agreement".into()),
            },
        )
        .await
        .unwrap();
    let terminated = f
        .engine
        .approve_pending(&approver(), &ending.id, &Role::new(roles::CONTRACT_APPROVER))
        .await
        .unwrap();
    assert_eq!(terminated.state, ContractState::Terminated);

    f.drain().await;
    assert!(f.registry.status(&f.alice_identity.id).await.unwrap().is_revoked());
    assert!(f.registry.status(&f.bob_identity.id).await.unwrap().is_revoked());

    // The closed contract is left alone; the one still in force is flagged.
    let closed = f.engine.retrieve(&manager(), &ending.id).await.unwrap();
    assert_eq!(closed.open_flags().count(), 0);
    let flagged = f.engine.retrieve(&manager(), &other.id).await.unwrap();
    assert_eq!(flagged.state, ContractState::Signed);
    assert!(flagged.open_flags().count() >= 2);
}

#[tokio::test]
async fn stopped_reactor_refuses_new_signals() {
    let f = fixture(EngineConfig::default()).await;
    f.handle.shutdown().await;
    let mut refused = false;
    for _ in 0..50 {
        let result = f
            .handle
            .submit(
                security(),
                RevocationSignal::Role {
                    role: Role::new(roles::CONTRACT_OBSERVER),
                },
            )
            .await;
        if result.is_err() {
            refused = true;
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(refused);
}
