mod common;

use chrono::Duration;
use common::*;
use dcs_ledger::{AuditFilter, Decision};
use dcs_signature::CertificateStatus;
use dcs_templates::NewTemplate;
use dcs_types::{
    Action, ContentHash, ContractId, ContractState, DcsError, EntityRef, FlagKind, SequencingMode,
    SessionStatus, SignerId, SignerStatus, TemplateId, TemplateRef,
};
use dcs_workflow::{transitions, ContractEdit, NewContract, RenewalRequest, TargetMode, TerminationRequest};

#[tokio::test]
async fn creating_from_an_approved_template_opens_the_audit_trail() {
    let h = harness().await;
    let contract = h.draft().await;

    assert_eq!(contract.state, ContractState::Draft);
    assert_eq!(contract.template, nda());
    assert_eq!(contract.current_version(), 1);
    assert!(contract.id.as_str().starts_with("contract-"));

    let history = h.engine.history(&manager(), &contract.id).await.unwrap();
    assert_eq!(history.len(), 1);
    let first = &history[0];
    assert_eq!(first.action, Action::ContractCreate);
    assert_eq!(first.actor, creator());
    assert_eq!(first.prior_state.as_deref(), Some("none"));
    assert_eq!(first.new_state.as_deref(), Some("draft"));
    assert_eq!(first.content_hash.as_ref(), Some(&contract.content_hash));
    assert_eq!(first.timestamp, contract.created_at);

    let other = h.draft().await;
    assert_ne!(other.id, contract.id);
}

#[tokio::test]
async fn unapproved_templates_cannot_back_a_contract() {
    let h = harness().await;
    h.templates
        .create(
            &creator(),
            NewTemplate {
                id: Some(TemplateId::new("MSA")),
                name: "Master services".into(),
                schema_ref: "schemas/msa.json".into(),
                body: serde_json::json!({ "fees": [] }),
            },
        )
        .await
        .unwrap();

    for template in [TemplateRef::new("MSA", 1), TemplateRef::new("MISSING", 1)] {
        let id = ContractId::new(format!("c-{}", template.template_id));
        let err = h
            .engine
            .create(
                &creator(),
                NewContract {
                    id: Some(id.clone()),
                    template,
                    metadata: metadata(),
                    content: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DcsError::InvalidTemplateState(_)), "{err}");

        let denied = h.engine.history(&manager(), &id).await.unwrap();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].decision, Decision::Deny);
        assert!(h.engine.retrieve(&manager(), &id).await.is_err());
    }
}

#[tokio::test]
async fn strict_order_refuses_bob_before_alice() {
    let h = harness().await;
    let contract = h.in_signing(SequencingMode::Strict).await;
    let session_id = contract.active_session.clone().unwrap();
    let bob_id = SignerId::new("bob");

    h.engine.request_credentials(&bob(), &contract.id, &bob_id).await.unwrap();
    let err = h
        .engine
        .apply_signature(&bob(), &contract.id, &bob_id, None)
        .await
        .unwrap_err();
    match err {
        DcsError::OrderDependencyNotMet { signer, waiting_on } => {
            assert_eq!(signer, "bob");
            assert_eq!(waiting_on, vec!["alice".to_string()]);
        }
        other => panic!("unexpected {other}"),
    }

    let session = h.engine.signatures().session(&session_id).await.unwrap();
    let entry = session.entry(&bob_id).unwrap();
    assert_eq!(entry.status, SignerStatus::CredentialsBound);
    assert!(entry.signature.is_none());
    assert_eq!(h.contract(&contract.id).await.state, ContractState::SigningInProgress);

    h.sign(&contract.id, &alice()).await;
    let outcome = h.engine.apply_signature(&bob(), &contract.id, &bob_id, None).await.unwrap();
    assert!(outcome.session_complete);
    assert!(outcome.finalized);
    assert_eq!(outcome.contract.state, ContractState::Signed);
    assert_eq!(outcome.contract.archive_refs.len(), 1);
    assert!(outcome.contract.active_session.is_none());
}

#[tokio::test]
async fn signing_after_the_deadline_is_refused() {
    let h = harness().await;
    let contract = h.approved().await;
    let mut request = h.signing_request(SequencingMode::Parallel);
    request.deadline = h.clock_now() + Duration::hours(1);
    let started = h.engine.initiate_signing(&manager(), &contract.id, request).await.unwrap();
    let alice_id = SignerId::new("alice");
    h.engine.request_credentials(&alice(), &contract.id, &alice_id).await.unwrap();

    h.clock.advance(Duration::hours(2));
    let err = h
        .engine
        .apply_signature(&alice(), &contract.id, &alice_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DcsError::DeadlineExpired { .. }), "{err}");
    let session = h.engine.signatures().session(&started.session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Open);
    assert!(session.entry(&alice_id).unwrap().signature.is_none());

    let expired = h.engine.expire_signing_sessions(&manager()).await.unwrap();
    assert_eq!(expired, vec![contract.id.clone()]);
    let contract = h.contract(&contract.id).await;
    assert_eq!(contract.state, ContractState::Approved);
    assert!(contract.active_session.is_none());
    let session = h.engine.signatures().session(&started.session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Expired);

    // The contract may be sent for signing again.
    let again = h
        .engine
        .initiate_signing(&manager(), &contract.id, h.signing_request(SequencingMode::Parallel))
        .await
        .unwrap();
    assert_ne!(again.session.id, started.session.id);
}

#[tokio::test]
async fn revoked_credential_makes_a_prior_signature_non_compliant() {
    let h = harness().await;
    let contract = h.signed().await;
    let alice_id = SignerId::new("alice");

    let report = h.engine.validate_signature(&manager(), &contract.id, &alice_id).await.unwrap();
    assert!(report.policy_compliant);

    h.registry
        .revoke(
            h.alice_identity.id.clone(),
            dcs_credentials::Revocation {
                revoked_at: h.clock_now(),
                reason: "key compromise".into(),
            },
        )
        .unwrap();

    let report = h.engine.validate_signature(&manager(), &contract.id, &alice_id).await.unwrap();
    assert!(!report.policy_compliant);
    assert!(matches!(report.certificate_status, CertificateStatus::Revoked { .. }));
    assert!(report.crypto_valid);

    let flagged = h.contract(&contract.id).await;
    assert!(flagged.has_open_flag(FlagKind::NonCompliant));
    assert_eq!(flagged.state, ContractState::Signed);
    let open: Vec<_> = flagged.open_flags().collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].signer, alice_id);

    // Validating again does not raise a second flag.
    h.engine.validate_signature(&manager(), &contract.id, &alice_id).await.unwrap();
    assert_eq!(h.contract(&contract.id).await.open_flags().count(), 1);

    let bob_report = h
        .engine
        .validate_signature(&manager(), &contract.id, &SignerId::new("bob"))
        .await
        .unwrap();
    assert!(bob_report.policy_compliant);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_submissions_have_one_winner() {
    let h = harness().await;
    let contract = h.draft().await;

    let (creator_actor, negotiator_actor) = (creator(), negotiator());
    let (a, b) = tokio::join!(
        h.engine.submit_for_approval(&creator_actor, &contract.id),
        h.engine.submit_for_approval(&negotiator_actor, &contract.id),
    );
    let results = [a, b];
    let won = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, 1);
    let lost = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(lost, DcsError::IllegalTransition(_)), "{lost}");

    let submits = h
        .ledger
        .query(AuditFilter::for_entity(EntityRef::Contract(contract.id.clone())).with_action(Action::ContractSubmit))
        .collect_all()
        .await
        .unwrap();
    assert_eq!(submits.len(), 2);
    assert_eq!(submits.iter().filter(|e| e.decision == Decision::Allow).count(), 1);
    assert_eq!(h.contract(&contract.id).await.state, ContractState::UnderReview);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_edits_on_one_base_never_lose_updates() {
    let h = harness().await;
    let contract = h.draft().await;

    let edits = (0..4).map(|n| {
        let engine = h.engine.clone();
        let id = contract.id.clone();
        tokio::spawn(async move {
            engine
                .negotiate(
                    &negotiator(),
                    &id,
                    ContractEdit {
                        base_version: 1,
                        content: serde_json::json!({ "term_months": 13 + n, "jurisdiction": "DE" }),
                        summary: Some(format!("edit {n}")),
                    },
                )
                .await
        })
    });
    let results = futures::future::join_all(edits).await;
    let ok = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(DcsError::VersionConflict { base: 1, current: 2 }))))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 3);
    assert_eq!(h.contract(&contract.id).await.versions.len(), 2);
}

#[tokio::test]
async fn content_is_locked_from_submission_until_rejection() {
    let h = harness().await;
    let contract = h.draft().await;
    let edit = |base| ContractEdit {
        base_version: base,
        content: serde_json::json!({ "term_months": 24, "jurisdiction": "DE" }),
        summary: None,
    };

    h.engine.submit_for_approval(&creator(), &contract.id).await.unwrap();
    let err = h.engine.negotiate(&negotiator(), &contract.id, edit(1)).await.unwrap_err();
    assert!(matches!(err, DcsError::ContentLocked(_)), "{err}");

    // Feedback is still accepted while under review.
    let commented = h.engine.respond(&negotiator(), &contract.id, "term too short").await.unwrap();
    assert_eq!(commented.comments.len(), 1);

    let err = h.engine.reject(&approver(), &contract.id, "  ").await.unwrap_err();
    assert!(matches!(err, DcsError::InvalidInput(_)));
    let back = h.engine.reject(&approver(), &contract.id, "extend the term").await.unwrap();
    assert_eq!(back.state, ContractState::Draft);
    assert_eq!(back.last_rejection.as_ref().unwrap().reason, "extend the term");

    let edited = h.engine.negotiate(&negotiator(), &contract.id, edit(1)).await.unwrap();
    assert_eq!(edited.current_version(), 2);
    assert_eq!(edited.content_hash, ContentHash::of_json(&edited.content).unwrap());

    let review = h.engine.review(&manager(), &contract.id).await.unwrap();
    assert_eq!(review.previous_version, Some(1));
    assert_eq!(review.diff.len(), 1);
    assert_eq!(review.diff[0].path, "/term_months");

    let err = h.engine.negotiate(&negotiator(), &contract.id, edit(1)).await.unwrap_err();
    assert!(matches!(err, DcsError::VersionConflict { base: 1, current: 2 }));
}

#[tokio::test]
async fn replaying_a_signature_adds_nothing() {
    let h = harness().await;
    let contract = h.in_signing(SequencingMode::Parallel).await;
    let first = h.sign(&contract.id, &alice()).await;
    assert!(first.newly_signed);
    let signature = first.session.entry(&SignerId::new("alice")).unwrap().signature.clone();

    let before = h.ledger.len().await.unwrap();
    let replay = h
        .engine
        .apply_signature(&alice(), &contract.id, &SignerId::new("alice"), None)
        .await
        .unwrap();
    assert!(!replay.newly_signed);
    assert_eq!(replay.session.entry(&SignerId::new("alice")).unwrap().signature, signature);
    assert_eq!(h.ledger.len().await.unwrap(), before);
}

#[tokio::test]
async fn only_the_signer_may_sign() {
    let h = harness().await;
    let contract = h.in_signing(SequencingMode::Parallel).await;
    let err = h
        .engine
        .request_credentials(&bob(), &contract.id, &SignerId::new("alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, DcsError::AuthorizationDenied(_)));

    let err = h
        .engine
        .apply_signature(&creator(), &contract.id, &SignerId::new("alice"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DcsError::AuthorizationDenied(_)));
}

#[tokio::test]
async fn audited_states_follow_the_transition_table() {
    let h = harness().await;
    h.target.set_mode(TargetMode::Acknowledge);
    let contract = h.signed().await;
    let id = contract.id.clone();

    let deployed = h.engine.deploy(&manager(), &id).await.unwrap();
    assert_eq!(deployed.state, ContractState::Deployed);
    h.engine.confirm_execution(&manager(), &id).await.unwrap();
    h.engine
        .request_renewal(&manager(), &id, RenewalRequest::default())
        .await
        .unwrap();
    h.engine.reject_pending(&approver(), &id, "not yet").await.unwrap();
    h.engine
        .request_renewal(
            &manager(),
            &id,
            RenewalRequest {
                renewed_until: Some(h.clock_now() + Duration::days(365)),
                reason: Some("annual".into()),
            },
        )
        .await
        .unwrap();
    let renewed = h.engine.approve_pending(&approver(), &id, &approver_role()).await.unwrap();
    assert_eq!(renewed.state, ContractState::Renewed);
    assert_eq!(renewed.renewals.len(), 1);
    h.engine
        .request_termination(
            &manager(),
            &id,
            TerminationRequest {
                effective_date: h.clock_now() + Duration::days(30),
                reason: Some("superseded".into()),
            },
        )
        .await
        .unwrap();
    let terminated = h.engine.approve_pending(&approver(), &id, &approver_role()).await.unwrap();
    assert_eq!(terminated.state, ContractState::Terminated);
    assert!(terminated.termination.is_some());

    let err = h
        .engine
        .negotiate(
            &negotiator(),
            &id,
            ContractEdit {
                base_version: 1,
                content: serde_json::json!({}),
                summary: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DcsError::IllegalTransition(_)));

    let history = h.engine.history(&manager(), &id).await.unwrap();
    let moves: Vec<(String, String)> = history
        .iter()
        .filter(|e| e.decision == Decision::Allow)
        .filter_map(|e| Some((e.prior_state.clone()?, e.new_state.clone()?)))
        .collect();
    let mut current = "none".to_string();
    for (prior, new) in &moves {
        assert!(transitions::is_recorded_edge(prior, new), "{prior} -> {new}");
        assert_eq!(prior, &current);
        current = new.clone();
    }
    assert_eq!(current, "terminated");
    for pair in history.windows(2) {
        assert!(pair[0].sequence < pair[1].sequence);
    }
}

#[tokio::test]
async fn audit_tools_are_gated_and_exports_are_recorded() {
    let h = harness().await;
    let contract = h.approved().await;

    let err = h.engine.audit_query(&manager(), AuditFilter::default()).await.unwrap_err();
    assert!(matches!(err, DcsError::AuthorizationDenied(_)));

    let filter = AuditFilter::for_entity(EntityRef::Contract(contract.id.clone()));
    let entries = h.engine.audit_query(&security(), filter.clone()).await.unwrap();
    assert_eq!(entries.len(), 3);

    let exported = h
        .engine
        .audit_export(&security(), filter, dcs_ledger::ExportFormat::JsonLines)
        .await
        .unwrap();
    assert_eq!(exported.entry_count, 3);
    let imported = h
        .engine
        .audit_import(&security(), &exported.body, dcs_ledger::ExportFormat::JsonLines)
        .await
        .unwrap();
    let sequences: Vec<u64> = imported.entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, entries.iter().map(|e| e.sequence).collect::<Vec<_>>());

    let exports = h
        .engine
        .audit_query(&security(), AuditFilter::default().with_action(Action::AuditExport))
        .await
        .unwrap();
    assert_eq!(exports.len(), 1);
    assert!(h.engine.verify_audit_chain(&security()).await.unwrap().is_intact());
}
