mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::*;
use dcs_ledger::AuditFilter;
use dcs_storage::Decision;
use dcs_types::{
    Action, ContentHash, EntityRef, ContractId, ContractState, CredentialId, DcsError, DcsResult, DeploymentStatus,
};
use dcs_workflow::{
    CompliancePolicy, EngineConfig, EngineTimeouts, NewEvidence, RetryPolicy, TargetMode,
    TerminationHook, TerminationRequest,
};
use std::sync::{Arc, Mutex};

fn quick_ack() -> EngineConfig {
    EngineConfig {
        retry_policy: RetryPolicy::MaxAttempts { attempts: 2 },
        timeouts: EngineTimeouts {
            target_dispatch_ms: 50,
            target_ack_secs: 60,
            ..EngineTimeouts::default()
        },
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn unacknowledged_deployment_fails_and_is_retried() {
    let h = harness_with(quick_ack()).await;
    let contract = h.signed().await;

    let pending = h.engine.deploy(&manager(), &contract.id).await.unwrap();
    assert_eq!(pending.state, ContractState::DeploymentPending);
    let first = pending.pending_deployment().unwrap().clone();
    assert_eq!(first.attempt, 1);
    assert_eq!(first.target, "erp");
    assert_eq!(h.target.payloads()[0].correlation_id, first.correlation_id);

    assert!(h.engine.expire_overdue_deployments(&manager()).await.unwrap().is_empty());
    h.clock.advance(Duration::seconds(61));
    let failed = h.engine.expire_overdue_deployments(&manager()).await.unwrap();
    assert_eq!(failed, vec![contract.id.clone()]);
    let contract_now = h.contract(&contract.id).await;
    assert_eq!(contract_now.state, ContractState::Failed);
    assert!(matches!(contract_now.deployments[0].status, DeploymentStatus::Failed { .. }));

    // A late callback for the failed attempt changes nothing.
    let err = h
        .engine
        .acknowledge_deployment(&manager(), &contract.id, &first.correlation_id, h.clock_now())
        .await
        .unwrap_err();
    assert!(matches!(err, DcsError::IllegalTransition(_)), "{err}");

    let retry = h.engine.deploy(&manager(), &contract.id).await.unwrap();
    let second = retry.pending_deployment().unwrap().clone();
    assert_eq!(second.attempt, 2);
    assert_ne!(second.correlation_id, first.correlation_id);

    let deployed = h
        .engine
        .acknowledge_deployment(&manager(), &contract.id, &second.correlation_id, h.clock_now())
        .await
        .unwrap();
    assert_eq!(deployed.state, ContractState::Deployed);

    // Duplicate acknowledgements are answered with the unchanged contract.
    let again = h
        .engine
        .acknowledge_deployment(&manager(), &contract.id, &second.correlation_id, h.clock_now())
        .await
        .unwrap();
    assert_eq!(again.revision, deployed.revision);

    let executed = h.engine.confirm_execution(&manager(), &contract.id).await.unwrap();
    assert_eq!(executed.state, ContractState::Executed);
}

#[tokio::test]
async fn rejected_dispatches_exhaust_the_retry_policy() {
    let h = harness_with(quick_ack()).await;
    let contract = h.signed().await;
    h.target.set_mode(TargetMode::Reject("erp down".into()));

    for attempt in 1..=2u32 {
        let failed = h.engine.deploy(&manager(), &contract.id).await.unwrap();
        assert_eq!(failed.state, ContractState::Failed);
        assert_eq!(failed.deployments.len(), attempt as usize);
        match &failed.deployments.last().unwrap().status {
            DeploymentStatus::Failed { reason, .. } => assert!(reason.contains("erp down")),
            other => panic!("unexpected {other:?}"),
        }
    }
    let err = h.engine.deploy(&manager(), &contract.id).await.unwrap_err();
    assert!(matches!(err, DcsError::RetryLimitExceeded(_)), "{err}");
    assert_eq!(h.contract(&contract.id).await.state, ContractState::Failed);
}

#[tokio::test]
async fn hanging_target_is_cancelled_into_failed() {
    let h = harness_with(quick_ack()).await;
    let contract = h.signed().await;
    h.target.set_mode(TargetMode::Hang);
    let failed = h.engine.deploy(&manager(), &contract.id).await.unwrap();
    assert_eq!(failed.state, ContractState::Failed);
    // Signatures survive the cancellation.
    let validated = h
        .engine
        .validate_signature(&manager(), &contract.id, &dcs_types::SignerId::new("alice"))
        .await
        .unwrap();
    assert!(validated.policy_compliant);
}

#[tokio::test]
async fn acknowledgement_after_the_deadline_fails_the_attempt() {
    let h = harness_with(quick_ack()).await;
    let contract = h.signed().await;
    let pending = h.engine.deploy(&manager(), &contract.id).await.unwrap();
    let attempt = pending.pending_deployment().unwrap().clone();

    let late = attempt.ack_deadline + Duration::seconds(1);
    let failed = h
        .engine
        .acknowledge_deployment(&manager(), &contract.id, &attempt.correlation_id, late)
        .await
        .unwrap();
    assert_eq!(failed.state, ContractState::Failed);
}

#[tokio::test]
async fn deployment_is_only_valid_once_signed() {
    let h = harness().await;
    let contract = h.approved().await;
    let err = h.engine.deploy(&manager(), &contract.id).await.unwrap_err();
    assert!(matches!(err, DcsError::IllegalTransition(_)));
    let err = h.engine.confirm_execution(&manager(), &contract.id).await.unwrap_err();
    assert!(matches!(err, DcsError::IllegalTransition(_)));
}

#[tokio::test]
async fn open_flags_block_execution_under_the_blocking_policy() {
    let h = harness_with(EngineConfig {
        compliance_policy: CompliancePolicy::BlockExecution,
        ..EngineConfig::default()
    })
    .await;
    h.target.set_mode(TargetMode::Acknowledge);
    let contract = h.signed().await;

    let flagged = h
        .engine
        .revoke_signature(&manager(), &contract.id, &dcs_types::SignerId::new("bob"), "signed in error")
        .await
        .unwrap();
    assert_eq!(flagged.open_flags().count(), 1);
    let err = h.engine.deploy(&manager(), &contract.id).await.unwrap_err();
    assert!(matches!(err, DcsError::IllegalTransition(_)), "{err}");

    let advisory = harness().await;
    advisory.target.set_mode(TargetMode::Acknowledge);
    let other = advisory.signed().await;
    advisory
        .engine
        .revoke_signature(&manager(), &other.id, &dcs_types::SignerId::new("bob"), "signed in error")
        .await
        .unwrap();
    let deployed = advisory.engine.deploy(&manager(), &other.id).await.unwrap();
    assert_eq!(deployed.state, ContractState::Deployed);
}

#[derive(Default)]
struct RecordingHook {
    calls: Mutex<Vec<(ContractId, Vec<CredentialId>, DateTime<Utc>)>>,
}

#[async_trait]
impl TerminationHook for RecordingHook {
    async fn on_termination(
        &self,
        contract_id: &ContractId,
        credentials: Vec<CredentialId>,
        effective_date: DateTime<Utc>,
    ) -> DcsResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push((contract_id.clone(), credentials, effective_date));
        Ok(())
    }
}

#[tokio::test]
async fn termination_needs_approval_and_notifies_the_hook() {
    let h = harness_with(EngineConfig {
        revoke_credentials_on_termination: true,
        ..EngineConfig::default()
    })
    .await;
    let hook = Arc::new(RecordingHook::default());
    h.engine.set_termination_hook(hook.clone());
    let contract = h.signed().await;
    let effective = h.clock_now() + Duration::days(30);

    let pending = h
        .engine
        .request_termination(
            &manager(),
            &contract.id,
            TerminationRequest {
                effective_date: effective,
                reason: Some("breach".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(pending.state, ContractState::TerminationPending);
    assert_eq!(pending.pending.as_ref().unwrap().origin, ContractState::Signed);

    // Not a configured termination approver role.
    let err = h
        .engine
        .approve_pending(&manager(), &contract.id, &dcs_types::Role::new("contract_manager"))
        .await
        .unwrap_err();
    assert!(matches!(err, DcsError::AuthorizationDenied(_)));
    assert!(hook.calls.lock().unwrap().is_empty());

    let terminated = h.engine.approve_pending(&approver(), &contract.id, &approver_role()).await.unwrap();
    assert_eq!(terminated.state, ContractState::Terminated);
    let termination = terminated.termination.as_ref().unwrap();
    assert_eq!(termination.effective_date, effective);
    assert_eq!(termination.reason.as_deref(), Some("breach"));
    assert!(terminated.pending.is_none());

    let calls = hook.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, contract.id);
    assert!(calls[0].1.contains(&h.alice_identity.id));
    assert!(calls[0].1.contains(&h.bob_identity.id));
    assert_eq!(calls[0].2, effective);
}

#[tokio::test]
async fn failed_termination_notice_keeps_the_committed_termination() {
    let h = harness_with(EngineConfig {
        revoke_credentials_on_termination: true,
        ..EngineConfig::default()
    })
    .await;
    let hook = Arc::new(RecordingHook::default());
    h.engine.set_termination_hook(hook.clone());
    let contract = h.signed().await;
    h.engine
        .request_termination(
            &manager(),
            &contract.id,
            TerminationRequest {
                effective_date: h.clock_now() + Duration::days(1),
                reason: None,
            },
        )
        .await
        .unwrap();

    h.storage.fail_session_listing(true);
    let terminated = h.engine.approve_pending(&approver(), &contract.id, &approver_role()).await.unwrap();
    h.storage.fail_session_listing(false);
    assert_eq!(terminated.state, ContractState::Terminated);
    assert_eq!(h.contract(&contract.id).await.state, ContractState::Terminated);
    assert!(hook.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn blank_reasons_are_refused_on_record() {
    let h = harness().await;
    let contract = h.draft().await;
    h.engine.submit_for_approval(&creator(), &contract.id).await.unwrap();

    let err = h.engine.reject(&approver(), &contract.id, "  ").await.unwrap_err();
    assert!(matches!(err, DcsError::InvalidInput(_)));
    let err = h.engine.respond(&negotiator(), &contract.id, "").await.unwrap_err();
    assert!(matches!(err, DcsError::InvalidInput(_)));
    assert_eq!(h.contract(&contract.id).await.state, ContractState::UnderReview);

    let denials = h
        .ledger
        .query(AuditFilter {
            decision: Some(Decision::Deny),
            ..AuditFilter::for_entity(EntityRef::Contract(contract.id.clone()))
        })
        .collect_all()
        .await
        .unwrap();
    let actions: Vec<_> = denials.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![Action::ContractReject, Action::ContractRespond]);
    assert!(denials.iter().all(|e| e.prior_state.as_deref() == Some("under_review")));

    let err = h
        .engine
        .create(
            &creator(),
            dcs_workflow::NewContract {
                id: Some(contract.id.clone()),
                template: nda(),
                metadata: metadata(),
                content: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DcsError::InvalidInput(_)));
    let refused = h
        .ledger
        .query(AuditFilter {
            decision: Some(Decision::Deny),
            ..AuditFilter::for_entity(EntityRef::Contract(contract.id.clone()))
        }
        .with_action(Action::ContractCreate))
        .collect_all()
        .await
        .unwrap();
    assert_eq!(refused.len(), 1);
}

#[tokio::test]
async fn every_configured_role_must_approve_a_renewal() {
    let h = harness_with(EngineConfig {
        renewal_approver_roles: vec![approver_role(), dcs_types::Role::new("compliance_officer")],
        ..EngineConfig::default()
    })
    .await;
    let contract = h.signed().await;
    h.engine
        .request_renewal(&manager(), &contract.id, Default::default())
        .await
        .unwrap();

    let partial = h.engine.approve_pending(&approver(), &contract.id, &approver_role()).await.unwrap();
    assert_eq!(partial.state, ContractState::RenewalPending);
    let repeat = h.engine.approve_pending(&approver(), &contract.id, &approver_role()).await.unwrap();
    assert_eq!(repeat.revision, partial.revision);

    // secadmin holds compliance_officer but has no PendingApprove capability.
    let err = h
        .engine
        .approve_pending(&security(), &contract.id, &dcs_types::Role::new("compliance_officer"))
        .await
        .unwrap_err();
    assert!(matches!(err, DcsError::AuthorizationDenied(_)));

    h.gate
        .provision(&dcs_types::ActorId::new("legal"), dcs_types::Role::new("compliance_officer"))
        .await
        .unwrap();
    let renewed = h
        .engine
        .approve_pending(&approver(), &contract.id, &dcs_types::Role::new("compliance_officer"))
        .await
        .unwrap();
    assert_eq!(renewed.state, ContractState::Renewed);
    assert_eq!(renewed.renewals.len(), 1);
}

#[tokio::test]
async fn evidence_is_attached_to_signed_contracts_only() {
    let h = harness().await;
    let draft = h.draft().await;
    let evidence = NewEvidence {
        kind: "delivery_receipt".into(),
        hash: ContentHash::of_bytes(b"receipt"),
        description: Some("courier receipt".into()),
    };
    let err = h.engine.store_evidence(&manager(), &draft.id, evidence.clone()).await.unwrap_err();
    assert!(matches!(err, DcsError::IllegalTransition(_)));

    let signed = h.signed().await;
    let stored = h.engine.store_evidence(&manager(), &signed.id, evidence).await.unwrap();
    assert_eq!(stored.evidence.len(), 1);
    assert_eq!(stored.evidence[0].stored_by.as_str(), "mgr");
    assert_eq!(stored.state, ContractState::Signed);
}
