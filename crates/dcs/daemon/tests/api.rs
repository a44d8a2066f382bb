use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Duration;
use dcs_authz::roles;
use dcs_credentials::testing::{TestIssuer, TestSubject};
use dcs_credentials::CredentialScope;
use dcs_daemon::api::{create_router, AppState};
use dcs_daemon::config::{RoleAssignment, TrustAnchor};
use dcs_daemon::{DcsConfig, Services};
use dcs_types::{Actor, Clock, ContractId, ManualClock};
use ed25519_dalek::Signer;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    services: Services,
    clock: Arc<ManualClock>,
    issuer: TestIssuer,
    alice: TestSubject,
}

async fn app() -> TestApp {
    let issuer = TestIssuer::untrusted("gov-ca");
    let mut config = DcsConfig::default();
    config.credentials.trust_anchors.push(TrustAnchor {
        issuer: "gov-ca".into(),
        public_key: issuer.public_key_hex(),
    });
    for (actor, role) in [
        ("carol", roles::CONTRACT_CREATOR),
        ("carol", roles::TEMPLATE_CREATOR),
        ("tpl", roles::TEMPLATE_APPROVER),
        ("legal", roles::CONTRACT_APPROVER),
        ("mgr", roles::CONTRACT_MANAGER),
        ("alice", roles::CONTRACT_SIGNER),
        ("secadmin", roles::SECURITY_ADMINISTRATOR),
        ("officer", roles::COMPLIANCE_OFFICER),
    ] {
        config.authz.assignments.push(RoleAssignment {
            actor: actor.into(),
            role: role.into(),
        });
    }

    let clock = Arc::new(ManualClock::default());
    let services = Services::build(&config, clock.clone()).await.unwrap();
    let router = create_router(AppState::new(&services), &config.server);
    TestApp {
        router,
        services,
        clock,
        issuer,
        alice: TestSubject::new("alice"),
    }
}

impl TestApp {
    async fn call(&self, method: &str, uri: &str, actor: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            builder = builder.header("x-dcs-actor", actor);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn approved_template(&self) {
        let (status, _) = self
            .call(
                "POST",
                "/api/v1/templates",
                Some("carol"),
                Some(json!({
                    "id": "NDA",
                    "name": "Mutual NDA",
                    "schema_ref": "schemas/nda.json",
                    "body": { "term_months": 12, "jurisdiction": "DE" }
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = self.call("POST", "/api/v1/templates/NDA/submit", Some("carol"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = self.call("POST", "/api/v1/templates/NDA/approve", Some("tpl"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "approved");
    }

    async fn approved_contract(&self) -> String {
        self.approved_template().await;
        let (status, contract) = self
            .call(
                "POST",
                "/api/v1/contracts",
                Some("carol"),
                Some(json!({
                    "template": { "template_id": "NDA", "version": 1 },
                    "metadata": {
                        "title": "Acme / Globex NDA",
                        "parties": [{ "name": "Acme GmbH", "organization": "acme" }]
                    }
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = contract["id"].as_str().unwrap().to_string();

        let (status, _) = self
            .call("POST", &format!("/api/v1/contracts/{id}/submit"), Some("carol"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, approved) = self
            .call(
                "POST",
                &format!("/api/v1/contracts/{id}/approve"),
                Some("legal"),
                Some(json!({ "role": roles::CONTRACT_APPROVER })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(approved["state"], "approved");
        id
    }

    /// Alice signs alone; returns the contract id and her identity credential id.
    async fn signed_contract(&self) -> (String, String) {
        let id = self.approved_contract().await;
        let deadline = self.clock.now() + Duration::days(7);
        let (status, _) = self
            .call(
                "POST",
                &format!("/api/v1/contracts/{id}/signing"),
                Some("mgr"),
                Some(json!({
                    "signers": [{ "signer_id": "alice", "organization": "acme" }],
                    "deadline": deadline
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let now = self.clock.now();
        let identity = self.issuer.identity(&self.alice, now);
        let poa = self.issuer.poa(&self.alice, CredentialScope::organization("acme"), now);
        for credential in [&identity, &poa] {
            let (status, _) = self
                .call("POST", "/api/v1/credentials", Some("alice"), Some(json!(credential)))
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let signer = format!("/api/v1/contracts/{id}/signers/alice");
        let (status, entry) = self.call("POST", &format!("{signer}/credentials"), Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK, "{entry}");
        let (_, message) = self.call("GET", &format!("{signer}/message"), Some("alice"), None).await;
        let message = message["message"].as_str().unwrap();
        let signature = hex::encode(self.alice.signing_key().sign(message.as_bytes()).to_bytes());

        let (status, outcome) = self
            .call(
                "POST",
                &format!("{signer}/signature"),
                Some("alice"),
                Some(json!({ "signature": signature })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{outcome}");
        assert_eq!(outcome["finalized"], true);
        assert_eq!(outcome["contract"]["state"], "signed");
        (id, identity.id.to_string())
    }
}

#[tokio::test]
async fn test_health_needs_no_identity() {
    let app = app().await;
    let (status, body) = app.call("GET", "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_requests_without_actor_are_unauthorized() {
    let app = app().await;
    let (status, body) = app.call("GET", "/api/v1/contracts", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "MISSING_ACTOR");
}

#[tokio::test]
async fn test_denials_map_to_client_errors() {
    let app = app().await;
    let (status, body) = app.call("GET", "/api/v1/contracts/nope", Some("carol"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["class"], "denial");

    let template = json!({ "name": "x", "schema_ref": "s", "body": {} });
    let (status, _) = app.call("POST", "/api/v1/templates", Some("alice"), Some(template)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let id = app.approved_contract().await;
    let (status, body) = app
        .call(
            "POST",
            &format!("/api/v1/contracts/{id}/negotiate"),
            Some("carol"),
            Some(json!({ "base_version": 1, "content": { "term_months": 24 } })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONTENT_LOCKED");
}

#[tokio::test]
async fn test_contract_is_signed_deployed_and_acknowledged() {
    let app = app().await;
    let (id, _) = app.signed_contract().await;

    let (status, pending) = app.call("POST", &format!("/api/v1/contracts/{id}/deploy"), Some("mgr"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["state"], "deployment_pending");
    let correlation = pending["deployments"][0]["correlation_id"].as_str().unwrap().to_string();

    let (status, deployed) = app
        .call(
            "POST",
            &format!("/api/v1/contracts/{id}/deployments/{correlation}/ack"),
            Some("mgr"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deployed["state"], "deployed");

    let (status, history) = app
        .call("GET", &format!("/api/v1/contracts/{id}/history"), Some("carol"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["action"].as_str())
        .collect();
    assert_eq!(actions.first(), Some(&"contract_create"));
    assert!(actions.contains(&"contract_deploy"));
    assert_eq!(actions.last(), Some(&"deployment_acknowledge"));
}

#[tokio::test]
async fn test_audit_is_restricted_and_chain_verifies() {
    let app = app().await;
    app.approved_contract().await;

    let (status, _) = app.call("POST", "/api/v1/audit/query", Some("carol"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, entries) = app
        .call(
            "POST",
            "/api/v1/audit/query",
            Some("secadmin"),
            Some(json!({ "actions": ["contract_approve"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entries.as_array().unwrap().len(), 1);

    let (status, chain) = app.call("GET", "/api/v1/audit/verify", Some("secadmin"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(chain["first_break"].is_null());
}

#[tokio::test]
async fn test_credential_revocation_flags_signed_contract() {
    let app = app().await;
    let (id, credential) = app.signed_contract().await;

    let request = json!({ "credential_id": credential, "reason": "key compromise" });
    let (status, _) = app
        .call("POST", "/api/v1/revocations/credentials", Some("carol"), Some(request.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, report) = app
        .call("POST", "/api/v1/revocations/credentials", Some("secadmin"), Some(request))
        .await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["kind"], "credential");
    assert_eq!(report["flagged_contracts"][0], id.as_str());

    let contract = app
        .services
        .engine
        .retrieve(&Actor::human("carol"), &ContractId::new(id))
        .await
        .unwrap();
    assert_eq!(contract.open_flags().count(), 1);
}

#[tokio::test]
async fn test_assignment_revocation_takes_effect_immediately() {
    let app = app().await;
    let (status, _) = app.call("GET", "/api/v1/contracts", Some("carol"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, report) = app
        .call(
            "POST",
            "/api/v1/revocations/assignments",
            Some("secadmin"),
            Some(json!({ "actor": "carol", "role": roles::CONTRACT_CREATOR })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["was_assigned"], true);

    let (status, _) = app.call("GET", "/api/v1/contracts", Some("carol"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.services.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_engine_identity_cannot_be_claimed_over_http() {
    let app = app().await;
    let (status, body) = app
        .call(
            "POST",
            "/api/v1/revocations/assignments",
            Some(Actor::engine().id.as_str()),
            Some(json!({ "actor": "carol", "role": roles::CONTRACT_CREATOR })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "RESERVED_ACTOR");

    let (status, _) = app.call("GET", "/api/v1/contracts", Some("carol"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_incidents_are_reported_listed_and_resolved() {
    let app = app().await;
    let id = app.approved_contract().await;

    let (status, incident) = app
        .call(
            "POST",
            "/api/v1/incidents",
            Some("officer"),
            Some(json!({ "contract_id": id, "description": "missing annex B" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(incident["kind"], "reported");
    let incident_id = incident["id"].as_u64().unwrap();

    let (status, _) = app
        .call(
            "POST",
            "/api/v1/incidents",
            Some("carol"),
            Some(json!({ "contract_id": id, "description": "me too" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, open) = app
        .call("GET", &format!("/api/v1/incidents?contract={id}&open=true"), Some("officer"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(open.as_array().unwrap().len(), 1);

    let (status, resolved) = app
        .call(
            "POST",
            &format!("/api/v1/incidents/{incident_id}/resolve"),
            Some("officer"),
            Some(json!({ "notes": "annex attached" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["resolution"]["notes"], "annex attached");

    let (status, _) = app
        .call(
            "POST",
            "/api/v1/incidents/424242/resolve",
            Some("officer"),
            Some(json!({ "notes": "n/a" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, open) = app.call("GET", "/api/v1/incidents?open=true", Some("officer"), None).await;
    assert!(open.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_monitor_feed_resumes_from_its_cursor() {
    let app = app().await;
    let (status, first) = app.call("GET", "/api/v1/monitor?limit=2", Some("officer"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["events"].as_array().unwrap().len(), 2);
    let next = first["next"].as_u64().unwrap();

    let (_, rest) = app
        .call("GET", &format!("/api/v1/monitor?after={next}"), Some("officer"), None)
        .await;
    let events = rest["events"].as_array().unwrap();
    assert!(events.iter().all(|e| e["sequence"].as_u64().unwrap() > next));

    let (status, _) = app.call("GET", "/api/v1/monitor", Some("carol"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_malformed_trust_anchor_is_a_config_error() {
    let mut config = DcsConfig::default();
    config.credentials.trust_anchors.push(TrustAnchor {
        issuer: "gov-ca".into(),
        public_key: "not-hex".into(),
    });
    let result = Services::build(&config, Arc::new(ManualClock::default())).await;
    assert!(matches!(result, Err(dcs_daemon::DaemonError::Config(_))));
}

#[tokio::test]
async fn test_sweeper_releases_idle_lock_slots() {
    let app = app().await;
    app.approved_contract().await;
    let sweeper = app.services.sweeper(std::time::Duration::from_secs(30));

    let report = sweeper.sweep_once().await.unwrap();
    assert!(report.is_empty());
    // One contract slot and one template slot were left behind.
    assert!(report.pruned_locks >= 2);
    assert_eq!(sweeper.sweep_once().await.unwrap().pruned_locks, 0);
}

#[tokio::test]
async fn test_sweeper_returns_expired_signing_to_approved() {
    let app = app().await;
    let id = app.approved_contract().await;
    let deadline = app.clock.now() + Duration::hours(1);
    let (status, _) = app
        .call(
            "POST",
            &format!("/api/v1/contracts/{id}/signing"),
            Some("mgr"),
            Some(json!({
                "signers": [{ "signer_id": "alice", "organization": "acme" }],
                "deadline": deadline
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let sweeper = app.services.sweeper(std::time::Duration::from_secs(30));
    assert!(sweeper.sweep_once().await.unwrap().is_empty());

    app.clock.advance(Duration::hours(2));
    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report.expired_sessions, vec![ContractId::new(id.as_str())]);

    let (_, contract) = app.call("GET", &format!("/api/v1/contracts/{id}"), Some("carol"), None).await;
    assert_eq!(contract["state"], "approved");
    assert!(contract["active_session"].is_null());
}
