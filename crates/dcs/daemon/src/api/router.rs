//! API Router configuration

use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        // Templates
        .route("/templates", get(handlers::search_templates))
        .route("/templates", post(handlers::create_template))
        .route("/templates/:id", get(handlers::latest_template))
        .route("/templates/:id", put(handlers::update_template))
        .route("/templates/:id/versions", get(handlers::template_history))
        .route("/templates/:id/versions/:version", get(handlers::template_version))
        .route("/templates/:id/submit", post(handlers::submit_template))
        .route("/templates/:id/approve", post(handlers::approve_template))
        .route("/templates/:id/reject", post(handlers::reject_template))
        .route("/templates/:id/deprecate", post(handlers::deprecate_template))
        // Contracts
        .route("/contracts", get(handlers::search_contracts))
        .route("/contracts", post(handlers::create_contract))
        .route("/contracts/:id", get(handlers::get_contract))
        .route("/contracts/:id/review", get(handlers::review_contract))
        .route("/contracts/:id/history", get(handlers::contract_history))
        .route("/contracts/:id/negotiate", post(handlers::negotiate_contract))
        .route("/contracts/:id/respond", post(handlers::respond_contract))
        .route("/contracts/:id/submit", post(handlers::submit_contract))
        .route("/contracts/:id/approve", post(handlers::approve_contract))
        .route("/contracts/:id/reject", post(handlers::reject_contract))
        .route("/contracts/:id/compliance", post(handlers::check_compliance))
        .route("/contracts/:id/evidence", post(handlers::store_evidence))
        // Signing
        .route("/contracts/:id/signing", post(handlers::initiate_signing))
        .route("/contracts/:id/signing/finalize", post(handlers::finalize_signing))
        .route(
            "/contracts/:id/signers/:signer/credentials",
            post(handlers::request_credentials),
        )
        .route("/contracts/:id/signers/:signer/message", get(handlers::signing_message))
        .route("/contracts/:id/signers/:signer/signature", post(handlers::apply_signature))
        .route(
            "/contracts/:id/signers/:signer/validation",
            get(handlers::validate_signature),
        )
        .route(
            "/contracts/:id/signers/:signer/revocation",
            post(handlers::revoke_signature),
        )
        .route("/credentials", post(handlers::publish_credential))
        // Deployment and post-signing lifecycle
        .route("/contracts/:id/deploy", post(handlers::deploy_contract))
        .route(
            "/contracts/:id/deployments/:correlation/ack",
            post(handlers::acknowledge_deployment),
        )
        .route(
            "/contracts/:id/deployments/:correlation/failure",
            post(handlers::report_deployment_failure),
        )
        .route("/contracts/:id/execution", post(handlers::confirm_execution))
        .route("/contracts/:id/renewal", post(handlers::request_renewal))
        .route("/contracts/:id/termination", post(handlers::request_termination))
        .route("/contracts/:id/pending/approve", post(handlers::approve_pending))
        .route("/contracts/:id/pending/reject", post(handlers::reject_pending))
        // Audit
        .route("/audit/query", post(handlers::query_audit))
        .route("/audit/report", post(handlers::audit_report))
        .route("/audit/export", post(handlers::export_audit))
        .route("/audit/verify", get(handlers::verify_audit_chain))
        // Compliance incidents and the event feed
        .route("/incidents", post(handlers::report_incident))
        .route("/incidents", get(handlers::list_incidents))
        .route("/incidents/:id/resolve", post(handlers::resolve_incident))
        .route("/monitor", get(handlers::monitor))
        // Revocations
        .route("/revocations/credentials", post(handlers::revoke_credential))
        .route("/revocations/roles", post(handlers::revoke_role))
        .route("/revocations/assignments", post(handlers::revoke_assignment));

    // Build router with middleware
    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(TraceLayer::new_for_http());

    let router = if config.enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
