//! HTTP JSON surface for the callout
//!
//! Mirrors the gRPC callout for gateways that call out over plain HTTP, and
//! exposes the rule cache for operators.

use super::shim::{CalloutInvocation, CalloutShim, Diagnostics, BUILD_TIME};
use actix_web::{web, HttpResponse, HttpResponseBuilder};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// Register the callout routes. Expects `web::Data<Arc<CalloutShim>>` in app data.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/v1/evaluate", web::post().to(evaluate_handler))
        .route("/v1/rules/status", web::get().to(rules_status_handler))
        .route("/v1/rules/refresh", web::post().to(rules_refresh_handler));
}

/// Attach diagnostic headers to a response
fn with_diagnostics(mut builder: HttpResponseBuilder, diagnostics: Option<&Diagnostics>) -> HttpResponseBuilder {
    if let Some(diagnostics) = diagnostics {
        for (name, value) in diagnostics.headers() {
            builder.insert_header((name, value));
        }
    }
    builder
}

/// Diagnostics for responses that are not tied to an invocation
fn instance_diagnostics(shim: &CalloutShim) -> Option<Diagnostics> {
    shim.config().diagnostic_headers.then(|| Diagnostics {
        build_time: BUILD_TIME.clone(),
        invocation_count: shim.invocation_count(),
    })
}

/// Health check
pub async fn health_check(shim: web::Data<Arc<CalloutShim>>) -> HttpResponse {
    with_diagnostics(HttpResponse::Ok(), instance_diagnostics(&shim).as_ref()).json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": crate::VERSION,
    }))
}

/// Decide one invocation. Any JSON body gets a verdict.
pub async fn evaluate_handler(body: web::Json<Value>, shim: web::Data<Arc<CalloutShim>>) -> HttpResponse {
    let outcome = shim.decide(CalloutInvocation::from_json(&body)).await;

    with_diagnostics(HttpResponse::Ok(), outcome.diagnostics.as_ref()).json(json!({
        "verdict": outcome.verdict,
        "matched": outcome.decision.matched,
        "groups": outcome.caller.groups,
        "invocation_id": outcome.invocation_id.to_string(),
    }))
}

/// Rule cache statistics
pub async fn rules_status_handler(shim: web::Data<Arc<CalloutShim>>) -> HttpResponse {
    with_diagnostics(HttpResponse::Ok(), instance_diagnostics(&shim).as_ref()).json(shim.store().stats())
}

/// Force a refresh of the rule table
pub async fn rules_refresh_handler(shim: web::Data<Arc<CalloutShim>>) -> HttpResponse {
    let diagnostics = instance_diagnostics(&shim);

    match shim.store().force_refresh().await {
        Ok(_) => with_diagnostics(HttpResponse::Ok(), diagnostics.as_ref()).json(shim.store().stats()),
        Err(e) => {
            warn!("Manual rule refresh failed: {}", e);
            with_diagnostics(HttpResponse::ServiceUnavailable(), diagnostics.as_ref()).json(json!({
                "error": e.to_string(),
                "category": e.category(),
            }))
        }
    }
}
