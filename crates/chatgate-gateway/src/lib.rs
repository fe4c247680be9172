//! HTTP surface for the chat gateway: `AccessGate` middleware, `ChatHandler`
//! routes, JWKS cache, SSE framing, server bootstrap and config (§4.1, §4.2,
//! §6). `router()` builds the route table standalone so integration tests
//! can drive it without binding a socket; `serve()` binds and runs it with
//! a graceful-shutdown drain.

pub mod access_gate;
pub mod chat_handler;
pub mod config;
pub mod health;
pub mod jwks;
pub mod respond;
pub mod state;

pub use config::{ConfigError, GatewayConfig};
pub use state::GatewayState;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// §5: graceful shutdown drain budget.
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(15);

/// Assembles the full route table (§6.1). Separated from [`serve`] so
/// integration tests can drive it with `tower::ServiceExt::oneshot` without
/// binding a socket (SPEC_FULL §11 test tooling).
pub fn router(state: Arc<GatewayState>) -> Router {
    let authenticated = Router::new()
        .route("/v1/models", get(chat_handler::list_models))
        .route("/v1/chat/completions", post(chat_handler::create_completion))
        .route_layer(middleware::from_fn_with_state(state.clone(), access_gate::authenticate));

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/live", get(health::live))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds and serves `router(state)` until a shutdown signal (Ctrl-C) is
/// received, then drains in-flight requests for at most [`SHUTDOWN_DRAIN`]
/// before forcing the listener closed (§5, SPEC_FULL §13). Ctrl-C stops
/// axum from accepting new connections immediately; in-flight requests get
/// up to `SHUTDOWN_DRAIN` to finish on their own before this function
/// returns regardless of whether they have.
pub async fn serve(state: Arc<GatewayState>) -> anyhow::Result<()> {
    let addr = state.config.socket_addr();
    let app = router(state);

    tracing::info!(%addr, "chatgate listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let (signalled_tx, mut signalled_rx) = tokio::sync::mpsc::channel::<()>(1);

    let serve_fut = axum::serve(listener, app).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received, draining in-flight requests");
        let _ = signalled_tx.send(()).await;
    });

    tokio::select! {
        result = serve_fut => result?,
        _ = async {
            signalled_rx.recv().await;
            tokio::time::sleep(SHUTDOWN_DRAIN).await;
        } => {
            tracing::warn!("graceful shutdown drain window elapsed; forcing exit");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chatgate_agents::Orchestrator;
    use std::time::Duration as StdDuration;
    use tower::ServiceExt;

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            jwks_url: "http://localhost/jwks".to_string(),
            primary_is_a: true,
            fallback_enabled: true,
            agent_a_binary: None,
            agent_b_binary: None,
            agent_timeout: StdDuration::from_secs(5),
            max_tokens: 4096,
            default_temperature: 0.7,
            metrics_enabled: true,
            audit_enabled: true,
            admin_emails: vec![],
        }
    }

    #[tokio::test]
    async fn live_and_ready_do_not_require_auth() {
        let orchestrator = Orchestrator::new(None, None, true, true, 4096);
        let state = Arc::new(GatewayState::new(test_config(), orchestrator));
        let app = router(state);

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let resp = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        // no drivers registered -> not ready
        assert_eq!(resp.status(), 503);
    }

    #[tokio::test]
    async fn models_without_bearer_token_is_unauthorized() {
        let orchestrator = Orchestrator::new(None, None, true, true, 4096);
        let state = Arc::new(GatewayState::new(test_config(), orchestrator));
        let app = router(state);

        let resp = app
            .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
    }
}
