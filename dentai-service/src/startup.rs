//! Application startup and lifecycle management.

use crate::config::{DentaiConfig, ProviderKind};
use crate::handlers;
use crate::services::providers::gemini::{GeminiConfig, GeminiProvider};
use crate::services::providers::mock::MockProvider;
use crate::services::providers::GenerativeProvider;
use crate::services::{ClinicGateway, WorkspaceRegistry};
use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Uploaded images travel as data URIs inside JSON bodies.
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: DentaiConfig,
    pub gateway: ClinicGateway,
    pub workspaces: WorkspaceRegistry,
}

impl AppState {
    pub fn new(config: DentaiConfig, provider: Arc<dyn GenerativeProvider>) -> Self {
        let gateway = ClinicGateway::new(provider, config.models.clone());
        let workspaces = WorkspaceRegistry::new(
            gateway.clone(),
            config.default_location,
            config.workspaces.clone(),
        );
        Self {
            config,
            gateway,
            workspaces,
        }
    }
}

/// Construct the provider selected by configuration.
pub fn build_provider(config: &DentaiConfig) -> Result<Arc<dyn GenerativeProvider>, AppError> {
    match config.provider {
        ProviderKind::Gemini => {
            let gemini_config = GeminiConfig::new(
                config.google.api_key.clone(),
                Duration::from_secs(config.models.request_timeout_secs),
            );
            let provider = GeminiProvider::new(gemini_config)
                .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;

            tracing::info!(
                summary_model = %config.models.summary_model,
                image_model = %config.models.image_model,
                grounded_model = %config.models.grounded_model,
                chat_model = %config.models.chat_model,
                "Initialized Gemini provider"
            );
            Ok(Arc::new(provider))
        }
        ProviderKind::Mock => {
            tracing::warn!("Using mock generative provider");
            Ok(Arc::new(MockProvider::new()))
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/api/workspaces", post(handlers::workspaces::create_workspace))
        .route(
            "/api/workspaces/:id",
            get(handlers::workspaces::get_workspace).delete(handlers::workspaces::close_workspace),
        )
        .route("/api/workspaces/:id/view", put(handlers::workspaces::navigate))
        .route(
            "/api/workspaces/:id/actions",
            post(handlers::workspaces::dispatch_action),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(CorsLayer::permissive())
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application with the provider named in `config`.
    pub async fn build(config: DentaiConfig) -> Result<Self, AppError> {
        let provider = build_provider(&config)?;
        Self::build_with_provider(config, provider).await
    }

    /// Build the application around an already constructed provider.
    pub async fn build_with_provider(
        config: DentaiConfig,
        provider: Arc<dyn GenerativeProvider>,
    ) -> Result<Self, AppError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let state = AppState::new(config, provider);

        // Port 0 picks a random port for testing
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let shutdown = CancellationToken::new();
        state.workspaces.spawn_sweeper(shutdown.clone());

        tracing::info!(
            port,
            provider = state.gateway.provider_name(),
            idle_ttl_secs = state.config.workspaces.idle_ttl_secs,
            max_workspaces = state.config.workspaces.max_open,
            "DentAI service listening"
        );

        Ok(Self {
            port,
            listener,
            state,
            shutdown,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then let in-flight requests finish.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = build_router(self.state);
        let result = axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| {
                tracing::error!("HTTP server error: {}", e);
                e
            });
        self.shutdown.cancel();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    fn router() -> Router {
        let config = DentaiConfig::offline();
        build_router(AppState::new(config, Arc::new(MockProvider::new())))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_served_with_security_headers() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn unknown_workspace_is_not_found() {
        let uri = format!("/api/workspaces/{}", uuid::Uuid::new_v4());
        let response = router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn gemini_provider_builds_without_a_key() {
        let mut config = DentaiConfig::offline();
        config.provider = ProviderKind::Gemini;
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "gemini");
    }

    #[tokio::test]
    async fn readiness_failure_does_not_expose_the_api_key() {
        let provider = GeminiProvider::new(GeminiConfig {
            api_key: "SECRET".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();
        let app = build_router(AppState::new(DentaiConfig::offline(), Arc::new(provider)));

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"], "network_error");
        assert!(!body.to_string().contains("SECRET"));
    }

    #[tokio::test]
    async fn workspace_limit_answers_too_many_requests() {
        let mut config = DentaiConfig::offline();
        config.workspaces.max_open = 1;
        let app = build_router(AppState::new(config, Arc::new(MockProvider::new())));

        let create = || {
            Request::builder()
                .method("POST")
                .uri("/api/workspaces")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(create()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app.oneshot(create()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
    }
}
