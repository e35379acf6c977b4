//! Application startup and lifecycle management.

use crate::config::ImageServiceConfig;
use crate::handlers;
use crate::services::providers::openai::OpenAiImageProvider;
use crate::services::{ImageFetcher, ImageProvider};
use axum::{
    http::Method,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{request_id_middleware, REQUEST_ID_HEADER};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn ImageProvider>,
    pub fetcher: ImageFetcher,
}

impl AppState {
    pub fn new(provider: Arc<dyn ImageProvider>, fetcher: ImageFetcher) -> Self {
        Self { provider, fetcher }
    }
}

/// Build the HTTP router with CORS, tracing and request-id layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route("/images/generate", post(handlers::generate_images))
        .route("/images/generate/stream", post(handlers::stream_images))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: ImageServiceConfig) -> Result<Self, AppError> {
        let provider: Arc<dyn ImageProvider> =
            Arc::new(OpenAiImageProvider::new(config.openai_config()));

        tracing::info!(
            image_model = %config.openai.image_model,
            stream_model = %config.openai.stream_model,
            "Initialized OpenAI image provider"
        );

        let fetcher = ImageFetcher::new(config.fetch.timeout).map_err(|e| {
            tracing::error!("Failed to build image fetcher client: {}", e);
            AppError::InternalError(anyhow::Error::new(e))
        })?;

        Self::build_with_state(&config, AppState::new(provider, fetcher)).await
    }

    /// Build around an existing state, e.g. one holding a mock provider.
    pub async fn build_with_state(
        config: &ImageServiceConfig,
        state: AppState,
    ) -> Result<Self, AppError> {
        // Port 0 = random port for testing
        let addr = config.common.bind_address();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Image service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router: build_router(state),
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until a shutdown signal arrives.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
