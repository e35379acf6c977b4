use image_service::config::ImageServiceConfig;
use image_service::services::metrics;
use image_service::startup::Application;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    let otlp_endpoint = std::env::var("OTLP_ENDPOINT").ok();
    init_tracing("image-service", "info", otlp_endpoint.as_deref());

    if let Err(e) = metrics::init_metrics() {
        tracing::error!("Failed to initialize metrics: {}", e);
    }

    let config = ImageServiceConfig::load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    let application = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to build application: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    application.run_until_stopped().await
}
