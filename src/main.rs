use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;

use request_logger::{config::AppConfig, create_app, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;

    telemetry::init_tracing(&config.logging)?;
    info!("Configuration loaded successfully");

    init_metrics(&config)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = create_app(config);

    let listener = TcpListener::bind(&addr).await?;
    info!("Request logger demo listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_metrics(config: &AppConfig) -> Result<()> {
    if config.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics.port))
            .install()?;

        info!("Metrics exporter initialized on port {}", config.metrics.port);
    }

    Ok(())
}
