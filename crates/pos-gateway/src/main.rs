//! POS Gateway Server entry point
//!
//! Run with:
//! ```bash
//! cargo run -p pos-gateway
//! ```
//!
//! Configuration is loaded from environment variables.

use pos_common::{try_init_tracing_with_config, AppConfig, TracingConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Load configuration first so the log format can follow APP_ENV
    let config = AppConfig::from_env();

    let tracing_config = match &config {
        Ok(config) => TracingConfig::for_environment(config.app.env),
        Err(_) => TracingConfig::default(),
    };
    if let Err(e) = try_init_tracing_with_config(&tracing_config) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!(error = %e, code = e.error_code(), "Gateway failed");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> pos_common::AppResult<()> {
    info!(
        name = %config.app.name,
        env = ?config.app.env,
        port = config.gateway.port,
        path = %config.gateway.upgrade_path,
        "Starting POS Gateway Server..."
    );

    pos_gateway::run(config).await?;

    info!("Gateway stopped");
    Ok(())
}
