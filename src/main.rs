use llmrelay::config::Settings;
use llmrelay::error::{Error, Result};
use llmrelay::Gateway;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("llmrelay=info")),
        )
        .init();

    if let Err(err) = run().await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let settings = Settings::load()?;
    let gateway = Gateway::from_settings(&settings).await?;

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind {}: {}", settings.listen_addr, e)))?;
    tracing::info!("listening on {}", settings.listen_addr);

    axum::serve(listener, gateway.router())
        .await
        .map_err(|e| Error::Config(format!("server error: {}", e)))
}
