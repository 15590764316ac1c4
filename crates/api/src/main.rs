use anyhow::Context;

use depot_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    depot_observability::init();

    let config = AppConfig::from_env().context("loading configuration")?;
    let app = depot_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "depot-api listening");

    axum::serve(listener, app).await?;
    Ok(())
}
