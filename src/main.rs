/// Tapglue - activity feed and connection graph backend
///
/// Serves the versioned REST API for accounts, applications, end-users,
/// connections and events on top of Redis.
use anyhow::Context;
use tapglue::{config::ServerConfig, context::AppContext, server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("loading configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config.logging.level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Tapglue v{} starting", env!("CARGO_PKG_VERSION"));

    let ctx = AppContext::new(config).await.context("building application context")?;
    server::serve(ctx).await.context("serving")?;

    Ok(())
}
