//! Gateway daemon: supervisor plus the control HTTP surface.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use voltage_datacoll::store::{RedisStore, Store};
use voltage_datacoll::{api, Supervisor};

#[derive(Debug, Parser)]
#[command(name = "datacoll", about = "IEC 60870-5-104 telemetry acquisition gateway")]
struct Args {
    /// Redis URL of the shared store
    #[arg(long, env = "DATACOLL_REDIS_URL", default_value = "redis://127.0.0.1:6379/1")]
    redis_url: String,

    /// Listen address of the control API
    #[arg(long, env = "DATACOLL_LISTEN", default_value = "0.0.0.0:8080")]
    listen: String,
}

#[tokio::main]
async fn main() -> voltage_datacoll::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    info!(redis_url = %args.redis_url, "connecting to store");
    let store: Arc<dyn Store> = Arc::new(RedisStore::connect(&args.redis_url).await?);

    let supervisor = tokio::spawn(Supervisor::new(store.clone()).run());

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(listen = %args.listen, "control API listening");
    let server = axum::serve(listener, api::router(store));

    tokio::select! {
        result = server.with_graceful_shutdown(shutdown_signal()) => {
            if let Err(err) = result {
                error!(%err, "control API failed");
            }
        }
        result = supervisor => {
            match result {
                Ok(Ok(())) => info!("supervisor finished"),
                Ok(Err(err)) => error!(%err, "supervisor failed"),
                Err(err) => error!(%err, "supervisor panicked"),
            }
        }
    }

    info!("gateway shut down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
