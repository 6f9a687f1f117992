extern crate sdk_sidecar;

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sdk_sidecar::config::Settings;
use sdk_sidecar::proto::sdk_server::SdkServer;
use sdk_sidecar::rpc_server::{self, SdkImpl};
use sdk_sidecar::sidecar::{InMemoryStore, Sidecar};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::parse();
    let template = settings.gameserver_template()?;
    let store = Arc::new(InMemoryStore::new(template));
    let sidecar = Arc::new(Sidecar::new(settings.sidecar_config(), store));
    info!(address = %settings.address, "listening for connections");

    let ct = CancellationToken::new();
    let workers = sidecar.start_workers(ct.clone());

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<SdkServer<SdkImpl<Sidecar>>>()
        .await;

    let server = tonic::transport::Server::builder()
        .add_service(rpc_server::reflection_service()?)
        .add_service(health_service)
        .add_service(SdkServer::new(
            SdkImpl::new(sidecar).with_shutdown(ct.clone()),
        ))
        .serve_with_shutdown(settings.address, async move {
            if let Err(err) = workers.await {
                error!("workers join task failed: {}", err);
            };
        });

    tokio::spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            error!("unable to listen for shutdown signal: {}", err);
        }
        info!("shutting down");
        ct.cancel();
    });
    server.await?;

    Ok(())
}
