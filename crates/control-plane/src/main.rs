mod api;
mod db;
mod error;
mod importers;
mod metrics;
mod state;

use crate::db::init_db;
use crate::state::AppState;
use anyhow::Result;
use edi_common::config::AppConfig;
use edi_common::credentials::PlaintextCipher;
use edi_common::outbox::{ExportOutbox, MemoryExportOutbox, SeaOrmExportOutbox};
use edi_common::state::StatusStore;
use edi_common::status::FleetStatus;
use edi_common::store::{GatewayConfigStore, MemoryGatewayStore, SeaOrmGatewayStore};
use edi_sync::{FacilityRegistry, LinkValidator, LocalTransport, SyncScheduler};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env()?;
    let (store, outbox) = open_store(&config).await?;

    tokio::fs::create_dir_all(&config.local_root).await?;
    let transport = Arc::new(LocalTransport::new(config.local_root.clone()));
    let registry = FacilityRegistry::new(transport, Arc::new(PlaintextCipher));
    let loaded = registry.load(store.as_ref()).await?;

    let validator = Arc::new(LinkValidator::new(
        store.clone(),
        config.scheduler.relink_interval,
    ));
    let linked = validator.probe_all(&registry).await;
    info!(gateways = loaded, linked, "gateway links validated");

    let (status, _rx) = StatusStore::new(FleetStatus::default());
    let scheduler = Arc::new(SyncScheduler::new(
        registry,
        validator.clone(),
        importers::default_importers(),
        config.scheduler,
        status.clone(),
        outbox,
    ));
    scheduler.refresh_status().await;
    if config.scheduler_enabled {
        scheduler.start().await?;
    } else {
        warn!("sync scheduler disabled by SYNC_ENABLED");
    }

    let state = AppState {
        scheduler: scheduler.clone(),
        validator,
        status,
    };

    let ops_addr = config.ops_addr.clone();
    let api_task = tokio::spawn(async move {
        let app = api::router(state);
        match tokio::net::TcpListener::bind(&ops_addr).await {
            Ok(listener) => {
                info!("operations api listening on {}", ops_addr);
                if let Err(err) = axum::serve(listener, app).await {
                    warn!("operations api exited: {}", err);
                }
            }
            Err(err) => warn!("failed to bind operations api: {}", err),
        }
    });

    tokio::select! {
        _ = api_task => {},
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    if let Err(err) = scheduler.stop(config.stop_timeout).await {
        warn!("sync scheduler did not stop cleanly: {}", err);
    }
    Ok(())
}

type Stores = (Arc<dyn GatewayConfigStore>, Arc<dyn ExportOutbox>);

async fn open_store(config: &AppConfig) -> Result<Stores> {
    if let Some(database_url) = &config.database_url {
        let db = init_db(database_url).await?;
        return Ok((
            Arc::new(SeaOrmGatewayStore::new(db.clone())),
            Arc::new(SeaOrmExportOutbox::new(db)),
        ));
    }
    warn!("DATABASE_URL unset, pending exports will not survive a restart");
    let outbox: Arc<dyn ExportOutbox> = Arc::new(MemoryExportOutbox::new());
    if let Some(path) = &config.gateways_file {
        info!(path = %path.display(), "loading gateways from seed file");
        return Ok((Arc::new(MemoryGatewayStore::from_seed_file(path)?), outbox));
    }
    warn!("DATABASE_URL and EDI_GATEWAYS_FILE unset, using an empty in-memory gateway store");
    Ok((Arc::new(MemoryGatewayStore::new()), outbox))
}
