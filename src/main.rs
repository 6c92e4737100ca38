use anyhow::Result;
use camera_viewer::catalog::{CameraCatalog, HttpCameraCatalog, StaticCatalog};
use camera_viewer::session::ConnectionRegistry;
use camera_viewer::transport::{StreamConnector, WsConnector};
use camera_viewer::{Viewer, ViewerConfig};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ViewerConfig::from_env()?;
    let page_url = config.page_url()?;

    info!("Camera viewer starting: {}", page_url);
    info!("  Mode: {} (capacity {})", config.mode, config.capacity());

    let catalog: Box<dyn CameraCatalog> = match &config.cameras {
        Some(cameras) => {
            info!("  Cameras: {:?} (fixed)", cameras);
            Box::new(StaticCatalog::new(cameras.clone()))
        }
        None => {
            let catalog = HttpCameraCatalog::new(&page_url, config.catalog_timeout)?;
            info!("  Cameras: {}", catalog.url());
            Box::new(catalog)
        }
    };

    let connector = WsConnector::new();
    info!("  Transport: {}", connector.name());

    let registry = ConnectionRegistry::new(connector, page_url, config.registry_config());
    let mut viewer = Viewer::new(registry, catalog, config.mode);

    refresh_and_start(&mut viewer).await;

    let mut catalog_ticker = tokio::time::interval(config.catalog_refresh);
    let mut stats_ticker = tokio::time::interval(config.stats_interval);
    // Both tickers fire immediately; startup already covered that.
    catalog_ticker.tick().await;
    stats_ticker.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // Main event loop
    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down");
                break;
            }
            event = viewer.next_event() => match event {
                Some(event) => viewer.handle_event(event).await,
                None => {
                    error!("Session event channel closed");
                    break;
                }
            },
            _ = catalog_ticker.tick() => refresh_and_start(&mut viewer).await,
            _ = stats_ticker.tick() => viewer.report(),
        }
    }

    let closed = viewer.teardown().await;
    info!("Closed {} sessions", closed);
    Ok(())
}

async fn refresh_and_start<C: StreamConnector>(viewer: &mut Viewer<C>) {
    match viewer.refresh_catalog().await {
        Ok(cameras) => info!("{} cameras available", cameras.len()),
        Err(e) => warn!("Camera list unavailable: {:#}", e),
    }
    let opened = viewer.autostart().await;
    if opened > 0 {
        info!("Opened {} streams", opened);
    }
}
