//! Page-level glue: catalog, selection and the surfaces sessions draw on

use crate::catalog::CameraCatalog;
use crate::config::StreamMode;
use crate::render::FrameSlot;
use crate::session::{AddOutcome, ConnectionRegistry, RegistryError, SessionEvent, SessionId};
use crate::transport::StreamConnector;
use anyhow::Result;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives a [`ConnectionRegistry`] the way the viewer page does
pub struct Viewer<C: StreamConnector> {
    registry: ConnectionRegistry<C>,
    catalog: Box<dyn CameraCatalog>,
    mode: StreamMode,
    cameras: Vec<String>,
    /// The one surface of a single-stream page
    screen: Arc<FrameSlot>,
    /// One surface per session on a multi-stream page
    tiles: IndexMap<SessionId, Arc<FrameSlot>>,
}

impl<C: StreamConnector> Viewer<C> {
    pub fn new(
        registry: ConnectionRegistry<C>,
        catalog: Box<dyn CameraCatalog>,
        mode: StreamMode,
    ) -> Self {
        Self {
            registry,
            catalog,
            mode,
            cameras: Vec::new(),
            screen: Arc::new(FrameSlot::new("video")),
            tiles: IndexMap::new(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry<C> {
        &self.registry
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Camera ids from the last successful catalog refresh
    pub fn cameras(&self) -> &[String] {
        &self.cameras
    }

    pub fn screen(&self) -> Arc<FrameSlot> {
        self.screen.clone()
    }

    /// Surface a session draws on
    pub fn surface(&self, id: SessionId) -> Option<Arc<FrameSlot>> {
        match self.mode {
            StreamMode::Single => self.registry.contains(id).then(|| self.screen.clone()),
            StreamMode::Multi => self.tiles.get(&id).cloned(),
        }
    }

    /// Reload the camera list. On failure the previous list is kept.
    pub async fn refresh_catalog(&mut self) -> Result<&[String]> {
        self.cameras = self.catalog.cameras().await?;
        debug!("Camera list refreshed: {:?}", self.cameras);
        Ok(&self.cameras)
    }

    /// Show `camera_id` on the single-stream screen
    pub async fn select(&mut self, camera_id: &str) -> Result<SessionId, RegistryError> {
        self.registry.select(camera_id, self.screen.clone()).await
    }

    /// Open `camera_id` in a new tile. A camera that is already streaming
    /// is only opened again when `confirm_duplicate` is set.
    pub async fn add(
        &mut self,
        camera_id: &str,
        confirm_duplicate: bool,
    ) -> Result<Option<SessionId>, RegistryError> {
        let tile = Arc::new(FrameSlot::new(camera_id));
        let id = match self.registry.add(camera_id, tile.clone()).await? {
            AddOutcome::Opened(id) => id,
            AddOutcome::DuplicateConfirmationRequired(request) if confirm_duplicate => {
                self.registry.confirm_duplicate(request).await?
            }
            AddOutcome::DuplicateConfirmationRequired(request) => {
                info!("Not opening camera {} twice", request.camera_id());
                return Ok(None);
            }
        };
        self.tiles.insert(id, tile);
        Ok(Some(id))
    }

    /// Close one stream
    pub async fn close(&mut self, id: SessionId) -> bool {
        self.tiles.shift_remove(&id);
        self.registry.remove(id).await
    }

    /// Bring streams in line with the catalog. Returns sessions opened.
    ///
    /// Single mode keeps the current camera while it is still listed and
    /// otherwise selects the first one. Multi mode opens every listed
    /// camera that is not streaming yet, up to capacity.
    pub async fn autostart(&mut self) -> usize {
        match self.mode {
            StreamMode::Single => {
                let current = self
                    .registry
                    .session_ids()
                    .first()
                    .and_then(|id| self.registry.camera_of(*id))
                    .map(String::from);
                let still_listed = current
                    .as_ref()
                    .is_some_and(|cam| self.cameras.contains(cam));
                if still_listed {
                    return 0;
                }
                let Some(first) = self.cameras.first().cloned() else {
                    return 0;
                };
                match self.select(&first).await {
                    Ok(_) => 1,
                    Err(e) => {
                        warn!("Failed to open camera {}: {}", first, e);
                        0
                    }
                }
            }
            StreamMode::Multi => {
                let mut opened = 0;
                for camera in self.cameras.clone() {
                    if self.registry.is_camera_active(&camera) {
                        continue;
                    }
                    match self.add(&camera, false).await {
                        Ok(Some(_)) => opened += 1,
                        Ok(None) => {}
                        Err(e @ RegistryError::CapacityExceeded { .. }) => {
                            warn!("{}", e);
                            break;
                        }
                        Err(e) => warn!("Failed to open camera {}: {}", camera, e),
                    }
                }
                opened
            }
        }
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.registry.recv_event().await
    }

    pub async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Opened { session, camera_id } => {
                debug!("Session {} streaming {}", session, camera_id);
            }
            SessionEvent::Closed { session, camera_id } => {
                debug!("Session {} for {} closed", session, camera_id);
            }
            SessionEvent::TransportLost {
                session,
                camera_id,
                reason,
            } => {
                warn!("Stream for camera {} lost: {}", camera_id, reason);
                // A scheduled reconnect keeps the stale tile up until it
                // resolves.
                if !self.registry.handle_transport_lost(session).await {
                    self.tiles.shift_remove(&session);
                }
            }
            SessionEvent::Reconnected {
                replaced,
                session,
                camera_id,
            } => {
                info!("Camera {} back as session {}", camera_id, session);
                if let Some(index) = self.tiles.get_index_of(&replaced) {
                    if let Some((_, tile)) = self.tiles.shift_remove_index(index) {
                        self.tiles.shift_insert(index, session, tile);
                    }
                }
            }
            SessionEvent::ReconnectFailed {
                replaced,
                camera_id,
                reason,
            } => {
                warn!("Camera {} stays offline: {}", camera_id, reason);
                self.tiles.shift_remove(&replaced);
            }
        }
    }

    /// Close everything, as on page unload. Returns sessions closed.
    pub async fn teardown(&mut self) -> usize {
        self.tiles.clear();
        self.registry.remove_all().await
    }

    /// Log per-surface frame statistics
    pub fn report(&self) {
        let surfaces: Vec<Arc<FrameSlot>> = match self.mode {
            StreamMode::Single => vec![self.screen.clone()],
            StreamMode::Multi => self.tiles.values().cloned().collect(),
        };
        for surface in surfaces {
            let snap = surface.snapshot();
            info!(
                "[{}] frames={} bytes={} last_seq={} stale={}",
                surface.label(),
                snap.presented,
                snap.bytes_presented,
                snap.sequence,
                snap.stale.as_deref().unwrap_or("no")
            );
        }
        info!(
            "{} of {} sessions active",
            self.registry.active_count(),
            self.registry.capacity()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::session::{ReconnectPolicy, RegistryConfig};
    use crate::transport::mock::LoopbackConnector;
    use std::time::Duration;
    use url::Url;

    fn viewer(
        mode: StreamMode,
        capacity: usize,
        cameras: &[&str],
    ) -> (Viewer<LoopbackConnector>, LoopbackConnector, StaticCatalog) {
        let connector = LoopbackConnector::new();
        let catalog = StaticCatalog::new(cameras.iter().map(|c| c.to_string()).collect());
        let config = RegistryConfig {
            capacity,
            ..Default::default()
        };
        let page = Url::parse("http://localhost:7474/").expect("bad url");
        let registry = ConnectionRegistry::new(connector.clone(), page, config);
        (
            Viewer::new(registry, Box::new(catalog.clone()), mode),
            connector,
            catalog,
        )
    }

    #[tokio::test]
    async fn test_single_stream_selection() {
        let (mut viewer, connector, _catalog) = viewer(StreamMode::Single, 1, &["cam1", "cam2"]);

        viewer.refresh_catalog().await.expect("refresh failed");
        assert_eq!(viewer.cameras(), ["cam1", "cam2"]);

        assert_eq!(viewer.autostart().await, 1);
        assert_eq!(connector.camera(0), "cam1");

        let id = viewer.select("cam2").await.expect("select failed");
        assert_eq!(connector.shutdowns(0), 1);
        assert_eq!(viewer.registry().active_count(), 1);
        assert_eq!(viewer.registry().camera_of(id), Some("cam2"));
        assert!(viewer.surface(id).is_some());

        // cam2 is still listed: nothing to do.
        assert_eq!(viewer.autostart().await, 0);
    }

    #[tokio::test]
    async fn test_single_stream_follows_catalog() {
        let (mut viewer, connector, catalog) = viewer(StreamMode::Single, 1, &["cam1", "cam2"]);
        viewer.refresh_catalog().await.expect("refresh failed");
        viewer.autostart().await;

        catalog.set(vec!["cam3".into()]);
        viewer.refresh_catalog().await.expect("refresh failed");
        assert_eq!(viewer.autostart().await, 1);

        assert_eq!(connector.camera(1), "cam3");
        assert_eq!(connector.shutdowns(0), 1);
        assert_eq!(viewer.registry().active_count(), 1);
    }

    #[tokio::test]
    async fn test_multi_stream_fills_to_capacity() {
        let (mut viewer, connector, _catalog) =
            viewer(StreamMode::Multi, 2, &["cam1", "cam2", "cam3"]);
        viewer.refresh_catalog().await.expect("refresh failed");

        assert_eq!(viewer.autostart().await, 2);
        assert_eq!(viewer.registry().active_count(), 2);
        assert_eq!(connector.link_count(), 2);
    }

    #[tokio::test]
    async fn test_multi_stream_duplicates() {
        let (mut viewer, _connector, _catalog) = viewer(StreamMode::Multi, 12, &[]);

        let first = viewer.add("cam1", false).await.expect("add failed");
        assert!(first.is_some());
        assert!(viewer.add("cam1", false).await.expect("add failed").is_none());

        let second = viewer.add("cam1", true).await.expect("add failed");
        assert!(second.is_some());
        assert_eq!(viewer.registry().active_count(), 2);
    }

    #[tokio::test]
    async fn test_frames_land_on_tile() {
        let (mut viewer, connector, _catalog) = viewer(StreamMode::Multi, 12, &[]);
        let id = viewer
            .add("cam1", false)
            .await
            .expect("add failed")
            .expect("not opened");

        connector.push(0, &[0xFF, 0xD8, 0xFF, 0x10]);
        for _ in 0..50 {
            if viewer.surface(id).expect("no tile").snapshot().presented > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(viewer.surface(id).expect("no tile").snapshot().presented, 1);
        viewer.report();
    }

    #[tokio::test]
    async fn test_transport_loss_evicts_tile() {
        let (mut viewer, connector, _catalog) = viewer(StreamMode::Multi, 12, &[]);
        let id = viewer
            .add("cam1", false)
            .await
            .expect("add failed")
            .expect("not opened");

        connector.hang_up(0);
        loop {
            match viewer.next_event().await {
                Some(event @ SessionEvent::TransportLost { .. }) => {
                    viewer.handle_event(event).await;
                    break;
                }
                Some(event) => viewer.handle_event(event).await,
                None => panic!("event channel closed"),
            }
        }

        assert!(viewer.surface(id).is_none());
        assert!(viewer.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_keeps_tile() {
        let connector = LoopbackConnector::new();
        let config = RegistryConfig {
            reconnect: ReconnectPolicy::Backoff {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                max_attempts: 3,
            },
            ..Default::default()
        };
        let page = Url::parse("http://localhost:7474/").expect("bad url");
        let registry = ConnectionRegistry::new(connector.clone(), page, config);
        let catalog = StaticCatalog::new(Vec::new());
        let mut viewer = Viewer::new(registry, Box::new(catalog), StreamMode::Multi);

        let id = viewer
            .add("cam1", false)
            .await
            .expect("add failed")
            .expect("not opened");
        let tile = viewer.surface(id).expect("no tile");

        connector.hang_up(0);
        let new_id = loop {
            match viewer.next_event().await {
                Some(event @ SessionEvent::Reconnected { .. }) => {
                    let SessionEvent::Reconnected { replaced, session, .. } = event.clone() else {
                        unreachable!()
                    };
                    assert_eq!(replaced, id);
                    viewer.handle_event(event).await;
                    break session;
                }
                Some(event @ SessionEvent::TransportLost { .. }) => {
                    viewer.handle_event(event).await;
                    // Stale tile stays while the reconnect is pending.
                    assert!(viewer.surface(id).is_some());
                    assert_eq!(viewer.registry().pending_reconnects(), 1);
                }
                Some(event) => viewer.handle_event(event).await,
                None => panic!("event channel closed"),
            }
        };

        assert!(viewer.surface(id).is_none());
        let moved = viewer.surface(new_id).expect("tile not moved");
        assert!(Arc::ptr_eq(&tile, &moved));
        assert_eq!(viewer.registry().active_count(), 1);
    }

    #[tokio::test]
    async fn test_teardown_closes_everything() {
        let (mut viewer, connector, _catalog) = viewer(StreamMode::Multi, 12, &["cam1", "cam2"]);
        viewer.refresh_catalog().await.expect("refresh failed");
        viewer.autostart().await;

        assert_eq!(viewer.teardown().await, 2);
        assert_eq!(connector.shutdowns(0), 1);
        assert_eq!(connector.shutdowns(1), 1);
        assert!(viewer.registry().is_empty());
        assert_eq!(viewer.teardown().await, 0);
    }

    #[tokio::test]
    async fn test_close_single_tile() {
        let (mut viewer, _connector, _catalog) = viewer(StreamMode::Multi, 12, &[]);
        let id = viewer
            .add("cam1", false)
            .await
            .expect("add failed")
            .expect("not opened");

        assert!(viewer.close(id).await);
        assert!(!viewer.close(id).await);
        assert!(viewer.surface(id).is_none());
    }
}
