//! Connection registry: the set of live camera sessions
//!
//! Enforces the concurrent-session capacity and the duplicate-camera
//! confirmation step, and owns bulk teardown. Sessions are kept in
//! insertion order and keyed by session id, since the same camera may be
//! open more than once after confirmation.

use super::address::{stream_url, AddressError};
use super::connection::{SessionError, SessionEvent, SessionId, SessionOptions, VideoSession};
use crate::decoder::{DataUrlDecoder, FrameDecode};
use crate::render::RenderTarget;
use crate::transport::StreamConnector;
use camview_shared::limits;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Capacity exceeded: at most {capacity} concurrent sessions")]
    CapacityExceeded { capacity: usize },

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Connect(#[from] SessionError),

    #[error("Gave up reconnecting camera {camera_id} after {attempts} attempts")]
    ReconnectExhausted { camera_id: String, attempts: u32 },
}

/// What to do when a session's transport drops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Leave the last frame up, marked stale
    #[default]
    Disabled,
    /// Open a replacement session, doubling the delay between attempts
    Backoff {
        initial_delay: Duration,
        max_delay: Duration,
        max_attempts: u32,
    },
}

impl ReconnectPolicy {
    /// Backoff with 1s initial delay, 30s cap and 5 attempts
    pub fn backoff() -> Self {
        Self::Backoff {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }

    /// Delay before each reconnect attempt, in order
    pub fn delays(&self) -> Vec<Duration> {
        match *self {
            Self::Disabled => Vec::new(),
            Self::Backoff {
                initial_delay,
                max_delay,
                max_attempts,
            } => std::iter::successors(Some(initial_delay.min(max_delay)), |d| {
                Some(std::cmp::min(*d * 2, max_delay))
            })
            .take(max_attempts as usize)
            .collect(),
        }
    }
}

/// Configuration for the connection registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum concurrently Active sessions
    pub capacity: usize,
    pub session: SessionOptions,
    pub reconnect: ReconnectPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: limits::MAX_CONCURRENT_SESSIONS,
            session: SessionOptions::default(),
            reconnect: ReconnectPolicy::Disabled,
        }
    }
}

impl RegistryConfig {
    /// One stream at a time; selecting a camera switches the stream
    pub fn single_stream() -> Self {
        Self {
            capacity: limits::SINGLE_STREAM,
            ..Default::default()
        }
    }
}

/// A pending duplicate-camera add, waiting for the user's answer.
///
/// Pass it to [`ConnectionRegistry::confirm_duplicate`] to go ahead; drop
/// it to decline.
pub struct DuplicateRequest {
    camera_id: String,
    target: Arc<dyn RenderTarget>,
}

impl DuplicateRequest {
    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }
}

impl std::fmt::Debug for DuplicateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateRequest")
            .field("camera_id", &self.camera_id)
            .finish_non_exhaustive()
    }
}

/// A replacement for a lost session, waiting for its backoff deadline
struct PendingReconnect {
    replaced: SessionId,
    camera_id: String,
    target: Arc<dyn RenderTarget>,
    position: usize,
    /// Attempts made so far
    attempts: u32,
    due: Instant,
}

/// Result of [`ConnectionRegistry::add`]
#[derive(Debug)]
pub enum AddOutcome {
    Opened(SessionId),
    DuplicateConfirmationRequired(DuplicateRequest),
}

/// Manages all camera sessions of one page
pub struct ConnectionRegistry<C: StreamConnector> {
    connector: C,
    page_url: Url,
    config: RegistryConfig,
    decoder: Arc<dyn FrameDecode>,
    sessions: IndexMap<SessionId, VideoSession>,
    reconnects: Vec<PendingReconnect>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl<C: StreamConnector> ConnectionRegistry<C> {
    /// Create a registry whose stream addresses resolve against `page_url`
    pub fn new(connector: C, page_url: Url, config: RegistryConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            page_url,
            config,
            decoder: Arc::new(DataUrlDecoder::new()),
            sessions: IndexMap::new(),
            reconnects: Vec::new(),
            event_tx,
            event_rx,
        }
    }

    /// Replace the frame decoder used by sessions opened from now on
    pub fn with_decoder(mut self, decoder: Arc<dyn FrameDecode>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn page_url(&self) -> &Url {
        &self.page_url
    }

    /// Sessions held, including ones whose transport was lost
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_active()).count()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&VideoSession> {
        self.sessions.get(&id)
    }

    pub fn camera_of(&self, id: SessionId) -> Option<&str> {
        self.sessions.get(&id).map(|s| s.camera_id())
    }

    /// Session ids in insertion order
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn is_camera_active(&self, camera_id: &str) -> bool {
        self.sessions
            .values()
            .any(|s| s.camera_id() == camera_id && s.is_active())
    }

    /// Lost sessions waiting to be reopened
    pub fn pending_reconnects(&self) -> usize {
        self.reconnects.len()
    }

    /// Receive the next event, running reconnect attempts as they fall due.
    ///
    /// Cancel safe: a pending reconnect is only dropped once its attempt
    /// has finished.
    pub async fn recv_event(&mut self) -> Option<SessionEvent> {
        loop {
            let Some(due) = self.reconnects.iter().map(|r| r.due).min() else {
                return self.event_rx.recv().await;
            };
            tokio::select! {
                event = self.event_rx.recv() => return event,
                _ = tokio::time::sleep_until(due) => self.run_due_reconnects().await,
            }
        }
    }

    fn check_capacity(&self) -> Result<(), RegistryError> {
        if self.active_count() >= self.config.capacity {
            return Err(RegistryError::CapacityExceeded {
                capacity: self.config.capacity,
            });
        }
        Ok(())
    }

    /// Start streaming `camera_id` into `target`.
    ///
    /// Rejected without side effects when at capacity. If the camera is
    /// already streaming, nothing is opened and a [`DuplicateRequest`] is
    /// returned instead.
    pub async fn add(
        &mut self,
        camera_id: &str,
        target: Arc<dyn RenderTarget>,
    ) -> Result<AddOutcome, RegistryError> {
        self.check_capacity()?;
        stream_url(&self.page_url, camera_id)?;

        if self.is_camera_active(camera_id) {
            info!("Camera {} already streaming, confirmation required", camera_id);
            return Ok(AddOutcome::DuplicateConfirmationRequired(DuplicateRequest {
                camera_id: camera_id.to_string(),
                target,
            }));
        }

        let id = self.open_session(camera_id, target, None).await?;
        Ok(AddOutcome::Opened(id))
    }

    /// Open the duplicate session the user agreed to
    pub async fn confirm_duplicate(
        &mut self,
        request: DuplicateRequest,
    ) -> Result<SessionId, RegistryError> {
        self.check_capacity()?;
        stream_url(&self.page_url, &request.camera_id)?;
        self.open_session(&request.camera_id, request.target, None)
            .await
    }

    /// Close a session and forget it, or cancel the pending reconnect of
    /// a lost one. Returns false for unknown ids.
    pub async fn remove(&mut self, id: SessionId) -> bool {
        if let Some(index) = self.reconnects.iter().position(|r| r.replaced == id) {
            let pending = self.reconnects.remove(index);
            info!("Reconnect of camera {} cancelled", pending.camera_id);
            return true;
        }
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };
        session.close().await;
        self.sessions.shift_remove(&id);
        true
    }

    /// Close every session once, oldest first, and empty the registry.
    /// Pending reconnects are dropped. Returns how many sessions were
    /// still Active.
    pub async fn remove_all(&mut self) -> usize {
        self.reconnects.clear();
        let mut closed = 0;
        while let Some((_, session)) = self.sessions.first_mut() {
            if session.close().await {
                closed += 1;
            }
            self.sessions.shift_remove_index(0);
        }
        if closed > 0 {
            info!("Closed {} sessions on teardown", closed);
        }
        closed
    }

    /// Replace the stream of session `id` with `camera_id`, keeping its
    /// render target and position. The old connection is closed before the
    /// new one is opened.
    ///
    /// A session that already lost its transport frees no slot, so the
    /// switch is then subject to capacity like an add.
    pub async fn switch(
        &mut self,
        id: SessionId,
        camera_id: &str,
    ) -> Result<SessionId, RegistryError> {
        stream_url(&self.page_url, camera_id)?;

        let index = self
            .sessions
            .get_index_of(&id)
            .ok_or(RegistryError::UnknownSession(id))?;
        if !self.sessions[index].is_active() {
            self.check_capacity()?;
        }

        let target = {
            let (_, session) = self
                .sessions
                .get_index_mut(index)
                .ok_or(RegistryError::UnknownSession(id))?;
            session.close().await;
            session.render_target()
        };
        self.sessions.shift_remove_index(index);

        info!("Switching session {} to camera {}", id, camera_id);
        match self.open_session(camera_id, target.clone(), Some(index)).await {
            Ok(new_id) => Ok(new_id),
            Err(e) => {
                target.reset();
                Err(e)
            }
        }
    }

    /// Single-stream selection: open when nothing is streaming, otherwise
    /// switch the current session (its render target is kept).
    pub async fn select(
        &mut self,
        camera_id: &str,
        target: Arc<dyn RenderTarget>,
    ) -> Result<SessionId, RegistryError> {
        match self.sessions.first().map(|(id, _)| *id) {
            Some(current) => self.switch(current, camera_id).await,
            None => match self.add(camera_id, target).await? {
                AddOutcome::Opened(id) => Ok(id),
                AddOutcome::DuplicateConfirmationRequired(request) => {
                    self.confirm_duplicate(request).await
                }
            },
        }
    }

    /// Evict a session whose transport dropped and, if the reconnect
    /// policy allows, schedule a replacement for the same camera and
    /// target. Attempts run from [`recv_event`](Self::recv_event).
    ///
    /// Returns true when a reconnect was scheduled. Sessions that are
    /// still Active are left alone.
    pub async fn handle_transport_lost(&mut self, id: SessionId) -> bool {
        let Some(index) = self.sessions.get_index_of(&id) else {
            return false;
        };
        let Some((_, session)) = self.sessions.get_index_mut(index) else {
            return false;
        };
        if session.is_active() {
            return false;
        }
        session.close().await;
        let camera_id = session.camera_id().to_string();
        let target = session.render_target();
        self.sessions.shift_remove_index(index);

        let Some(delay) = self.config.reconnect.delays().first().copied() else {
            info!("Session {} ({}) evicted, reconnect disabled", id, camera_id);
            return false;
        };

        info!("Reconnecting camera {} in {:?}", camera_id, delay);
        self.reconnects.push(PendingReconnect {
            replaced: id,
            camera_id,
            target,
            position: index,
            attempts: 0,
            due: Instant::now() + delay,
        });
        true
    }

    async fn run_due_reconnects(&mut self) {
        let delays = self.config.reconnect.delays();

        while let Some(index) = self
            .reconnects
            .iter()
            .position(|r| r.due <= Instant::now())
        {
            let (replaced, camera_id, target, position) = {
                let pending = &self.reconnects[index];
                (
                    pending.replaced,
                    pending.camera_id.clone(),
                    pending.target.clone(),
                    pending.position.min(self.sessions.len()),
                )
            };

            if let Err(e) = self.check_capacity() {
                self.reconnects.remove(index);
                warn!("Not reconnecting camera {}: {}", camera_id, e);
                let _ = self.event_tx.send(SessionEvent::ReconnectFailed {
                    replaced,
                    camera_id,
                    reason: e.to_string(),
                });
                continue;
            }

            let result = self.open_session(&camera_id, target, Some(position)).await;
            let pending = &mut self.reconnects[index];
            pending.attempts += 1;
            let attempts = pending.attempts;

            match result {
                Ok(session) => {
                    self.reconnects.remove(index);
                    info!(
                        "Camera {} reconnected as session {} (attempt {})",
                        camera_id, session, attempts
                    );
                    let _ = self.event_tx.send(SessionEvent::Reconnected {
                        replaced,
                        session,
                        camera_id,
                    });
                }
                Err(e) => {
                    warn!(
                        "Reconnect attempt {}/{} for camera {} failed: {}",
                        attempts,
                        delays.len(),
                        camera_id,
                        e
                    );
                    match delays.get(attempts as usize) {
                        Some(delay) => pending.due = Instant::now() + *delay,
                        None => {
                            self.reconnects.remove(index);
                            let reason = RegistryError::ReconnectExhausted {
                                camera_id: camera_id.clone(),
                                attempts,
                            };
                            warn!("{}", reason);
                            let _ = self.event_tx.send(SessionEvent::ReconnectFailed {
                                replaced,
                                camera_id,
                                reason: reason.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    async fn open_session(
        &mut self,
        camera_id: &str,
        target: Arc<dyn RenderTarget>,
        position: Option<usize>,
    ) -> Result<SessionId, RegistryError> {
        let session = VideoSession::open(
            &self.connector,
            &self.page_url,
            camera_id,
            target,
            self.decoder.clone(),
            &self.config.session,
            self.event_tx.clone(),
        )
        .await?;

        let id = session.id();
        match position {
            Some(index) => {
                self.sessions.shift_insert(index, id, session);
            }
            None => {
                self.sessions.insert(id, session);
            }
        }
        Ok(id)
    }
}
