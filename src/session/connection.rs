//! A single camera streaming session

use super::address::{stream_url, AddressError};
use crate::decoder::FrameDecode;
use crate::render::RenderTarget;
use crate::transport::{FrameStream, StreamConnector};
use camview_shared::{DisplayImage, LifecycleEvent, SessionLifecycle, TransitionResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

/// Process-unique session identity
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Upper bound on the graceful close handshake
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Events emitted by sessions and their registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection established, frames will follow
    Opened { session: SessionId, camera_id: String },
    /// The transport dropped; the session is Closed and its target is stale
    TransportLost {
        session: SessionId,
        camera_id: String,
        reason: String,
    },
    /// Closed by its owner
    Closed { session: SessionId, camera_id: String },
    /// A lost session was replaced by a new one on the same target
    Reconnected {
        replaced: SessionId,
        session: SessionId,
        camera_id: String,
    },
    /// Reconnecting a lost session was abandoned
    ReconnectFailed {
        replaced: SessionId,
        camera_id: String,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("Connection to {url} timed out after {timeout:?}")]
    ConnectTimeout { url: Url, timeout: Duration },

    #[error("Connection to {url} failed: {reason}")]
    ConnectFailed { url: Url, reason: String },
}

/// Per-session tuning
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Frames decoding at once; arrivals beyond this are dropped
    pub max_inflight_decodes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_inflight_decodes: 4,
        }
    }
}

/// Guards every render-target write. Closing flips the lifecycle under
/// this lock, so once `close` returns no decode can reach the target.
#[derive(Debug, Default)]
struct Presenter {
    lifecycle: SessionLifecycle,
    last_applied: u64,
    frames_applied: u64,
}

impl Presenter {
    fn present(&mut self, target: &dyn RenderTarget, sequence: u64, image: &DisplayImage) -> bool {
        if !self.lifecycle.is_active() || sequence <= self.last_applied {
            return false;
        }
        target.present(sequence, image);
        self.last_applied = sequence;
        self.frames_applied += 1;
        true
    }
}

/// Everything the reader task needs, moved into it at open
struct Reader {
    id: SessionId,
    camera_id: String,
    presenter: Arc<Mutex<Presenter>>,
    target: Arc<dyn RenderTarget>,
    decoder: Arc<dyn FrameDecode>,
    events: mpsc::UnboundedSender<SessionEvent>,
    max_inflight: usize,
}

enum ReadEnd {
    Detached,
    Lost(String),
}

/// One camera's streaming connection plus the render target it feeds
pub struct VideoSession {
    id: SessionId,
    camera_id: String,
    url: Url,
    presenter: Arc<Mutex<Presenter>>,
    target: Arc<dyn RenderTarget>,
    detach_tx: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl VideoSession {
    /// Derive the stream address from `page_url`, connect, then reset
    /// `target` to its placeholder and start consuming frames. A failed
    /// connect leaves `target` untouched.
    pub async fn open<C: StreamConnector>(
        connector: &C,
        page_url: &Url,
        camera_id: &str,
        target: Arc<dyn RenderTarget>,
        decoder: Arc<dyn FrameDecode>,
        options: &SessionOptions,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let url = stream_url(page_url, camera_id)?;

        let stream = match timeout(options.connect_timeout, connector.connect(&url)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(SessionError::ConnectFailed {
                    url,
                    reason: format!("{:#}", e),
                })
            }
            Err(_) => {
                return Err(SessionError::ConnectTimeout {
                    url,
                    timeout: options.connect_timeout,
                })
            }
        };

        target.reset();
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let presenter = Arc::new(Mutex::new(Presenter::default()));
        let (detach_tx, detach_rx) = oneshot::channel();

        let reader = Reader {
            id,
            camera_id: camera_id.to_string(),
            presenter: presenter.clone(),
            target: target.clone(),
            decoder,
            events: events.clone(),
            max_inflight: options.max_inflight_decodes.max(1),
        };
        let reader = tokio::spawn(reader.run(stream, detach_rx));

        info!(
            "Session {} opened: camera={} via {} ({})",
            id,
            camera_id,
            connector.name(),
            url
        );
        let _ = events.send(SessionEvent::Opened {
            session: id,
            camera_id: camera_id.to_string(),
        });

        Ok(Self {
            id,
            camera_id: camera_id.to_string(),
            url,
            presenter,
            target,
            detach_tx: Some(detach_tx),
            reader: Some(reader),
            events,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn render_target(&self) -> Arc<dyn RenderTarget> {
        self.target.clone()
    }

    pub fn is_active(&self) -> bool {
        self.presenter.lock().lifecycle.is_active()
    }

    /// Frames written to the render target so far
    pub fn frames_applied(&self) -> u64 {
        self.presenter.lock().frames_applied
    }

    /// Close the session: mark it Closed, detach the frame handler, then
    /// close the connection. Returns true if this call did the closing;
    /// later calls are no-ops.
    pub async fn close(&mut self) -> bool {
        let transitioned = self
            .presenter
            .lock()
            .lifecycle
            .process_event(LifecycleEvent::CloseRequested)
            == TransitionResult::Closed;

        if let Some(detach) = self.detach_tx.take() {
            let _ = detach.send(());
        }
        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                warn!("Session {} reader ended abnormally: {}", self.id, e);
            }
        }

        if transitioned {
            info!("Session {} closed: camera={}", self.id, self.camera_id);
            let _ = self.events.send(SessionEvent::Closed {
                session: self.id,
                camera_id: self.camera_id.clone(),
            });
        }
        transitioned
    }
}

impl Drop for VideoSession {
    fn drop(&mut self) {
        // Dropped without close(): the reader closes itself and the stream.
        if let Some(detach) = self.detach_tx.take() {
            let _ = detach.send(());
        }
    }
}

impl std::fmt::Debug for VideoSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSession")
            .field("id", &self.id)
            .field("camera_id", &self.camera_id)
            .field("url", &self.url.as_str())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Reader {
    async fn run<S: FrameStream>(self, mut stream: S, mut detach_rx: oneshot::Receiver<()>) {
        let mut decodes = JoinSet::new();
        let mut arrived: u64 = 0;

        let end = loop {
            tokio::select! {
                biased;

                _ = &mut detach_rx => break ReadEnd::Detached,

                Some(joined) = decodes.join_next(), if !decodes.is_empty() => {
                    if let Err(e) = joined {
                        if !e.is_cancelled() {
                            warn!("Session {} decode task failed: {}", self.id, e);
                        }
                    }
                }

                next = stream.next_frame() => match next {
                    Some(Ok(payload)) => {
                        arrived += 1;
                        if decodes.len() >= self.max_inflight {
                            debug!(
                                "Session {} dropping frame {} ({} decodes in flight)",
                                self.id, arrived, decodes.len()
                            );
                            continue;
                        }
                        decodes.spawn(self.decode_and_present(arrived, payload));
                    }
                    Some(Err(e)) => break ReadEnd::Lost(format!("{:#}", e)),
                    None => break ReadEnd::Lost("stream closed by server".into()),
                },
            }
        };

        // Outstanding decodes belong to a session that is going away.
        decodes.shutdown().await;

        match end {
            ReadEnd::Detached => {
                self.presenter
                    .lock()
                    .lifecycle
                    .process_event(LifecycleEvent::CloseRequested);
            }
            ReadEnd::Lost(reason) => {
                let transitioned = {
                    let mut presenter = self.presenter.lock();
                    let result = presenter.lifecycle.process_event(LifecycleEvent::TransportLost {
                        reason: reason.clone(),
                    });
                    if result == TransitionResult::Closed {
                        self.target.mark_stale(&reason);
                    }
                    result == TransitionResult::Closed
                };
                if transitioned {
                    warn!(
                        "Session {} lost transport: camera={} reason={}",
                        self.id, self.camera_id, reason
                    );
                    let _ = self.events.send(SessionEvent::TransportLost {
                        session: self.id,
                        camera_id: self.camera_id.clone(),
                        reason,
                    });
                }
            }
        }

        match timeout(SHUTDOWN_TIMEOUT, stream.shutdown()).await {
            Ok(Ok(())) => debug!("Session {} stream shut down", self.id),
            Ok(Err(e)) => debug!("Session {} stream shutdown error: {:#}", self.id, e),
            Err(_) => warn!("Session {} stream shutdown timed out", self.id),
        }
    }

    fn decode_and_present(
        &self,
        sequence: u64,
        payload: bytes::Bytes,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let id = self.id;
        let decoder = self.decoder.clone();
        let presenter = self.presenter.clone();
        let target = self.target.clone();

        async move {
            match decoder.decode(payload).await {
                Ok(image) => {
                    if !presenter.lock().present(target.as_ref(), sequence, &image) {
                        debug!("Session {} discarded frame {}", id, sequence);
                    }
                }
                Err(e) => debug!("Session {} skipped frame {}: {}", id, sequence, e),
            }
        }
    }
}
