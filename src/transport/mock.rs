//! In-memory loopback transport for tests
//!
//! Every `connect` creates a link the test can feed frames into, fail, or
//! hang up. Connects and shutdowns are recorded in one ordered wire log.

use crate::transport::traits::{FrameStream, StreamConnector};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Connection-level happenings, in the order they occurred
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Connected(String),
    ShutDown(String),
}

type Delivery = Result<Bytes, String>;

struct Link {
    camera: String,
    url: Url,
    tx: Option<mpsc::UnboundedSender<Delivery>>,
    shutdowns: usize,
}

#[derive(Default)]
struct LoopbackState {
    log: Vec<WireEvent>,
    links: Vec<Link>,
    refuse: usize,
}

#[derive(Clone, Default)]
pub struct LoopbackConnector {
    state: Arc<Mutex<LoopbackState>>,
}

fn camera_of(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default()
        .to_string()
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connects fail
    pub fn refuse_next(&self, n: usize) {
        self.state.lock().refuse = n;
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }

    pub fn url(&self, link: usize) -> Url {
        self.state.lock().links[link].url.clone()
    }

    pub fn camera(&self, link: usize) -> String {
        self.state.lock().links[link].camera.clone()
    }

    /// Deliver a frame on `link`; false if the session stopped listening
    pub fn push(&self, link: usize, frame: &[u8]) -> bool {
        let state = self.state.lock();
        match &state.links[link].tx {
            Some(tx) => tx.send(Ok(Bytes::copy_from_slice(frame))).is_ok(),
            None => false,
        }
    }

    /// Deliver a transport error on `link`
    pub fn fail(&self, link: usize, reason: &str) {
        let state = self.state.lock();
        if let Some(tx) = &state.links[link].tx {
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    /// Close `link` from the server side
    pub fn hang_up(&self, link: usize) {
        self.state.lock().links[link].tx = None;
    }

    pub fn shutdowns(&self, link: usize) -> usize {
        self.state.lock().links[link].shutdowns
    }

    pub fn log(&self) -> Vec<WireEvent> {
        self.state.lock().log.clone()
    }
}

pub struct LoopbackStream {
    link: usize,
    rx: mpsc::UnboundedReceiver<Delivery>,
    state: Arc<Mutex<LoopbackState>>,
}

#[async_trait]
impl FrameStream for LoopbackStream {
    async fn next_frame(&mut self) -> Option<Result<Bytes>> {
        match self.rx.recv().await? {
            Ok(frame) => Some(Ok(frame)),
            Err(reason) => Some(Err(anyhow!(reason))),
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.rx.close();
        let mut state = self.state.lock();
        let link = &mut state.links[self.link];
        link.shutdowns += 1;
        let camera = link.camera.clone();
        state.log.push(WireEvent::ShutDown(camera));
        Ok(())
    }
}

#[async_trait]
impl StreamConnector for LoopbackConnector {
    type Stream = LoopbackStream;

    async fn connect(&self, url: &Url) -> Result<Self::Stream> {
        let mut state = self.state.lock();
        if state.refuse > 0 {
            state.refuse -= 1;
            return Err(anyhow!("connection refused: {}", url));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let camera = camera_of(url);
        state.log.push(WireEvent::Connected(camera.clone()));
        state.links.push(Link {
            camera,
            url: url.clone(),
            tx: Some(tx),
            shutdowns: 0,
        });

        Ok(LoopbackStream {
            link: state.links.len() - 1,
            rx,
            state: self.state.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "Loopback"
    }
}
