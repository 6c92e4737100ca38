//! camview shared types
//!
//! Endpoint paths, session limits, the camera catalog body and the frame
//! codec used by the camera viewer. Nothing in here touches the network.

pub mod codec;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{CodecError, DisplayImage, ImageFormat};
pub use state_machine::{LifecycleEvent, SessionLifecycle, SessionState, TransitionResult};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// HTTP and streaming endpoint paths exposed by the camera server
pub mod endpoints {
    /// Camera catalog, always resolved against the page origin
    pub const CAMERAS_LIST: &str = "/cameras_list";

    /// Streaming path segment, resolved relative to the page URL.
    /// The camera id is appended as the next path segment.
    pub const STREAM_HANDLER: &str = "websocket_handler_site";
}

/// Session limits
pub mod limits {
    /// Concurrent sessions allowed on a multi-stream page
    pub const MAX_CONCURRENT_SESSIONS: usize = 12;

    /// Concurrent sessions allowed on a single-stream page
    pub const SINGLE_STREAM: usize = 1;

    /// Largest frame payload the decoder accepts (16 MB)
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
}

/// Body of `GET /cameras_list`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraList {
    pub cameras: Vec<String>,
}

impl CameraList {
    /// Camera ids with blanks removed, first occurrence order kept
    pub fn into_ids(self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(self.cameras.len());
        for cam in self.cameras {
            let cam = cam.trim();
            if cam.is_empty() || ids.iter().any(|c| c == cam) {
                continue;
            }
            ids.push(cam.to_string());
        }
        ids
    }
}
