//! Session management for camera streams
//!
//! This module handles:
//! - Deriving stream addresses from the page location
//! - Opening, switching and closing per-camera sessions
//! - Capacity and duplicate-camera policy
//! - Transport-loss handling and optional reconnect

mod address;
mod connection;
mod manager;

pub use address::{stream_url, AddressError};
pub use connection::{SessionError, SessionEvent, SessionId, SessionOptions, VideoSession};
pub use manager::{
    AddOutcome, ConnectionRegistry, DuplicateRequest, ReconnectPolicy, RegistryConfig,
    RegistryError,
};
