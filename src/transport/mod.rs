pub mod traits;
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use traits::{FrameStream, StreamConnector};
pub use websocket::{WsConnector, WsFrameStream};
