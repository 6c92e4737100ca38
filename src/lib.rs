pub mod catalog;
pub mod config;
pub mod decoder;
pub mod render;
pub mod session;
pub mod transport;
pub mod viewer;

pub use config::{StreamMode, ViewerConfig};
pub use viewer::Viewer;
