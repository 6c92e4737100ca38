//! Frame decoding: binary payload to displayable image
//!
//! Every frame is decoded on its own. There is no buffering, reordering or
//! retry here; ordering is the session's concern.

use async_trait::async_trait;
use bytes::Bytes;
use camview_shared::codec::{self, CodecError, DisplayImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Decode task failed: {0}")]
    Task(String),
}

/// Converts one inbound frame into something a render target can show
#[async_trait]
pub trait FrameDecode: Send + Sync + 'static {
    async fn decode(&self, payload: Bytes) -> Result<DisplayImage, DecodeError>;
}

/// Decodes frames into base64 data URLs on the blocking pool
#[derive(Debug, Default, Clone, Copy)]
pub struct DataUrlDecoder;

impl DataUrlDecoder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FrameDecode for DataUrlDecoder {
    async fn decode(&self, payload: Bytes) -> Result<DisplayImage, DecodeError> {
        tokio::task::spawn_blocking(move || codec::to_display_image(&payload))
            .await
            .map_err(|e| DecodeError::Task(e.to_string()))?
            .map_err(DecodeError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camview_shared::ImageFormat;

    #[tokio::test]
    async fn test_decode_jpeg() {
        let payload = Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]);
        let image = DataUrlDecoder::new().decode(payload).await.expect("decode failed");
        assert_eq!(image.format, ImageFormat::Jpeg);
        assert_eq!(image.byte_len, 5);
        assert!(image.data_url.starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn test_decode_failures_are_typed() {
        let decoder = DataUrlDecoder::new();

        let empty = decoder.decode(Bytes::new()).await;
        assert!(matches!(empty, Err(DecodeError::Codec(CodecError::Empty))));

        let garbage = decoder.decode(Bytes::from_static(b"not an image")).await;
        assert!(matches!(
            garbage,
            Err(DecodeError::Codec(CodecError::UnrecognizedFormat(_)))
        ));
    }
}
