//! Frame codec: binary image payload to data URL
//!
//! Frames arrive as raw encoded images (JPEG from camera sources, PNG for
//! server notices). The codec sniffs the container from its magic bytes
//! and renders a `data:<mime>;base64,<payload>` URL that any image
//! surface can display directly.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::{limits::MAX_FRAME_SIZE, now_ms};

/// Errors that can occur while decoding a frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty frame payload")]
    Empty,

    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Unrecognized image format (leading bytes {0:02x?})")]
    UnrecognizedFormat(Vec<u8>),
}

/// Image containers the viewer can display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
}

impl ImageFormat {
    /// Detect the container from the payload's magic bytes
    pub fn sniff(payload: &[u8]) -> Option<Self> {
        match payload {
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(Self::Png),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            [b'B', b'M', ..] => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// A decoded frame ready to be shown by a render target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayImage {
    pub format: ImageFormat,
    pub data_url: String,
    /// Size of the binary payload the image was built from
    pub byte_len: usize,
    pub decoded_at_ms: u64,
}

/// Encode a binary frame payload as a displayable data URL
pub fn to_display_image(payload: &[u8]) -> Result<DisplayImage, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::Empty);
    }
    if payload.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(payload.len()));
    }

    let format = ImageFormat::sniff(payload).ok_or_else(|| {
        CodecError::UnrecognizedFormat(payload.iter().take(8).copied().collect())
    })?;

    let mime = format.mime_type();
    let mut data_url = String::with_capacity(mime.len() + 13 + payload.len().div_ceil(3) * 4);
    data_url.push_str("data:");
    data_url.push_str(mime);
    data_url.push_str(";base64,");
    STANDARD.encode_string(payload, &mut data_url);

    Ok(DisplayImage {
        format,
        data_url,
        byte_len: payload.len(),
        decoded_at_ms: now_ms(),
    })
}
