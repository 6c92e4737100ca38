//! Stream address derivation from the page location

use camview_shared::endpoints::STREAM_HANDLER;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Camera id is empty")]
    EmptyCameraId,

    #[error("Unsupported page scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    #[error("Page URL has no path to resolve against: {0}")]
    CannotBeABase(String),

    #[error("Invalid URL: {0}")]
    Parse(#[from] url::ParseError),
}

/// Build the stream address for `camera_id`.
///
/// The stream handler path is resolved relative to `page_url`, the camera
/// id is appended as a single percent-encoded segment, and the scheme
/// maps `http -> ws`, `https -> wss`.
pub fn stream_url(page_url: &Url, camera_id: &str) -> Result<Url, AddressError> {
    if camera_id.trim().is_empty() {
        return Err(AddressError::EmptyCameraId);
    }

    let scheme = match page_url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(AddressError::UnsupportedScheme(other.to_string())),
    };

    let mut url = page_url.join(&format!("{STREAM_HANDLER}/"))?;
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| AddressError::CannotBeABase(page_url.to_string()))?
        .pop_if_empty()
        .push(camera_id);

    url.set_scheme(scheme)
        .map_err(|_| AddressError::UnsupportedScheme(page_url.scheme().to_string()))?;

    Ok(url)
}
