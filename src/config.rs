//! Viewer configuration

use crate::session::{ReconnectPolicy, RegistryConfig, SessionOptions};
use anyhow::{bail, Context, Result};
use camview_shared::limits;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// How many streams the page shows at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// One stream; picking a camera switches it
    #[default]
    Single,
    /// A grid of independent streams
    Multi,
}

impl FromStr for StreamMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "multi" => Ok(Self::Multi),
            other => bail!("Unknown stream mode '{}' (expected single or multi)", other),
        }
    }
}

impl std::fmt::Display for StreamMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamMode::Single => write!(f, "single"),
            StreamMode::Multi => write!(f, "multi"),
        }
    }
}

/// Configuration for the camera viewer
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Location of the viewer page; stream and catalog URLs derive from it
    pub page_url: String,
    pub mode: StreamMode,
    /// Session cap in multi mode (single mode is always 1)
    pub max_sessions: usize,
    /// Fixed camera list; when unset the list is fetched from the server
    pub cameras: Option<Vec<String>>,
    pub connect_timeout: Duration,
    pub max_inflight_decodes: usize,
    pub reconnect: ReconnectPolicy,
    pub catalog_refresh: Duration,
    pub catalog_timeout: Duration,
    pub stats_interval: Duration,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            page_url: "http://127.0.0.1:7474/".into(),
            mode: StreamMode::Single,
            max_sessions: limits::MAX_CONCURRENT_SESSIONS,
            cameras: None,
            connect_timeout: Duration::from_secs(5),
            max_inflight_decodes: 4,
            reconnect: ReconnectPolicy::Disabled,
            catalog_refresh: Duration::from_secs(30),
            catalog_timeout: Duration::from_secs(5),
            stats_interval: Duration::from_secs(10),
        }
    }
}

impl ViewerConfig {
    /// Defaults overridden by `VIEWER_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key:
    /// `VIEWER_PAGE_URL`, `VIEWER_MODE`, `VIEWER_MAX_SESSIONS`,
    /// `VIEWER_CAMERAS` (comma separated), `VIEWER_RECONNECT` (`off` or
    /// `backoff`), `VIEWER_CONNECT_TIMEOUT_MS`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(page_url) = lookup("VIEWER_PAGE_URL") {
            config.page_url = page_url;
        }
        if let Some(mode) = lookup("VIEWER_MODE") {
            config.mode = mode.parse()?;
        }
        if let Some(max) = lookup("VIEWER_MAX_SESSIONS") {
            config.max_sessions = max
                .trim()
                .parse()
                .with_context(|| format!("Invalid VIEWER_MAX_SESSIONS '{}'", max))?;
            if config.max_sessions == 0 {
                bail!("VIEWER_MAX_SESSIONS must be at least 1");
            }
        }
        if let Some(cameras) = lookup("VIEWER_CAMERAS") {
            config.cameras = Some(
                cameras
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from)
                    .collect(),
            );
        }
        if let Some(reconnect) = lookup("VIEWER_RECONNECT") {
            config.reconnect = match reconnect.trim() {
                "off" | "" => ReconnectPolicy::Disabled,
                "backoff" => ReconnectPolicy::backoff(),
                other => bail!("Unknown VIEWER_RECONNECT '{}' (expected off or backoff)", other),
            };
        }
        if let Some(ms) = lookup("VIEWER_CONNECT_TIMEOUT_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .with_context(|| format!("Invalid VIEWER_CONNECT_TIMEOUT_MS '{}'", ms))?;
            config.connect_timeout = Duration::from_millis(ms);
        }

        config.page_url()?;
        Ok(config)
    }

    pub fn page_url(&self) -> Result<Url> {
        let url = Url::parse(&self.page_url)
            .with_context(|| format!("Invalid page URL '{}'", self.page_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("Page URL must be http or https: {}", url);
        }
        Ok(url)
    }

    pub fn capacity(&self) -> usize {
        match self.mode {
            StreamMode::Single => limits::SINGLE_STREAM,
            StreamMode::Multi => self.max_sessions,
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            capacity: self.capacity(),
            session: SessionOptions {
                connect_timeout: self.connect_timeout,
                max_inflight_decodes: self.max_inflight_decodes,
            },
            reconnect: self.reconnect,
        }
    }
}
