//! Camera catalog: where the list of selectable cameras comes from

use anyhow::{Context, Result};
use async_trait::async_trait;
use camview_shared::{endpoints, CameraList};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Source of camera identifiers
#[async_trait]
pub trait CameraCatalog: Send + Sync {
    /// Current camera ids, in display order
    async fn cameras(&self) -> Result<Vec<String>>;
}

/// Fetches `GET /cameras_list` from the page origin
pub struct HttpCameraCatalog {
    client: reqwest::Client,
    url: Url,
}

impl HttpCameraCatalog {
    pub fn new(page_url: &Url, timeout: Duration) -> Result<Self> {
        let url = page_url
            .join(endpoints::CAMERAS_LIST)
            .with_context(|| format!("Cannot resolve camera list against {}", page_url))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl CameraCatalog for HttpCameraCatalog {
    async fn cameras(&self) -> Result<Vec<String>> {
        let list: CameraList = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?
            .error_for_status()?
            .json()
            .await
            .context("Malformed camera list")?;
        Ok(list.into_ids())
    }
}

/// Fixed camera list, replaceable at runtime
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    cameras: Arc<Mutex<Vec<String>>>,
}

impl StaticCatalog {
    pub fn new(cameras: Vec<String>) -> Self {
        Self {
            cameras: Arc::new(Mutex::new(cameras)),
        }
    }

    pub fn set(&self, cameras: Vec<String>) {
        *self.cameras.lock() = cameras;
    }
}

#[async_trait]
impl CameraCatalog for StaticCatalog {
    async fn cameras(&self) -> Result<Vec<String>> {
        let cameras = self.cameras.lock().clone();
        Ok(CameraList { cameras }.into_ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(status: &'static str, body: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
        let addr = listener.local_addr().expect("no local addr");

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept failed");
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        Url::parse(&format!("http://{}/viewer/index.html", addr)).expect("bad url")
    }

    #[test]
    fn test_catalog_url_uses_origin() {
        let page = Url::parse("http://localhost:7474/viewer/index.html").expect("bad url");
        let catalog = HttpCameraCatalog::new(&page, Duration::from_secs(1)).expect("build failed");
        assert_eq!(catalog.url().as_str(), "http://localhost:7474/cameras_list");
    }

    #[tokio::test]
    async fn test_fetch_camera_list() {
        let page = serve_once("200 OK", r#"{"cameras": ["cam1", "cam2"]}"#).await;
        let catalog = HttpCameraCatalog::new(&page, Duration::from_secs(5)).expect("build failed");
        assert_eq!(catalog.cameras().await.expect("fetch failed"), vec!["cam1", "cam2"]);
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let page = serve_once("500 Internal Server Error", "{}").await;
        let catalog = HttpCameraCatalog::new(&page, Duration::from_secs(5)).expect("build failed");
        assert!(catalog.cameras().await.is_err());
    }

    #[tokio::test]
    async fn test_static_catalog_updates() {
        let catalog = StaticCatalog::new(vec!["cam1".into()]);
        assert_eq!(catalog.cameras().await.expect("list failed"), vec!["cam1"]);

        catalog.set(vec!["cam2".into(), "".into(), "cam3".into()]);
        assert_eq!(catalog.cameras().await.expect("list failed"), vec!["cam2", "cam3"]);
    }
}
