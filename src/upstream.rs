//! Time-bounded fetches from the real device.

use crate::clock::unix_millis;
use crate::error::FetchError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub const CONFIG_PATH: &str = "/config.json";
pub const RUNTIME_PATH: &str = "/runtime.json";
pub const RUNTIME_META_PATH: &str = "/runtime_meta.json";
pub const VERSION_PATH: &str = "/version";
pub const USER_CSS_PATH: &str = "/user_theme.css";

/// Source of device resources. Implementations never retry.
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    async fn fetch_json(&self, path: &str) -> Result<Value, FetchError>;

    async fn fetch_text(&self, path: &str) -> Result<String, FetchError>;

    /// Address reported on `/bridge/status`.
    fn base_url(&self) -> &str;
}

/// Upstream backed by HTTP GETs against the device.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpUpstream {
    /// Fails only if the TLS backend cannot be initialized.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn get(&self, path: &str) -> Result<String, FetchError> {
        let url = cache_busted_url(&self.base_url, path, unix_millis());
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(path, e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Http {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| self.classify(path, e))
    }

    fn classify(&self, path: &str, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                path: path.to_string(),
                after: self.timeout,
            }
        } else {
            FetchError::Transport {
                path: path.to_string(),
                cause: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch_json(&self, path: &str) -> Result<Value, FetchError> {
        let body = self.get(path).await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Decode {
            path: path.to_string(),
            cause: e.to_string(),
        })
    }

    async fn fetch_text(&self, path: &str) -> Result<String, FetchError> {
        self.get(path).await
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Append a `t=<ms>` parameter so intermediaries never answer from cache.
pub fn cache_busted_url(base_url: &str, path: &str, now_ms: u64) -> String {
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{}{}{}t={}", base_url, path, separator, now_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_busted_url_appends_query() {
        assert_eq!(
            cache_busted_url("http://10.0.0.2", "/runtime.json", 1234),
            "http://10.0.0.2/runtime.json?t=1234"
        );
    }

    #[test]
    fn test_cache_busted_url_extends_existing_query() {
        assert_eq!(
            cache_busted_url("http://10.0.0.2", "/config.json?full=1", 5),
            "http://10.0.0.2/config.json?full=1&t=5"
        );
    }

    #[test]
    fn test_trailing_slash_is_stripped() {
        let upstream = HttpUpstream::new("http://device.local/", Duration::from_secs(5)).unwrap();
        assert_eq!(upstream.base_url(), "http://device.local");
        assert_eq!(upstream.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let upstream = HttpUpstream::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        let err = upstream.fetch_json(RUNTIME_PATH).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
        assert_eq!(err.path(), RUNTIME_PATH);
    }
}
