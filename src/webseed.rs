//! Webseed pass-through: forward file requests to the upstream model host.
//!
//! Requests are relayed as-is, including any `Range` header; status, headers
//! and body come back verbatim.

use crate::config::WebseedConfig;
use reqwest::header::{HeaderMap, RANGE, USER_AGENT};

/// Upstream response relayed to the client.
#[derive(Debug)]
pub struct WebseedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Errors that can occur while proxying.
#[derive(Debug)]
pub enum WebseedError {
    /// The HTTP client could not be built.
    Client { source: reqwest::Error },
    /// The upstream request failed (connect, timeout, body read).
    Request { url: String, source: reqwest::Error },
}

impl std::fmt::Display for WebseedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebseedError::Client { source } => write!(f, "failed to build http client: {}", source),
            WebseedError::Request { url, source } => {
                write!(f, "webseed request to {} failed: {}", url, source)
            }
        }
    }
}

impl std::error::Error for WebseedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WebseedError::Client { source } => Some(source),
            WebseedError::Request { source, .. } => Some(source),
        }
    }
}

/// Proxy for `{base_url}/{model}/resolve/{rev}/{path}`.
#[derive(Debug, Clone)]
pub struct WebseedProxy {
    config: WebseedConfig,
    client: reqwest::Client,
}

impl WebseedProxy {
    pub fn new(config: WebseedConfig) -> Result<Self, WebseedError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout())
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| WebseedError::Client { source: e })?;
        Ok(Self { config, client })
    }

    /// False when no upstream is configured; files are then served from the stub catalog.
    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    pub async fn fetch(
        &self,
        model: &str,
        rev: &str,
        path: &str,
        range: Option<&str>,
    ) -> Result<WebseedResponse, WebseedError> {
        let url = build_url(&self.config.base_url, model, rev, path);
        tracing::debug!(%url, ?range, "proxying webseed request");

        let mut request = self
            .client
            .get(&url)
            .header(USER_AGENT, &self.config.user_agent);
        if let Some(range) = range.filter(|r| !r.trim().is_empty()) {
            request = request.header(RANGE, range);
        }

        let response = request.send().await.map_err(|e| WebseedError::Request {
            url: url.clone(),
            source: e,
        })?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| WebseedError::Request { url, source: e })?;

        Ok(WebseedResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Build the upstream URL. Model segments and the revision are encoded as
/// single path segments; `path` keeps its slashes.
fn build_url(base_url: &str, model: &str, rev: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let model_segments = model
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.trim().is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    let rev = urlencoding::encode(rev);
    let path = path
        .split('/')
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/");

    if model_segments.is_empty() {
        format!("{base}/resolve/{rev}/{path}")
    } else {
        format!("{base}/{model_segments}/resolve/{rev}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_basic() {
        assert_eq!(
            build_url(
                "https://huggingface.co/",
                "runwayml/stable-diffusion-v1-5",
                "abc123",
                "unet/model.safetensors"
            ),
            "https://huggingface.co/runwayml/stable-diffusion-v1-5/resolve/abc123/unet/model.safetensors"
        );
    }

    #[test]
    fn test_build_url_encodes_segments() {
        assert_eq!(
            build_url("https://hf.example", "org/my model", "refs/pr 1", "a b.json"),
            "https://hf.example/org/my%20model/resolve/refs%2Fpr%201/a%20b.json"
        );
    }

    #[test]
    fn test_build_url_blank_model() {
        assert_eq!(
            build_url("https://hf.example", "//", "main", "config.json"),
            "https://hf.example/resolve/main/config.json"
        );
    }

    #[test]
    fn test_disabled_when_base_url_blank() {
        let proxy = WebseedProxy::new(WebseedConfig {
            base_url: String::new(),
            ..Default::default()
        })
        .unwrap();
        assert!(!proxy.is_enabled());
    }

    #[tokio::test]
    async fn test_fetch_forwards_range_and_user_agent() {
        use axum::{http::HeaderMap as AxumHeaders, routing::get, Router};

        async fn echo(headers: AxumHeaders) -> (axum::http::StatusCode, String) {
            let range = headers
                .get("range")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let agent = headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            (axum::http::StatusCode::PARTIAL_CONTENT, format!("{range}|{agent}"))
        }

        let app = Router::new().route("/{ns}/{name}/resolve/{rev}/{*path}", get(echo));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let proxy = WebseedProxy::new(WebseedConfig {
            base_url: format!("http://{addr}"),
            ..Default::default()
        })
        .unwrap();
        let response = proxy
            .fetch("org/model", "main", "weights/model.bin", Some("bytes=0-99"))
            .await
            .unwrap();

        assert_eq!(response.status, 206);
        assert_eq!(
            String::from_utf8(response.body).unwrap(),
            "bytes=0-99|hf-bt-webseed-proxy/1.0"
        );
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let proxy = WebseedProxy::new(WebseedConfig {
            base_url: format!("http://127.0.0.1:{port}"),
            timeout_ms: 1_000,
            ..Default::default()
        })
        .unwrap();
        let err = proxy.fetch("org/model", "main", "x", None).await.unwrap_err();
        assert!(matches!(err, WebseedError::Request { .. }));
    }
}
