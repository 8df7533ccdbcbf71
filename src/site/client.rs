use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use url::Url;

use crate::cache::{Method, RequestOptions, Transport, TransportError};
use crate::config::Config;

/// HTTP client for the site's JSON API
#[derive(Clone)]
pub struct SiteClient {
  http: reqwest::Client,
  base: Url,
  token: Option<String>,
  probe_path: Option<String>,
}

impl SiteClient {
  pub fn new(config: &Config) -> Result<Self> {
    let base = Url::parse(&config.site.url)
      .map_err(|e| eyre!("Invalid site url {}: {}", config.site.url, e))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.site.timeout_secs))
      .user_agent(concat!("chapel/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      token: Config::api_token(),
      probe_path: config.connectivity.probe_path.clone(),
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  /// Resolve a target against the site URL. Absolute URLs pass through.
  fn resolve(&self, target: &str) -> Result<Url, TransportError> {
    self
      .base
      .join(target)
      .map_err(|e| TransportError::InvalidTarget {
        target: target.to_string(),
        message: e.to_string(),
      })
  }
}

#[async_trait]
impl Transport for SiteClient {
  async fn request(&self, target: &str, options: &RequestOptions) -> Result<Value, TransportError> {
    let url = self.resolve(target)?;
    tracing::debug!(method = options.method.as_str(), %url, "sending request");

    let mut request = self.http.request(to_reqwest(options.method), url);
    for (name, value) in &options.headers {
      request = request.header(name.as_str(), value.as_str());
    }
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }
    if let Some(body) = &options.body {
      request = request.json(body);
    }

    let response = request
      .send()
      .await
      .map_err(|e| TransportError::Network {
        target: target.to_string(),
        message: e.to_string(),
      })?;

    let status = response.status();
    let text = response.text().await.map_err(|e| TransportError::Decode {
      target: target.to_string(),
      message: e.to_string(),
    })?;

    if !status.is_success() {
      return Err(TransportError::Status {
        target: target.to_string(),
        status: status.as_u16(),
        body: text,
      });
    }

    Ok(decode_body(&text))
  }

  async fn probe(&self) -> bool {
    let Some(path) = &self.probe_path else {
      return true;
    };
    let Ok(url) = self.resolve(path) else {
      return false;
    };

    match self.http.get(url).send().await {
      Ok(response) => response.status().is_success(),
      Err(e) => {
        tracing::debug!(error = %e, "connectivity probe failed");
        false
      }
    }
  }
}

fn to_reqwest(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

/// Empty bodies become null and non-JSON bodies a JSON string.
fn decode_body(text: &str) -> Value {
  if text.trim().is_empty() {
    return Value::Null;
  }
  serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::net::SocketAddr;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  fn config(url: &str, probe_path: Option<&str>) -> Config {
    let mut yaml = format!("site:\n  url: {}\n  timeout_secs: 5\n", url);
    if let Some(path) = probe_path {
      yaml.push_str(&format!("connectivity:\n  probe_path: {}\n", path));
    }
    serde_yaml::from_str(&yaml).unwrap()
  }

  /// Answer a single HTTP request with a fixed status and body.
  async fn serve_once(status: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut buf = vec![0u8; 4096];
      let mut read = Vec::new();
      while !read.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
          break;
        }
        read.extend_from_slice(&buf[..n]);
      }
      let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
      );
      socket.write_all(response.as_bytes()).await.unwrap();
      socket.shutdown().await.ok();
    });

    addr
  }

  #[test]
  fn test_decode_body() {
    assert_eq!(decode_body(""), Value::Null);
    assert_eq!(decode_body("  \n"), Value::Null);
    assert_eq!(decode_body(r#"{"id": 1}"#), json!({ "id": 1 }));
    assert_eq!(decode_body("Thanks!"), json!("Thanks!"));
  }

  #[test]
  fn test_resolve_targets() {
    let client = SiteClient::new(&config("https://www.gracechapel.org", None)).unwrap();

    assert_eq!(
      client.resolve("/api/sermons").unwrap().as_str(),
      "https://www.gracechapel.org/api/sermons"
    );
    assert_eq!(
      client.resolve("/api/search?q=easter").unwrap().as_str(),
      "https://www.gracechapel.org/api/search?q=easter"
    );
    assert_eq!(
      client.resolve("https://calendar.example.com/feed").unwrap().as_str(),
      "https://calendar.example.com/feed"
    );
  }

  #[test]
  fn test_invalid_base_url() {
    assert!(SiteClient::new(&config("not a url", None)).is_err());
  }

  #[tokio::test]
  async fn test_probe_without_path_is_online() {
    let client = SiteClient::new(&config("http://127.0.0.1:9", None)).unwrap();
    assert!(client.probe().await);
  }

  #[tokio::test]
  async fn test_request_decodes_json() {
    let addr = serve_once("200 OK", r#"[{"id":1,"title":"Grace"}]"#).await;
    let client = SiteClient::new(&config(&format!("http://{}", addr), None)).unwrap();

    let data = client
      .request("/api/sermons", &RequestOptions::read())
      .await
      .unwrap();
    assert_eq!(data, json!([{ "id": 1, "title": "Grace" }]));
  }

  #[tokio::test]
  async fn test_error_status_is_reported() {
    let addr = serve_once("503 Service Unavailable", r#"{"error":"down"}"#).await;
    let client = SiteClient::new(&config(&format!("http://{}", addr), None)).unwrap();

    let err = client
      .request("/api/sermons", &RequestOptions::read())
      .await
      .unwrap_err();
    match err {
      TransportError::Status { status, body, .. } => {
        assert_eq!(status, 503);
        assert_eq!(body, r#"{"error":"down"}"#);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[tokio::test]
  async fn test_probe_reports_reachability() {
    let addr = serve_once("200 OK", "{}").await;
    let client = SiteClient::new(&config(&format!("http://{}", addr), Some("/api/health"))).unwrap();
    assert!(client.probe().await);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed = listener.local_addr().unwrap();
    drop(listener);
    let client = SiteClient::new(&config(&format!("http://{}", closed), Some("/api/health"))).unwrap();
    assert!(!client.probe().await);
  }

  #[tokio::test]
  async fn test_connection_failure_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed = listener.local_addr().unwrap();
    drop(listener);
    let client = SiteClient::new(&config(&format!("http://{}", closed), None)).unwrap();

    let err = client
      .request("/api/events", &RequestOptions::read())
      .await
      .unwrap_err();
    assert!(matches!(err, TransportError::Network { .. }));
    assert!(!err.is_permanent());
  }
}
