//! HTTP transport seam
//!
//! The executor talks to a [`Transport`]; production code uses
//! [`ReqwestTransport`], tests substitute their own.

use crate::config::{ClientConfig, ConfigError};
use async_trait::async_trait;
use daybook_resilience::Failure;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Header pairs, in send order
    pub headers: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Value>,
}

impl HttpRequest {
    /// First header value with the given name, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response as seen by the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Raw body text
    pub body: String,
}

impl HttpResponse {
    /// Creates a response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as JSON; an empty body is `null`, a non-JSON body a string
    pub fn json_body(&self) -> Value {
        if self.body.trim().is_empty() {
            return Value::Null;
        }
        serde_json::from_str(&self.body).unwrap_or_else(|_| Value::String(self.body.clone()))
    }

    /// Failure message carried by an error response
    pub fn error_message(&self) -> String {
        match self.json_body() {
            Value::Object(map) => ["error", "message"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| Value::Object(map).to_string()),
            Value::String(text) => text.chars().take(200).collect(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Transport-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not connect
    #[error("connection failed: {0}")]
    Connect(String),

    /// Sent, but the response never arrived intact
    #[error("no response: {0}")]
    NoResponse(String),

    /// The transport's own timer fired
    #[error("transport timed out")]
    Timeout,

    /// Request construction or anything else
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Raw failure for classification
    pub fn into_failure(self, timeout: Duration) -> Failure {
        match self {
            Self::Connect(msg) => Failure::ConnectionRefused(msg),
            Self::NoResponse(msg) => Failure::NoResponse(msg),
            Self::Timeout => Failure::TimedOut(timeout),
            Self::Other(msg) => Failure::Other(msg),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_request() || err.is_body() || err.is_decode() {
            Self::NoResponse(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// Sends one request and returns whatever came back
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Performs the request
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Pooled `reqwest` transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds a transport from client configuration.
    ///
    /// No overall timeout is set here; the executor races each attempt.
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(config.connection_timeout())
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| ConfigError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.to_string());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_response_json_body() {
        assert_eq!(HttpResponse::new(200, "").json_body(), Value::Null);
        assert_eq!(
            HttpResponse::new(200, r#"{"ok":true}"#).json_body(),
            serde_json::json!({"ok": true})
        );
        assert_eq!(
            HttpResponse::new(200, "plain").json_body(),
            Value::String("plain".into())
        );
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            HttpResponse::new(400, r#"{"error":"title required"}"#).error_message(),
            "title required"
        );
        assert_eq!(
            HttpResponse::new(500, r#"{"message":"db down"}"#).error_message(),
            "db down"
        );
        assert_eq!(HttpResponse::new(502, "Bad Gateway").error_message(), "Bad Gateway");
        assert_eq!(HttpResponse::new(503, "").error_message(), "");
    }

    #[test]
    fn test_transport_error_into_failure() {
        let t = Duration::from_secs(2);
        assert_eq!(
            TransportError::Connect("refused".into()).into_failure(t),
            Failure::ConnectionRefused("refused".into())
        );
        assert_eq!(TransportError::Timeout.into_failure(t), Failure::TimedOut(t));
    }

    #[tokio::test]
    async fn test_reqwest_transport_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/entries"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"title": "Day 1"})))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"id":1}"#))
            .expect(1)
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(&ClientConfig::new(server.uri())).unwrap();
        let response = transport
            .send(HttpRequest {
                method: Method::Post,
                url: format!("{}/api/entries", server.uri()),
                headers: vec![("Content-Type".into(), "application/json".into())],
                body: Some(serde_json::json!({"title": "Day 1"})),
            })
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.json_body()["id"], 1);
    }

    #[tokio::test]
    async fn test_reqwest_transport_connect_failure() {
        // Bind then drop a listener so the port is very likely closed
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = ReqwestTransport::new(&ClientConfig::default()).unwrap();
        let err = transport
            .send(HttpRequest {
                method: Method::Get,
                url: format!("http://127.0.0.1:{port}/api/health"),
                headers: vec![],
                body: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Connect(_)));
    }
}
