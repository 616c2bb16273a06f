//! Bot authorization handshake.
//!
//! Starting a bot is a single JSON POST. The response body is the set of
//! parameters the transport needs to connect.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, warn};

use botlink_core::SessionError;
use botlink_settings::AuthSettings;

/// A bot start request.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthRequest {
    /// URL the request is POSTed to.
    pub endpoint: String,
    /// JSON request body.
    pub request_data: Value,
    /// Extra headers.
    pub headers: BTreeMap<String, String>,
    /// Whole-request timeout.
    pub timeout: Duration,
}

impl AuthRequest {
    /// Request with an empty body and the default 30 s timeout.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_data: Value::Object(serde_json::Map::new()),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Build from settings; `None` when no endpoint is configured.
    pub fn from_settings(settings: &AuthSettings) -> Option<Self> {
        let endpoint = settings.endpoint.clone()?;
        Some(Self {
            endpoint,
            request_data: settings.request_data.clone(),
            headers: settings.headers.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
        })
    }

    /// Replace the request body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.request_data = body;
        self
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(name.into(), value.into());
        self
    }

    /// Replace the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// HTTP client for the start request.
#[derive(Clone, Debug, Default)]
pub struct AuthClient {
    http: reqwest::Client,
}

impl AuthClient {
    /// Wrap an existing `reqwest` client.
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// POST the request and parse the response body as connect parameters.
    pub async fn authorize(&self, request: &AuthRequest) -> Result<Value, SessionError> {
        debug!(endpoint = %request.endpoint, "starting bot");

        let mut builder = self
            .http
            .post(&request.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .timeout(request.timeout)
            .json(&request.request_data);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "bot start request failed");
            return Err(SessionError::Http {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let body = response.bytes().await.map_err(http_error)?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn http_error(e: reqwest::Error) -> SessionError {
    SessionError::Http {
        status: e.status().map(|s| s.as_u16()),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/start"))
            .and(header("authorization", "Bearer k"))
            .and(body_json(json!({"bot_profile": "voice"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": "ws://bot"})))
            .expect(1)
            .mount(&server)
            .await;

        let request = AuthRequest::new(format!("{}/start", server.uri()))
            .with_body(json!({"bot_profile": "voice"}))
            .with_header("authorization", "Bearer k");
        let params = AuthClient::default().authorize(&request).await.unwrap();
        assert_eq!(params, json!({"url": "ws://bot"}));
    }

    #[tokio::test]
    async fn non_success_status_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let request = AuthRequest::new(server.uri());
        let err = AuthClient::default().authorize(&request).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Http { status: Some(401), message: "Unauthorized".into() }
        );
    }

    #[tokio::test]
    async fn timeout_is_http_error_without_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let request = AuthRequest::new(server.uri()).with_timeout(Duration::from_millis(100));
        let err = AuthClient::default().authorize(&request).await.unwrap_err();
        assert_matches!(err, SessionError::Http { status: None, .. });
    }

    #[tokio::test]
    async fn non_json_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = AuthClient::default()
            .authorize(&AuthRequest::new(server.uri()))
            .await
            .unwrap_err();
        assert_matches!(err, SessionError::Decode(_));
    }

    #[test]
    fn from_settings_requires_endpoint() {
        let mut settings = AuthSettings::default();
        assert!(AuthRequest::from_settings(&settings).is_none());

        settings.endpoint = Some("https://api.example.com/start".into());
        settings.timeout_ms = 5_000;
        let request = AuthRequest::from_settings(&settings).unwrap();
        assert_eq!(request.timeout, Duration::from_secs(5));
        assert_eq!(request.request_data, json!({}));
    }
}
