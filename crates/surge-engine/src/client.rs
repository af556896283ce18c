//! HTTP seam between virtual users and the system under test.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use surge_core::{CoreError, CoreResult};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(Bytes::from(body.to_string())),
        }
    }

    /// Path component of the URL, for logs and mock routing.
    pub fn path(&self) -> &str {
        let without_scheme = self.url.split_once("://").map_or(self.url.as_str(), |(_, rest)| rest);
        match without_scheme.find('/') {
            Some(index) => &without_scheme[index..],
            None => "/",
        }
    }
}

/// Outcome of one request. Transport failures carry `status == 0` and an error.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub timing: Duration,
    pub error: Option<String>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>, timing: Duration) -> Self {
        Self {
            timing,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_timing(mut self, timing: Duration) -> Self {
        self.timing = timing;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn is_transport_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Issues requests on behalf of virtual users.
///
/// Implementations never return an error: transport failures are folded into
/// the response so they are counted like any other outcome.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(&self, request: HttpRequest) -> HttpResponse;
}

/// `reqwest`-backed client with a per-request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("surge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoreError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn request(&self, request: HttpRequest) -> HttpResponse {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let started = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return HttpResponse::failed(e.to_string(), started.elapsed()),
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        match response.bytes().await {
            Ok(body) => HttpResponse {
                status,
                headers,
                body,
                timing: started.elapsed(),
                error: None,
            },
            Err(e) => HttpResponse {
                status,
                headers,
                body: Bytes::new(),
                timing: started.elapsed(),
                error: Some(format!("failed to read body: {}", e)),
            },
        }
    }
}
