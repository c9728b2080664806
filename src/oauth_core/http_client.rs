//! Outbound HTTP used by remote token verification.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

/// The request methods remote verification needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    GET,
    POST,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::GET => f.write_str("GET"),
            HttpMethod::POST => f.write_str("POST"),
        }
    }
}

/// HTTP request for executing a call.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Per-request timeout, enforced by the client when it can.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// A form-encoded POST.
    pub fn post_form(url: impl Into<String>, body: String) -> Self {
        Self {
            method: HttpMethod::POST,
            url: url.into(),
            headers: vec![("Content-Type".into(), "application/x-www-form-urlencoded".into())],
            body: Some(body.into_bytes()),
            timeout: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP response from executing a call.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: Vec::new(), body: body.into() }
    }

    /// A response carrying a JSON body.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: body.to_string().into_bytes(),
        }
    }
}

/// Error type for HTTP client operations.
pub type HttpClientError = Box<dyn Error + Send + Sync>;

pub type HttpFuture = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpClientError>> + Send + 'static>>;

/// Generic HTTP client interface; object safe so verifiers can hold `Arc<dyn OAuthHttpClient>`.
pub trait OAuthHttpClient: Send + Sync + 'static {
    fn execute(&self, request: HttpRequest) -> HttpFuture;
}

#[derive(Debug, Clone)]
enum Canned {
    Respond(HttpResponse),
    Fail(String),
}

/// In-memory HTTP client stub for testing.
///
/// Answers by URL, optionally after a delay, and can simulate connection
/// failures.
#[derive(Clone, Default)]
pub struct InMemoryHttpClient {
    responses: Arc<DashMap<String, Canned>>,
    default_response: Option<HttpResponse>,
    delay: Option<Duration>,
    requests: Arc<DashMap<String, Vec<HttpRequest>>>,
}

impl InMemoryHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every unknown URL with `response`.
    pub fn with_default(response: HttpResponse) -> Self {
        Self { default_response: Some(response), ..Self::default() }
    }

    /// Sleeps before answering, to exercise caller timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Register a mock response for a specific URL.
    pub fn insert_response(&self, url: impl Into<String>, response: HttpResponse) {
        self.responses.insert(url.into(), Canned::Respond(response));
    }

    /// Make calls to `url` fail as if the connection was refused.
    pub fn insert_failure(&self, url: impl Into<String>, message: impl Into<String>) {
        self.responses.insert(url.into(), Canned::Fail(message.into()));
    }

    /// Requests seen so far for `url`.
    pub fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
        self.requests.get(url).map(|entry| entry.value().clone()).unwrap_or_default()
    }
}

impl OAuthHttpClient for InMemoryHttpClient {
    fn execute(&self, request: HttpRequest) -> HttpFuture {
        let responses = self.responses.clone();
        let default = self.default_response.clone();
        let delay = self.delay;
        let url = request.url.clone();
        self.requests.entry(url.clone()).or_default().push(request);
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let canned = responses.get(&url).map(|entry| entry.value().clone());
            match canned {
                Some(Canned::Respond(resp)) => Ok(resp),
                Some(Canned::Fail(message)) => Err(message.into()),
                None => default.ok_or_else(|| "no mock response for url".into()),
            }
        })
    }
}

/// HTTP client backed by `reqwest`.
#[cfg(feature = "remote")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

#[cfg(feature = "remote")]
impl ReqwestHttpClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "remote")]
impl OAuthHttpClient for ReqwestHttpClient {
    fn execute(&self, request: HttpRequest) -> HttpFuture {
        let client = self.client.clone();
        Box::pin(async move {
            let method = match request.method {
                HttpMethod::GET => reqwest::Method::GET,
                HttpMethod::POST => reqwest::Method::POST,
            };
            let mut builder = client.request(method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
            let resp = builder.send().await?;
            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                .collect();
            let body = resp.bytes().await?.to_vec();
            Ok(HttpResponse { status, headers, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_by_url_and_records_requests() {
        let client = InMemoryHttpClient::new();
        client.insert_response("http://auth/check", HttpResponse::new(200, "ok"));
        client.insert_failure("http://down/check", "connection refused");

        let resp = client.execute(HttpRequest::post_form("http://auth/check", "token=t".into())).await.unwrap();
        assert_eq!(resp.body, b"ok");
        assert!(client.execute(HttpRequest::post_form("http://down/check", String::new())).await.is_err());
        assert!(client.execute(HttpRequest::post_form("http://nowhere", String::new())).await.is_err());

        let seen = client.requests_to("http://auth/check");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].header_value("content-type"), Some("application/x-www-form-urlencoded"));
    }
}
