//! Probe requests through the data plane
//!
//! Conformance backends run an echo server that answers every request with a
//! JSON description of what it received. A [`RoundTripper`] sends one request
//! and returns both that echo and the response metadata.

use crate::config::TimeoutConfig;
use crate::polling::{wait_for, Check};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
    H2c,
    Grpc,
    Tcp,
    Tls,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::H2c => "H2C",
            Protocol::Grpc => "gRPC",
            Protocol::Tcp => "TCP",
            Protocol::Tls => "TLS",
        };
        f.write_str(name)
    }
}

/// PEM material for TLS probes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    pub server_name: String,
    pub ca_cert_pem: Vec<u8>,
    pub client_cert_pem: Option<Vec<u8>>,
    pub client_key_pem: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub protocol: Protocol,
    /// Value of the Host header; the address is used when empty
    pub host: String,
    /// `host:port` to connect to
    pub address: String,
    pub path: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub tls: Option<TlsMaterial>,
}

impl Request {
    /// Plain HTTP GET
    pub fn http(address: &str, path: &str) -> Self {
        Self {
            protocol: Protocol::Http,
            host: String::new(),
            address: address.to_string(),
            path: path.to_string(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            tls: None,
        }
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

/// What the echo server saw
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CapturedRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, rename = "proto")]
    pub protocol: String,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub pod: String,
}

impl CapturedRequest {
    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, Vec<String>>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoundTripError {
    #[error("protocol {0} is not supported by this round tripper")]
    UnsupportedProtocol(Protocol),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to decode echo response: {0}")]
    Decode(String),

    #[error("response mismatch: {0}")]
    Mismatch(String),
}

#[async_trait]
pub trait RoundTripper: Send + Sync {
    /// Send one request. The captured request is present when the backend
    /// answered with 200 and an echo body.
    async fn capture_round_trip(
        &self,
        request: &Request,
    ) -> Result<(Option<CapturedRequest>, CapturedResponse), RoundTripError>;
}

/// Plaintext HTTP/1.1 round tripper
pub struct HttpRoundTripper {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl HttpRoundTripper {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client, timeout }
    }
}

#[async_trait]
impl RoundTripper for HttpRoundTripper {
    async fn capture_round_trip(
        &self,
        request: &Request,
    ) -> Result<(Option<CapturedRequest>, CapturedResponse), RoundTripError> {
        if request.protocol != Protocol::Http {
            return Err(RoundTripError::UnsupportedProtocol(request.protocol));
        }

        let uri = format!("http://{}{}", request.address, request.path);
        let mut builder = hyper::Request::builder()
            .method(request.method.as_str())
            .uri(uri.as_str());
        if !request.host.is_empty() {
            builder = builder.header(hyper::header::HOST, request.host.as_str());
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let outgoing = builder
            .body(Full::new(Bytes::new()))
            .map_err(|e| RoundTripError::InvalidRequest(e.to_string()))?;

        debug!(method = %request.method, uri = %uri, host = %request.host, "Sending probe");
        let response = tokio::time::timeout(self.timeout, self.client.request(outgoing))
            .await
            .map_err(|_| RoundTripError::Timeout(self.timeout))?
            .map_err(|e| RoundTripError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in response.headers() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RoundTripError::Transport(e.to_string()))?
            .to_bytes();

        let captured = if status == 200 {
            let echo: CapturedRequest = serde_json::from_slice(&body)
                .map_err(|e| RoundTripError::Decode(e.to_string()))?;
            Some(echo)
        } else {
            None
        };

        Ok((captured, CapturedResponse { status, headers }))
    }
}

/// What a probe should observe once the data plane has converged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedResponse {
    pub status: u16,
    /// Prefix of the backend pod name
    pub backend: String,
    pub namespace: String,
}

impl ExpectedResponse {
    pub fn ok(backend: &str, namespace: &str) -> Self {
        Self {
            status: 200,
            backend: backend.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

/// Compare a captured exchange with the expectation
pub fn check_response(
    request: &Request,
    captured: Option<&CapturedRequest>,
    response: &CapturedResponse,
    expected: &ExpectedResponse,
) -> Result<(), RoundTripError> {
    let mismatch = |msg: String| Err(RoundTripError::Mismatch(msg));

    if response.status != expected.status {
        return mismatch(format!(
            "expected status {}, got {}",
            expected.status, response.status
        ));
    }
    if response.status != 200 {
        return Ok(());
    }

    let Some(captured) = captured else {
        return mismatch("no echo body captured".to_string());
    };
    if captured.path != request.path {
        return mismatch(format!("expected path {}, got {}", request.path, captured.path));
    }
    if captured.method != request.method {
        return mismatch(format!(
            "expected method {}, got {}",
            request.method, captured.method
        ));
    }
    if captured.namespace != expected.namespace {
        return mismatch(format!(
            "expected namespace {}, got {}",
            expected.namespace, captured.namespace
        ));
    }
    for (name, value) in &request.headers {
        match captured.header(name) {
            Some(actual) if actual == value => {}
            Some(actual) => {
                return mismatch(format!("expected header {}={}, got {}", name, value, actual))
            }
            None => return mismatch(format!("expected header {} to be set", name)),
        }
    }
    if !captured.pod.starts_with(&expected.backend) {
        return mismatch(format!(
            "expected pod name to start with {}, got {}",
            expected.backend, captured.pod
        ));
    }
    Ok(())
}

/// Wait for the expected status, then require it consistently
///
/// The data plane may lag behind route status, so requests are retried until
/// one returns the expected status. After that every one of
/// `required_consecutive_successes` requests must match fully.
pub async fn expect_eventually_consistent_response(
    round_tripper: &dyn RoundTripper,
    timeouts: &TimeoutConfig,
    request: &Request,
    expected: &ExpectedResponse,
) -> Result<(), RoundTripError> {
    info!(
        method = %request.method,
        address = %request.address,
        path = %request.path,
        "Waiting for consistent response"
    );

    wait_for(
        "expected response status",
        timeouts.poll_interval(),
        Duration::from_secs(timeouts.max_time_to_consistency_secs),
        || async {
            let (_, response) = round_tripper.capture_round_trip(request).await?;
            let check = if response.status == expected.status {
                Check::Ready(())
            } else {
                Check::Pending(format!("status {}", response.status))
            };
            Ok::<_, RoundTripError>(check)
        },
    )
    .await
    .map_err(|e| RoundTripError::Mismatch(e.to_string()))?;

    for attempt in 1..=timeouts.required_consecutive_successes {
        let (captured, response) = round_tripper.capture_round_trip(request).await?;
        check_response(request, captured.as_ref(), &response, expected).map_err(|e| {
            RoundTripError::Mismatch(format!("consistency check {}: {}", attempt, e))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers 503 for the first `warmup` requests, then echoes
    struct WarmingEcho {
        warmup: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RoundTripper for WarmingEcho {
        async fn capture_round_trip(
            &self,
            request: &Request,
        ) -> Result<(Option<CapturedRequest>, CapturedResponse), RoundTripError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.warmup {
                return Ok((None, CapturedResponse { status: 503, ..Default::default() }));
            }
            let echo = CapturedRequest {
                path: request.path.clone(),
                method: request.method.clone(),
                namespace: "gateway-conformance-infra".to_string(),
                pod: "infra-backend-v1-7d9f".to_string(),
                ..Default::default()
            };
            Ok((Some(echo), CapturedResponse { status: 200, ..Default::default() }))
        }
    }

    fn fast_timeouts() -> TimeoutConfig {
        TimeoutConfig {
            poll_interval_ms: 10,
            max_time_to_consistency_secs: 1,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_consistent_after_warmup() {
        let rt = WarmingEcho { warmup: 3, calls: AtomicUsize::new(0) };
        let request = Request::http("10.0.0.1:80", "/");
        let expected = ExpectedResponse::ok("infra-backend-v1", "gateway-conformance-infra");

        expect_eventually_consistent_response(&rt, &fast_timeouts(), &request, &expected)
            .await
            .expect("Should converge");

        // 3 warmup + 1 ready + 3 consistency checks
        assert_eq!(rt.calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_backend_is_a_mismatch() {
        let rt = WarmingEcho { warmup: 0, calls: AtomicUsize::new(0) };
        let request = Request::http("10.0.0.1:80", "/");
        let expected = ExpectedResponse::ok("infra-backend-v2", "gateway-conformance-infra");

        let err = expect_eventually_consistent_response(&rt, &fast_timeouts(), &request, &expected)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("infra-backend-v2"), "{}", err);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let captured = CapturedRequest {
            headers: [("X-Echo-Set-Header".to_string(), vec!["a".to_string()])].into(),
            ..Default::default()
        };
        assert_eq!(captured.header("x-echo-set-header"), Some("a"));
    }

    #[tokio::test]
    async fn test_unsupported_protocol() {
        let rt = HttpRoundTripper::new(Duration::from_secs(1));
        let mut request = Request::http("127.0.0.1:1", "/");
        request.protocol = Protocol::Tcp;

        let err = rt.capture_round_trip(&request).await.unwrap_err();
        assert_eq!(err, RoundTripError::UnsupportedProtocol(Protocol::Tcp));
    }

    #[tokio::test]
    async fn test_http_round_trip_decodes_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            let body = r#"{"path":"/echo","host":"example.com","method":"GET","proto":"HTTP/1.1","headers":{"User-Agent":["hyper"]},"namespace":"gateway-conformance-infra","pod":"infra-backend-v1-abc"}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let rt = HttpRoundTripper::new(Duration::from_secs(5));
        let request = Request::http(&address, "/echo").with_host("example.com");
        let (captured, response) = rt.capture_round_trip(&request).await.expect("Should round trip");

        assert_eq!(response.status, 200);
        assert_eq!(response.headers["content-type"], vec!["application/json"]);
        let captured = captured.expect("Should capture echo");
        assert_eq!(captured.host, "example.com");
        assert_eq!(captured.pod, "infra-backend-v1-abc");
    }
}
