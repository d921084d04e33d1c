use crate::model::{HttpMethod, Status};
use once_cell::sync::Lazy;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Operation timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("{0}")]
    Transport(String),
}

/// Outcome of one reachability check. Always a value, never an error.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub status: Status,
    /// Rounded milliseconds; 0 on failure.
    pub latency: u64,
    pub detail: String,
    pub failure: Option<ProbeError>,
}

impl CheckResult {
    pub fn is_up(&self) -> bool {
        self.status == Status::Up
    }
}

/// Issues the request. Completing at all counts as reachable; callers must not
/// rely on status or body.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, method: HttpMethod, url: &str) -> Result<(), ProbeError>;
}

static HTTP_CLIENT: Lazy<Result<reqwest::Client, String>> = Lazy::new(|| {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true) // reachability, not trust
        .no_gzip()
        .user_agent(concat!("CurlGuard/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| e.to_string())
});

pub struct HttpTransport;

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, method: HttpMethod, url: &str) -> Result<(), ProbeError> {
        let client = HTTP_CLIENT
            .as_ref()
            .map_err(|e| ProbeError::Transport(e.clone()))?;
        let request = match method {
            HttpMethod::Get => client.get(url),
            HttpMethod::Head => client.head(url),
        };
        // The response is dropped unread.
        request
            .send()
            .await
            .map(drop)
            .map_err(|e| ProbeError::Transport(root_cause(&e)))
    }
}

/// Innermost message of an error chain, e.g. "Connection refused (os error 111)".
fn root_cause(err: &(dyn StdError + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

pub struct Prober {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Prober {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn http(timeout: Duration) -> Self {
        Self::new(Arc::new(HttpTransport), timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One check with a hard deadline. The deadline timer belongs to this
    /// future and goes away with it on every path.
    pub async fn check(&self, url: &str, method: HttpMethod) -> CheckResult {
        let start = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.transport.send(method, url)).await;
        let elapsed = start.elapsed();

        let failure = match outcome {
            Ok(Ok(())) => {
                let latency = round_millis(elapsed).max(1);
                tracing::debug!("{} {} reachable in {}ms", method, url, latency);
                return CheckResult {
                    status: Status::Up,
                    latency,
                    detail: format!("HTTP/1.1 200 OK (opaque response) - Time: {}ms", latency),
                    failure: None,
                };
            }
            Ok(Err(e)) => e,
            Err(_) => ProbeError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            },
        };

        tracing::debug!("{} {} failed: {}", method, url, failure);
        CheckResult {
            status: Status::Down,
            latency: 0,
            detail: failure_detail(url, &failure),
            failure: Some(failure),
        }
    }
}

fn round_millis(elapsed: Duration) -> u64 {
    (elapsed.as_secs_f64() * 1000.0).round() as u64
}

fn failure_detail(url: &str, failure: &ProbeError) -> String {
    match failure {
        ProbeError::Timeout { timeout_ms } => format!(
            "curl: (28) Operation timed out after {} ms connecting to {}",
            timeout_ms, url
        ),
        ProbeError::Transport(msg) => {
            let msg = if msg.trim().is_empty() { "Connection refused" } else { msg.as_str() };
            format!("curl: (7) Failed to connect to {}: {}", url, msg)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::stub::{Behavior, StubTransport};
    use super::*;

    fn prober(behavior: Behavior) -> Prober {
        Prober::new(StubTransport::new(behavior), Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }

    #[tokio::test(start_paused = true)]
    async fn completion_is_success_with_latency() {
        let result = prober(Behavior::SucceedAfter(Duration::from_millis(42)))
            .check("https://example.com", HttpMethod::Get)
            .await;

        assert_eq!(result.status, Status::Up);
        assert_eq!(result.latency, 42);
        assert!(result.detail.contains("42ms"));
        assert!(result.failure.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn instant_completion_still_reports_positive_latency() {
        let result = prober(Behavior::SucceedAfter(Duration::ZERO))
            .check("https://example.com", HttpMethod::Head)
            .await;
        assert!(result.is_up());
        assert_eq!(result.latency, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hang_times_out_at_deadline() {
        let start = Instant::now();
        let result = prober(Behavior::Hang).check("https://slow.example", HttpMethod::Get).await;

        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert!(waited < Duration::from_millis(DEFAULT_TIMEOUT_MS + 5));
        assert_eq!(result.status, Status::Down);
        assert_eq!(result.latency, 0);
        assert_eq!(result.failure, Some(ProbeError::Timeout { timeout_ms: 5000 }));
        assert!(result.detail.contains("timed out after 5000 ms"), "{}", result.detail);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_text_is_kept() {
        let result = prober(Behavior::FailAfter(
            Duration::from_millis(3),
            "dns error: failed to lookup address information".into(),
        ))
        .check("https://nope.invalid", HttpMethod::Get)
        .await;

        assert_eq!(result.status, Status::Down);
        assert_eq!(result.latency, 0);
        assert_eq!(
            result.detail,
            "curl: (7) Failed to connect to https://nope.invalid: dns error: failed to lookup address information"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_transport_error_falls_back() {
        let result = prober(Behavior::FailAfter(Duration::ZERO, String::new()))
            .check("https://a.example", HttpMethod::Get)
            .await;
        assert!(result.detail.ends_with("Connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_configurable() {
        let prober = Prober::new(StubTransport::new(Behavior::Hang), Duration::from_millis(250));
        let start = Instant::now();
        let result = prober.check("https://a.example", HttpMethod::Get).await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(250) && waited < Duration::from_millis(255));
        assert!(result.detail.contains("250 ms"));
    }

    #[test]
    fn root_cause_walks_chain() {
        #[derive(Debug, Error)]
        #[error("outer")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(root_cause(&err), "refused");
    }
}
