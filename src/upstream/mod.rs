//! Upstream call executor.
//!
//! Performs exactly one bounded call for a key and classifies the result.
//! Nothing here retries or sleeps; pacing belongs to the coordinator.

mod response;
mod transport;

pub use response::{parse_profile, parse_reset_seconds, RateLimitHint};
pub use transport::{
    HttpTransport, Transport, TransportError, TransportResponse, UpstreamRequest, USER_AGENT,
};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::models::{Credentials, LookupResult};

/// Default GraphQL endpoint base.
pub const DEFAULT_API_BASE: &str = "https://x.com/i/api/graphql";

/// Operation name appended after the query id.
const OPERATION: &str = "AboutAccountQuery";

/// Classified result of one upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamOutcome {
    Success {
        result: LookupResult,
        quota_remaining: Option<String>,
    },
    RateLimited(RateLimitHint),
    /// Query id or bearer token missing.
    NotReady,
    /// Session token missing.
    AuthRequired,
    /// Network error, non-2xx status, timeout or unreadable body.
    TransientFailure(String),
}

impl UpstreamOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::RateLimited(_) => "rate_limited",
            Self::NotReady => "not_ready",
            Self::AuthRequired => "auth_required",
            Self::TransientFailure(_) => "transient_failure",
        }
    }
}

/// Executes single upstream lookups through a [`Transport`].
#[derive(Clone)]
pub struct UpstreamExecutor {
    transport: Arc<dyn Transport>,
    api_base: String,
    timeout: Duration,
}

impl UpstreamExecutor {
    pub fn new(transport: Arc<dyn Transport>, api_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Build the request for `key`, or the outcome that prevents sending one.
    pub fn build_request(
        &self,
        credentials: &Credentials,
        key: &str,
    ) -> Result<UpstreamRequest, UpstreamOutcome> {
        let (Some(query_id), Some(bearer)) = (&credentials.query_id, &credentials.bearer_token)
        else {
            return Err(UpstreamOutcome::NotReady);
        };
        let Some(csrf) = &credentials.csrf_token else {
            return Err(UpstreamOutcome::AuthRequired);
        };

        let variables = serde_json::json!({ "screenName": key }).to_string();
        let url = format!(
            "{}/{}/{}?variables={}",
            self.api_base,
            query_id,
            OPERATION,
            urlencoding::encode(&variables)
        );

        Ok(UpstreamRequest {
            url,
            headers: vec![
                ("authorization".to_string(), bearer.clone()),
                ("x-csrf-token".to_string(), csrf.clone()),
                ("content-type".to_string(), "application/json".to_string()),
            ],
        })
    }

    /// Perform one call for `key`.
    pub async fn execute(&self, credentials: &Credentials, key: &str) -> UpstreamOutcome {
        let request = match self.build_request(credentials, key) {
            Ok(request) => request,
            Err(outcome) => {
                debug!("Skipping @{}: {}", key, outcome.label());
                return outcome;
            }
        };

        let response = match tokio::time::timeout(self.timeout, self.transport.send(&request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("Fetch error for @{}: {}", key, e);
                return UpstreamOutcome::TransientFailure(e.to_string());
            }
            Err(_) => {
                warn!("Timeout fetching @{} after {:?}", key, self.timeout);
                return UpstreamOutcome::TransientFailure(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                ));
            }
        };

        classify_response(key, &response)
    }
}

/// Map a raw response onto an outcome.
pub fn classify_response(key: &str, response: &TransportResponse) -> UpstreamOutcome {
    if response.status == 429 {
        let hint = RateLimitHint::from_response(response);
        warn!(
            "Rate limit hit for @{} (remaining: {}, reset: {})",
            key,
            hint.remaining.as_deref().unwrap_or("?"),
            hint.reset_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "none".to_string())
        );
        return UpstreamOutcome::RateLimited(hint);
    }

    if !response.is_success() {
        return UpstreamOutcome::TransientFailure(format!("HTTP {}", response.status));
    }

    match parse_profile(&response.body) {
        Ok(result) => {
            debug!("@{} -> {}", key, result.country_or_unknown());
            UpstreamOutcome::Success {
                result,
                quota_remaining: response::remaining_quota(response),
            }
        }
        Err(e) => UpstreamOutcome::TransientFailure(format!("malformed body: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recording {
        response: TransportResponse,
        delay: Duration,
        seen: Mutex<Vec<UpstreamRequest>>,
    }

    impl Recording {
        fn new(response: TransportResponse) -> Arc<Self> {
            Arc::new(Self {
                response,
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for Recording {
        async fn send(
            &self,
            request: &UpstreamRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            tokio::time::sleep(self.delay).await;
            Ok(self.response.clone())
        }
    }

    fn creds() -> Credentials {
        Credentials {
            query_id: Some("Q1".into()),
            bearer_token: Some("Bearer T".into()),
            csrf_token: Some("C".into()),
        }
    }

    fn executor(transport: Arc<dyn Transport>) -> UpstreamExecutor {
        UpstreamExecutor::new(transport, "https://example.test/graphql/", Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_request_shape() {
        let transport = Recording::new(TransportResponse::new(200, "{}"));
        let outcome = executor(transport.clone()).execute(&creds(), "jack").await;
        assert_eq!(
            outcome,
            UpstreamOutcome::Success {
                result: LookupResult::default(),
                quota_remaining: None
            }
        );

        let seen = transport.seen.lock().unwrap();
        let request = &seen[0];
        assert_eq!(
            request.url,
            "https://example.test/graphql/Q1/AboutAccountQuery?variables=%7B%22screenName%22%3A%22jack%22%7D"
        );
        assert_eq!(request.header("authorization"), Some("Bearer T"));
        assert_eq!(request.header("x-csrf-token"), Some("C"));
        assert_eq!(request.header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_missing_credentials_never_send() {
        let transport = Recording::new(TransportResponse::new(200, "{}"));
        let exec = executor(transport.clone());

        let mut no_query = creds();
        no_query.query_id = None;
        assert_eq!(exec.execute(&no_query, "a").await, UpstreamOutcome::NotReady);

        let mut no_csrf = creds();
        no_csrf.csrf_token = None;
        assert_eq!(exec.execute(&no_csrf, "a").await, UpstreamOutcome::AuthRequired);

        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_success_carries_quota() {
        let body = r#"{"data":{"user_result_by_screen_name":{"result":{"about_profile":{"account_based_in":"Peru"}}}}}"#;
        let transport =
            Recording::new(TransportResponse::new(200, body).with_header("x-rate-limit-remaining", "42"));
        match executor(transport).execute(&creds(), "a").await {
            UpstreamOutcome::Success {
                result,
                quota_remaining,
            } => {
                assert_eq!(result.country.as_deref(), Some("Peru"));
                assert_eq!(quota_remaining.as_deref(), Some("42"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_statuses() {
        let limited = TransportResponse::new(429, "").with_header("x-rate-limit-reset", "1700000000");
        assert!(matches!(
            classify_response("a", &limited),
            UpstreamOutcome::RateLimited(RateLimitHint { reset_at: Some(_), .. })
        ));

        assert_eq!(
            classify_response("a", &TransportResponse::new(503, "")),
            UpstreamOutcome::TransientFailure("HTTP 503".into())
        );
        assert!(matches!(
            classify_response("a", &TransportResponse::new(200, "not json")),
            UpstreamOutcome::TransientFailure(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let transport = Arc::new(Recording {
            response: TransportResponse::new(200, "{}"),
            delay: Duration::from_secs(30),
            seen: Mutex::new(Vec::new()),
        });
        let outcome = executor(transport).execute(&creds(), "slow").await;
        assert!(matches!(outcome, UpstreamOutcome::TransientFailure(ref m) if m.contains("timed out")));
    }
}
