//! Rate-limited API client: the atomic fetch unit everything builds on
//!
//! One logical request = up to [`RetryConfig::max_attempts`] physical
//! attempts. Transient conditions (429, 5xx, timeouts) are retried with the
//! policy from [`crate::retry`]; a 429 sleeps the server-advised delay plus a
//! safety margin but still consumes a normal attempt slot. Authorization
//! failures and malformed responses never retry.
//!
//! [`RetryConfig::max_attempts`]: crate::config::RetryConfig::max_attempts

use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::{IsRetryable, backoff_delay, rate_limit_delay};
use crate::types::{Channel, ChannelKind, CurrentUser, Message};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Timeout for identity and channel-list requests
const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for message-page requests
const MESSAGES_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for attachment downloads
const ATTACHMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fallback when a 429 body carries no usable `retry_after`
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after: Option<f64>,
}

/// HTTP client for the chat service, holding the credential, base URL and
/// retry policy for the run
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl ApiClient {
    /// Build a client for `token`.
    ///
    /// The credential is sent verbatim in the `Authorization` header on every
    /// request. `cancel` is observed during retry and backoff waits.
    pub fn new(token: &str, config: &Config, cancel: CancellationToken) -> Result<Self> {
        let mut auth = HeaderValue::from_str(token.trim()).map_err(|_| Error::InvalidCredential)?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let mut base = config.api_base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)?;

        Ok(Self {
            http,
            base_url,
            retry: config.retry.clone(),
            cancel,
        })
    }

    /// Validate the credential against the identity endpoint.
    ///
    /// Succeeds iff the endpoint returns 2xx with the required `id` and
    /// `username` fields present.
    pub async fn current_user(&self) -> Result<CurrentUser> {
        let url = self.endpoint("users/@me")?;
        self.get_json(url, &[], IDENTITY_TIMEOUT).await
    }

    /// List the user's private channels, filtered to direct and group kinds
    pub async fn private_channels(&self) -> Result<Vec<Channel>> {
        let url = self.endpoint("users/@me/channels")?;
        let channels: Vec<Channel> = self.get_json(url, &[], IDENTITY_TIMEOUT).await?;
        Ok(channels
            .into_iter()
            .filter(|c| matches!(c.kind, ChannelKind::Direct | ChannelKind::Group))
            .collect())
    }

    /// Fetch one page of up to `limit` messages for a channel, strictly older
    /// than `before` when a cursor is given. Pages come newest-first.
    pub async fn messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let url = self.endpoint(&format!("channels/{channel_id}/messages"))?;
        let limit = limit.to_string();
        let mut query: Vec<(&str, &str)> = vec![("limit", &limit)];
        if let Some(cursor) = before {
            query.push(("before", cursor));
        }
        self.get_json(url, &query, MESSAGES_TIMEOUT).await
    }

    /// Open a streaming GET for an attachment URL.
    ///
    /// Single attempt, no retry: attachment failures are tolerated by the
    /// caller rather than spent against the rate budget.
    pub async fn fetch_binary(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(url)
            .timeout(ATTACHMENT_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::UnexpectedStatus(status));
        }
        Ok(response)
    }

    /// One logical GET: retries transient failures up to the attempt ceiling,
    /// decoding the 2xx body as `T`
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<T> {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 0..max_attempts {
            let request = self.http.get(url.clone()).query(query).timeout(timeout);
            let error = match self.execute(request).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempt + 1 == max_attempts {
                tracing::error!(url = %url, attempts = max_attempts, error = %error, "Request failed after all attempts");
                return Err(Error::RetriesExhausted {
                    attempts: max_attempts,
                    last_error: error.to_string(),
                });
            }

            // A 429 waits the server-advised delay; everything else backs off
            // exponentially. Both consume the same attempt ceiling.
            let delay = match &error {
                Error::RateLimited { retry_after } => {
                    tracing::warn!(url = %url, retry_after = ?retry_after, "Rate limited, honoring advised delay");
                    rate_limit_delay(*retry_after)
                }
                _ => {
                    let delay = backoff_delay(&self.retry, attempt);
                    tracing::warn!(
                        url = %url,
                        attempt = attempt + 1,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "Transient request failure, retrying"
                    );
                    delay
                }
            };
            self.sleep(delay).await?;
        }

        unreachable!("retry loop returns before exhausting the range")
    }

    /// Single physical attempt: send, classify the status, decode the body
    async fn execute<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();

        match status {
            StatusCode::UNAUTHORIZED => Err(Error::Unauthorized),
            StatusCode::FORBIDDEN => Err(Error::Forbidden),
            StatusCode::NOT_FOUND => Err(Error::NotFound),
            StatusCode::TOO_MANY_REQUESTS => {
                // A hostile body can carry a negative, NaN or overflowing
                // delay; anything unconvertible falls back to the default
                let retry_after = response
                    .json::<RateLimitBody>()
                    .await
                    .ok()
                    .and_then(|body| body.retry_after)
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                Err(Error::RateLimited { retry_after })
            }
            s if s.is_server_error() => Err(Error::Server { status: s }),
            s if !s.is_success() => Err(Error::UnexpectedStatus(s)),
            _ => response
                .json::<T>()
                .await
                .map_err(|e| Error::MalformedResponse(e.to_string())),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Sleep that a cancellation request cuts short
    async fn sleep(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> Config {
        Config {
            api_base_url: base_url.to_string(),
            retry: RetryConfig {
                max_attempts: 5,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            ..Config::default()
        }
    }

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(
            "token-abc",
            &test_config(&server.uri()),
            CancellationToken::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn current_user_decodes_identity_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .and(header("authorization", "token-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "42",
                "username": "alice",
                "discriminator": "0"
            })))
            .mount(&server)
            .await;

        let user = client_for(&server).current_user().await.unwrap();
        assert_eq!(user.id, "42");
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn unauthorized_fails_immediately_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).current_user().await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
    }

    #[tokio::test]
    async fn missing_identity_fields_are_malformed_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "42"})))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).current_user().await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn server_errors_retry_then_succeed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me/channels"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/@me/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let channels = client_for(&server).private_channels().await.unwrap();
        assert!(channels.is_empty());
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn persistent_server_error_exhausts_the_attempt_ceiling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me/channels"))
            .respond_with(ResponseTemplate::new(500))
            .expect(5)
            .mount(&server)
            .await;

        let err = client_for(&server).private_channels().await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 5, .. }));
    }

    #[tokio::test]
    async fn rate_limit_waits_advised_delay_and_consumes_an_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/123/messages"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({"retry_after": 2.0})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/123/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let started = Instant::now();
        let messages = client_for(&server)
            .messages("123", None, 100)
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(messages.is_empty());
        // retry_after (2.0s) + 0.5s margin
        assert!(
            elapsed >= Duration::from_millis(2500),
            "should pause at least 2.5s, paused {elapsed:?}"
        );
        assert_eq!(
            server.received_requests().await.unwrap().len(),
            2,
            "the rate-limited attempt plus one retry"
        );
    }

    #[tokio::test]
    async fn persistent_rate_limit_fails_as_exhausted_not_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/123/messages"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({"retry_after": 0.01})),
            )
            .mount(&server)
            .await;

        let client = ApiClient::new(
            "token-abc",
            &Config {
                retry: RetryConfig {
                    max_attempts: 3,
                    initial_delay: Duration::from_millis(10),
                    ..RetryConfig::default()
                },
                ..test_config(&server.uri())
            },
            CancellationToken::new(),
        )
        .unwrap();

        let err = client.messages("123", None, 100).await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn unusable_retry_after_values_fall_back_instead_of_panicking() {
        for body in [json!({"retry_after": -1.0}), json!({"retry_after": 1e300})] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/channels/123/messages"))
                .respond_with(ResponseTemplate::new(429).set_body_json(body))
                .mount(&server)
                .await;

            // One attempt: the ceiling is hit before the fallback delay is slept
            let client = ApiClient::new(
                "token-abc",
                &Config {
                    retry: RetryConfig {
                        max_attempts: 1,
                        ..RetryConfig::default()
                    },
                    ..test_config(&server.uri())
                },
                CancellationToken::new(),
            )
            .unwrap();

            let err = client.messages("123", None, 100).await.unwrap_err();
            assert!(matches!(err, Error::RetriesExhausted { attempts: 1, .. }));
        }
    }

    #[tokio::test]
    async fn messages_sends_limit_and_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/123/messages"))
            .and(query_param("limit", "100"))
            .and(query_param("before", "555"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .messages("123", Some("555"), 100)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wrong_shape_message_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/123/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"unexpected": "object"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .messages("123", None, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn private_channels_filters_unsupported_kinds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me/channels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "1", "type": 1, "recipients": [{"id": "9", "username": "alice"}]},
                {"id": "2", "type": 0},
                {"id": "3", "type": 3, "name": "friends", "recipients": []}
            ])))
            .mount(&server)
            .await;

        let channels = client_for(&server).private_channels().await.unwrap();
        let ids: Vec<_> = channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn cancellation_cuts_backoff_short() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let client = ApiClient::new(
            "token-abc",
            &Config {
                retry: RetryConfig {
                    max_attempts: 5,
                    initial_delay: Duration::from_secs(60),
                    ..RetryConfig::default()
                },
                ..test_config(&server.uri())
            },
            cancel.clone(),
        )
        .unwrap();

        let handle = tokio::spawn(async move { client.current_user().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn invalid_credential_bytes_are_rejected() {
        let err = ApiClient::new(
            "bad\ntoken",
            &Config::default(),
            CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidCredential));
    }
}
