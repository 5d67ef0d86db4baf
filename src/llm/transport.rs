use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tokio::time::sleep;
use tracing::debug;

use crate::llm::provider::{Provider, ProviderError, ProviderSettings};

#[derive(Debug, Clone, Copy)]
pub(crate) enum Auth<'a> {
    Bearer(&'a str),
    Header { name: &'static str, value: &'a str },
}

/// POSTs `payload` as JSON, retrying throttling, server errors and connect
/// failures up to `settings.retries` extra times with exponential backoff.
pub(crate) async fn post_json_with_retry<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    provider: Provider,
    url: &str,
    auth: Auth<'_>,
    payload: &T,
    settings: &ProviderSettings,
) -> Result<reqwest::Response, ProviderError> {
    let max_attempts = settings.retries.saturating_add(1);
    let mut attempt = 0;

    loop {
        let mut request = client.post(url).json(payload);
        request = match auth {
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Header { name, value } => request.header(name, value),
        };
        if let Some(timeout_secs) = settings.timeout_secs {
            request = request.timeout(Duration::from_secs(timeout_secs));
        }

        let retryable = match request.send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if !is_retryable_status(status) || attempt + 1 >= max_attempts {
                    return Err(ProviderError::Api {
                        provider,
                        status,
                        body,
                    });
                }
                format!("status {status}")
            }
            Err(source) => {
                if !is_retryable_request_error(&source) || attempt + 1 >= max_attempts {
                    return Err(ProviderError::Request { provider, source });
                }
                source.to_string()
            }
        };

        let delay = retry_delay(attempt, settings.retry_delay_ms);
        debug!(
            provider = provider.as_str(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            cause = %retryable,
            "retrying provider request"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_request_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn retry_delay(attempt: u32, base_ms: u64) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(30_000))
}

#[cfg(test)]
mod tests {
    use super::{is_retryable_status, retry_delay};
    use reqwest::StatusCode;
    use std::time::Duration;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(retry_delay(0, 250), Duration::from_millis(250));
        assert_eq!(retry_delay(1, 250), Duration::from_millis(500));
        assert_eq!(retry_delay(3, 250), Duration::from_millis(2_000));
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(retry_delay(12, 500), Duration::from_millis(30_000));
        assert_eq!(retry_delay(64, 1), Duration::from_millis(30_000));
    }

    #[test]
    fn only_throttling_and_server_errors_are_retried() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));

        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::UNPROCESSABLE_ENTITY));
    }
}
