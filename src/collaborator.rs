//! Shared plumbing for calls to external model services.
//!
//! Both the embedding and the generation adapters talk JSON over HTTP and
//! need the same two guards:
//!
//! - [`post_json_with_retry`] retries transient failures with exponential
//!   backoff: HTTP 429 and 5xx and network errors are retried, other 4xx
//!   responses fail immediately. Backoff is 1s, 2s, 4s, ... capped at 2^5.
//! - [`with_timeout`] bounds a whole call (retries included) and turns
//!   expiry into [`Error::CollaboratorTimeout`].

use std::future::Future;
use std::time::Duration;

use context_qa_core::{Collaborator, Error};

/// Run `fut`, failing with [`Error::CollaboratorTimeout`] if it takes longer
/// than `timeout`.
pub async fn with_timeout<T, F>(
    collaborator: Collaborator,
    timeout: Duration,
    fut: F,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(%collaborator, ?timeout, "collaborator call timed out");
            Err(Error::CollaboratorTimeout {
                collaborator,
                timeout,
            })
        }
    }
}

/// A JSON POST to a model service.
pub struct JsonRequest<'a> {
    pub url: &'a str,
    pub body: &'a serde_json::Value,
    pub bearer_token: Option<&'a str>,
    pub max_retries: u32,
    /// Human-readable service name used in error messages.
    pub service: &'a str,
}

/// POST `request.body` and return the parsed JSON response.
///
/// The error string describes the last failure and is wrapped by the caller
/// into the matching "unavailable" error.
pub async fn post_json_with_retry(
    client: &reqwest::Client,
    request: JsonRequest<'_>,
) -> Result<serde_json::Value, String> {
    let mut last_err = None;

    for attempt in 0..=request.max_retries {
        if attempt > 0 {
            let delay = backoff(attempt);
            tracing::debug!(service = request.service, attempt, ?delay, "retrying");
            tokio::time::sleep(delay).await;
        }

        let mut builder = client
            .post(request.url)
            .header("Content-Type", "application/json")
            .json(request.body);
        if let Some(token) = request.bearer_token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| format!("{} returned invalid JSON: {}", request.service, e));
                }

                let body_text = response.text().await.unwrap_or_default();
                let message = format!("{} error {}: {}", request.service, status, body_text);
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(message);
                    continue;
                }
                return Err(message);
            }
            Err(e) => {
                last_err = Some(format!(
                    "{} connection error (is it running at {}?): {}",
                    request.service, request.url, e
                ));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} failed after retries", request.service)))
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

/// Trim a trailing slash so paths can be appended with `format!`.
pub fn base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(4), Duration::from_secs(8));
        assert_eq!(backoff(6), Duration::from_secs(32));
        assert_eq!(backoff(20), Duration::from_secs(32));
    }

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("http://localhost:11434/"), "http://localhost:11434");
        assert_eq!(base_url("http://localhost:11434"), "http://localhost:11434");
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<(), Error> = with_timeout(
            Collaborator::Generator,
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::CollaboratorTimeout {
                collaborator: Collaborator::Generator,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout(Collaborator::Embedder, Duration::from_secs(1), async {
            Ok::<_, Error>(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_unreachable_service_reports_connection_error() {
        let client = reqwest::Client::new();
        let body = serde_json::json!({});
        let err = post_json_with_retry(
            &client,
            JsonRequest {
                url: "http://127.0.0.1:1/api/embed",
                body: &body,
                bearer_token: None,
                max_retries: 0,
                service: "Ollama",
            },
        )
        .await
        .unwrap_err();
        assert!(err.contains("Ollama connection error"));
    }
}
