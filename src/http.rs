//! Shared HTTP retry helper for the embedding and rerank clients.
//!
//! Retry strategy: HTTP 429 and 5xx retry with exponential backoff
//! (1s, 2s, 4s, ... capped at 32s); other 4xx fail immediately; network
//! errors retry.

use std::time::Duration;

use crate::error::{KbError, Result};

pub(crate) async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<reqwest::Response> {
    let mut last_err: Option<KbError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client.post(url).bearer_auth(api_key).json(body).send().await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let text = response.text().await.unwrap_or_default();
                    last_err = Some(KbError::Transport(format!(
                        "{} returned {}: {}",
                        url, status, text
                    )));
                    continue;
                }

                let text = response.text().await.unwrap_or_default();
                return Err(KbError::Transport(format!(
                    "{} returned {}: {}",
                    url, status, text
                )));
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| KbError::Transport(format!("{} failed after retries", url))))
}
