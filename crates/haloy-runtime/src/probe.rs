//! HTTP health probing.
//!
//! Used when a container has no intrinsic health probe: GET
//! `http://{containerIP}:{port}{path}` with a 5s per-request timeout, up to
//! 5 attempts with exponential backoff starting at 500ms and doubling each
//! retry. Any 2xx passes; anything else fails with the last observed status
//! and a truncated body.

use std::time::Duration;

use tracing::debug;

use haloy_core::{Error, Result};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_ATTEMPTS: u32 = 5;
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

const BODY_SNIPPET_MAX: usize = 1024;

/// GET `url` until a 2xx lands or the attempts are exhausted.
pub async fn probe_http(client: &reqwest::Client, url: &str) -> Result<()> {
    let mut backoff = INITIAL_BACKOFF;
    let mut last_failure = String::new();

    for attempt in 1..=MAX_ATTEMPTS {
        if attempt > 1 {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
        match client.get(url).timeout(REQUEST_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(url, attempt, "health probe passed");
                return Ok(());
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                last_failure = format!("status {status}: {}", truncate(&body));
            }
            Err(e) => {
                last_failure = e.to_string();
            }
        }
        debug!(url, attempt, failure = %last_failure, "health probe attempt failed");
    }
    Err(Error::Health(format!(
        "GET {url} failed after {MAX_ATTEMPTS} attempts: {last_failure}"
    )))
}

fn truncate(body: &str) -> &str {
    let mut end = body.len().min(BODY_SNIPPET_MAX);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned HTTP responses; returns the bound address.
    async fn serve(responses_until_ok: u32) -> (String, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = if n >= responses_until_ok {
                    "HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok"
                } else {
                    "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 4\r\nconnection: close\r\n\r\nboom"
                };
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        (format!("http://{addr}/healthz"), hits)
    }

    #[tokio::test]
    async fn passes_on_first_success() {
        let (url, hits) = serve(1).await;
        let client = reqwest::Client::new();
        probe_http(&client, &url).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let (url, hits) = serve(3).await;
        let client = reqwest::Client::new();
        probe_http(&client, &url).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fails_with_last_status_after_exhausting_attempts() {
        let (url, hits) = serve(u32::MAX).await;
        let client = reqwest::Client::new();
        let err = probe_http(&client, &url).await.unwrap_err();
        assert!(matches!(err, Error::Health(_)));
        assert!(err.to_string().contains("status 500"));
        assert!(err.to_string().contains("boom"));
        assert_eq!(hits.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn connection_refused_is_a_health_error() {
        let client = reqwest::Client::new();
        // Port 1 is essentially never listening.
        let err = probe_http(&client, "http://127.0.0.1:1/healthz")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Health(_)));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let body = "é".repeat(BODY_SNIPPET_MAX);
        let cut = truncate(&body);
        assert!(cut.len() <= BODY_SNIPPET_MAX);
        assert!(body.starts_with(cut));
    }
}
