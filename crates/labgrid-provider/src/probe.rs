//! HTTP probes against a live server.
//!
//! Both probes open a fresh TCP connection and speak HTTP/1 over it;
//! servers are probed rarely, so there is no connection pool.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::BodyExt;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};

/// Result of a single readiness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The endpoint returned 2xx.
    Healthy,
    /// The endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not be executed (connection error or timeout).
    Failed,
}

/// Readiness probe: 2xx is `Healthy`, anything else is not.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    match check_ready(address, path, timeout).await {
        Ok(()) => ProbeResult::Healthy,
        Err(e @ ProviderError::Status { .. }) => {
            debug!(error = %e, %address, %path, "probe non-2xx");
            ProbeResult::Unhealthy
        }
        Err(e) => {
            debug!(error = %e, %address, %path, "probe failed");
            ProbeResult::Failed
        }
    }
}

/// Like [`http_probe`], keeping the failure detail.
pub async fn check_ready(address: &str, path: &str, timeout: Duration) -> ProviderResult<()> {
    let (status, _) = get(address, path, timeout).await?;
    if status.is_success() {
        Ok(())
    } else {
        Err(ProviderError::Status {
            endpoint: format!("{address}{path}"),
            status: status.as_u16(),
        })
    }
}

#[derive(Deserialize)]
struct IdleStatus {
    idle: bool,
}

/// Ask a live server whether it is idle. The endpoint answers
/// `{"idle": true|false}`; any other answer is an error, never "idle".
pub async fn idle_probe(address: &str, path: &str, timeout: Duration) -> ProviderResult<bool> {
    let (status, body) = get(address, path, timeout).await?;
    if !status.is_success() {
        return Err(ProviderError::Status {
            endpoint: format!("{address}{path}"),
            status: status.as_u16(),
        });
    }
    let parsed: IdleStatus = serde_json::from_slice(&body)
        .map_err(|e| ProviderError::InvalidResponse(format!("idle status: {e}")))?;
    Ok(parsed.idle)
}

async fn get(address: &str, path: &str, timeout: Duration) -> ProviderResult<(http::StatusCode, Bytes)> {
    let uri = format!("http://{address}{path}");

    let exchange = async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| ProviderError::Unreachable(format!("connect {address}: {e}")))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProviderError::Unreachable(format!("handshake {address}: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "labgrid-probe/0.1")
            .body(http_body_util::Empty::<Bytes>::new())
            .map_err(|e| ProviderError::InvalidResponse(format!("building request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ProviderError::Unreachable(format!("request {uri}: {e}")))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ProviderError::Unreachable(format!("reading {uri}: {e}")))?
            .to_bytes();
        Ok::<_, ProviderError>((status, body))
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response per connection.
    async fn canned_server(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn http_probe_to_closed_port_returns_failed() {
        let result = http_probe("127.0.0.1:1", "/", Duration::from_millis(200)).await;
        assert_eq!(result, ProbeResult::Failed);
    }

    #[tokio::test]
    async fn http_probe_healthy_on_2xx() {
        let addr = canned_server("200 OK", "").await;
        let result = http_probe(&addr, "/", Duration::from_secs(2)).await;
        assert_eq!(result, ProbeResult::Healthy);
    }

    #[tokio::test]
    async fn http_probe_unhealthy_on_5xx() {
        let addr = canned_server("503 Service Unavailable", "").await;
        let result = http_probe(&addr, "/", Duration::from_secs(2)).await;
        assert_eq!(result, ProbeResult::Unhealthy);
    }

    #[tokio::test]
    async fn idle_probe_reads_flag() {
        let idle = canned_server("200 OK", r#"{"idle":true}"#).await;
        assert!(idle_probe(&idle, "/status", Duration::from_secs(2)).await.unwrap());

        let busy = canned_server("200 OK", r#"{"idle":false}"#).await;
        assert!(!idle_probe(&busy, "/status", Duration::from_secs(2)).await.unwrap());
    }

    #[tokio::test]
    async fn idle_probe_rejects_malformed_body() {
        let addr = canned_server("200 OK", "not json").await;
        let err = idle_probe(&addr, "/status", Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn idle_probe_non_2xx_is_error() {
        let addr = canned_server("500 Internal Server Error", "{}").await;
        let err = idle_probe(&addr, "/status", Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn idle_probe_times_out_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            // Accept and hold the connection without answering.
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        let err = idle_probe(&addr, "/status", Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }
}
