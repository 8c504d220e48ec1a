use crate::error::SyncError;
use crate::model::{EffectParameters, EmotionLabel, StatusResponse, SyncConfig};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;

/// The detector's HTTP surface.
pub trait DetectionBackend: Send + Sync {
    /// `POST /api/start-detection`. Any 2xx counts as success.
    fn start_detection(&self) -> BoxFuture<'_, Result<(), SyncError>>;

    /// `POST /api/stop-detection`.
    fn stop_detection(&self) -> BoxFuture<'_, Result<(), SyncError>>;

    /// `GET /api/status`.
    fn fetch_status(&self) -> BoxFuture<'_, Result<StatusResponse, SyncError>>;

    /// `POST /api/mappings/{emotion}`.
    fn put_mapping(
        &self,
        label: EmotionLabel,
        params: EffectParameters,
    ) -> BoxFuture<'_, Result<(), SyncError>>;
}

pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(cfg: &SyncConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_command(&self, action: &'static str, path: &str) -> Result<(), SyncError> {
        let resp = self
            .http
            .post(self.url(path))
            .send()
            .await
            .map_err(|e| SyncError::command(action, e))?;
        let status = resp.status();
        if !status.is_success() {
            // FastAPI puts the reason under `detail`; fall back to the bare status.
            let detail = resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            return Err(SyncError::command(action, detail));
        }
        Ok(())
    }
}

impl DetectionBackend for HttpBackend {
    fn start_detection(&self) -> BoxFuture<'_, Result<(), SyncError>> {
        self.post_command("start", "/api/start-detection").boxed()
    }

    fn stop_detection(&self) -> BoxFuture<'_, Result<(), SyncError>> {
        self.post_command("stop", "/api/stop-detection").boxed()
    }

    fn fetch_status(&self) -> BoxFuture<'_, Result<StatusResponse, SyncError>> {
        async move {
            let resp = self
                .http
                .get(self.url("/api/status"))
                .send()
                .await?
                .error_for_status()?;
            let body = resp.bytes().await?;
            serde_json::from_slice::<StatusResponse>(&body)
                .map_err(|e| SyncError::Decode(format!("status body: {e}")))
        }
        .boxed()
    }

    fn put_mapping(
        &self,
        label: EmotionLabel,
        params: EffectParameters,
    ) -> BoxFuture<'_, Result<(), SyncError>> {
        async move {
            self.http
                .post(self.url(&format!("/api/mappings/{label}")))
                .json(&params)
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Rgb;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    /// Request line and body of one received request.
    type Seen = (String, String);

    /// Serves the canned `(status, body)` replies in order, one connection each.
    async fn serve(
        replies: Vec<(&'static str, &'static str)>,
    ) -> (HttpBackend, mpsc::UnboundedReceiver<Seen>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for (status, body) in replies {
                let (mut sock, _) = listener.accept().await.unwrap();
                let _ = seen_tx.send(read_request(&mut sock).await);
                let reply = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                sock.write_all(reply.as_bytes()).await.unwrap();
                let _ = sock.shutdown().await;
            }
        });

        let cfg = SyncConfig {
            base_url: format!("http://{addr}/"),
            ws_url: format!("ws://{addr}/ws/emotions"),
            poll_interval: Duration::from_millis(500),
            fallback_after: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            user_agent: "test".into(),
        };
        (HttpBackend::new(&cfg).unwrap(), seen_rx)
    }

    async fn read_request(sock: &mut TcpStream) -> Seen {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = sock.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed mid-request");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = sock.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed mid-body");
            buf.extend_from_slice(&chunk[..n]);
        }
        let request_line = head.lines().next().unwrap_or_default().to_string();
        let body = String::from_utf8_lossy(&buf[header_end..header_end + content_length]).to_string();
        (request_line, body)
    }

    #[tokio::test]
    async fn any_2xx_command_reply_is_success() {
        let (backend, mut seen) =
            serve(vec![("200 OK", r#"{"status":"started"}"#), ("204 No Content", "")]).await;

        backend.start_detection().await.unwrap();
        backend.stop_detection().await.unwrap();

        assert_eq!(seen.recv().await.unwrap().0, "POST /api/start-detection HTTP/1.1");
        assert_eq!(seen.recv().await.unwrap().0, "POST /api/stop-detection HTTP/1.1");
    }

    #[tokio::test]
    async fn rejected_command_surfaces_detail() {
        let (backend, _seen) =
            serve(vec![("400 Bad Request", r#"{"detail":"Detection already running"}"#)]).await;

        let err = backend.start_detection().await.unwrap_err();
        assert_eq!(err.code(), "SYNC_COMMAND");
        assert_eq!(err.to_string(), "start detection failed: Detection already running");
    }

    #[tokio::test]
    async fn rejected_command_without_detail_reports_status() {
        let (backend, _seen) = serve(vec![("503 Service Unavailable", "busy")]).await;

        let err = backend.stop_detection().await.unwrap_err();
        assert_eq!(err.code(), "SYNC_COMMAND");
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn status_body_decodes() {
        let (backend, mut seen) = serve(vec![(
            "200 OK",
            r#"{"is_running": true, "current_emotion": "happy", "confidence": 87.5, "timestamp": "2024-01-01T00:00:00"}"#,
        )])
        .await;

        let status = backend.fetch_status().await.unwrap();
        assert!(status.is_running);
        assert_eq!(status.current_emotion, "happy");
        assert_eq!(status.confidence, 87.5);
        assert_eq!(seen.recv().await.unwrap().0, "GET /api/status HTTP/1.1");
    }

    #[tokio::test]
    async fn malformed_status_body_is_a_decode_failure() {
        let (backend, _seen) = serve(vec![("200 OK", r#"{"is_running": tru"#)]).await;

        let err = backend.fetch_status().await.unwrap_err();
        assert_eq!(err.code(), "SYNC_DECODE");
    }

    #[tokio::test]
    async fn failed_status_request_is_a_transport_failure() {
        let (backend, _seen) = serve(vec![("500 Internal Server Error", "{}")]).await;

        let err = backend.fetch_status().await.unwrap_err();
        assert_eq!(err.code(), "SYNC_TRANSPORT");
    }

    #[tokio::test]
    async fn mapping_is_posted_under_its_label() {
        let (backend, mut seen) = serve(vec![("200 OK", r#"{"status":"updated"}"#)]).await;

        let params = EffectParameters::new(Rgb::new(0xDC, 0x14, 0x3C), 65, 0.4);
        backend.put_mapping(EmotionLabel::Angry, params).await.unwrap();

        let (request_line, body) = seen.recv().await.unwrap();
        assert_eq!(request_line, "POST /api/mappings/angry HTTP/1.1");
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"color": "#DC143C", "brightness": 65, "transition_speed": 0.4})
        );
    }
}
