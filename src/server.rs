use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::health::HealthChecker;

/// Minimal local HTTP endpoint exposing health, metrics and session status.
pub struct StatusServer {
    health_checker: Arc<HealthChecker>,
    port: u16,
}

impl StatusServer {
    pub fn new(health_checker: Arc<HealthChecker>, port: u16) -> Self {
        Self { health_checker, port }
    }

    pub async fn start(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", self.port)).await?;
        info!(port = self.port, "status server listening");

        loop {
            let (mut socket, peer) = listener.accept().await?;
            let health_checker = Arc::clone(&self.health_checker);

            tokio::spawn(async move {
                let mut buffer = [0; 1024];
                let n = match socket.read(&mut buffer).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };

                let request = String::from_utf8_lossy(&buffer[..n]);
                let response = Self::handle_request(&request, &health_checker);
                if let Err(e) = socket.write_all(response.as_bytes()).await {
                    debug!(%peer, error = %e, "status response not delivered");
                }
            });
        }
    }

    fn handle_request(request: &str, health_checker: &HealthChecker) -> String {
        let Some(request_line) = request.lines().next() else {
            return Self::error_response(400, "Bad Request");
        };

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() < 2 {
            return Self::error_response(400, "Bad Request");
        }

        match (parts[0], parts[1]) {
            ("GET", "/health") => Self::json(&health_checker.get_health()),
            ("GET", "/metrics") => Self::json(&health_checker.get_metrics()),
            ("GET", "/status") => Self::json(&health_checker.get_detailed_status()),
            ("GET", "/metrics/prometheus") => match health_checker.get_prometheus() {
                Ok(text) => Self::response(200, "OK", "text/plain; version=0.0.4", &text),
                Err(_) => Self::error_response(500, "Internal Server Error"),
            },
            _ => Self::error_response(404, "Not Found"),
        }
    }

    fn json<T: Serialize>(value: &T) -> String {
        match serde_json::to_string(value) {
            Ok(body) => Self::response(200, "OK", "application/json", &body),
            Err(_) => Self::error_response(500, "Internal Server Error"),
        }
    }

    fn response(status: u16, reason: &str, content_type: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\
             Connection: close\r\n\r\n{}",
            status,
            reason,
            content_type,
            body.len(),
            body
        )
    }

    fn error_response(status: u16, message: &str) -> String {
        let body = serde_json::json!({ "error": message }).to_string();
        Self::response(status, message, "application/json", &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::MetricsCollector;

    fn checker() -> HealthChecker {
        HealthChecker::new(Arc::new(MetricsCollector::new()), Config::default())
    }

    #[test]
    fn routes_known_paths() {
        let hc = checker();
        let resp = StatusServer::handle_request("GET /status HTTP/1.1\r\n\r\n", &hc);
        assert!(resp.starts_with("HTTP/1.1 200 OK"));
        assert!(resp.contains("\"units_in_session\":0"));

        let resp = StatusServer::handle_request("GET /metrics/prometheus HTTP/1.1\r\n\r\n", &hc);
        assert!(resp.contains("text/plain"));
    }

    #[test]
    fn unknown_and_malformed_requests() {
        let hc = checker();
        let resp = StatusServer::handle_request("GET /nope HTTP/1.1", &hc);
        assert!(resp.starts_with("HTTP/1.1 404"));
        assert!(StatusServer::handle_request("", &hc).starts_with("HTTP/1.1 400"));
        assert!(StatusServer::handle_request("GET", &hc).starts_with("HTTP/1.1 400"));
    }
}
