//! Broker definitions export via the management HTTP API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::errors::{BackupError, BackupResult};
use super::definitions_file_name;

/// Management API request timeout
pub const EXPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Exports queues, exchanges, bindings and policies as JSON
#[derive(Debug, Clone)]
pub struct DefinitionsExporter {
    client: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
}

impl DefinitionsExporter {
    /// `base_url` is the management endpoint, e.g. `http://rabbitmq:15672`
    pub fn new(base_url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> BackupResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(EXPORT_TIMEOUT)
            .build()
            .map_err(|e| BackupError::invalid_config("cannot build management API client").with_source(e))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user: user.into(),
            password: password.into(),
        })
    }

    fn url(&self) -> String {
        format!("{}/api/definitions", self.base_url)
    }

    /// Fetch the definitions and write `definitions-{ts}.json` into `dir`
    pub async fn export(&self, dir: &Path, timestamp: &str) -> BackupResult<PathBuf> {
        let response = self
            .client
            .get(self.url())
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| BackupError::archive_failed("definitions request failed").with_source(e))?
            .error_for_status()
            .map_err(|e| BackupError::archive_failed("definitions request rejected").with_source(e))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| BackupError::archive_failed("definitions response unreadable").with_source(e))?;

        let definitions: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| BackupError::archive_failed("definitions response is not JSON").with_source(e))?;
        if !definitions.is_object() {
            return Err(BackupError::archive_failed("definitions response is not a JSON object"));
        }

        let pretty = serde_json::to_vec_pretty(&definitions)
            .map_err(|e| BackupError::archive_failed("cannot encode definitions").with_source(e))?;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| BackupError::io_error_at_path(e, dir))?;
        let path = dir.join(definitions_file_name(timestamp));
        tokio::fs::write(&path, pretty)
            .await
            .map_err(|e| BackupError::io_error_at_path(e, &path))?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer one request with `body`; yields the raw request head
    async fn serve_once(body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&head).into_owned()
        });
        (base, handle)
    }

    #[test]
    fn test_url_strips_trailing_slash() {
        let exporter = DefinitionsExporter::new("http://rabbitmq:15672/", "guest", "guest").unwrap();
        assert_eq!(exporter.url(), "http://rabbitmq:15672/api/definitions");
    }

    #[tokio::test]
    async fn test_unreachable_api_fails_without_writing() {
        let dir = TempDir::new().unwrap();
        // port 1 is never a management API
        let exporter = DefinitionsExporter::new("http://127.0.0.1:1", "guest", "guest").unwrap();
        assert!(exporter.export(dir.path(), "ts").await.is_err());
        assert!(!dir.path().join(definitions_file_name("ts")).exists());
    }

    #[tokio::test]
    async fn test_export_writes_pretty_definitions() {
        let dir = TempDir::new().unwrap();
        let (base, server) = serve_once(r#"{"queues":[{"name":"jobs"}],"exchanges":[]}"#).await;
        let exporter = DefinitionsExporter::new(base, "guest", "guest").unwrap();

        let path = exporter.export(dir.path(), "2026-10-18T03-00-00-000Z").await.unwrap();

        assert_eq!(path, dir.path().join(definitions_file_name("2026-10-18T03-00-00-000Z")));
        let written: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["queues"][0]["name"], "jobs");
        assert!(std::fs::read_to_string(&path).unwrap().contains("\n  \"queues\""));

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /api/definitions "), "{}", request);
        // base64("guest:guest")
        assert!(request.contains("authorization: basic z3vlc3q6z3vlc3q="), "{}", request);
    }

    #[tokio::test]
    async fn test_non_object_definitions_rejected() {
        let dir = TempDir::new().unwrap();
        let (base, server) = serve_once("[]").await;
        let exporter = DefinitionsExporter::new(base, "guest", "guest").unwrap();

        assert!(exporter.export(dir.path(), "ts").await.is_err());
        assert!(!dir.path().join(definitions_file_name("ts")).exists());
        server.await.unwrap();
    }
}
