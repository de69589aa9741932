//! Bounded module artifact download.

use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::time::Duration;

use aman_core::config::DownloadConfig;
use aman_core::{Error, Result};

/// Hex-encoded SHA-256 of a byte stream.
pub fn checksum_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Downloads module artifacts with connect/read timeouts and a size ceiling.
pub struct ModuleFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl ModuleFetcher {
    pub fn new(config: &DownloadConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            max_bytes: config.max_bytes,
        }
    }

    /// Fetch the full artifact. Non-2xx status or an empty body fails the
    /// download; the body is streamed and capped at the configured ceiling.
    pub async fn fetch(&self, url: &str) -> Result<Bytes> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::module_download(format!("invalid URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::module_download(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let resp = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| Error::module_download(format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::module_download(format!("HTTP {}", status)));
        }

        if let Some(len) = resp.content_length() {
            if len > self.max_bytes {
                return Err(Error::module_download(format!(
                    "Content-Length {} exceeds limit {}",
                    len, self.max_bytes
                )));
            }
        }

        let mut stream = resp.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| Error::module_download(format!("download failed: {}", e)))?;
            if (buffer.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(Error::module_download(format!(
                    "artifact exceeds size limit ({} bytes)",
                    self.max_bytes
                )));
            }
            buffer.extend_from_slice(&chunk);
        }

        if buffer.is_empty() {
            return Err(Error::module_download("empty response body".to_string()));
        }

        tracing::debug!(url = %url, bytes = buffer.len(), "Module artifact fetched");
        Ok(Bytes::from(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aman_core::config::AppConfig;

    #[test]
    fn checksum_is_stable_hex() {
        let a = checksum_hex(b"module bytes");
        let b = checksum_hex(b"module bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, checksum_hex(b"other bytes"));
    }

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let fetcher = ModuleFetcher::new(&AppConfig::default().modules.download);
        let err = fetcher.fetch("file:///etc/passwd").await.unwrap_err();
        assert!(matches!(err, Error::ModuleDownload(_)));
    }

    #[tokio::test]
    async fn rejects_malformed_url() {
        let fetcher = ModuleFetcher::new(&AppConfig::default().modules.download);
        assert!(fetcher.fetch("not a url").await.is_err());
    }

    #[tokio::test]
    async fn enforces_size_ceiling() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut request = [0u8; 1024];
                let _ = stream.read(&mut request).await;
                let body = vec![b'x'; 2048];
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes()).await;
                let _ = stream.write_all(&body).await;
            }
        });

        let mut config = AppConfig::default().modules.download;
        config.max_bytes = 1024;
        let fetcher = ModuleFetcher::new(&config);
        let err = fetcher
            .fetch(&format!("http://{}/mod.pkg", addr))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
