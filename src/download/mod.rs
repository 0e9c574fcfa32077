//! Sources the firmware parts are fetched from.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use log::debug;
use reqwest::Url;

use crate::error::{DownloadFailure, Error, Result};

/// Where firmware binaries come from.
pub trait PartSource {
    /// Fetches the payload at `url`. Size and checksum validation is left to
    /// the caller.
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, DownloadFailure>;
}

/// Checks a downloaded payload before it may be written to flash.
pub fn validate_payload(
    data: &[u8],
    min_size: usize,
    expected_crc: Option<u32>,
) -> std::result::Result<(), DownloadFailure> {
    if data.is_empty() {
        return Err(DownloadFailure::Empty);
    }

    if data.len() < min_size {
        return Err(DownloadFailure::TooSmall(data.len()));
    }

    if let Some(expected) = expected_crc {
        let actual = crc32fast::hash(data);
        if actual != expected {
            return Err(DownloadFailure::ChecksumMismatch { expected, actual });
        }
    }

    Ok(())
}

/// Downloads parts over HTTP. Relative URLs resolve against `base`.
pub struct HttpSource {
    client: reqwest::Client,
    base: Option<Url>,
}

impl HttpSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base: None,
        }
    }

    pub fn with_base(base: &str) -> Result<Self> {
        let base = Url::parse(base)
            .map_err(|e| Error::Configuration(format!("invalid base URL '{}': {}", base, e)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base: Some(base),
        })
    }

    fn resolve(&self, url: &str) -> std::result::Result<Url, DownloadFailure> {
        if let Ok(absolute) = Url::parse(url) {
            return Ok(absolute);
        }
        match &self.base {
            Some(base) => base
                .join(url)
                .map_err(|e| DownloadFailure::Transport(e.to_string())),
            None => Err(DownloadFailure::Transport(
                "relative URL but no base URL configured".into(),
            )),
        }
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PartSource for HttpSource {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, DownloadFailure> {
        let url = self.resolve(url)?;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadFailure::Status {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| DownloadFailure::Transport(e.to_string()))
    }
}

/// Reads parts from a local directory laid out like the web root, so
/// `/firmware/board/app.bin` maps to `<root>/firmware/board/app.bin`.
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> std::result::Result<PathBuf, DownloadFailure> {
        let relative = Path::new(url.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(DownloadFailure::Transport(format!(
                "'{}' does not name a file below the firmware directory",
                url
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl PartSource for DirSource {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, DownloadFailure> {
        let path = self.resolve(url)?;
        debug!("Reading {}", path.display());

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DownloadFailure::NotFound),
            Err(e) => Err(DownloadFailure::Transport(e.to_string())),
        }
    }
}

/// Either source, picked at runtime.
pub enum AnySource {
    Http(HttpSource),
    Dir(DirSource),
}

impl PartSource for AnySource {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, DownloadFailure> {
        match self {
            AnySource::Http(source) => source.fetch(url).await,
            AnySource::Dir(source) => source.fetch(url).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn payload_checks() {
        let data = vec![0xE9u8; 256];
        assert_eq!(validate_payload(&[], 100, None), Err(DownloadFailure::Empty));
        assert_eq!(
            validate_payload(&data[..99], 100, None),
            Err(DownloadFailure::TooSmall(99))
        );
        assert_eq!(validate_payload(&data[..100], 100, None), Ok(()));

        let crc = crc32fast::hash(&data);
        assert_eq!(validate_payload(&data, 100, Some(crc)), Ok(()));
        assert!(matches!(
            validate_payload(&data, 100, Some(crc ^ 1)),
            Err(DownloadFailure::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn dir_source_stays_below_root() {
        let source = DirSource::new("/srv/site");
        assert_eq!(
            source.resolve("/firmware/a/app.bin").unwrap(),
            PathBuf::from("/srv/site/firmware/a/app.bin")
        );
        assert!(source.resolve("/firmware/../../etc/passwd").is_err());
    }

    #[tokio::test]
    async fn dir_source_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("firmware")).unwrap();
        std::fs::write(dir.path().join("firmware/app.bin"), [1u8, 2, 3]).unwrap();

        let source = DirSource::new(dir.path());
        assert_eq!(
            source.fetch("/firmware/app.bin").await.unwrap(),
            Bytes::from_static(&[1, 2, 3])
        );
        assert_eq!(
            source.fetch("/firmware/missing.bin").await,
            Err(DownloadFailure::NotFound)
        );
    }

    #[test]
    fn http_source_resolves_relative_urls() {
        let source = HttpSource::with_base("http://localhost:5173/").unwrap();
        assert_eq!(
            source.resolve("/firmware/a/app.bin").unwrap().as_str(),
            "http://localhost:5173/firmware/a/app.bin"
        );
        assert_eq!(
            source.resolve("https://cdn.example.com/x.bin").unwrap().as_str(),
            "https://cdn.example.com/x.bin"
        );
        assert!(HttpSource::new().resolve("/firmware/a/app.bin").is_err());
    }

    /// Answers a single request with a canned status and body.
    async fn serve_once(status: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let header = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            socket.write_all(header.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn http_source_reports_status() {
        let base = serve_once("404 Not Found", b"<html>missing</html>").await;
        let source = HttpSource::with_base(&base).unwrap();
        assert_eq!(
            source.fetch("/firmware/app.bin").await,
            Err(DownloadFailure::Status {
                code: 404,
                reason: "Not Found".into()
            })
        );
    }

    #[tokio::test]
    async fn http_source_returns_body() {
        let base = serve_once("200 OK", b"\xe9\x03\x02\x20firmware").await;
        let source = HttpSource::with_base(&base).unwrap();
        let data = source.fetch("/firmware/app.bin").await.unwrap();
        assert_eq!(&data[..], b"\xe9\x03\x02\x20firmware");
    }
}
