//! 图片获取
//!
//! 支持 http(s) 地址和本地文件。HTTP 请求只发一次，不做重试。

use crate::config::FetchConfig;
use crate::error::{KeyscanError, Result};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// 图片来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    File(PathBuf),
}

impl ImageSource {
    /// 解析命令行或配置中的来源字符串
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(KeyscanError::UnsupportedSource("(empty)".to_string()));
        }

        let lower = input.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(Self::Url(input.to_string()));
        }
        if lower.starts_with("file://") {
            return Ok(Self::File(PathBuf::from(&input["file://".len()..])));
        }
        // Windows 盘符 (C:\...) 不算 scheme
        if let Some(pos) = input.find("://") {
            let scheme = &input[..pos];
            if scheme.len() > 1 {
                return Err(KeyscanError::UnsupportedSource(input.to_string()));
            }
        }

        Ok(Self::File(PathBuf::from(input)))
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{}", url),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

pub struct Fetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl Fetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| KeyscanError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }

    /// 获取图片原始字节
    pub async fn fetch(&self, source: &ImageSource) -> Result<Vec<u8>> {
        let bytes = match source {
            ImageSource::Url(url) => self.fetch_url(url).await?,
            ImageSource::File(path) => {
                let read_error = |source| KeyscanError::ReadFile {
                    path: path.clone(),
                    source,
                };
                let size = tokio::fs::metadata(path).await.map_err(read_error)?.len();
                self.check_size(size)?;
                tokio::fs::read(path).await.map_err(read_error)?
            }
        };

        self.check_size(bytes.len() as u64)?;
        if bytes.is_empty() {
            return Err(KeyscanError::EmptyImage);
        }

        tracing::info!("已获取图片: {} ({} 字节)", source, bytes.len());
        Ok(bytes)
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!("下载图片: {}", url);

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| KeyscanError::Fetch {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeyscanError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(len) = response.content_length() {
            self.check_size(len)?;
        }

        // 没有 Content-Length 时边读边计数，超限立即放弃
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|source| KeyscanError::Fetch {
            url: url.to_string(),
            source,
        })? {
            self.check_size((body.len() + chunk.len()) as u64)?;
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_bytes {
            return Err(KeyscanError::ImageTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 起一个只应答一次的 HTTP 服务
    async fn serve_once(status_line: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut request = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let header = format!(
                "HTTP/1.1 {}\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status_line,
                body.len()
            );
            // 客户端可能读完头部就断开（超限时），写失败无所谓
            let _ = socket.write_all(header.as_bytes()).await;
            let _ = socket.write_all(&body).await;
            let _ = socket.shutdown().await;
        });

        format!("http://{}/sidchgtrial.png", addr)
    }

    /// 分块发送、不带 Content-Length 的服务，返回地址和已发送的块数
    async fn serve_chunked(chunk: Vec<u8>, count: usize) -> (String, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sent = std::sync::Arc::new(AtomicUsize::new(0));
        let sent_in_server = sent.clone();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let header = "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nTransfer-Encoding: chunked\r\n\r\n";
            if socket.write_all(header.as_bytes()).await.is_err() {
                return;
            }
            for _ in 0..count {
                let mut frame = format!("{:x}\r\n", chunk.len()).into_bytes();
                frame.extend_from_slice(&chunk);
                frame.extend_from_slice(b"\r\n");
                if socket.write_all(&frame).await.is_err() || socket.flush().await.is_err() {
                    return;
                }
                sent_in_server.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
            let _ = socket.shutdown().await;
        });

        (format!("http://{}/sidchgtrial.png", addr), sent)
    }

    #[test]
    fn parses_sources() {
        assert_eq!(
            ImageSource::parse("https://example.com/a.png").unwrap(),
            ImageSource::Url("https://example.com/a.png".to_string())
        );
        assert_eq!(
            ImageSource::parse("file:///tmp/a.png").unwrap(),
            ImageSource::File(PathBuf::from("/tmp/a.png"))
        );
        assert_eq!(
            ImageSource::parse("images/a.png").unwrap(),
            ImageSource::File(PathBuf::from("images/a.png"))
        );
        assert!(matches!(
            ImageSource::parse("ftp://example.com/a.png"),
            Err(KeyscanError::UnsupportedSource(_))
        ));
        assert!(ImageSource::parse("   ").is_err());
    }

    #[tokio::test]
    async fn fetches_http_body() {
        let url = serve_once("200 OK", b"\x89PNG fake".to_vec()).await;
        let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();

        let bytes = fetcher.fetch(&ImageSource::Url(url)).await.unwrap();
        assert_eq!(bytes, b"\x89PNG fake");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let url = serve_once("404 Not Found", b"missing".to_vec()).await;
        let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();

        let err = fetcher.fetch(&ImageSource::Url(url)).await.unwrap_err();
        assert!(matches!(err, KeyscanError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let url = serve_once("200 OK", Vec::new()).await;
        let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();

        let err = fetcher.fetch(&ImageSource::Url(url)).await.unwrap_err();
        assert!(matches!(err, KeyscanError::EmptyImage));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let url = serve_once("200 OK", vec![0u8; 64]).await;
        let config = FetchConfig {
            max_bytes: 16,
            ..FetchConfig::default()
        };
        let fetcher = Fetcher::new(&config).unwrap();

        let err = fetcher.fetch(&ImageSource::Url(url)).await.unwrap_err();
        assert!(matches!(err, KeyscanError::ImageTooLarge { size: 64, limit: 16 }));
    }

    #[tokio::test]
    async fn chunked_body_stops_at_limit() {
        let (url, sent) = serve_chunked(vec![7u8; 1024], 50).await;
        let config = FetchConfig {
            max_bytes: 16,
            ..FetchConfig::default()
        };
        let fetcher = Fetcher::new(&config).unwrap();

        let started = std::time::Instant::now();
        let err = fetcher.fetch(&ImageSource::Url(url)).await.unwrap_err();
        assert!(matches!(err, KeyscanError::ImageTooLarge { limit: 16, .. }));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert!(sent.load(std::sync::atomic::Ordering::SeqCst) < 50);
    }

    #[tokio::test]
    async fn chunked_body_within_limit_is_read() {
        let (url, _) = serve_chunked(b"ab".to_vec(), 3).await;
        let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();

        let bytes = fetcher.fetch(&ImageSource::Url(url)).await.unwrap();
        assert_eq!(bytes, b"ababab");
    }

    #[tokio::test]
    async fn missing_file_error_names_the_path() {
        let path = std::env::temp_dir().join(format!("keyscan-missing-{}.png", uuid::Uuid::new_v4()));
        let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();

        let err = fetcher.fetch(&ImageSource::File(path.clone())).await.unwrap_err();
        assert!(matches!(&err, KeyscanError::ReadFile { path: p, .. } if p == &path));
        assert!(err.to_string().contains(&path.display().to_string()));
    }

    #[tokio::test]
    async fn reads_local_file() {
        let path = std::env::temp_dir().join(format!("keyscan-fetch-{}.png", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"local bytes").unwrap();

        let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();
        let bytes = fetcher.fetch(&ImageSource::File(path.clone())).await.unwrap();
        assert_eq!(bytes, b"local bytes");

        let _ = std::fs::remove_file(&path);
    }
}
