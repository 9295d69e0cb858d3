//! Minimal HTTP/1.1 plumbing for the loopback listeners

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// Header lines drained after the request line before giving up
const MAX_HEADER_LINES: usize = 100;

/// Bytes of request line plus headers read before the rest is ignored
const MAX_REQUEST_HEAD: u64 = 8 * 1024;

/// A client that connects but sends nothing is dropped after this long
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestLine {
    pub method: String,
    pub target: String,
}

impl RequestLine {
    /// Parse `GET /path?query HTTP/1.1`
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let method = parts.next()?.to_string();
        let target = parts.next()?.to_string();
        Some(Self { method, target })
    }

    /// Target without query string or fragment
    pub fn path(&self) -> &str {
        self.target
            .split(['?', '#'])
            .next()
            .unwrap_or(&self.target)
    }
}

/// Read the request line, then drain headers so the client sees a clean close.
///
/// At most `MAX_REQUEST_HEAD` bytes are read, and an idle client times out.
pub(crate) async fn read_request_line(socket: &mut TcpStream) -> Result<String> {
    match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_head(socket)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "client sent no request",
        ))),
    }
}

async fn read_head(socket: &mut TcpStream) -> Result<String> {
    let mut reader = BufReader::new(AsyncReadExt::take(&mut *socket, MAX_REQUEST_HEAD));
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    let mut line = String::new();
    for _ in 0..MAX_HEADER_LINES {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }
    Ok(request_line)
}

/// Write a complete response and close the write side
pub(crate) async fn write_response(
    socket: &mut TcpStream,
    status: &str,
    content_type: &str,
    extra_headers: &[(&str, String)],
    body: &[u8],
    include_body: bool,
) -> Result<()> {
    let mut head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        content_type,
        body.len()
    );
    for (name, value) in extra_headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    socket.write_all(head.as_bytes()).await?;
    if include_body {
        socket.write_all(body).await?;
    }
    socket.shutdown().await?;
    Ok(())
}

/// Write a small HTML page, ignoring a client that already went away
pub(crate) async fn write_html(socket: &mut TcpStream, status: &str, body: &str) {
    let _ = write_response(socket, status, "text/html; charset=utf-8", &[], body.as_bytes(), true).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line_path() {
        let req = RequestLine::parse("GET /report.pdf?x=1 HTTP/1.1\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path(), "/report.pdf");
        assert!(RequestLine::parse("\r\n").is_none());
    }

    #[tokio::test]
    async fn test_oversized_request_line_is_cut_off() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let junk = vec![b'A'; 64 * 1024];
            // The server stops reading early, so a failed write is expected
            let _ = stream.write_all(&junk).await;
            stream
        });

        let (mut socket, _) = listener.accept().await.unwrap();
        let line = read_request_line(&mut socket).await.unwrap();
        assert_eq!(line.len() as u64, MAX_REQUEST_HEAD);
        drop(socket);
        let _ = client.await;
    }
}
