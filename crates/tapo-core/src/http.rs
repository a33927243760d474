//! Minimal HTTP/1.1 client for the device's non-compliant server.
//!
//! Tapo devices run an HTTP server that rejects requests with lowercase
//! header names. HTTP client libraries (reqwest, hyper, ureq) forcibly
//! lowercase all headers following HTTP/2 conventions, so requests are
//! written by hand over a TCP stream with title-case headers. One
//! connection is used per request; the device closes it after responding.
//!
//! The same devices emit malformed `Set-Cookie` headers (missing attribute
//! terminators, stray semicolons), so cookies are recovered with a
//! permissive parser that treats each line as a semicolon-separated list of
//! `name=value` pairs and ignores everything else.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::Error;

/// One `name=value` pair recovered from a `Set-Cookie` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// A parsed HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    cookies: Vec<Cookie>,
}

impl HttpResponse {
    /// Returns the value of the first cookie pair with the given name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }
}

/// Sends a raw HTTP POST request and parses the response.
///
/// `cookie`, when present, is the full `name=value` pair to send in the
/// `Cookie` header.
pub async fn post(
    host: &str,
    port: u16,
    path: &str,
    content_type: &str,
    body: &[u8],
    cookie: Option<&str>,
    io_timeout: Duration,
) -> Result<HttpResponse, Error> {
    // Build the HTTP request with title-case headers
    let mut request = format!(
        "POST {} HTTP/1.1\r\n\
         Host: {}:{}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Accept: */*\r\n\
         Connection: close\r\n",
        path,
        host,
        port,
        content_type,
        body.len()
    );

    if let Some(cookie) = cookie {
        request.push_str(&format!("Cookie: {}\r\n", cookie));
    }

    request.push_str("\r\n");

    let addr = format!("{}:{}", host, port);
    let mut stream = timeout(io_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::Transport("connection timed out".into()))?
        .map_err(|e| Error::Transport(format!("connection failed: {}", e)))?;

    let mut full_request = request.into_bytes();
    full_request.extend_from_slice(body);

    timeout(io_timeout, stream.write_all(&full_request))
        .await
        .map_err(|_| Error::Transport("write timed out".into()))?
        .map_err(|e| Error::Transport(format!("write failed: {}", e)))?;

    // Read headers, then as much body as Content-Length promises
    let mut response = Vec::with_capacity(1024);
    let mut buf = [0u8; 4096];

    loop {
        let n = timeout(io_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| Error::Transport("read timed out".into()))?
            .map_err(|e| Error::Transport(format!("read failed: {}", e)))?;

        if n == 0 {
            break;
        }

        response.extend_from_slice(&buf[..n]);

        if let Some(header_end) = find_header_end(&response) {
            let headers = String::from_utf8_lossy(&response[..header_end]).into_owned();
            let body_start = header_end + 4;

            if let Some(expected_len) = parse_content_length(&headers) {
                while response.len() - body_start < expected_len {
                    let n = timeout(io_timeout, stream.read(&mut buf))
                        .await
                        .map_err(|_| Error::Transport("read timed out".into()))?
                        .map_err(|e| Error::Transport(format!("read failed: {}", e)))?;

                    if n == 0 {
                        break;
                    }

                    response.extend_from_slice(&buf[..n]);
                }
            }

            break;
        }
    }

    let header_end = find_header_end(&response)
        .ok_or_else(|| Error::Protocol("invalid HTTP response: no header end".into()))?;

    let headers = String::from_utf8_lossy(&response[..header_end]);
    let body = response[header_end + 4..].to_vec();

    let status = parse_status_code(&headers)
        .ok_or_else(|| Error::Protocol("invalid HTTP response: no status code".into()))?;

    let cookies = parse_cookies(&headers);

    debug!(status, bytes = body.len(), "HTTP response");

    Ok(HttpResponse {
        status,
        body,
        cookies,
    })
}

/// Find the position of "\r\n\r\n" in the response (end of headers).
fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse the HTTP status code from the status line.
fn parse_status_code(headers: &str) -> Option<u16> {
    let first_line = headers.lines().next()?;
    let mut parts = first_line.split_whitespace();
    parts.next()?;
    parts.next()?.parse().ok()
}

/// Parse the Content-Length header value.
fn parse_content_length(headers: &str) -> Option<usize> {
    for line in headers.lines() {
        if line.to_lowercase().starts_with("content-length:") {
            let value = line.split(':').nth(1)?.trim();
            return value.parse().ok();
        }
    }
    None
}

/// Collect the cookie pairs of every Set-Cookie line.
fn parse_cookies(headers: &str) -> Vec<Cookie> {
    let mut cookies = Vec::new();
    for line in headers.lines() {
        if let Some(prefix) = line.get(..11) {
            if prefix.eq_ignore_ascii_case("set-cookie:") {
                cookies.extend(parse_set_cookie(&line[11..]));
            }
        }
    }
    cookies
}

/// Permissively parse one Set-Cookie line into its `name=value` pairs.
///
/// Attributes such as `Path` or `Max-Age` come back as ordinary pairs; the
/// caller picks the names it wants. Names are whitespace-trimmed, values
/// kept verbatim.
fn parse_set_cookie(line: &str) -> Vec<Cookie> {
    let mut pairs = Vec::new();
    for part in line.trim().split(';') {
        let Some((name, value)) = part.split_once('=') else {
            continue;
        };
        pairs.push(Cookie {
            name: name.trim().to_string(),
            value: value.to_string(),
        });
    }
    pairs
}
