//! Minimal HTTP/1.1 framing over caller-provided buffers
//!
//! Nodes speak just enough HTTP to post evidence to the authorizer, poke a
//! peer's `/unlock` endpoint and answer that endpoint themselves. Every
//! request is sent with `Connection: close`, so a response is complete when
//! the peer closes the socket or `Content-Length` bytes have arrived.
//!
//! Parsing is done with `httparse`; writing goes through [`SliceWriter`]
//! so nothing here allocates.

use core::fmt::{self, Write};

use embassy_time::Duration;
use thiserror_no_std::Error;

/// Headers accepted when parsing a request or response
pub const MAX_HEADERS: usize = 16;
/// Room for a request line plus the handful of headers we send
pub const REQUEST_HEAD_CAPACITY: usize = 384;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpError {
    #[error("Output buffer too small")]
    BufferTooSmall,
    #[error("Message incomplete")]
    Incomplete,
    #[error("Malformed HTTP message")]
    Malformed,
    #[error("Body shorter than Content-Length")]
    BodyTruncated,
}

/// Failures below the HTTP layer.
///
/// All of them are worth another attempt; none of them carries a decision.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network link is down")]
    LinkDown,
    #[error("DNS lookup failed")]
    Dns,
    #[error("Connection refused or unreachable")]
    Connect,
    #[error("Timed out")]
    Timeout,
    #[error("Socket I/O error")]
    Io,
    #[error("Response framing error: {0}")]
    Framing(HttpError),
}

impl From<HttpError> for TransportError {
    fn from(e: HttpError) -> Self {
        Self::Framing(e)
    }
}

/// Host and port of a remote HTTP service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint<'a> {
    pub host: &'a str,
    pub port: u16,
}

/// Sends one request and collects the raw response.
///
/// Implementations connect, write `head` then `body`, read until the peer
/// closes or `response` is full, and return the number of bytes read. The
/// whole exchange must give up after `timeout`.
pub trait HttpTransport {
    fn exchange(
        &mut self,
        endpoint: &Endpoint<'_>,
        head: &[u8],
        body: &[u8],
        response: &mut [u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<usize, TransportError>>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for &mut T {
    fn exchange(
        &mut self,
        endpoint: &Endpoint<'_>,
        head: &[u8],
        body: &[u8],
        response: &mut [u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<usize, TransportError>> {
        (**self).exchange(endpoint, head, body, response, timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

impl Method {
    fn parse(method: &str) -> Self {
        match method {
            "GET" => Self::Get,
            "POST" => Self::Post,
            _ => Self::Other,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Other => "OTHER",
        }
    }
}

/// Outgoing request head; the body travels separately.
#[derive(Debug, Clone, Copy)]
pub struct RequestHead<'a> {
    pub method: Method,
    pub path: &'a str,
    pub api_key: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub content_length: usize,
}

impl RequestHead<'_> {
    /// Serialize the request line and headers into `out`
    pub fn write(&self, endpoint: &Endpoint<'_>, out: &mut [u8]) -> Result<usize, HttpError> {
        let mut w = SliceWriter::new(out);

        write!(
            w,
            "{} {} HTTP/1.1\r\nHost: {}:{}\r\n",
            self.method.as_str(),
            self.path,
            endpoint.host,
            endpoint.port
        )
        .map_err(|_| HttpError::BufferTooSmall)?;

        if let Some(key) = self.api_key {
            write!(w, "X-API-Key: {}\r\n", key).map_err(|_| HttpError::BufferTooSmall)?;
        }
        if let Some(content_type) = self.content_type {
            write!(w, "Content-Type: {}\r\n", content_type)
                .map_err(|_| HttpError::BufferTooSmall)?;
        }
        if self.method == Method::Post || self.content_length > 0 {
            write!(w, "Content-Length: {}\r\n", self.content_length)
                .map_err(|_| HttpError::BufferTooSmall)?;
        }
        w.write_str("Connection: close\r\n\r\n")
            .map_err(|_| HttpError::BufferTooSmall)?;

        Ok(w.len())
    }
}

/// A parsed response borrowing its body from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response<'b> {
    pub status: u16,
    pub body: &'b [u8],
}

impl Response<'_> {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Parse a complete response.
///
/// Without `Content-Length` the body runs to the end of `raw`, which is
/// correct for `Connection: close` responses read to EOF.
pub fn parse_response(raw: &[u8]) -> Result<Response<'_>, HttpError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    let head_len = match response.parse(raw) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Err(HttpError::Incomplete),
        Err(_) => return Err(HttpError::Malformed),
    };
    let status = response.code.ok_or(HttpError::Malformed)?;
    let content_length = content_length(response.headers)?;

    let body = &raw[head_len..];
    let body = match content_length {
        Some(len) if body.len() < len => return Err(HttpError::BodyTruncated),
        Some(len) => &body[..len],
        None => body,
    };

    Ok(Response { status, body })
}

/// A parsed incoming request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingRequest<'b> {
    pub method: Method,
    /// Method token as sent, for logging
    pub method_name: &'b str,
    /// Path without the query string
    pub path: &'b str,
}

/// Parse the head of an incoming request. The body is ignored.
pub fn parse_request(raw: &[u8]) -> Result<IncomingRequest<'_>, HttpError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);

    match request.parse(raw) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(HttpError::Incomplete),
        Err(_) => return Err(HttpError::Malformed),
    }

    let method_name = request.method.ok_or(HttpError::Malformed)?;
    let method = Method::parse(method_name);
    let path = request.path.ok_or(HttpError::Malformed)?;
    let path = path.split('?').next().unwrap_or(path);

    Ok(IncomingRequest {
        method,
        method_name,
        path,
    })
}

/// Serialize a JSON response with the given status
pub fn write_response(out: &mut [u8], status: u16, body: &[u8]) -> Result<usize, HttpError> {
    let mut w = SliceWriter::new(out);

    write!(
        w,
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason_phrase(status),
        body.len()
    )
    .map_err(|_| HttpError::BufferTooSmall)?;
    w.write_bytes(body)?;

    Ok(w.len())
}

pub const fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "",
    }
}

fn content_length(headers: &[httparse::Header<'_>]) -> Result<Option<usize>, HttpError> {
    let Some(header) = headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
    else {
        return Ok(None);
    };

    core::str::from_utf8(header.value)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .map(Some)
        .ok_or(HttpError::Malformed)
}

/// `fmt::Write` cursor over a byte slice
pub struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), HttpError> {
        let end = self.pos + bytes.len();
        let dst = self
            .buf
            .get_mut(self.pos..end)
            .ok_or(HttpError::BufferTooSmall)?;
        dst.copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }
}

impl Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes()).map_err(|_| fmt::Error)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    const BACKEND: Endpoint<'static> = Endpoint {
        host: "192.168.0.10",
        port: 5000,
    };

    fn head_text(head: &RequestHead<'_>) -> std::string::String {
        let mut buf = [0u8; REQUEST_HEAD_CAPACITY];
        let len = head.write(&BACKEND, &mut buf).unwrap();
        std::string::String::from_utf8(buf[..len].to_vec()).unwrap()
    }

    #[test]
    fn writes_post_head_with_api_key() {
        let head = RequestHead {
            method: Method::Post,
            path: "/api/rfid",
            api_key: Some("secret"),
            content_type: Some("application/json"),
            content_length: 23,
        };

        assert_eq!(
            head_text(&head),
            "POST /api/rfid HTTP/1.1\r\n\
             Host: 192.168.0.10:5000\r\n\
             X-API-Key: secret\r\n\
             Content-Type: application/json\r\n\
             Content-Length: 23\r\n\
             Connection: close\r\n\r\n"
        );
    }

    #[test]
    fn get_head_has_no_body_headers() {
        let head = RequestHead {
            method: Method::Get,
            path: "/api/health",
            api_key: None,
            content_type: None,
            content_length: 0,
        };

        let text = head_text(&head);
        assert!(text.starts_with("GET /api/health HTTP/1.1\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(!text.contains("X-API-Key"));
    }

    #[test]
    fn head_reports_small_buffer() {
        let head = RequestHead {
            method: Method::Get,
            path: "/unlock",
            api_key: None,
            content_type: None,
            content_length: 0,
        };
        let mut buf = [0u8; 16];

        assert_eq!(
            head.write(&BACKEND, &mut buf),
            Err(HttpError::BufferTooSmall)
        );
    }

    #[test]
    fn parses_response_with_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 20\r\n\r\n{\"status\":\"granted\"}trailing";

        let response = parse_response(raw).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, br#"{"status":"granted"}"#);
        assert!(response.is_success());
    }

    #[test]
    fn parses_response_read_to_eof() {
        let raw = b"HTTP/1.0 403 FORBIDDEN\r\n\r\n{\"status\":\"denied\"}";

        let response = parse_response(raw).unwrap();
        assert_eq!(response.status, 403);
        assert_eq!(response.body, br#"{"status":"denied"}"#);
        assert!(!response.is_success());
    }

    #[test]
    fn truncated_body_is_an_error() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{}";
        assert_eq!(parse_response(raw), Err(HttpError::BodyTruncated));
    }

    #[test]
    fn partial_and_garbage_responses() {
        assert_eq!(
            parse_response(b"HTTP/1.1 200 OK\r\nContent-"),
            Err(HttpError::Incomplete)
        );
        assert_eq!(
            parse_response(b"\x00\x01garbage\r\n\r\n"),
            Err(HttpError::Malformed)
        );
    }

    #[test]
    fn parses_request_and_strips_query() {
        let raw = b"POST /unlock?src=reader HTTP/1.1\r\nHost: lock.local\r\nContent-Length: 0\r\n\r\n";

        let request = parse_request(raw).unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/unlock");
    }

    #[test]
    fn unknown_method_is_other() {
        let request = parse_request(b"DELETE /unlock HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(request.method, Method::Other);
        assert_eq!(request.method_name, "DELETE");
    }

    #[test]
    fn writes_json_response() {
        let mut buf = [0u8; 256];
        let len = write_response(&mut buf, 404, br#"{"status":"not_found"}"#).unwrap();

        let parsed = parse_response(&buf[..len]).unwrap();
        assert_eq!(parsed.status, 404);
        assert_eq!(parsed.body, br#"{"status":"not_found"}"#);
    }

    #[test]
    fn slice_writer_refuses_overflow() {
        let mut buf = [0u8; 4];
        let mut w = SliceWriter::new(&mut buf);

        assert!(w.write_bytes(b"abc").is_ok());
        assert_eq!(w.write_bytes(b"de"), Err(HttpError::BufferTooSmall));
        assert_eq!(w.len(), 3);
    }
}
