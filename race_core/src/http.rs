//! HTTP/1.1 wire codec: request serialization and response parsing.
//!
//! Per spec.md's Design Note §9, this replaces a hosted HTTP library with a
//! direct client the engine controls end-to-end, since the barrier protocol
//! needs to withhold the last two bytes of a request and the first byte of
//! a response read — neither of which a pooled `Connection` gives access
//! to. Response parsing is headers-only via `httparse`; body framing
//! (Content-Length / chunked / read-to-close) is handled here too, modeled
//! on `pyrace.connection.BaseConnection.getresponse`'s use of
//! `http.client.HTTPResponse`.

use std::io::{ErrorKind, Read};

use crate::error::RaceError;
use crate::multimap::OrderedMultimap;
use crate::work::{Body, PreparedRequest, Response};

/// Serializes a prepared request into the exact bytes that go on the wire,
/// in HTTP/1.1 request-line + headers + CRLFCRLF + body order.
pub fn serialize_request(request: &PreparedRequest) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + request.body.len());
    out.extend_from_slice(request.method.as_bytes());
    out.push(b' ');
    out.extend_from_slice(request.target.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    let mut wrote_host = false;
    let mut wrote_content_length = false;
    for (key, value) in request.headers.iter() {
        if key.eq_ignore_ascii_case("host") {
            wrote_host = true;
        }
        if key.eq_ignore_ascii_case("content-length") {
            wrote_content_length = true;
        }
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if !wrote_host {
        let host_header = format!("Host: {}\r\n", host_header_value(request));
        out.extend_from_slice(host_header.as_bytes());
    }
    if !wrote_content_length && !request.body.is_empty() {
        let header = format!("Content-Length: {}\r\n", request.body.len());
        out.extend_from_slice(header.as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&request.body);
    out
}

fn host_header_value(request: &PreparedRequest) -> String {
    let default_port = match request.scheme.as_str() {
        "https" => 443,
        _ => 80,
    };
    if request.port == default_port {
        request.host.clone()
    } else {
        format!("{}:{}", request.host, request.port)
    }
}

/// Encodes a [`Body`] into its wire bytes and the `Content-Type` header it
/// implies, if any. Used by `crate::session::Session::prepare`.
pub fn encode_body(body: &Body) -> (Vec<u8>, Option<&'static str>) {
    match body {
        Body::Bytes(bytes) => (bytes.clone(), None),
        Body::Form(fields) => {
            let encoded = fields
                .iter()
                .map(|(k, v)| format!("{}={}", url_encode(k), url_encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            (encoded.into_bytes(), Some("application/x-www-form-urlencoded"))
        }
        Body::Json(value) => (
            serde_json::to_vec(value).unwrap_or_default(),
            Some("application/json"),
        ),
    }
}

fn url_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_HEADER_COUNT: usize = 128;

/// Reads and parses one full HTTP/1.1 response (status line, headers, and
/// body) from `stream`. Assumes the barrier's read gate has already opened;
/// this function performs only blocking reads, no synchronization.
pub fn read_response(
    stream: &mut impl Read,
    request: &PreparedRequest,
) -> Result<Response, RaceError> {
    let mut buf = Vec::new();
    let head_len = loop {
        let mut chunk = [0u8; 4096];
        let n = stream
            .read(&mut chunk)
            .map_err(|e| RaceError::Transport(e.to_string()))?;
        if n == 0 {
            return Err(RaceError::Transport(
                "connection closed before response headers completed".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_HEADER_BYTES {
            return Err(RaceError::Transport("response headers too large".to_string()));
        }

        let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADER_COUNT];
        let mut parsed = httparse::Response::new(&mut header_storage);
        match parsed
            .parse(&buf)
            .map_err(|e| RaceError::Transport(format!("invalid HTTP response: {e}")))?
        {
            httparse::Status::Complete(len) => break len,
            httparse::Status::Partial => continue,
        }
    };

    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADER_COUNT];
    let mut parsed = httparse::Response::new(&mut header_storage);
    let status = match parsed
        .parse(&buf)
        .map_err(|e| RaceError::Transport(format!("invalid HTTP response: {e}")))?
    {
        httparse::Status::Complete(_) => parsed,
        httparse::Status::Partial => {
            return Err(RaceError::Transport("response headers incomplete".to_string()))
        }
    };

    let status_code = status.code.unwrap_or(0);
    let reason = status.reason.unwrap_or("").to_string();
    let mut headers = OrderedMultimap::new();
    for header in status.headers.iter() {
        headers.insert(
            header.name.to_string(),
            String::from_utf8_lossy(header.value).to_string(),
        );
    }

    let body = read_body(stream, &headers, &buf[head_len..])?;

    Ok(Response {
        status_code,
        reason,
        headers,
        body,
        request: request.clone(),
    })
}

fn read_body(
    stream: &mut impl Read,
    headers: &OrderedMultimap<String, String>,
    already_read: &[u8],
) -> Result<Vec<u8>, RaceError> {
    let is_chunked = headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case("transfer-encoding") && v.eq_ignore_ascii_case("chunked"));

    if is_chunked {
        return read_chunked_body(stream, already_read);
    }

    if let Some(len) = content_length(headers) {
        return read_fixed_body(stream, already_read, len);
    }

    // No framing header: read until the peer closes (matches
    // `http.client`'s behavior for HTTP/1.0-style bodies).
    let mut body = already_read.to_vec();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(RaceError::Transport(e.to_string())),
        }
    }
    Ok(body)
}

fn content_length(headers: &OrderedMultimap<String, String>) -> Option<usize> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse().ok())
}

fn read_fixed_body(
    stream: &mut impl Read,
    already_read: &[u8],
    len: usize,
) -> Result<Vec<u8>, RaceError> {
    let mut body = already_read.to_vec();
    while body.len() < len {
        let mut chunk = vec![0u8; len - body.len()];
        let n = stream
            .read(&mut chunk)
            .map_err(|e| RaceError::Transport(e.to_string()))?;
        if n == 0 {
            return Err(RaceError::Transport(
                "connection closed before Content-Length bytes were read".to_string(),
            ));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(len);
    Ok(body)
}

fn read_chunked_body(stream: &mut impl Read, already_read: &[u8]) -> Result<Vec<u8>, RaceError> {
    let mut pending = already_read.to_vec();
    let mut body = Vec::new();

    loop {
        let line_end = loop {
            if let Some(pos) = find_crlf(&pending) {
                break pos;
            }
            pull_more(stream, &mut pending)?;
        };
        let size_line = std::str::from_utf8(&pending[..line_end])
            .map_err(|_| RaceError::Transport("invalid chunk size line".to_string()))?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| RaceError::Transport(format!("invalid chunk size {size_str:?}")))?;
        pending.drain(..line_end + 2);

        if size == 0 {
            // Trailing headers (if any) followed by a final CRLF; this
            // engine does not surface trailers, so just consume them.
            loop {
                if let Some(pos) = find_crlf(&pending) {
                    if pos == 0 {
                        pending.drain(..2);
                        break;
                    }
                    pending.drain(..pos + 2);
                    continue;
                }
                pull_more(stream, &mut pending)?;
            }
            break;
        }

        while pending.len() < size + 2 {
            pull_more(stream, &mut pending)?;
        }
        body.extend_from_slice(&pending[..size]);
        pending.drain(..size + 2);
    }

    Ok(body)
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn pull_more(stream: &mut impl Read, pending: &mut Vec<u8>) -> Result<(), RaceError> {
    let mut chunk = [0u8; 4096];
    let n = stream
        .read(&mut chunk)
        .map_err(|e| RaceError::Transport(e.to_string()))?;
    if n == 0 {
        return Err(RaceError::Transport(
            "connection closed mid-chunked-body".to_string(),
        ));
    }
    pending.extend_from_slice(&chunk[..n]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn prepared(body: &[u8]) -> PreparedRequest {
        let mut headers = OrderedMultimap::new();
        headers.insert("Accept".to_string(), "*/*".to_string());
        PreparedRequest {
            method: "POST".to_string(),
            scheme: "https".to_string(),
            host: "example.test".to_string(),
            port: 443,
            target: "/a/b?x=1".to_string(),
            headers,
            body: body.to_vec(),
        }
    }

    #[test]
    fn serialize_request_adds_host_and_content_length() {
        let req = prepared(b"hello");
        let bytes = serialize_request(&req);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("POST /a/b?x=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.test\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("hello"));
    }

    #[test]
    fn serialize_request_omits_content_length_header_for_empty_body() {
        let req = prepared(b"");
        let bytes = serialize_request(&req);
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn host_header_includes_nondefault_port() {
        let mut req = prepared(b"");
        req.port = 8443;
        let bytes = serialize_request(&req);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Host: example.test:8443\r\n"));
    }

    #[test]
    fn parses_fixed_length_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let mut cursor = Cursor::new(raw.to_vec());
        let response = read_response(&mut cursor, &prepared(b"")).unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.body, b"hello");
    }

    #[test]
    fn parses_chunked_response() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let mut cursor = Cursor::new(raw.to_vec());
        let response = read_response(&mut cursor, &prepared(b"")).unwrap();
        assert_eq!(response.body, b"hello world");
    }

    #[test]
    fn parses_read_to_close_response() {
        let raw = b"HTTP/1.1 200 OK\r\n\r\nabcde";
        let mut cursor = Cursor::new(raw.to_vec());
        let response = read_response(&mut cursor, &prepared(b"")).unwrap();
        assert_eq!(response.body, b"abcde");
    }

    #[test]
    fn form_body_is_percent_encoded() {
        let (bytes, content_type) = encode_body(&{
            let mut form = OrderedMultimap::new();
            form.insert("a b".to_string(), "c&d".to_string());
            Body::Form(form)
        });
        assert_eq!(String::from_utf8(bytes).unwrap(), "a+b=c%26d");
        assert_eq!(content_type, Some("application/x-www-form-urlencoded"));
    }
}
