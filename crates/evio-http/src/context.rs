//! Per-connection HTTP parse state machine.
//!
//! Consumes bytes incrementally from the connection's inbound buffer, so a
//! request may arrive in any fragmentation — byte by byte, split across
//! reads, or pipelined behind a previous request — and parse identically.
//!
//! Request bodies are not consumed: the `ExpectBody` state is a no-op and
//! POST/PUT payloads are left in the buffer unread.

use crate::request::HttpRequest;
use crate::types::{Method, Version};
use evio_core::MsgBuffer;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    ExpectRequestLine,
    ExpectHeaders,
    ExpectBody,
    Complete,
}

pub struct HttpContext {
    state: ParseState,
    request: HttpRequest,
}

impl Default for HttpContext {
    fn default() -> Self {
        HttpContext {
            state: ParseState::ExpectRequestLine,
            request: HttpRequest::new(),
        }
    }
}

impl HttpContext {
    pub fn new() -> HttpContext {
        HttpContext::default()
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Complete
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Hand the finished request out, leaving a fresh one behind.
    pub fn take_request(&mut self) -> HttpRequest {
        std::mem::take(&mut self.request)
    }

    /// Back to `ExpectRequestLine` for the next keep-alive request.
    pub fn reset(&mut self) {
        self.state = ParseState::ExpectRequestLine;
        self.request = HttpRequest::new();
    }

    /// Consume as much of `buf` as possible. Returns false when the input
    /// is malformed (bad request line or version); parsing for this
    /// connection is then aborted. Returning true with
    /// [`is_complete`](Self::is_complete) false means more bytes are
    /// needed.
    pub fn parse(&mut self, buf: &mut MsgBuffer, receive_time: Instant) -> bool {
        loop {
            match self.state {
                ParseState::ExpectRequestLine => {
                    let crlf = match buf.find_crlf() {
                        Some(pos) => pos,
                        None => return true,
                    };
                    let ok = self.process_request_line(&buf.peek()[..crlf]);
                    if !ok {
                        return false;
                    }
                    self.request.set_receive_time(receive_time);
                    buf.retrieve(crlf + 2);
                    self.state = ParseState::ExpectHeaders;
                }
                ParseState::ExpectHeaders => {
                    let crlf = match buf.find_crlf() {
                        Some(pos) => pos,
                        None => return true,
                    };
                    let parsed = {
                        let line = &buf.peek()[..crlf];
                        match line.iter().position(|&b| b == b':') {
                            Some(colon) => {
                                let name = String::from_utf8_lossy(&line[..colon]).into_owned();
                                // Value starts 2 past the colon, trimming
                                // the conventional ": " separator.
                                let value_start = (colon + 2).min(line.len());
                                let value =
                                    String::from_utf8_lossy(&line[value_start..]).into_owned();
                                Some((name, value))
                            }
                            None => None,
                        }
                    };
                    buf.retrieve(crlf + 2);
                    match parsed {
                        Some((name, value)) => self.request.set_header(&name, &value),
                        None => {
                            // Blank line: headers done. Bodies are out of
                            // scope, so the request is complete.
                            self.state = ParseState::Complete;
                            return true;
                        }
                    }
                }
                ParseState::ExpectBody => {
                    return true;
                }
                ParseState::Complete => {
                    return true;
                }
            }
        }
    }

    /// `METHOD SP TARGET SP HTTP/1.x`, target split at the first `?` into
    /// path and query (query keeps the `?`).
    fn process_request_line(&mut self, line: &[u8]) -> bool {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(_) => return false,
        };

        let first_space = match text.find(' ') {
            Some(pos) => pos,
            None => return false,
        };
        let method = match Method::parse(&text[..first_space]) {
            Some(method) => method,
            None => return false,
        };

        let rest = &text[first_space + 1..];
        let second_space = match rest.find(' ') {
            Some(pos) => pos,
            None => return false,
        };
        let target = &rest[..second_space];
        let version_text = &rest[second_space + 1..];

        // The version is a fixed 8-byte suffix.
        if version_text.len() != 8 {
            return false;
        }
        let version = match Version::parse(version_text) {
            Some(version) => version,
            None => return false,
        };

        match target.find('?') {
            Some(question) => {
                self.request.set_path(&target[..question]);
                self.request.set_query(&target[question..]);
            }
            None => {
                self.request.set_path(target);
            }
        }

        self.request.set_method(method);
        self.request.set_version(version);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(raw: &[u8]) -> (HttpContext, bool) {
        let mut ctx = HttpContext::new();
        let mut buf = MsgBuffer::new();
        buf.write(raw);
        let ok = ctx.parse(&mut buf, Instant::now());
        (ctx, ok)
    }

    #[test]
    fn test_simple_get() {
        let (ctx, ok) = parse_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(ok);
        assert!(ctx.is_complete());
        let req = ctx.request();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/hello");
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.header("Host"), "x");
    }

    #[test]
    fn test_byte_by_byte_arrival_parses_identically() {
        let raw = b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut ctx = HttpContext::new();
        let mut buf = MsgBuffer::new();
        let mut completions = 0;
        for &byte in raw.iter() {
            buf.write(&[byte]);
            assert!(ctx.parse(&mut buf, Instant::now()));
            if ctx.is_complete() {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
        let req = ctx.request();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/hello");
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.header("Host"), "x");
    }

    #[test]
    fn test_query_split_keeps_question_mark() {
        let (ctx, ok) = parse_all(b"GET /search?q=rust&x=1 HTTP/1.1\r\n\r\n");
        assert!(ok);
        assert!(ctx.is_complete());
        assert_eq!(ctx.request().path(), "/search");
        assert_eq!(ctx.request().query(), "?q=rust&x=1");
    }

    #[test]
    fn test_bad_version_aborts() {
        let (_, ok) = parse_all(b"GET / HTTP/2.0\r\n\r\n");
        assert!(!ok);
        let (_, ok) = parse_all(b"GET / HTTP/1.5\r\n\r\n");
        assert!(!ok);
        let (_, ok) = parse_all(b"GET / HTTP/1.11\r\n\r\n");
        assert!(!ok);
    }

    #[test]
    fn test_bad_method_aborts() {
        let (_, ok) = parse_all(b"BREW /pot HTTP/1.1\r\n\r\n");
        assert!(!ok);
    }

    #[test]
    fn test_multiple_headers_case_insensitive() {
        let (ctx, ok) =
            parse_all(b"PUT /item HTTP/1.0\r\nContent-Type: text/plain\r\nhost: h\r\n\r\n");
        assert!(ok);
        assert!(ctx.is_complete());
        let req = ctx.request();
        assert_eq!(req.method(), Method::Put);
        assert_eq!(req.version(), Version::Http10);
        assert_eq!(req.header("content-type"), "text/plain");
        assert_eq!(req.header("Host"), "h");
    }

    #[test]
    fn test_reset_supports_sequential_requests() {
        let mut ctx = HttpContext::new();
        let mut buf = MsgBuffer::new();
        buf.write(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");

        assert!(ctx.parse(&mut buf, Instant::now()));
        assert!(ctx.is_complete());
        assert_eq!(ctx.request().path(), "/a");

        ctx.reset();
        assert!(ctx.parse(&mut buf, Instant::now()));
        assert!(ctx.is_complete());
        assert_eq!(ctx.request().path(), "/b");
    }

    #[test]
    fn test_body_bytes_left_unconsumed() {
        let mut ctx = HttpContext::new();
        let mut buf = MsgBuffer::new();
        buf.write(b"POST /submit HTTP/1.1\r\nContent-Length: 4\r\n\r\nDATA");
        assert!(ctx.parse(&mut buf, Instant::now()));
        assert!(ctx.is_complete());
        assert_eq!(buf.peek(), b"DATA"); // body intentionally not consumed
    }
}
