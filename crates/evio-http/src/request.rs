//! Parsed HTTP request.

use crate::types::{Headers, Method, Version};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    version: Version,
    path: String,
    query: String,
    headers: Headers,
    receive_time: Option<Instant>,
}

impl Default for HttpRequest {
    fn default() -> Self {
        HttpRequest {
            method: Method::Get,
            version: Version::Http11,
            path: String::new(),
            query: String::new(),
            headers: Headers::new(),
            receive_time: None,
        }
    }
}

impl HttpRequest {
    pub fn new() -> HttpRequest {
        HttpRequest::default()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query component, including the leading `?` when present.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn receive_time(&self) -> Option<Instant> {
        self.receive_time
    }

    /// Case-insensitive header lookup; empty string when absent.
    pub fn header(&self, name: &str) -> &str {
        self.headers.get(name).unwrap_or("")
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    pub(crate) fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub(crate) fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
    }

    pub(crate) fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
    }

    pub(crate) fn set_receive_time(&mut self, time: Instant) {
        self.receive_time = Some(time);
    }

    /// Add a header. Empty names and embedded CR/LF are silently rejected.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.set(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut req = HttpRequest::new();
        req.set_header("Host", "localhost");
        assert_eq!(req.header("host"), "localhost");
        assert_eq!(req.header("Content-Type"), "");
        assert!(req.has_header("HOST"));
    }

    #[test]
    fn test_injected_header_is_dropped() {
        let mut req = HttpRequest::new();
        req.set_header("X-A", "ok\r\nX-B: injected");
        assert_eq!(req.header("X-A"), "");
        assert!(!req.has_header("X-B"));
    }
}
