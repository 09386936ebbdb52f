//! HTTP wire vocabulary: methods, versions, status codes, headers.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
    Put,
    Delete,
}

impl Method {
    pub fn parse(s: &str) -> Option<Method> {
        match s {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "HEAD" => Some(Method::Head),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Accepts exactly `HTTP/1.0` or `HTTP/1.1`.
    pub fn parse(s: &str) -> Option<Version> {
        match s {
            "HTTP/1.0" => Some(Version::Http10),
            "HTTP/1.1" => Some(Version::Http11),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 200,
    MovedPermanently = 301,
    BadRequest = 400,
    NotFound = 404,
    NotImplemented = 501,
}

impl StatusCode {
    pub fn code(&self) -> u32 {
        *self as u32
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::MovedPermanently => "Moved Permanently",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::NotImplemented => "Not Implemented",
        }
    }
}

/// Case-insensitive header map preserving insertion order and the original
/// key spelling. First insert of a name wins; later inserts of the same
/// name are dropped.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers::default()
    }

    /// Insert a header unless a case-insensitive equal name already exists.
    /// Empty names and names/values with embedded CR or LF are silently
    /// rejected.
    pub fn set(&mut self, name: &str, value: &str) {
        if name.is_empty() || has_crlf(name) || has_crlf(value) {
            return;
        }
        if self.get(name).is_none() {
            self.entries.push((name.to_string(), value.to_string()));
        }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// True when the string embeds a CR or LF (header-injection guard).
pub fn has_crlf(s: &str) -> bool {
    s.bytes().any(|b| b == b'\r' || b == b'\n')
}

/// Normalize a path to exactly one leading slash and no trailing slashes.
/// The empty path becomes `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    format!("/{}", trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse() {
        assert_eq!(Method::parse("GET"), Some(Method::Get));
        assert_eq!(Method::parse("DELETE"), Some(Method::Delete));
        assert_eq!(Method::parse("get"), None); // methods are case-sensitive
        assert_eq!(Method::parse("PATCH"), None);
    }

    #[test]
    fn test_version_parse_is_exact() {
        assert_eq!(Version::parse("HTTP/1.1"), Some(Version::Http11));
        assert_eq!(Version::parse("HTTP/1.0"), Some(Version::Http10));
        assert_eq!(Version::parse("HTTP/1.2"), None);
        assert_eq!(Version::parse("http/1.1"), None);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(StatusCode::Ok.code(), 200);
        assert_eq!(StatusCode::NotFound.code(), 404);
        assert_eq!(StatusCode::BadRequest.default_message(), "Bad Request");
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut h = Headers::new();
        h.set("Host", "example.org");
        assert_eq!(h.get("host"), Some("example.org"));
        assert_eq!(h.get("HOST"), Some("example.org"));
        assert_eq!(h.get("missing"), None);
    }

    #[test]
    fn test_headers_first_insert_wins() {
        let mut h = Headers::new();
        h.set("Accept", "text/html");
        h.set("accept", "application/json");
        assert_eq!(h.get("Accept"), Some("text/html"));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_headers_reject_crlf_injection() {
        let mut h = Headers::new();
        h.set("X-Evil", "a\r\nInjected: yes");
        h.set("X\r\n", "value");
        h.set("", "value");
        assert!(h.is_empty());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("hello"), "/hello");
        assert_eq!(normalize_path("/hello"), "/hello");
        assert_eq!(normalize_path("//twice"), "/twice");
        assert_eq!(normalize_path("a/b/"), "/a/b");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn test_has_crlf() {
        assert!(has_crlf("a\rb"));
        assert!(has_crlf("a\nb"));
        assert!(!has_crlf("plain value"));
    }
}
