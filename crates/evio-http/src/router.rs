//! Per-method ordered route table with first-match-wins dispatch.
//!
//! Patterns are normalized (single leading slash, no trailing slash),
//! compiled as fully anchored regular expressions, and tried in
//! registration order against the request path.

use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::types::{normalize_path, Method};
use evio_core::everror;
use regex::Regex;
use std::sync::{Arc, Mutex};

pub type HttpHandler = Arc<dyn Fn(&HttpRequest, &mut HttpResponse) + Send + Sync>;

#[derive(Default)]
pub struct RouteTable {
    get: Mutex<Vec<(Regex, HttpHandler)>>,
    post: Mutex<Vec<(Regex, HttpHandler)>>,
    put: Mutex<Vec<(Regex, HttpHandler)>>,
    delete: Mutex<Vec<(Regex, HttpHandler)>>,
}

impl RouteTable {
    pub fn new() -> RouteTable {
        RouteTable::default()
    }

    /// Register a route. Insertion order is preserved per method; an
    /// invalid pattern is logged and skipped.
    pub fn add(&self, method: Method, pattern: &str, handler: HttpHandler) {
        let anchored = format!("^{}$", normalize_path(pattern));
        let regex = match Regex::new(&anchored) {
            Ok(regex) => regex,
            Err(err) => {
                everror!("invalid route pattern {:?}: {}", pattern, err);
                return;
            }
        };
        if let Some(table) = self.table_for(method) {
            table.lock().unwrap().push((regex, handler));
        }
    }

    /// Run the first handler whose pattern matches the request path.
    /// Returns false when nothing matched (or the method has no table).
    pub fn dispatch(&self, request: &HttpRequest, response: &mut HttpResponse) -> bool {
        let table = match self.table_for(request.method()) {
            Some(table) => table,
            None => return false,
        };
        let handler = {
            let routes = table.lock().unwrap();
            routes
                .iter()
                .find(|(regex, _)| regex.is_match(request.path()))
                .map(|(_, handler)| Arc::clone(handler))
        };
        match handler {
            Some(handler) => {
                handler(request, response);
                true
            }
            None => false,
        }
    }

    fn table_for(&self, method: Method) -> Option<&Mutex<Vec<(Regex, HttpHandler)>>> {
        match method {
            Method::Get => Some(&self.get),
            Method::Post => Some(&self.post),
            Method::Put => Some(&self.put),
            Method::Delete => Some(&self.delete),
            Method::Head => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusCode;

    fn request_for(method: Method, path: &str) -> HttpRequest {
        let mut req = HttpRequest::new();
        req.set_method(method);
        req.set_path(path);
        req
    }

    fn tagging_handler(tag: &'static str) -> HttpHandler {
        Arc::new(move |_req, resp| {
            resp.set_status(StatusCode::Ok);
            resp.set_body(tag);
        })
    }

    #[test]
    fn test_insertion_order_first_match_wins() {
        let table = RouteTable::new();
        table.add(Method::Get, "/a", tagging_handler("exact"));
        table.add(Method::Get, "/a.*", tagging_handler("wildcard"));

        let mut resp = HttpResponse::new(false);
        assert!(table.dispatch(&request_for(Method::Get, "/a"), &mut resp));
        // Both patterns match "/a"; the first registered one must win.
        assert_eq!(resp.body(), b"exact");

        let mut resp = HttpResponse::new(false);
        assert!(table.dispatch(&request_for(Method::Get, "/abc"), &mut resp));
        assert_eq!(resp.body(), b"wildcard");
    }

    #[test]
    fn test_patterns_are_anchored() {
        let table = RouteTable::new();
        table.add(Method::Get, "/hello", tagging_handler("hello"));
        let mut resp = HttpResponse::new(false);
        assert!(!table.dispatch(&request_for(Method::Get, "/hello/world"), &mut resp));
        assert!(!table.dispatch(&request_for(Method::Get, "/prefix/hello"), &mut resp));
        assert!(table.dispatch(&request_for(Method::Get, "/hello"), &mut resp));
    }

    #[test]
    fn test_methods_are_separate_tables() {
        let table = RouteTable::new();
        table.add(Method::Get, "/item", tagging_handler("get"));
        table.add(Method::Post, "/item", tagging_handler("post"));

        let mut resp = HttpResponse::new(false);
        assert!(table.dispatch(&request_for(Method::Post, "/item"), &mut resp));
        assert_eq!(resp.body(), b"post");

        let mut resp = HttpResponse::new(false);
        assert!(!table.dispatch(&request_for(Method::Delete, "/item"), &mut resp));
    }

    #[test]
    fn test_unnormalized_registration_matches() {
        let table = RouteTable::new();
        // Registered without a leading slash, like the original examples.
        table.add(Method::Get, "hello", tagging_handler("normalized"));
        let mut resp = HttpResponse::new(false);
        assert!(table.dispatch(&request_for(Method::Get, "/hello"), &mut resp));
    }

    #[test]
    fn test_head_has_no_route_table() {
        let table = RouteTable::new();
        table.add(Method::Head, "/x", tagging_handler("head"));
        let mut resp = HttpResponse::new(false);
        assert!(!table.dispatch(&request_for(Method::Head, "/x"), &mut resp));
    }
}
