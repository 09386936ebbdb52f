//! # evio-http
//!
//! Minimal HTTP/1.x layer over the evio reactor: an incremental
//! request-line/header parser that tolerates partial, fragmented and
//! pipelined TCP reads, plus ordered first-match-wins route dispatch.
//!
//! ## Modules
//!
//! - `types` - Method/Version/StatusCode, case-insensitive headers,
//!   path normalization
//! - `request` - Parsed request
//! - `response` - Response builder and wire serialization
//! - `context` - Per-connection parse state machine
//! - `router` - Per-method ordered route table
//! - `server` - HTTP server over `TcpServer`

#![allow(dead_code)]

pub mod context;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod types;

// Re-exports for convenience
pub use context::{HttpContext, ParseState};
pub use request::HttpRequest;
pub use response::HttpResponse;
pub use router::{HttpHandler, RouteTable};
pub use server::HttpServer;
pub use types::{Headers, Method, StatusCode, Version};
