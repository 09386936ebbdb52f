//! HTTP server over the TCP engine.
//!
//! Consumes connection read events, feeds the per-connection parse
//! context, and dispatches completed requests through the route table.
//! Malformed input earns a 400 and a shutdown; unmatched routes fall
//! through to a 404. After each response the context resets, so
//! keep-alive connections serve sequential requests one at a time.

use crate::context::HttpContext;
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::router::{HttpHandler, RouteTable};
use crate::types::{Method, StatusCode, Version};
use evio_core::{evdebug, MsgBuffer};
use evio_net::{EventLoopHandle, InetAddr, NetResult, ServerConfig, TcpConnection, TcpServer};
use std::sync::Arc;
use std::time::Instant;

const BAD_REQUEST_RESPONSE: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

pub struct HttpServer {
    tcp: TcpServer,
    routes: Arc<RouteTable>,
}

impl HttpServer {
    /// Build an HTTP server accepting on the loop behind `accept_loop`.
    pub fn new(
        accept_loop: Arc<EventLoopHandle>,
        addr: InetAddr,
        config: ServerConfig,
    ) -> HttpServer {
        let tcp = TcpServer::new(accept_loop, addr, config);
        let routes = Arc::new(RouteTable::new());

        tcp.on_connection(|conn| {
            if conn.is_connected() {
                conn.set_context(Box::new(HttpContext::new()));
            }
        });

        let dispatch_routes = Arc::clone(&routes);
        tcp.on_receive_message(move |conn, buf| {
            Self::on_message(&dispatch_routes, conn, buf);
        });

        HttpServer { tcp, routes }
    }

    /// Register a GET route. Chainable.
    pub fn get(
        &self,
        pattern: &str,
        handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    ) -> &Self {
        self.add_route(Method::Get, pattern, Arc::new(handler))
    }

    /// Register a POST route. Chainable.
    pub fn post(
        &self,
        pattern: &str,
        handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    ) -> &Self {
        self.add_route(Method::Post, pattern, Arc::new(handler))
    }

    /// Register a PUT route. Chainable.
    pub fn put(
        &self,
        pattern: &str,
        handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    ) -> &Self {
        self.add_route(Method::Put, pattern, Arc::new(handler))
    }

    /// Register a DELETE route. Chainable.
    pub fn delete(
        &self,
        pattern: &str,
        handler: impl Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    ) -> &Self {
        self.add_route(Method::Delete, pattern, Arc::new(handler))
    }

    fn add_route(&self, method: Method, pattern: &str, handler: HttpHandler) -> &Self {
        self.routes.add(method, pattern, handler);
        self
    }

    pub fn start(&self) -> NetResult<()> {
        self.tcp.start()
    }

    pub fn stop(&self) {
        self.tcp.stop();
    }

    /// The bound address (kernel-chosen port resolved after `start`).
    pub fn addr(&self) -> InetAddr {
        self.tcp.addr()
    }

    /// Drive the parse context with freshly buffered bytes. Runs on the
    /// connection's owning loop.
    fn on_message(routes: &Arc<RouteTable>, conn: &Arc<TcpConnection>, buf: &mut MsgBuffer) {
        let receive_time = Instant::now();

        let mut ctx_box = match conn.take_context() {
            Some(ctx) => ctx,
            None => Box::new(HttpContext::new()),
        };
        if !ctx_box.is::<HttpContext>() {
            // Foreign context installed on an HTTP connection; start over.
            ctx_box = Box::new(HttpContext::new());
        }
        let ctx = ctx_box
            .downcast_mut::<HttpContext>()
            .expect("context type checked above");

        // One request at a time; loop to catch a pipelined successor
        // already sitting in the buffer.
        loop {
            if !ctx.parse(buf, receive_time) {
                conn.send(BAD_REQUEST_RESPONSE);
                conn.shutdown();
                break;
            }
            if !ctx.is_complete() {
                break;
            }
            let request = ctx.take_request();
            ctx.reset();
            Self::on_request(routes, conn, &request);
        }

        conn.set_context(ctx_box);
    }

    /// Build and write the response for one completed request.
    fn on_request(routes: &Arc<RouteTable>, conn: &Arc<TcpConnection>, request: &HttpRequest) {
        let connection_header = request.header("Connection");
        let close = connection_header.eq_ignore_ascii_case("close")
            || (request.version() == Version::Http10
                && !connection_header.eq_ignore_ascii_case("keep-alive"));

        let mut response = HttpResponse::new(close);
        if !routes.dispatch(request, &mut response) {
            // Default handler: unmatched routes are a 404, and we give up
            // on the connection.
            response.set_status(StatusCode::NotFound);
            response.set_close_connection(true);
        }

        evdebug!(
            "{} {} -> {}",
            request.method(),
            request.path(),
            response.status_code().code()
        );

        let mut wire = MsgBuffer::new();
        response.append_to(&mut wire);
        conn.send(wire.peek());

        if response.close_connection() {
            conn.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evio_net::EventLoopThread;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    fn hello_server() -> (EventLoopThread, HttpServer) {
        let accept_thread = EventLoopThread::new("evio-http-test", 100);
        accept_thread.run();
        let config = ServerConfig::default().num_io_loops(0).poll_timeout_ms(100);
        let server = HttpServer::new(accept_thread.handle(), InetAddr::loopback(0), config);
        server
            .get("/hello", |_req, resp| {
                resp.set_status(StatusCode::Ok);
                resp.set_content_type("text/plain");
                resp.set_body("Hello World!");
            })
            .get("/echo-query", |req, resp| {
                resp.set_status(StatusCode::Ok);
                resp.set_body(req.query().to_string());
            });
        server.start().unwrap();
        (accept_thread, server)
    }

    fn read_response(reader: &mut BufReader<TcpStream>) -> (String, Vec<u8>) {
        let mut status = String::new();
        reader.read_line(&mut status).unwrap();
        let mut content_length = 0usize;
        let mut close = false;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                break;
            }
            let lower = trimmed.to_ascii_lowercase();
            if let Some(rest) = lower.strip_prefix("content-length:") {
                content_length = rest.trim().parse().unwrap();
            }
            if lower == "connection: close" {
                close = true;
            }
        }
        let mut body = vec![0u8; content_length];
        if content_length > 0 {
            reader.read_exact(&mut body).unwrap();
        } else if close {
            reader.read_to_end(&mut body).unwrap();
        }
        (status.trim_end().to_string(), body)
    }

    #[test]
    fn test_get_hello_keep_alive_then_close() {
        let (_accept, server) = hello_server();
        let port = server.addr().port();

        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut write_half = stream;

        // First request: keep-alive.
        write_half
            .write_all(b"GET /hello HTTP/1.1\r\nHost: t\r\n\r\n")
            .unwrap();
        let (status, body) = read_response(&mut reader);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert_eq!(body, b"Hello World!");

        // Second request on the same connection, asking to close.
        write_half
            .write_all(b"GET /hello HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n")
            .unwrap();
        let (status, body) = read_response(&mut reader);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert_eq!(body, b"Hello World!");

        // Server shuts the connection down after a close response.
        let mut rest = Vec::new();
        let _ = reader.read_to_end(&mut rest);
        assert!(rest.is_empty());

        server.stop();
    }

    #[test]
    fn test_fragmented_request_parses_once() {
        let (_accept, server) = hello_server();
        let port = server.addr().port();

        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut write_half = stream;

        // Dribble the request out in small fragments.
        for chunk in [
            &b"GET /he"[..],
            &b"llo HT"[..],
            &b"TP/1.1\r\nHo"[..],
            &b"st: x\r\n"[..],
            &b"\r\n"[..],
        ] {
            write_half.write_all(chunk).unwrap();
            write_half.flush().unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }

        let (status, body) = read_response(&mut reader);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert_eq!(body, b"Hello World!");

        server.stop();
    }

    #[test]
    fn test_unmatched_route_is_404() {
        let (_accept, server) = hello_server();
        let port = server.addr().port();

        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut write_half = stream;

        write_half
            .write_all(b"GET /nowhere HTTP/1.1\r\nHost: t\r\n\r\n")
            .unwrap();
        let (status, _) = read_response(&mut reader);
        assert_eq!(status, "HTTP/1.1 404 Not Found");

        server.stop();
    }

    #[test]
    fn test_malformed_request_is_400_and_shutdown() {
        let (_accept, server) = hello_server();
        let port = server.addr().port();

        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream.write_all(b"NONSENSE\r\n\r\n").unwrap();

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).unwrap(); // server half-closes after 400
        let text = String::from_utf8_lossy(&raw);
        assert!(text.starts_with("HTTP/1.1 400 Bad Request"));

        server.stop();
    }

    #[test]
    fn test_query_string_reaches_handler() {
        let (_accept, server) = hello_server();
        let port = server.addr().port();

        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut write_half = stream;

        write_half
            .write_all(b"GET /echo-query?a=1&b=2 HTTP/1.1\r\nHost: t\r\n\r\n")
            .unwrap();
        let (status, body) = read_response(&mut reader);
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert_eq!(body, b"?a=1&b=2");

        server.stop();
    }
}
