//! # evio-httpd
//!
//! HTTP/1.1 demo server: a few routed handlers over the evio engine, one
//! accept loop plus a round-robin I/O loop group.
//!
//! ## Usage
//!
//!     cargo run -p evio-httpd --release -- [--port 8080] [--io-loops 4]
//!
//! Environment overrides: `EVIO_PORT`, `EVIO_IO_LOOPS`.
//!
//! ## Benchmark
//!
//!     wrk -t4 -c100 -d10s http://127.0.0.1:8080/hello

use evio_core::{env_get, evinfo};
use evio_http::{HttpServer, StatusCode};
use evio_net::{EventLoopThread, InetAddr, ServerConfig};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

static RUNNING: AtomicBool = AtomicBool::new(true);
static TOTAL_REQUESTS: AtomicU64 = AtomicU64::new(0);

const INDEX_BODY: &str = "<html>\n<head>\n<title>evio</title>\n</head>\n<body>\n<h1>Hello</h1>\n</body>\n</html>";

fn main() {
    let mut port: u16 = env_get("EVIO_PORT", 8080);
    let mut io_loops: usize = env_get("EVIO_IO_LOOPS", 4);

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if let Some(p) = args.get(i).and_then(|s| s.parse().ok()) {
                    port = p;
                }
            }
            "--io-loops" => {
                i += 1;
                if let Some(n) = args.get(i).and_then(|s| s.parse().ok()) {
                    io_loops = n;
                }
            }
            s if s.parse::<u16>().is_ok() => {
                port = s.parse().unwrap();
            }
            _ => {}
        }
        i += 1;
    }

    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as usize);
        libc::signal(libc::SIGTERM, handle_sigint as usize);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let accept_thread = EventLoopThread::new("evio-accept", 100);
    accept_thread.run();

    let config = ServerConfig::default().num_io_loops(io_loops).tcp_nodelay(true);
    let server = HttpServer::new(accept_thread.handle(), InetAddr::new(port), config);

    server
        .get("/", |_req, resp| {
            TOTAL_REQUESTS.fetch_add(1, Ordering::Relaxed);
            resp.set_status(StatusCode::Ok);
            resp.set_content_type("text/html");
            resp.set_body(INDEX_BODY);
        })
        .get("/hello", |_req, resp| {
            TOTAL_REQUESTS.fetch_add(1, Ordering::Relaxed);
            resp.set_status(StatusCode::Ok);
            resp.set_content_type("text/plain");
            resp.set_body("Hello World!\n");
        })
        .get("/query", |req, resp| {
            TOTAL_REQUESTS.fetch_add(1, Ordering::Relaxed);
            resp.set_status(StatusCode::Ok);
            resp.set_content_type("text/plain");
            resp.set_body(format!("path={} query={}\n", req.path(), req.query()));
        });

    server.start().expect("failed to start http server");
    evinfo!(
        "evio-httpd: listening on http://{}/ ({} io loops)",
        server.addr(),
        io_loops
    );

    while RUNNING.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    server.stop();
    evinfo!(
        "evio-httpd: shutdown - {} requests served",
        TOTAL_REQUESTS.load(Ordering::Relaxed)
    );
}

extern "C" fn handle_sigint(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}
