//! # evio-echo
//!
//! TCP echo server on the evio engine. Every received buffer is written
//! straight back on the same connection.
//!
//! ## Usage
//!
//!     cargo run -p evio-echo --release -- [--port 8888] [--io-loops 2]
//!
//! Environment overrides: `EVIO_PORT`, `EVIO_IO_LOOPS`.

use evio_core::{env_get, evinfo};
use evio_net::{EventLoopThread, InetAddr, ServerConfig, TcpServer};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

static RUNNING: AtomicBool = AtomicBool::new(true);
static TOTAL_BYTES: AtomicU64 = AtomicU64::new(0);
static TOTAL_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

fn main() {
    // Env first, CLI flags override.
    let mut port: u16 = env_get("EVIO_PORT", 8888);
    let mut io_loops: usize = env_get("EVIO_IO_LOOPS", 2);

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

    let config = ServerConfig::default().num_io_loops(io_loops);
    let server = TcpServer::new(accept_thread.handle(), InetAddr::new(port), config);

    server.on_connection(|conn| {
        if conn.is_connected() {
            TOTAL_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        }
    });
    server.on_receive_message(|conn, buf| {
        TOTAL_BYTES.fetch_add(buf.readable_size() as u64, Ordering::Relaxed);
        let data = buf.read(buf.readable_size()).to_vec();
        conn.send(&data);
    });

    server.start().expect("failed to start echo server");
    evinfo!("evio-echo: listening on {} ({} io loops)", server.addr(), io_loops);

    while RUNNING.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    server.stop();
    evinfo!(
        "evio-echo: shutdown - {} connections, {} bytes echoed",
        TOTAL_CONNECTIONS.load(Ordering::Relaxed),
        TOTAL_BYTES.load(Ordering::Relaxed)
    );
}

extern "C" fn handle_sigint(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}
