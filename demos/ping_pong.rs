//! Throughput ping-pong server, ported from zmuduo's `example/pingpong/server.cc`.
//!
//! Usage: `ping_pong <address> <port> <threads>`

use std::sync::Arc;

use reactor_net::config::{TcpConnectionConfig, TcpServerConfig};
use reactor_net::net::TcpServer;
use reactor_net::EventLoop;

fn main() -> reactor_net::error::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} <address> <port> <threads>", args[0]);
        std::process::exit(1);
    }
    let ip = &args[1];
    let port: u16 = args[2].parse().expect("invalid port");
    let thread_count: usize = args[3].parse().expect("invalid thread count");

    log::info!("pid = {}", std::process::id());

    let event_loop = EventLoop::new()?;
    let server = TcpServer::new(
        event_loop.clone(),
        TcpServerConfig {
            listen_addr: format!("{ip}:{port}").parse().unwrap(),
            name: "PingPong".to_string(),
            reuse_port: false,
            thread_num: thread_count,
            tls: None,
        },
        TcpConnectionConfig::default(),
    )?;

    server.set_connection_callback(Arc::new(|conn| {
        if conn.connected() {
            let _ = conn.set_tcp_no_delay(true);
        }
    }));
    server.set_message_callback(Arc::new(|conn, buf, _time| {
        let bytes = buf.retrieve_all_as_vec();
        conn.send(bytes);
    }));

    server.start()?;
    event_loop.run()?;
    Ok(())
}
