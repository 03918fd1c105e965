//! RFC 867 daytime server, ported from zmuduo's `example/daytime`: sends
//! the current time and immediately shuts down the write side.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use reactor_net::config::{TcpConnectionConfig, TcpServerConfig};
use reactor_net::net::TcpServer;
use reactor_net::EventLoop;

fn main() -> reactor_net::error::Result<()> {
    env_logger::init();

    let event_loop = EventLoop::new()?;
    let server = TcpServer::new(
        event_loop.clone(),
        TcpServerConfig {
            listen_addr: "127.0.0.1:8000".parse().unwrap(),
            name: "DaytimeServer".to_string(),
            reuse_port: false,
            thread_num: 0,
            tls: None,
        },
        TcpConnectionConfig::default(),
    )?;

    server.set_connection_callback(Arc::new(|conn| {
        log::info!(
            "DaytimeServer - {} -> {} is {}",
            conn.peer_addr(),
            conn.local_addr(),
            if conn.connected() { "UP" } else { "DOWN" }
        );
        if conn.connected() {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
            conn.send(format!("{now}\n"));
            conn.shutdown();
        }
    }));
    server.set_message_callback(Arc::new(|conn, buf, time| {
        let discarded = buf.retrieve_all_as_vec();
        log::info!("{} discards {} bytes received at {:?}", conn.name(), discarded.len(), time);
    }));

    server.start()?;
    log::info!("pid = {}, DaytimeServer[{}]", std::process::id(), server.local_addr()?);
    event_loop.run()?;
    Ok(())
}
