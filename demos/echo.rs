//! RFC 862 echo server, ported from zmuduo's `example/echo`.

use std::sync::Arc;

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
            name: "EchoServer".to_string(),
            reuse_port: false,
            thread_num: 0,
            tls: None,
        },
        TcpConnectionConfig::default(),
    )?;

    server.set_connection_callback(Arc::new(|conn| {
        log::info!(
            "EchoServer - {} -> {} is {}",
            conn.peer_addr(),
            conn.local_addr(),
            if conn.connected() { "UP" } else { "DOWN" }
        );
    }));
    server.set_message_callback(Arc::new(|conn, buf, time| {
        let msg = buf.retrieve_all_as_vec();
        log::info!("{} echo {} bytes, data received at {:?}", conn.name(), msg.len(), time);
        let mut reply = b"You said:".to_vec();
        reply.extend_from_slice(&msg);
        reply.push(b'\n');
        conn.send(reply);
    }));

    server.start()?;
    log::info!("pid = {}, address is {}", std::process::id(), server.local_addr()?);
    event_loop.run()?;
    Ok(())
}
