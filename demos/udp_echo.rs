//! Combines zmuduo's `example/udp_server_test` and `example/udp_client_test`
//! into one process: a `UdpServer` that echoes `"You said: ..."` back to
//! whoever sent a datagram, and a `UdpClient` on the same loop that sends
//! the current time to it every 2.5 seconds.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reactor_net::net::address::Address;
use reactor_net::net::udp::{UdpClient, UdpServer};
use reactor_net::EventLoop;

fn main() -> reactor_net::error::Result<()> {
    env_logger::init();

    let event_loop = EventLoop::new()?;

    let server = UdpServer::new(
        event_loop.clone(),
        &Address::parse("127.0.0.1:8000")?,
        "UdpServerTest".to_string(),
    )?;
    server.set_message_callback(Arc::new({
        let server = Arc::downgrade(&server);
        move |buf, n, peer| {
            let message = String::from_utf8_lossy(&buf[..n]).into_owned();
            log::info!("receive message: {message} from {peer}");
            if let Some(server) = server.upgrade() {
                server.send(format!("You said: {message}"), peer);
            }
        }
    }));
    server.start();

    let client = UdpClient::new(event_loop.clone(), Address::parse("127.0.0.1:8000")?, "UdpClient".to_string())?;
    client.set_message_callback(Arc::new(|buf, n, _peer| {
        log::info!("{}", String::from_utf8_lossy(&buf[..n]));
    }));
    client.start();

    event_loop.run_every(
        Duration::from_millis(2500),
        Box::new({
            let client = client.clone();
            move || {
                let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
                client.send(now.to_string());
            }
        }),
    );

    event_loop.run()?;
    Ok(())
}
