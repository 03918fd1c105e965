//! Plain configuration records consumed by the corresponding component.
//!
//! No CLI parsing, no environment variables, no on-disk state: these are
//! constructed in-process by the embedding application (§6).

use std::net::SocketAddr;
use std::path::PathBuf;

/// `{threadNum: int >= 0}` — 0 means run everything on the main loop.
#[derive(Debug, Clone, Copy)]
pub struct EventLoopThreadPoolConfig {
    pub thread_num: usize,
}

impl Default for EventLoopThreadPoolConfig {
    fn default() -> Self {
        EventLoopThreadPoolConfig { thread_num: 0 }
    }
}

/// Server-side TLS material: a certificate and private key, both PEM.
#[derive(Debug, Clone)]
pub struct ServerTlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Client-side TLS options, including optional mTLS material.
#[derive(Debug, Clone, Default)]
pub struct ClientTlsConfig {
    pub enabled: bool,
    pub ca_file: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub sni: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TcpServerConfig {
    pub listen_addr: SocketAddr,
    pub name: String,
    pub reuse_port: bool,
    pub thread_num: usize,
    pub tls: Option<ServerTlsConfig>,
}

#[derive(Debug, Clone)]
pub struct TcpClientConfig {
    pub server_addr: SocketAddr,
    pub name: String,
    pub retry: bool,
    pub tls: Option<ClientTlsConfig>,
}

/// `{highWaterMark: bytes = 64 MiB}`.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnectionConfig {
    pub high_water_mark: usize,
}

impl Default for TcpConnectionConfig {
    fn default() -> Self {
        TcpConnectionConfig {
            high_water_mark: 64 * 1024 * 1024,
        }
    }
}

/// `{initialRetryMs = 500, maxRetryMs = 30000}`.
#[derive(Debug, Clone, Copy)]
pub struct ConnectorConfig {
    pub initial_retry_ms: u64,
    pub max_retry_ms: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        ConnectorConfig {
            initial_retry_ms: 500,
            max_retry_ms: 30_000,
        }
    }
}
