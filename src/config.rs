use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig as RustlsServerConfig;

use crate::proxy::Proxy;
use crate::registry::ConnectionRegistry;

/// Frame/message size limits and other protocol-level knobs, independent of
/// whether the engine is running as a server or a client.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub max_frame_size: Option<usize>,
    pub max_message_size: Option<usize>,
    /// Capacity (in frames) of a connection's outbound queue before
    /// `send` starts applying backpressure.
    pub outbound_queue_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            outbound_queue_capacity: 256,
        }
    }
}

/// Hook consulted on the reactor task for every accepted socket before the
/// handshake runs. Runs on the accept path itself and may stall further
/// accepts under a slow hook — documented behavior, not a bug.
pub type OnConnect = Arc<dyn Fn(&SocketAddr) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct ServerConfig {
    pub web_socket_config: WebSocketConfig,
    pub tls_config: Option<Arc<RustlsServerConfig>>,
    /// Number of concurrent decode tasks the worker pool admits.
    /// Defaults to the number of logical CPUs.
    pub worker_count: usize,
    /// Worker tasks are spawned as detached (daemon-equivalent) when true.
    /// May only be changed before `Server::start()`.
    pub detach_workers: bool,
    pub tcp_nodelay: bool,
    pub so_reuseaddr: bool,
    /// 0 disables the heartbeat entirely.
    pub heartbeat_period: Duration,
    pub close_timeout: Duration,
    pub on_connect: Option<OnConnect>,
    pub registry: Option<Arc<dyn ConnectionRegistry>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("web_socket_config", &self.web_socket_config)
            .field("worker_count", &self.worker_count)
            .field("detach_workers", &self.detach_workers)
            .field("tcp_nodelay", &self.tcp_nodelay)
            .field("so_reuseaddr", &self.so_reuseaddr)
            .field("heartbeat_period", &self.heartbeat_period)
            .field("close_timeout", &self.close_timeout)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            web_socket_config: WebSocketConfig::default(),
            tls_config: None,
            worker_count,
            detach_workers: false,
            tcp_nodelay: true,
            so_reuseaddr: true,
            heartbeat_period: Duration::from_secs(60),
            close_timeout: Duration::from_millis(500),
            on_connect: None,
            registry: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
    pub ca_file: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub proxy: Option<Proxy>,
    pub custom_headers: Vec<(String, String)>,
    pub heartbeat_period: Duration,
    /// How long to wait for the peer to echo a locally-initiated CLOSE
    /// before the reader task force-closes with 1006.
    pub close_timeout: Duration,
    pub tcp_nodelay: bool,
    pub so_reuseaddr: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            web_socket_config: WebSocketConfig::default(),
            ca_file: None,
            connect_timeout: Some(Duration::from_secs(10)),
            proxy: None,
            custom_headers: Vec::new(),
            heartbeat_period: Duration::from_secs(60),
            close_timeout: Duration::from_millis(500),
            tcp_nodelay: true,
            so_reuseaddr: true,
        }
    }
}
