use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;

/// Default port for the daemon.
pub const DEFAULT_PORT: u16 = 63482;

/// Default dispatch concurrency.
pub const DEFAULT_DISPATCH_WORKERS: usize = 10;

/// Log filter used when neither `RUST_LOG` nor `--log` narrows it.
pub const DEFAULT_LOG_FILTER: &str = "warn,wsjobd_server=info,wsjobd_core=info";

/// Command-line and environment configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "wsjobd", version, about = "WebSocket job daemon")]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, env = "WSJOBD_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    #[arg(long, env = "WSJOBD_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// How many requests are dispatched concurrently.
    #[arg(long, env = "WSJOBD_DISPATCH_WORKERS", default_value_t = DEFAULT_DISPATCH_WORKERS)]
    pub dispatch_workers: usize,

    /// tracing filter directive, overridden by `RUST_LOG`.
    #[arg(long, env = "WSJOBD_LOG", default_value = DEFAULT_LOG_FILTER)]
    pub log: String,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
