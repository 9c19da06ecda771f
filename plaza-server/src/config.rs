//! Server configuration.

use std::time::Duration;

use clap::Parser;

use crate::lifecycle::Limits;

#[derive(Parser, Debug, Clone)]
#[command(name = "plaza-server", about = "Real-time chat relay over WebSocket")]
pub struct ServerConfig {
    /// Address to listen on for HTTP and WebSocket connections.
    #[arg(long, env = "PLAZA_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: String,

    /// Port override (takes precedence over the port in --listen-addr).
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Directory of static client files served at `/`.
    #[arg(long, env = "PLAZA_STATIC_DIR", default_value = "public")]
    pub static_dir: String,

    /// Seconds between sweeps for connections that died silently.
    #[arg(long, env = "PLAZA_RECONCILE_SECS", default_value_t = 60)]
    pub reconcile_interval_secs: u64,

    /// Seconds between WebSocket pings sent to each client.
    #[arg(long, env = "PLAZA_PING_INTERVAL_SECS", default_value_t = 25)]
    pub ping_interval_secs: u64,

    /// Extra seconds of silence, after a missed ping, before a client is dropped.
    #[arg(long, env = "PLAZA_PING_TIMEOUT_SECS", default_value_t = 20)]
    pub ping_timeout_secs: u64,

    /// Longest accepted display name, in characters.
    #[arg(long, default_value_t = 32)]
    pub max_name_len: usize,

    /// Longest accepted message body, in characters.
    #[arg(long, default_value_t = 2000)]
    pub max_message_len: usize,

    /// Largest inbound WebSocket message, in bytes. A larger one closes the connection.
    #[arg(long, default_value_t = 16 * 1024)]
    pub max_frame_len: usize,

    /// Outbound events buffered per connection before new ones are dropped.
    #[arg(long, default_value_t = 256)]
    pub send_queue: usize,

    /// Allowed CORS origin (repeatable). With none given, any origin is allowed.
    #[arg(long = "cors-origin", env = "PLAZA_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            port: None,
            static_dir: "public".to_string(),
            reconcile_interval_secs: 60,
            ping_interval_secs: 25,
            ping_timeout_secs: 20,
            max_name_len: 32,
            max_message_len: 2000,
            max_frame_len: 16 * 1024,
            send_queue: 256,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// The address to bind, with `port` applied if set.
    pub fn bind_addr(&self) -> String {
        match self.port {
            Some(port) => {
                let host = self
                    .listen_addr
                    .rsplit_once(':')
                    .map_or(self.listen_addr.as_str(), |(host, _)| host);
                format!("{host}:{port}")
            }
            None => self.listen_addr.clone(),
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// How long a client may stay silent, pongs included, before its
    /// connection is treated as dead.
    pub fn silence_limit(&self) -> Duration {
        self.ping_interval() + Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_name_len: self.max_name_len,
            max_message_len: self.max_message_len,
        }
    }
}
