//! Server configuration
//!
//! Every setting can come from a command line flag or an environment
//! variable; flags win.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::RangedU64ValueParser;
use clap::Parser;

use crate::handler::{HandlerSettings, DEFAULT_OUTBOUND_CAPACITY, DEFAULT_WS_PATH};
use crate::keepalive;

/// Default WebSocket address
pub const DEFAULT_WS_ADDR: &str = "127.0.0.1:8080";

/// Default status API address
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8081";

/// Default topic file
pub const DEFAULT_TOPICS_PATH: &str = "topics.csv";

/// Anonymous 1:1 chat server
#[derive(Debug, Clone, Parser)]
#[command(name = "stranger_chat", version, about)]
pub struct Config {
    /// Address for WebSocket chat connections
    #[arg(long, env = "STRANGER_CHAT_WS_ADDR", default_value = DEFAULT_WS_ADDR)]
    pub ws_addr: String,

    /// Request path for the WebSocket upgrade
    #[arg(long, env = "STRANGER_CHAT_WS_PATH", default_value = DEFAULT_WS_PATH)]
    pub ws_path: String,

    /// Address for the health and online-users endpoints
    #[arg(long, env = "STRANGER_CHAT_HTTP_ADDR", default_value = DEFAULT_HTTP_ADDR)]
    pub http_addr: String,

    /// Conversation topics, one per line (first CSV field)
    #[arg(long, env = "STRANGER_CHAT_TOPICS", default_value = DEFAULT_TOPICS_PATH)]
    pub topics: PathBuf,

    /// Seconds between keepalive pings to waiting users
    #[arg(
        long,
        env = "STRANGER_CHAT_KEEPALIVE_SECS",
        default_value_t = keepalive::DEFAULT_INTERVAL.as_secs(),
        value_parser = RangedU64ValueParser::<u64>::new().range(1..)
    )]
    pub keepalive_secs: u64,

    /// Frames buffered per connection before writes count as failed
    #[arg(
        long,
        env = "STRANGER_CHAT_OUTBOUND_CAPACITY",
        default_value_t = DEFAULT_OUTBOUND_CAPACITY,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub outbound_capacity: usize,
}

impl Config {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn handler_settings(&self) -> HandlerSettings {
        HandlerSettings {
            ws_path: self.ws_path.clone(),
            outbound_capacity: self.outbound_capacity,
        }
    }
}
