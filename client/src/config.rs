//! Command line and environment configuration

use crate::network::{ExponentialBackoff, NoReconnect, ReconnectPolicy};
use clap::Parser;
use macroquad::window::Conf;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// WebSocket URL of the game server
    #[arg(short = 's', long, env = "PRESENCE_SERVER", default_value = "ws://127.0.0.1:8080")]
    pub server: String,

    /// Display name sent when joining
    #[arg(short = 'u', long, env = "PRESENCE_USERNAME", default_value = "player")]
    pub username: String,

    /// World backdrop image
    #[arg(short = 'b', long, default_value = "assets/world.png")]
    pub backdrop: PathBuf,

    /// Window width, including the side panel
    #[arg(short = 'w', long, default_value = "1020")]
    pub width: u32,

    /// Window height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "600")]
    pub height: u32,

    /// Reconnect with exponential backoff when the connection drops
    #[arg(short = 'r', long)]
    pub reconnect: bool,

    /// Give up after this many reconnect attempts
    #[arg(long, requires = "reconnect")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server URL must start with ws:// or wss://, got '{0}'")]
    InvalidServerUrl(String),

    #[error("username must not be empty")]
    EmptyUsername,

    #[error("window {width}x{height} is too small")]
    WindowTooSmall { width: u32, height: u32 },
}

const MIN_WINDOW_WIDTH: u32 = 320;
const MIN_WINDOW_HEIGHT: u32 = 200;

/// Validated client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub server_url: String,
    pub username: String,
    pub backdrop: PathBuf,
    pub width: u32,
    pub height: u32,
    pub reconnect: bool,
    pub max_retries: Option<u32>,
}

impl ClientConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let server_url = args.server.trim().to_string();
        if !(server_url.starts_with("ws://") || server_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidServerUrl(server_url));
        }

        let username = args.username.trim().to_string();
        if username.is_empty() {
            return Err(ConfigError::EmptyUsername);
        }

        if args.width < MIN_WINDOW_WIDTH || args.height < MIN_WINDOW_HEIGHT {
            return Err(ConfigError::WindowTooSmall {
                width: args.width,
                height: args.height,
            });
        }

        Ok(Self {
            server_url,
            username,
            backdrop: args.backdrop,
            width: args.width,
            height: args.height,
            reconnect: args.reconnect,
            max_retries: args.max_retries,
        })
    }

    pub fn reconnect_policy(&self) -> Box<dyn ReconnectPolicy> {
        if self.reconnect {
            Box::new(ExponentialBackoff::new(
                Duration::from_millis(500),
                Duration::from_secs(30),
                self.max_retries,
            ))
        } else {
            Box::new(NoReconnect)
        }
    }

    pub fn window_conf(&self) -> Conf {
        Conf {
            window_title: format!("Presence - {}", self.username),
            window_width: self.width as i32,
            window_height: self.height as i32,
            window_resizable: true,
            ..Default::default()
        }
    }
}
