use clap::Parser;
use client::app::ClientApp;
use client::config::{Args, ClientConfig};
use log::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = ClientConfig::from_args(Args::parse())?;

    info!("Starting client...");
    info!("Connecting to: {} as {}", config.server_url, config.username);
    if config.reconnect {
        info!("Reconnecting with backoff on disconnect");
    }

    // Network I/O and image decoding run here; the window owns the main thread.
    let runtime = tokio::runtime::Runtime::new()?;
    let handle = runtime.handle().clone();

    let window_conf = config.window_conf();
    macroquad::Window::from_config(window_conf, async move {
        ClientApp::new(&config, handle).run().await;
    });

    Ok(())
}
