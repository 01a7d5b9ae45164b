//! PeerCall Console Client
//!
//! Headless front-end for one-to-one chat and video calls.
//! Reads commands from stdin and prints call state as it changes.

mod config;
mod console;

use clap::Parser;
use console::ConsoleInput;
use peercall_core::{PeerCallClient, SyntheticCaptureDevice, UserCommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "PeerCall console client", long_about = None)]
struct Args {
    /// Config file (defaults to <config dir>/peercall/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Signaling relay as host:port
    #[arg(short, long)]
    server: Option<String>,

    /// Use wss:// for the relay connection
    #[arg(long)]
    tls: bool,

    /// Register this personal code once connected
    #[arg(long)]
    code: Option<String>,

    /// Write the effective config back to the config file
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "peercall=info,peercall_core=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting PeerCall v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config::AppConfig::config_dir().join("config.json"));
    tracing::info!("Config file: {:?}", config_path);

    let mut app_config = config::AppConfig::load(&config_path)?;
    if let Some(server) = &args.server {
        app_config.set_server(server)?;
    }
    if args.tls {
        app_config.client.server.use_tls = true;
    }
    if args.save_config {
        app_config.save(&config_path)?;
    }

    let capture = Arc::new(SyntheticCaptureDevice::new());
    let client = PeerCallClient::start(app_config.client.clone(), capture).await?;

    if let Some(code) = args.code {
        client.send(UserCommand::RegisterCode(code))?;
    }

    // Print view changes
    let mut view_rx = client.subscribe();
    let show_timestamps = app_config.console.show_timestamps;
    let printer = tokio::spawn(async move {
        let mut prev = view_rx.borrow().clone();
        while view_rx.changed().await.is_ok() {
            let next = view_rx.borrow().clone();
            for line in console::describe_changes(&prev, &next, show_timestamps) {
                println!("{}", line);
            }
            prev = next;
        }
    });

    println!("{}", console::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                match console::parse_line(&line) {
                    Ok(ConsoleInput::Command(UserCommand::Quit)) => break,
                    Ok(ConsoleInput::Command(command)) => client.send(command)?,
                    Ok(ConsoleInput::Help) => println!("{}", console::HELP),
                    Ok(ConsoleInput::Empty) => {}
                    Err(e) => println!("! {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.shutdown().await?;
    printer.abort();
    tracing::info!("Bye");
    Ok(())
}
