//! tcpchat: terminal client for a tcpchat server.

mod chat;
mod config;
mod input;

use clap::Parser;
use std::path::PathBuf;
use tracing::error;

/// tcpchat: join a chat server from the terminal
#[derive(Parser)]
#[command(name = "tcpchat", version, about = "Terminal client for tcpchat")]
struct Cli {
    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Username to register (falls back to the config file)
    username: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("tcpchat=debug,tcpchat_client=debug,tcpchat_core=debug")
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("tcpchat=warn,tcpchat_client=warn")
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let result = async {
        let config_path = cli.config.clone().unwrap_or_else(config::Config::default_path);
        let cfg = config::Config::load(&config_path)?;
        let target = config::resolve(
            &cfg,
            cli.host.as_deref(),
            cli.port,
            cli.username.as_deref(),
        )?;
        chat::run(&target.addr, &target.username).await
    }
    .await;

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("tcpchat: {e:#}");
        std::process::exit(1);
    }
}
