#![warn(clippy::all, clippy::pedantic)]

use anyhow::Result;
use clap::Parser;
use revenant::Config;
use revenant::cli::commands::Cli;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // reqwest is built on rustls; pin the ring provider so TLS setup never
    // has to guess between compiled-in backends.
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = Config::load_or_init()?;
    revenant::app::dispatch::dispatch(cli, config).await
}
