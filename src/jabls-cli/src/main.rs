//! jabls - main entry point.
//!
//! Locates, downloads and starts the JabLS language server, then hands its
//! socket to an editor over stdin/stdout. Logs go to stderr so stdout stays
//! a clean protocol channel.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use jabls_cli::cli::args::{LOG_LEVEL_ENV, log_filter};
use jabls_cli::cli::{Cli, dispatch_command};

fn init_logging(cli: &Cli) {
    let env_level = std::env::var(LOG_LEVEL_ENV).ok();
    let log_level = cli.effective_log_level(env_level.as_deref());

    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = EnvFilter::new(log_filter(log_level, rust_log.as_deref()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let code = match dispatch_command(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };

    // Exit directly: a pending blocking stdin read would otherwise hold up
    // runtime shutdown
    std::process::exit(code);
}
