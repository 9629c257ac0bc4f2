//! Command dispatch and execution handlers.

use anyhow::{Context, Result};
use jabls_launcher::connection::probe;
use jabls_launcher::{LauncherConfig, LauncherSession, ProvisionOutcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::args::{Cli, Commands, ConnectArgs};

/// Exit status for an interrupted command.
const EXIT_INTERRUPTED: i32 = 130;

/// Dispatch a CLI command to its handler, returning the process exit code.
pub async fn dispatch_command(cli: Cli) -> Result<i32> {
    let config = load_config(&cli)?;

    match cli.command {
        None => run_connect(config, ConnectArgs::default()).await,
        Some(Commands::Connect(args)) => run_connect(config, args).await,
        Some(Commands::Provision) => run_provision(config).await,
        Some(Commands::Platform) => run_platform(config),
        Some(Commands::Status) => run_status(config).await,
    }
}

/// Load the config file, then apply environment and flag overrides.
fn load_config(cli: &Cli) -> Result<LauncherConfig> {
    let mut config = LauncherConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

fn open_session(config: LauncherConfig) -> Result<LauncherSession> {
    let catalog = config.catalog()?;
    Ok(LauncherSession::new(config, catalog)?)
}

/// Connect and copy bytes between stdio and the server socket until one
/// side closes or the user interrupts.
async fn run_connect(config: LauncherConfig, args: ConnectArgs) -> Result<i32> {
    let session = open_session(config)?;

    let stream = tokio::select! {
        result = session.ensure_server_connection() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted while connecting");
            shutdown(&session, &args).await;
            return Ok(EXIT_INTERRUPTED);
        }
    };

    let (mut reader, mut writer) = stream.into_split();
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();

    let to_server = async {
        let copied = tokio::io::copy(&mut stdin, &mut writer).await;
        let _ = writer.shutdown().await;
        copied
    };
    let from_server = async {
        let copied = tokio::io::copy(&mut reader, &mut stdout).await;
        let _ = stdout.flush().await;
        copied
    };

    let code = tokio::select! {
        copied = to_server => {
            debug!("stdin closed: {:?}", copied);
            0
        }
        copied = from_server => {
            debug!("Server closed the connection: {:?}", copied);
            0
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            EXIT_INTERRUPTED
        }
    };

    shutdown(&session, &args).await;
    Ok(code)
}

async fn shutdown(session: &LauncherSession, args: &ConnectArgs) {
    if args.keep_server {
        if let Some(pid) = session.server_pid().await {
            info!("Leaving server running (pid {})", pid);
        }
        return;
    }
    session.stop_server_process().await;
}

async fn run_provision(config: LauncherConfig) -> Result<i32> {
    let reported = Arc::new(AtomicU64::new(u64::MAX));
    let session = open_session(config)?.with_progress(Box::new({
        let reported = reported.clone();
        move |downloaded, total| report_progress(&reported, downloaded, total)
    }));

    let outcome = session.prepare_server_binaries().await;
    if reported.load(Ordering::Relaxed) != u64::MAX {
        eprintln!();
    }

    match outcome? {
        ProvisionOutcome::Downloaded { last_modified } => match last_modified {
            Some(marker) => println!("downloaded (last-modified {})", marker),
            None => println!("downloaded"),
        },
        ProvisionOutcome::UpToDate => println!("up to date"),
    }
    println!("{}", session.config().tree_root().display());
    Ok(0)
}

/// Print download progress on stderr, once per percent (or MiB when the
/// size is unknown).
fn report_progress(reported: &AtomicU64, downloaded: u64, total: u64) {
    let step = if total > 0 {
        downloaded.saturating_mul(100) / total
    } else {
        downloaded >> 20
    };
    if reported.swap(step, Ordering::Relaxed) == step {
        return;
    }

    if total > 0 {
        eprint!("\rDownloading... {:>3}% ({}/{} bytes)", step, downloaded, total);
    } else {
        eprint!("\rDownloading... {} bytes", downloaded);
    }
}

fn run_platform(config: LauncherConfig) -> Result<i32> {
    let session = open_session(config)?;
    let descriptor = serde_json::to_string_pretty(session.descriptor())
        .context("Failed to format archive descriptor")?;

    println!("{}", session.platform());
    println!("{}", descriptor);
    Ok(0)
}

async fn run_status(config: LauncherConfig) -> Result<i32> {
    let client = &config.client;
    let reachable = probe(&client.host, client.port, config.probe_timeout()).await;

    if reachable {
        println!("reachable ({}:{})", client.host, client.port);
        Ok(0)
    } else {
        println!("unreachable ({}:{})", client.host, client.port);
        Ok(1)
    }
}
