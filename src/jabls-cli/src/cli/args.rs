//! Command-line argument definitions.

use clap::{Args, Parser, Subcommand};
use jabls_launcher::LauncherConfig;
use std::path::PathBuf;

/// Environment variable selecting the log level.
pub const LOG_LEVEL_ENV: &str = "JABLS_LOG_LEVEL";

/// Log level for CLI output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Only show errors
    Error,
    /// Show warnings and errors
    Warn,
    /// Show informational messages, warnings, and errors (default)
    #[default]
    Info,
    /// Show debug messages and above
    Debug,
    /// Show all messages including trace-level details
    Trace,
}

impl LogLevel {
    /// Convert to tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<LogLevel> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// Tracing filter for `level`, refined by `RUST_LOG` directives when set.
pub fn log_filter(level: LogLevel, rust_log: Option<&str>) -> String {
    match rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directives) => format!("{},{}", level.as_filter_str(), directives),
        None => level.as_filter_str().to_string(),
    }
}

/// jabls - JabRef language server launcher
///
/// Without a subcommand, connects to the server and bridges stdin/stdout to
/// its socket, downloading and starting the server first if needed.
#[derive(Debug, Parser)]
#[command(name = "jabls")]
#[command(author, version)]
#[command(about = "Provision, start and connect to the JabLS language server", long_about = None)]
pub struct Cli {
    /// Config file (default: <config dir>/jabls/launcher.json)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Server host (overrides config and JABLS_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Server port (overrides config and JABLS_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Log level
    #[arg(long = "log-level", global = true, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Enable verbose output (same as --log-level debug)
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,

    /// Enable trace output (same as --log-level trace)
    #[arg(long, global = true)]
    pub trace: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Effective log level: `--trace`, then `--verbose`, then
    /// `JABLS_LOG_LEVEL`, then `--log-level`.
    pub fn effective_log_level(&self, env_level: Option<&str>) -> LogLevel {
        if self.trace {
            LogLevel::Trace
        } else if self.verbose {
            LogLevel::Debug
        } else if let Some(level) = env_level.and_then(LogLevel::from_str_loose) {
            level
        } else {
            self.log_level
        }
    }

    /// Apply `--host` and `--port` on top of a loaded config.
    pub fn apply_overrides(&self, config: &mut LauncherConfig) {
        if let Some(host) = &self.host {
            config.client.host = host.clone();
        }
        if let Some(port) = self.port {
            config.client.port = port;
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Connect to the server and bridge stdin/stdout to its socket (default)
    Connect(ConnectArgs),

    /// Download or update the server without starting it
    Provision,

    /// Show the detected platform and its server archive
    Platform,

    /// Check whether a server is listening
    Status,
}

#[derive(Debug, Default, Args)]
pub struct ConnectArgs {
    /// Leave a server started by this command running on exit
    #[arg(long)]
    pub keep_server: bool,
}
