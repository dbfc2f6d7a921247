//! Command-line interface

use clap::{Args, Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;

/// bili2text client - follow transcription tasks and talk to the task server
///
/// Watches task progress and system telemetry over WebSocket channels and
/// sends API requests with automatic retry.
#[derive(Parser, Debug)]
#[command(name = "bili2text-client", author, version, propagate_version = true)]
pub struct Cli {
    /// More log output: -v debug, -vv trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that talks to the server
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// Configuration file to load instead of searching for one
    #[arg(short, long, env = "BILI2TEXT_CONFIG")]
    pub config: Option<String>,

    /// Server base URL, overrides the configuration (e.g. http://localhost:5000)
    #[arg(long)]
    pub server: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Follow the progress channel of a task
    Watch {
        /// Task id
        task_id: String,

        /// Exit once the task completes, fails or is cancelled
        #[arg(long)]
        until_done: bool,

        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Follow system telemetry
    Monitor {
        /// Exit after this many updates
        #[arg(short = 'n', long)]
        count: Option<u32>,

        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Send an API request and print the JSON response
    Request {
        /// HTTP method (GET, POST, PUT, DELETE, ...)
        #[arg(value_parser = parse_method)]
        method: Method,

        /// Endpoint below the API base, e.g. /tasks/
        endpoint: String,

        /// JSON request body
        #[arg(short, long, value_parser = parse_json)]
        data: Option<Value>,

        /// Query parameter as key=value (repeatable)
        #[arg(long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,

        /// Per-attempt timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Print build information
    Version {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Create, print or check the configuration file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Print the effective configuration as TOML
    Show {
        /// File to load instead of searching for one
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Write a commented default configuration file
    Init {
        /// Destination, ~/.bili2text/client.toml by default
        #[arg(short, long)]
        path: Option<String>,

        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Load a configuration file and report problems
    Validate {
        /// File to check instead of searching for one
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn parse_method(s: &str) -> Result<Method, String> {
    Method::from_bytes(s.to_uppercase().as_bytes())
        .map_err(|_| format!("invalid HTTP method: '{}'", s))
}

fn parse_json(s: &str) -> Result<Value, String> {
    serde_json::from_str(s).map_err(|e| format!("invalid JSON body: {}", e))
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid key=value pair: '{}'", s)),
    }
}
