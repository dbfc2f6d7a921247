//! bili2text client
//!
//! Command-line front end for the bili2text task server: follows task and
//! system channels and sends API requests.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use bili2text_client::config::{self, ClientConfig};
use bili2text_client::error::{Error, ErrorKind, NormalizedError, Result};
use bili2text_client::logging;
use bili2text_client::protocol::{SystemUpdate, TaskStatus, TaskUpdate};
use bili2text_client::report::{ErrorReporter, ReportOptions, TracingReporter};
use bili2text_client::request::{ApiClient, RequestOptions};
use bili2text_client::version;
use bili2text_client::watch::{SystemMonitor, TaskWatcher};
use bili2text_client::ChannelRegistry;

use crate::cli::{Cli, Commands, ConfigSubcommand, ConnectArgs};

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    let connect = match &cli.command {
        Commands::Version { json } => {
            version::print_version(*json);
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand);
        }
        Commands::Watch { connect, .. }
        | Commands::Monitor { connect, .. }
        | Commands::Request { connect, .. } => connect,
    };

    let config = load_config(connect)?;
    // Dropping the guards flushes the file writer
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    info!(
        version = %version::build_info().full_version(),
        server = %config.server.base_url,
        "Starting bili2text client"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("cannot start the async runtime: {}", e)))?;

    runtime.block_on(async {
        match &cli.command {
            Commands::Watch { task_id, until_done, .. } => {
                run_watch(&config, task_id, *until_done).await
            }
            Commands::Monitor { count, .. } => run_monitor(&config, *count).await,
            Commands::Request {
                method,
                endpoint,
                data,
                query,
                timeout_ms,
                ..
            } => run_request(&config, method.clone(), endpoint, data.clone(), query, *timeout_ms).await,
            Commands::Version { .. } | Commands::Config { .. } => Ok(()),
        }
    })
}

/// `--server` wins over the environment and the file
fn load_config(connect: &ConnectArgs) -> Result<ClientConfig> {
    let mut config = ClientConfig::load(connect.config.as_deref())?;
    if let Some(server) = &connect.server {
        config.server.base_url = server.clone();
        config.validate()?;
    }
    Ok(config)
}

/// Logs like the default reporter and forwards terminal failures so the
/// command can exit
struct CliReporter {
    terminal: mpsc::UnboundedSender<NormalizedError>,
}

impl ErrorReporter for CliReporter {
    fn handle_error(&self, error: &NormalizedError, context: &str, options: &ReportOptions) {
        TracingReporter.handle_error(error, context, options);
        if !error.retryable {
            let _ = self.terminal.send(error.clone());
        }
    }
}

/// A normal close from the server ends the command without an error
fn channel_outcome(err: NormalizedError) -> Result<()> {
    if err.kind == ErrorKind::ChannelClosed {
        info!("{}", err.message);
        Ok(())
    } else {
        Err(Error::Channel(err))
    }
}

/// Print one JSON line on stdout
fn print_json_line<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!(error = %e, "Failed to encode update"),
    }
}

async fn run_watch(config: &ClientConfig, task_id: &str, until_done: bool) -> Result<()> {
    let registry = ChannelRegistry::new(config.channel_config());
    let (terminal_tx, mut terminal_rx) = mpsc::unbounded_channel();
    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<TaskStatus>();

    let watcher = TaskWatcher::new(registry, config.endpoints()?)
        .with_reporter(Arc::new(CliReporter { terminal: terminal_tx }));

    watcher.on_status_update(Arc::new(move |update: &TaskUpdate| {
        print_json_line(update);
        let _ = status_tx.send(update.status);
    }));
    watcher.watch(task_id).map_err(Error::Channel)?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted");
                break Ok(());
            }
            Some(status) = status_rx.recv() => {
                if until_done && status.is_terminal() {
                    info!(task_id, status = ?status, "Task finished");
                    break Ok(());
                }
            }
            Some(err) = terminal_rx.recv() => {
                break channel_outcome(err);
            }
        }
    };

    watcher.unwatch();
    outcome
}

async fn run_monitor(config: &ClientConfig, count: Option<u32>) -> Result<()> {
    let registry = ChannelRegistry::new(config.channel_config());
    let (terminal_tx, mut terminal_rx) = mpsc::unbounded_channel();
    let (update_tx, mut update_rx) = mpsc::unbounded_channel::<()>();

    let monitor = SystemMonitor::new(registry, config.endpoints()?)
        .with_reporter(Arc::new(CliReporter { terminal: terminal_tx }));

    monitor.on_status_update(Arc::new(move |update: &SystemUpdate| {
        print_json_line(update);
        let _ = update_tx.send(());
    }));
    monitor.start_monitoring().map_err(Error::Channel)?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut received = 0u32;

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted");
                break Ok(());
            }
            Some(()) = update_rx.recv() => {
                received += 1;
                if count.map(|limit| received >= limit).unwrap_or(false) {
                    break Ok(());
                }
            }
            Some(err) = terminal_rx.recv() => {
                break channel_outcome(err);
            }
        }
    };

    monitor.stop_monitoring();
    outcome
}

async fn run_request(
    config: &ClientConfig,
    method: Method,
    endpoint: &str,
    data: Option<Value>,
    query: &[(String, String)],
    timeout_ms: Option<u64>,
) -> Result<()> {
    let client = ApiClient::new(config.endpoints()?, config.request_config())?;

    let mut options = RequestOptions::new(method);
    if let Some(body) = data {
        options = options.json(body);
    }
    for (key, value) in query {
        options = options.query(key.as_str(), value.as_str());
    }
    if let Some(ms) = timeout_ms {
        options = options.timeout(Duration::from_millis(ms));
    }

    let response: Value = client.request(endpoint, options).await.map_err(Error::Request)?;
    let pretty = serde_json::to_string_pretty(&response)
        .map_err(|e| Error::Internal(format!("Failed to encode response: {}", e)))?;
    println!("{}", pretty);
    Ok(())
}

fn handle_config_command(subcommand: &ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let loaded = ClientConfig::load(config.as_deref())?;
            print!("{}", toml::to_string_pretty(&loaded)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), *force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            ClientConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }
    Ok(())
}
