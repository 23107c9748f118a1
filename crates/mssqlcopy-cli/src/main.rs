//! mssqlcopy CLI - copy tables between two SQL Server databases.

mod wizard;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mssqlcopy::{
    CopyConfig, CopyError, EndpointConfig, Monitor, MssqlStore, Scheduler, Store, TableRef,
    DEFAULT_PARALLELISM, DEFAULT_TIMEOUT_SECS, EVENT_CHANNEL_CAPACITY,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mssqlcopy")]
#[command(about = "Copy tables between two SQL Server databases")]
#[command(version)]
struct Cli {
    /// Source database host
    #[arg(long)]
    source_host: Option<String>,

    /// Source database name
    #[arg(long)]
    source_db: Option<String>,

    /// Target database host
    #[arg(long)]
    target_host: Option<String>,

    /// Target database name
    #[arg(long)]
    target_db: Option<String>,

    /// Username for both databases
    #[arg(short, long)]
    user: Option<String>,

    /// Password for both databases
    #[arg(short, long)]
    password: Option<String>,

    /// Database port for both sides
    #[arg(long, default_value = "1433")]
    port: u16,

    /// Encrypt connections: true or false
    #[arg(long, default_value = "true")]
    encrypt: String,

    /// Trust the server certificate
    #[arg(long)]
    trust_server_cert: bool,

    /// Schema holding the tables on both sides
    #[arg(long, default_value = "dbo")]
    schema: String,

    /// LIKE pattern selecting the tables to copy (wildcard: %)
    #[arg(short, long)]
    table_filter: Option<String>,

    /// Row filter applied to every table, e.g. "id > 100 AND region = 'EU'"
    #[arg(short, long, default_value = "")]
    query_filter: String,

    /// Number of tables copied concurrently
    #[arg(long, default_value_t = DEFAULT_PARALLELISM)]
    parallel: usize,

    /// Append-only progress output for CI logs
    #[arg(long)]
    ci: bool,

    /// Stop at the next chunk boundary once a table fails
    #[arg(long)]
    stop_on_error: bool,

    /// Whole-job timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), CopyError> {
    let cli = Cli::parse();

    // Prompt for anything the flags left out before logging starts, so the
    // terminal stays clean for the wizard.
    let answers = wizard::fill_missing(&cli).map_err(|e| CopyError::Config(e.to_string()))?;

    let config = CopyConfig {
        source: EndpointConfig {
            host: answers.source_host,
            port: cli.port,
            database: answers.source_db,
            user: answers.user.clone(),
            password: answers.password.clone(),
            encrypt: cli.encrypt.clone(),
            trust_server_cert: cli.trust_server_cert,
        },
        target: EndpointConfig {
            host: answers.target_host,
            port: cli.port,
            database: answers.target_db,
            user: answers.user,
            password: answers.password,
            encrypt: cli.encrypt.clone(),
            trust_server_cert: cli.trust_server_cert,
        },
        schema: cli.schema.clone(),
        table_filter: answers.table_filter,
        query_filter: cli.query_filter.clone(),
        parallel: cli.parallel,
        ci: cli.ci,
        continue_on_error: !cli.stop_on_error,
        timeout_secs: cli.timeout,
    };
    config.validate()?;
    let filter = config.filter()?;

    setup_logging(&cli.verbosity);

    let cancel = setup_signal_handler().await;
    let deadline = cancel.clone();
    let timeout = Duration::from_secs(config.timeout_secs);
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        eprintln!("\nJob timeout reached. Shutting down...");
        deadline.cancel();
    });

    let source = Arc::new(MssqlStore::connect(config.source.clone()).await?);
    let target = Arc::new(MssqlStore::connect(config.target.clone()).await?);

    let tables: Vec<TableRef> = source
        .tables_matching(&config.schema, &config.table_filter)
        .await?
        .into_iter()
        .map(|t| TableRef::new(&config.schema, t))
        .collect();
    if tables.is_empty() {
        return Err(CopyError::Config(format!(
            "no tables match '{}' in schema {}",
            config.table_filter, config.schema
        )));
    }
    info!("Copying {} tables", tables.len());

    let (events, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let monitor = Monitor::new(event_rx, config.ci, std::io::stdout());
    let monitor_handle = tokio::spawn(monitor.run(cancel.clone()));

    let result = Scheduler::new(source, target, events)
        .with_parallelism(config.parallel)
        .with_continue_on_error(config.continue_on_error)
        .run(tables, filter, cancel.clone())
        .await;

    // All event senders are gone at this point; the monitor drains whatever
    // is queued and renders a final frame.
    if let Ok(Err(e)) = monitor_handle.await {
        eprintln!("Monitor error: {e}");
    }
    println!();

    result
}

fn setup_logging(verbosity: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Progress bars own stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    let token_int = cancel_token.clone();
    let token_term = cancel_token.clone();

    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Shutting down...");
        token_int.cancel();
    });

    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Shutting down...");
        token_term.cancel();
    });

    cancel_token
}

#[cfg(not(unix))]
async fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to setup Ctrl-C handler");
        eprintln!("\nReceived Ctrl-C. Shutting down...");
        token.cancel();
    });

    cancel_token
}
