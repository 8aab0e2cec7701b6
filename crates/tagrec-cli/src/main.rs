//! Tag Reconciliation CLI

mod console;
mod source;

use clap::{Parser, Subcommand};
use source::LineTagSource;
use std::collections::BTreeSet;
use std::sync::Arc;
use tagrec_client::{ClientConfig, HttpRecordClient};
use tagrec_core::report::{generate_report, ReportFormat};
use tagrec_core::{
    normalize_bytes, normalize_str, pump_tag_events, Identifier, RecordClient, RecordKey,
    SessionHandle,
};
use tokio::io::BufReader;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "tagrec")]
#[command(about = "Reconcile scanned tags against a receipt and deactivate them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Root URL of the key-value store (overrides TAGREC_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Request timeout in seconds (overrides TAGREC_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Maximum deactivation requests in flight (overrides TAGREC_MAX_CONCURRENT)
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a receipt, read tag UIDs from stdin until EOF, then verify
    Reconcile {
        /// Receipt ID
        #[arg(short, long)]
        receipt: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the normalized expected UIDs of a receipt
    Fetch {
        /// Receipt ID
        #[arg(short, long)]
        receipt: String,
    },

    /// Print the canonical form of raw identifiers
    Normalize {
        /// Raw identifiers
        #[arg(required = true)]
        values: Vec<String>,

        /// Treat values as hex-encoded raw tag bytes
        #[arg(long)]
        bytes: bool,
    },

    /// Interactive session: :load, :verify, :status, :quit, or scan a UID
    Console,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Reconcile {
            ref receipt,
            ref format,
        } => {
            let config = client_config(&cli);
            cmd_reconcile(config, receipt.clone(), format).await;
        }
        Commands::Fetch { ref receipt } => {
            let config = client_config(&cli);
            cmd_fetch(config, receipt).await;
        }
        Commands::Normalize { ref values, bytes } => {
            cmd_normalize(values, bytes);
        }
        Commands::Console => {
            let config = client_config(&cli);
            cmd_console(config).await;
        }
    }
}

fn init_logging(verbose: bool) {
    // Logs go to stderr so reports on stdout stay machine-readable
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_writer(std::io::stderr);

    let result = match std::env::var("RUST_LOG") {
        Ok(filter) => tracing::subscriber::set_global_default(
            builder.with_env_filter(EnvFilter::new(filter)).finish(),
        ),
        Err(_) => {
            let log_level = if verbose { Level::DEBUG } else { Level::INFO };
            tracing::subscriber::set_global_default(builder.with_max_level(log_level).finish())
        }
    };
    result.expect("Failed to set subscriber");
}

fn client_config(cli: &Cli) -> ClientConfig {
    let mut config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(max) = cli.max_concurrent {
        config.max_concurrent_deactivations = max;
    }

    config
}

fn build_session(config: ClientConfig) -> SessionHandle {
    let session_config = config.session_config();
    SessionHandle::spawn(Arc::new(build_client(config)), session_config)
}

fn build_client(config: ClientConfig) -> HttpRecordClient {
    match HttpRecordClient::new(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create client: {}", e);
            std::process::exit(1);
        }
    }
}

async fn cmd_reconcile(config: ClientConfig, receipt: String, output_format: &str) {
    let format = match output_format.to_lowercase().as_str() {
        "json" => ReportFormat::Json,
        _ => ReportFormat::Text,
    };

    let session = build_session(config);

    match session.load(receipt.clone()).await {
        Ok(outcome) => {
            info!("{} ({} expected items)", outcome.message, outcome.expected_count);
        }
        Err(e) => {
            error!("Failed to load receipt {}: {}", receipt, e);
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    }

    info!("Reading tag UIDs from stdin, one per line; EOF verifies");
    let source = LineTagSource::new(BufReader::new(tokio::io::stdin()));
    let stats = pump_tag_events(source, session.clone()).await;
    info!(
        "Scanned {} unique tags ({} duplicate reads)",
        stats.added, stats.duplicates
    );

    let report = match session.verify().await {
        Ok(report) => report,
        Err(e) => {
            error!("Verification failed: {}", e);
            std::process::exit(1);
        }
    };
    session.shutdown().await;

    match generate_report(&report, format) {
        Ok(content) => println!("{}", content),
        Err(e) => {
            error!("Failed to generate report: {}", e);
            std::process::exit(1);
        }
    }

    for failed in report.failed_deactivations() {
        error!("Tag {} was not deactivated: {}", failed.identifier, failed.detail);
    }

    if !report.verified_ok() {
        std::process::exit(1);
    }
}

async fn cmd_fetch(config: ClientConfig, receipt: &str) {
    let Some(record_key) = RecordKey::parse(receipt) else {
        error!("{}", tagrec_core::MSG_INVALID_KEY);
        std::process::exit(1);
    };

    let client = build_client(config);
    match client.fetch_expected(&record_key).await {
        Ok(raw) => {
            let expected: BTreeSet<Identifier> =
                raw.iter()
                    .map(|entry| normalize_str(entry))
                    .filter(|id| !id.is_empty())
                    .collect();
            println!("\nReceipt {}\n{}", record_key, "=".repeat(50));
            for id in &expected {
                println!("  {}", id);
            }
            println!("{}\nExpected items: {}", "=".repeat(50), expected.len());
        }
        Err(e) => {
            error!("Failed to fetch receipt {}: {}", record_key, e);
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    }
}

fn cmd_normalize(values: &[String], bytes: bool) {
    for value in values {
        if bytes {
            let compact: String = value.split_whitespace().collect();
            match hex::decode(&compact) {
                Ok(raw) => println!("{}", normalize_bytes(&raw)),
                Err(e) => {
                    error!("Invalid hex '{}': {}", value, e);
                    std::process::exit(1);
                }
            }
        } else {
            println!("{}", normalize_str(value));
        }
    }
}

async fn cmd_console(config: ClientConfig) {
    let session = build_session(config);
    console::run(session, BufReader::new(tokio::io::stdin())).await;
}
