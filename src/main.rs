use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vantagewatch::check::report::render_baselines;
use vantagewatch::config::{Config, LoggingConfig, TargetConfig};
use vantagewatch::detect::baseline::{filter_tree, flatten, BaselineStore, DEFAULT_MAX_ROWS};
use vantagewatch::monitor::{AlertSink, LedgerSink, MonitorEvent};
use vantagewatch::probes::CheckMode;

#[derive(Parser)]
#[command(
    name = "vantagewatch",
    about = "Multi-vantage-point network monitor with baseline anomaly detection",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + periodic monitor)
    Serve {
        /// Bind address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a one-shot check and print the report
    Check {
        #[command(subcommand)]
        kind: CheckKind,

        /// Number of vantage points to request
        #[arg(long, global = true)]
        max_nodes: Option<u32>,

        /// JSON output for machine parsing
        #[arg(long, global = true)]
        json: bool,
    },

    /// Show recorded baselines, optionally filtered: `stats [mode] [target]`
    Stats {
        /// A check mode (http, ping, tcp) or, if not a mode, a target
        first: Option<String>,

        /// Target, when the first argument is a mode
        second: Option<String>,

        /// Maximum rows to print
        #[arg(long, default_value_t = DEFAULT_MAX_ROWS)]
        max_rows: usize,
    },

    /// List recent incidents from the ledger
    Incidents {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum CheckKind {
    /// HTTP check of a URL
    Http { target: String },
    /// Ping check of a host (scheme and path are stripped)
    Ping { target: String },
    /// TCP connect check
    Tcp {
        host: String,
        #[arg(default_value_t = TargetConfig::DEFAULT_TCP_PORT)]
        port: u16,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// `stats ping example.com`, `stats ping`, `stats example.com`.
fn stats_filters(first: Option<String>, second: Option<String>) -> (Option<CheckMode>, Option<String>) {
    match first {
        Some(arg) => match arg.parse::<CheckMode>() {
            Ok(mode) => (Some(mode), second),
            Err(_) => (None, Some(arg)),
        },
        None => (None, None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            tracing::info!(bind = %config.api.bind, targets = config.monitor.targets.len(), "Starting VantageWatch daemon");
            vantagewatch::serve(config).await?;
        }
        Commands::Check {
            kind,
            max_nodes,
            json,
        } => {
            // The daemon owns the baseline document; classify against it
            // without writing back.
            let store = BaselineStore::detached(&config.storage.baseline_path, config.detection);
            let checker = vantagewatch::build_checker(&config, store)?;
            let report = match kind {
                CheckKind::Http { target } => checker.check_http(&target, max_nodes).await?,
                CheckKind::Ping { target } => checker.check_ping(&target, max_nodes).await?,
                CheckKind::Tcp { host, port } => checker.check_tcp(&host, port, max_nodes).await?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.text());
            }

            let pool = vantagewatch::storage::open_pool(&config.storage.db_path)?;
            LedgerSink::new(pool).publish(&MonitorEvent::Report(report));
        }
        Commands::Stats {
            first,
            second,
            max_rows,
        } => {
            let (mode, target) = stats_filters(first, second);
            let tree = vantagewatch::storage::snapshot::load(&config.storage.baseline_path)?;
            let filtered = filter_tree(&tree, mode, target.as_deref());
            let rows = flatten(&filtered, max_rows.saturating_add(1));
            let truncated = rows.len() > max_rows;
            let shown = &rows[..rows.len().min(max_rows)];
            print!("{}", render_baselines(shown, truncated));
        }
        Commands::Incidents { limit } => {
            let pool = vantagewatch::storage::open_pool(&config.storage.db_path)?;
            let incidents = vantagewatch::detect::incident::IncidentManager::new(pool).list_recent(limit)?;
            if incidents.is_empty() {
                println!("No incidents recorded.");
            } else {
                println!("{:<25} | {:<8} | {:<18} | Evidence", "Time", "Severity", "Verdict");
                println!("{:-<25}-|-{:-<8}-|-{:-<18}-|-{:-<40}", "", "", "", "");
                for i in incidents {
                    println!(
                        "{:<25} | {:<8} | {:<18} | {}",
                        i.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        i.severity,
                        i.verdict,
                        i.evidence
                    );
                }
            }
        }
    }

    Ok(())
}
