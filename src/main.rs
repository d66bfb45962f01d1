use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::{LogFormat, Settings};
use tollgate::ratelimit::{Reclaimer, DEFAULT_POLICY};
use tollgate::KeyBuilder;

#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about = "Fixed-window admission control")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter directive, overrides the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format, overrides the configured format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the resolved policy table
    Policies,

    /// Issue a series of checks and print each verdict as JSON
    Simulate {
        /// Policy name to check against
        #[arg(long, default_value = DEFAULT_POLICY)]
        policy: String,

        /// Caller address
        #[arg(long)]
        address: Option<String>,

        /// Authenticated subject id
        #[arg(long)]
        subject: Option<String>,

        /// Number of checks to issue
        #[arg(long, default_value_t = 10)]
        requests: u32,

        /// Pause between checks in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },

    /// Run the limiter with its reclaimer until interrupted
    Run {
        /// How often to log store statistics
        #[arg(long, default_value_t = 30)]
        stats_interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    init_tracing(
        cli.log_level.as_deref().unwrap_or(&settings.logging.level),
        cli.log_format.unwrap_or(settings.logging.format),
    )?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Tollgate");

    let limiter = settings.build_limiter()?;

    match cli.command {
        Command::Policies => {
            let table = limiter.policies();
            let default = table.default_policy();
            println!("{:<16} {:>12} {:>8}", "policy", "window_ms", "max");
            println!(
                "{:<16} {:>12} {:>8}",
                DEFAULT_POLICY,
                default.window().as_millis(),
                default.max_requests()
            );
            for name in table.names() {
                let policy = table.lookup(name);
                println!(
                    "{:<16} {:>12} {:>8}",
                    name,
                    policy.window().as_millis(),
                    policy.max_requests()
                );
            }
        }
        Command::Simulate {
            policy,
            address,
            subject,
            requests,
            interval_ms,
        } => {
            let key = KeyBuilder::build(
                address.as_deref(),
                subject.as_deref(),
                Some(policy.as_str()),
            );
            info!(key = %key, policy = %policy, requests, "Simulating checks");

            for _ in 0..requests {
                let verdict = limiter.check(&key, &policy);
                println!("{}", serde_json::to_string(&verdict)?);
                if interval_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
            }
            println!("{}", serde_json::to_string(&limiter.stats())?);
        }
        Command::Run {
            stats_interval_secs,
        } => {
            let reclaimer = settings
                .reclaim
                .interval()
                .map(|period| Reclaimer::spawn(limiter.clone(), period));
            if reclaimer.is_none() {
                warn!("Background reclaimer disabled; relying on opportunistic sweeps");
            }

            let mut ticker =
                tokio::time::interval(Duration::from_secs(stats_interval_secs.max(1)));
            let shutdown = shutdown_signal();
            tokio::pin!(shutdown);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = limiter.stats();
                        info!(
                            total_entries = stats.total_entries,
                            active_entries = stats.active_entries,
                            "Store statistics"
                        );
                    }
                    _ = &mut shutdown => break,
                }
            }

            if let Some(reclaimer) = reclaimer {
                reclaimer.shutdown().await;
            }
        }
    }

    info!("Tollgate stopped");
    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::parse_from([
            "tollgate",
            "simulate",
            "--policy",
            "login",
            "--address",
            "1.2.3.4",
            "--requests",
            "3",
        ]);
        match cli.command {
            Command::Simulate {
                policy, requests, ..
            } => {
                assert_eq!(policy, "login");
                assert_eq!(requests, 3);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["tollgate", "policies", "--log-format", "json"]);
        assert_eq!(cli.log_format, Some(LogFormat::Json));
    }
}
