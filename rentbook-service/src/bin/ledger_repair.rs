//! Operator tool for lease payment histories.
//!
//! - audit: report drift between histories and complete transactions
//! - backfill: append entries for complete transactions missing from histories
//! - dedupe: collapse entries sharing a reference on one lease
//!
//! Results are printed as pretty JSON. Exit code 2 means drift or failures
//! were found.

use clap::{Parser, Subcommand};
use rentbook_service::{config::Config, connect_store, services::LedgerAuditor};
use serde::Serialize;
use service_core::observability::init_tracing;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ledger-repair")]
#[command(about = "Audit and repair rent book payment histories")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report missing, duplicated, orphaned and conflicting payment entries
    Audit {
        /// Audit a single lease instead of every lease
        #[arg(long)]
        lease_id: Option<Uuid>,
    },
    /// Append entries for complete transactions absent from the history
    Backfill {
        #[arg(long)]
        lease_id: Option<Uuid>,
    },
    /// Collapse payment entries that share a reference
    Dedupe {
        #[arg(long)]
        lease_id: Uuid,
        /// Print what would be removed without writing
        #[arg(long)]
        dry_run: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_tracing("ledger-repair", &config.log_level, None);

    let store = connect_store(&config).await?;
    let auditor = LedgerAuditor::new(store);

    let drift_found = match cli.command {
        Commands::Audit {
            lease_id: Some(lease_id),
        } => {
            let report = auditor.detect_drift(lease_id).await?;
            print_json(&report)?;
            !report.is_clean()
        }
        Commands::Audit { lease_id: None } => {
            let (summary, reports) = auditor.audit_all().await?;
            print_json(&serde_json::json!({ "summary": summary, "reports": reports }))?;
            summary.leases_with_drift > 0 || !summary.failures.is_empty()
        }
        Commands::Backfill {
            lease_id: Some(lease_id),
        } => {
            let outcome = auditor.backfill_missing(lease_id).await?;
            print_json(&outcome)?;
            false
        }
        Commands::Backfill { lease_id: None } => {
            let summary = auditor.backfill_all().await?;
            print_json(&summary)?;
            !summary.failures.is_empty()
        }
        Commands::Dedupe { lease_id, dry_run } => {
            let outcome = auditor.dedupe(lease_id, dry_run).await?;
            print_json(&outcome)?;
            false
        }
    };

    if drift_found {
        std::process::exit(2);
    }

    Ok(())
}
