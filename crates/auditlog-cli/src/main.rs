//! auditctl — query and prune an audit directory.
//!
//! Works against any audit directory, including a snapshot copied from
//! another host of the same architecture: the on-disk index, not collector
//! memory, is the source of truth.
//!
//! ```bash
//! # every live record
//! auditctl --dir /var/lib/audit query
//!
//! # a time window (unix seconds, half-open)
//! auditctl --dir /var/lib/audit query --begin 1700000000 --end 1700086400
//!
//! # tombstone a window in place
//! auditctl --dir /var/lib/audit delete --begin 1700000000 --end 1700086400
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "auditctl")]
#[command(about = "Inspect and prune an audit log directory", long_about = None)]
struct Cli {
    /// Audit directory holding index_table and the <n>_adt files
    #[arg(short, long, default_value = "audit")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List live audit records with time in [begin, end)
    Query {
        /// Range start, seconds since the epoch (inclusive)
        #[arg(long, default_value_t = i64::MIN)]
        begin: i64,

        /// Range end, seconds since the epoch (exclusive)
        #[arg(long, default_value_t = i64::MAX)]
        end: i64,
    },

    /// Tombstone audit records with time in [begin, end)
    Delete {
        #[arg(long)]
        begin: i64,

        #[arg(long)]
        end: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Query { begin, end } => {
            let rows = auditlog_storage::query(&cli.dir, begin, end).await?;
            for row in &rows {
                let fields = row.fields.join("\t");
                println!("{}\t{}\t{}\t{}", row.time, row.kind, row.result, fields);
            }
            eprintln!("{} record(s)", rows.len());
        }
        Commands::Delete { begin, end } => {
            let tombstoned = auditlog_storage::delete(&cli.dir, begin, end).await?;
            eprintln!("{tombstoned} record(s) tombstoned");
        }
    }
    Ok(())
}
