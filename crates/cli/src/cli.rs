use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

#[derive(Parser)]
#[command(name = "releve", about = "Import bank exports and tag their transactions.")]
pub struct Cli {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest a CSV/XLSX export and print the import batch.
    Import {
        /// Path to the bank export
        file: PathBuf,
        /// JSON array of already-imported content keys; new keys are appended
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// Also suggest a tag for every new transaction
        #[arg(long)]
        classify: bool,
    },
    /// Suggest a tag and expense type for one label.
    Classify {
        label: String,
        #[arg(long, allow_hyphen_values = true)]
        amount: Decimal,
        #[arg(long)]
        description: Option<String>,
    },
    /// Fold a JSON array of feedback records into the knowledge base.
    Learn {
        feedback: PathBuf,
        /// Where to write the knowledge base (default: `knowledge_base` from settings)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Reclassify a JSON array of `{id, label, amount}` items as a background job.
    Reclassify { items: PathBuf },
}
