//! ItemSync CLI
//!
//! Command-line tools for ItemSync.
//!
//! # Commands
//!
//! - `history decode` - Decode a hex-encoded history buffer
//! - `history encode` - Encode history records to hex
//! - `states` - Print the sync state transition table
//! - `demo` - Run a scripted edit, merge and upload session in memory

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// ItemSync command-line tools.
#[derive(Parser)]
#[command(name = "itemsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the persisted history format
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },

    /// Print the sync state transition table
    States {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Run a scripted sync session against an in-memory store
    Demo,

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// Decode a hex-encoded history buffer
    Decode {
        /// History bytes as hex
        hex: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Encode records given as kind:id:payload-hex
    Encode {
        /// Records, e.g. 42:0:cafe
        records: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::History { command } => match command {
            HistoryCommands::Decode { hex, json } => commands::history::decode(&hex, json)?,
            HistoryCommands::Encode { records } => commands::history::encode(&records)?,
        },
        Commands::States { json } => commands::states::run(json)?,
        Commands::Demo => commands::demo::run()?,
        Commands::Version => {
            println!("ItemSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
