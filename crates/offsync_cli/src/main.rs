//! offsync CLI
//!
//! Command-line tools for inspecting and repairing a persisted offsync
//! state directory. The engine must not be running against the same
//! directory; the directory lock enforces this.
//!
//! # Commands
//!
//! - `status` - Show queue length and sync timestamps
//! - `queue list` - List pending writes in delivery order
//! - `queue remove <id>` - Retract one pending write
//! - `queue drop-head` - Retract the write at the head of the queue
//! - `queue clear` - Retract every pending write
//! - `reset-stamps` - Forget the last-synced and last-warm-up timestamps

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// offsync state directory tools.
#[derive(Parser)]
#[command(name = "offsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the state directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue length and sync timestamps
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Inspect or edit the pending write queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Forget the last-synced and last-warm-up timestamps
    ResetStamps,

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum QueueAction {
    /// List pending writes in delivery order
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Retract one pending write
    Remove {
        /// Operation id
        id: String,
    },

    /// Retract the write at the head of the queue
    DropHead,

    /// Retract every pending write
    Clear,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Status { format } => {
            let path = cli.path.ok_or("State path required for status")?;
            commands::status::run(&path, &format)?;
        }
        Commands::Queue { action } => {
            let path = cli.path.ok_or("State path required for queue")?;
            match action {
                QueueAction::List { format } => commands::queue::list(&path, &format)?,
                QueueAction::Remove { id } => commands::queue::remove(&path, &id)?,
                QueueAction::DropHead => commands::queue::drop_head(&path)?,
                QueueAction::Clear => commands::queue::clear(&path)?,
            }
        }
        Commands::ResetStamps => {
            let path = cli.path.ok_or("State path required for reset-stamps")?;
            commands::reset_stamps::run(&path)?;
        }
        Commands::Version => {
            println!("offsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
