//! Roster: multi-writer registry CLI.
//!
//! # Usage
//!
//! ```text
//! roster [--root DIR] init [--layout monolithic|distributed]
//! roster [--root DIR] add <id> [--field key=value]...
//! roster [--root DIR] remove <id>... --reason TEXT
//! roster [--root DIR] metric <id> key=value...
//! roster [--root DIR] meta <field> [value] [--now]
//! roster [--root DIR] show [--json]
//! roster [--root DIR] relayout monolithic|distributed
//! ```

mod commands;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    add::AddArgs, init::InitArgs, meta::MetaArgs, metric::MetricArgs, relayout::RelayoutArgs,
    remove::RemoveArgs, show::ShowArgs,
};
use roster_core::StorageLayout;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "roster",
    version,
    about = "Shared registry of entities with optimistic multi-writer updates",
    long_about = None,
)]
struct Cli {
    /// Store directory (default: ~/.roster).
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the store and write its settings.
    Init(InitArgs),

    /// Add an entity, or refresh it if this version is newer.
    Add(AddArgs),

    /// Move entities to the archive.
    Remove(RemoveArgs),

    /// Merge values into an entity's metrics.
    Metric(MetricArgs),

    /// Set a metadata scalar.
    Meta(MetaArgs),

    /// Print the registry.
    Show(ShowArgs),

    /// Convert the store to another storage layout.
    Relayout(RelayoutArgs),
}

// ---------------------------------------------------------------------------
// Shared StorageLayout argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `StorageLayout` from CLI args.
#[derive(Debug, Clone, Copy)]
pub struct LayoutArg(pub StorageLayout);

impl FromStr for LayoutArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monolithic" => Ok(Self(StorageLayout::Monolithic)),
            "distributed" => Ok(Self(StorageLayout::Distributed)),
            other => Err(format!(
                "unknown layout '{other}'; expected: monolithic, distributed"
            )),
        }
    }
}

impl fmt::Display for LayoutArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<LayoutArg> for StorageLayout {
    fn from(l: LayoutArg) -> Self {
        l.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let root = commands::resolve_root(cli.root)?;
    match cli.command {
        Commands::Init(args) => args.run(&root),
        Commands::Add(args) => args.run(&root),
        Commands::Remove(args) => args.run(&root),
        Commands::Metric(args) => args.run(&root),
        Commands::Meta(args) => args.run(&root),
        Commands::Show(args) => args.run(&root),
        Commands::Relayout(args) => args.run(&root),
    }
}

/// Log to stderr; `RUST_LOG` overrides the default `warn` filter.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
