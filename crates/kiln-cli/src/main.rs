//! Kiln CLI - Command-line interface for the Kiln bundle system

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::catalog;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Content bundle catalog build and inspection tool", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a binary catalog from a bundle manifest
    Build {
        /// Path to the manifest TOML file
        manifest: String,

        /// Output path for the catalog
        #[arg(long, short, default_value = "catalog.bin")]
        output: String,
    },

    /// Summarize a built catalog
    Inspect {
        /// Path to the catalog file
        catalog: String,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Find the bundle that owns an item name
    Lookup {
        /// Path to the catalog file
        catalog: String,

        /// Item name (hashed to an address)
        name: String,
    },

    /// Print a bundle's dependency list
    Deps {
        /// Path to the catalog file
        catalog: String,

        /// Raw bundle id, e.g. 0x0401 or #0401
        id: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build { manifest, output } => catalog::run_build(&manifest, &output),
        Commands::Inspect { catalog, format } => catalog::run_inspect(&catalog, &format),
        Commands::Lookup { catalog, name } => catalog::run_lookup(&catalog, &name),
        Commands::Deps { catalog, id } => catalog::run_deps(&catalog, &id),
    }
}
