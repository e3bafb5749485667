// src/cli.rs
//! CLI definitions for toolrig
//!
//! Command implementations live in `main.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "toolrig")]
#[command(version)]
#[command(about = "Transactional installer for runtimes, SDKs and dev-kits", long_about = None)]
pub struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Component catalog (TOML); defaults to {base_path}/catalog.toml
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// No progress bars
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install components and their requested dependencies
    Install {
        /// Component names
        #[arg(required = true)]
        components: Vec<String>,

        /// Maximum components installed at once within a dependency level
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Do not retry transient failures or roll back after critical ones
        #[arg(long)]
        no_recovery: bool,
    },

    /// Roll back the latest install of a component
    Rollback {
        /// Component name
        component: String,
    },

    /// Show install order, parallel levels, cycles and conflicts
    Plan {
        /// Component names
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// List persisted transactions
    Transactions {
        /// Only show transactions for this component
        #[arg(short, long)]
        component: Option<String>,
    },
}
