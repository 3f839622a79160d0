//! CLI argument parsing for esmpack.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// esmpack - build registry packages into standards-based module artifacts
#[derive(Parser, Debug)]
#[command(name = "esmpack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Set the registry URL
    #[arg(long, global = true, env = "ESMPACK_REGISTRY")]
    pub registry: Option<String>,

    /// Skip SSL certificate verification
    #[arg(long, global = true)]
    pub insecure: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse a request path and print its descriptor and build identifier
    Resolve(ResolveArgs),
    /// Install a dependency closure into a directory
    Install(InstallArgs),
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Request path, e.g. `/react@17.0.2` or `/preact@10.5.15/hooks`
    pub path: String,

    /// Engine baseline target
    #[arg(long, default_value = "baseline-2020")]
    pub target: String,

    /// Development mode (unminified artifact, `.development` identifier)
    #[arg(long)]
    pub dev: bool,

    /// Comma-separated exact dependency pins (`react@17.0.2,scheduler@0.20.2`)
    #[arg(long)]
    pub deps: Option<String>,
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Package specs (`name` or `name@spec`)
    #[arg(required = true)]
    pub specs: Vec<String>,

    /// Directory receiving the `node_modules` tree
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
}
