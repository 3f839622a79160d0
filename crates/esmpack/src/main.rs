//! esmpack - build registry packages into standards-based module artifacts
//!
//! This is the main entry point for the esmpack binary.

use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use esmpack::cli::{Cli, Commands, InstallArgs, ResolveArgs};
use esmpack::descriptor::{parse_package_path, PackageDescriptor, PinSet};
use esmpack::installer::{install_closure, split_spec};
use esmpack::registry::RegistryClient;
use esmpack::{build_identifier, Config, Result, Target};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `--verbose` raises the default level; an explicit RUST_LOG still wins
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = Config::load()?;
    if let Some(registry) = &cli.registry {
        config.registry = registry.trim_end_matches('/').to_string();
    }
    config.insecure = cli.insecure;

    match &cli.command {
        Commands::Resolve(args) => resolve(args, &config).await,
        Commands::Install(args) => install(args, &config).await,
    }
}

async fn resolve(args: &ResolveArgs, config: &Config) -> Result<()> {
    let registry = RegistryClient::new(config)?;
    let target: Target = args.target.parse()?;
    let (descriptor, query) = parse_package_path(&registry, &args.path).await?;

    let mut pins = PinSet::default();
    if let Some(deps) = &args.deps {
        for spec in deps.split(',').filter(|s| !s.is_empty()) {
            let (name, version) = split_spec(spec);
            pins.push(PackageDescriptor {
                name,
                version,
                ..Default::default()
            });
        }
    }

    let build_id = build_identifier(config.schema, &descriptor, &pins, target, args.dev);
    println!("{}    {}", "descriptor".bold(), descriptor);
    if !query.is_empty() {
        println!("{}         {}", "query".bold(), query);
    }
    println!("{}      {}", "build id".bold(), build_id.green());
    println!("{}  /{}.js", "artifact url".bold(), build_id);
    Ok(())
}

async fn install(args: &InstallArgs, config: &Config) -> Result<()> {
    let registry = RegistryClient::new(config)?;
    install_closure(&registry, &args.dir, &args.specs).await?;
    println!(
        "{} installed {} spec(s) under {}",
        "ok".green().bold(),
        args.specs.len(),
        args.dir.join("node_modules").display()
    );
    Ok(())
}
