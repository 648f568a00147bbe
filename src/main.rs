use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sitestack::assets::AssetManifest;
use sitestack::graph::Stage;
use sitestack::zone::{FirstOf, StaticZones, ZoneResolver};
use sitestack::{deploy_script, site, Config, SiteStack};

#[derive(Parser)]
#[command(name = "sitestack")]
#[command(about = "Synthesize and deploy static website stacks")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the sites config file
    #[arg(short, long, global = true, default_value = "sites.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, check and write a CloudFormation template per site
    Synth {
        /// Overrides out_dir from the config file
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Build every site and print what its checks found
    Check,

    /// Print each stack's resources in apply order
    Plan,

    /// Synthesize, then write a deploy.sh that deploys and uploads every site
    DeployScript {
        /// Directory the script is written to
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },

    /// Apply every site stack to the account in the environment
    #[cfg(feature = "aws")]
    Deploy,

    /// Delete one site's stack, including everything in its bucket
    #[cfg(feature = "aws")]
    Destroy {
        /// Domain of the site to delete
        domain: String,
    },
}

fn initialise_logging(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", default_level);
    }

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_env_filter(EnvFilter::from_default_env()).finish(),
    )
    .context("Failed to install the tracing subscriber")?;
    Ok(())
}

#[cfg(feature = "aws")]
async fn sdk_config(config: &Config) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()))
        .load()
        .await
}

/// pinned zone ids win, anything else is looked up when the sdk is available.
async fn zone_resolver(config: &Config) -> Box<dyn ZoneResolver> {
    let resolver = FirstOf::new().or(StaticZones::from_config(config));
    #[cfg(feature = "aws")]
    let resolver = resolver.or(sitestack::zone::Route53Zones::new(&sdk_config(config).await));
    Box::new(resolver)
}

async fn build(config: &Config) -> anyhow::Result<Vec<SiteStack>> {
    let resolver = zone_resolver(config).await;
    let sites = site::build_all(config, resolver.as_ref()).await?;
    Ok(sites)
}

fn synth(sites: &[SiteStack], out_dir: &Path) -> anyhow::Result<()> {
    for site in sites {
        let path = site.template.write_to(out_dir, site.name())
            .with_context(|| format!("Failed to write template for {}", site.config.domain))?;
        println!("{}", path.display());
    }
    Ok(())
}

fn print_check(sites: &[SiteStack]) {
    for site in sites {
        let report = &site.report;
        println!("{} ({})", site.config.domain, report.stack);
        println!("  certificate: {}", report.certificate_names.join(", "));
        println!("  aliases:     {}", report.aliases.join(", "));
        for (name, ty) in &report.records {
            println!("  record:      {name} {ty}");
        }
        for warning in &report.warnings {
            println!("  warning:     {warning}");
        }
    }
}

fn print_plan(sites: &[SiteStack]) -> anyhow::Result<()> {
    for site in sites {
        println!("{}", site.name());
        for id in site.template.apply_order()? {
            let Some(node) = site.stack.node(&id) else { continue };
            let stage = node.stage().unwrap_or(Stage::ZoneResolved).as_str();
            let deps: Vec<&str> = node.depends_on.iter().map(|d| d.as_str()).collect();
            if deps.is_empty() {
                println!("  {stage:<22} {id} ({})", node.resource.type_string());
            } else {
                println!("  {stage:<22} {id} ({}) after {}", node.resource.type_string(), deps.join(", "));
            }
        }
        match AssetManifest::scan(&site.config.asset_path) {
            Ok(manifest) => {
                if let Err(e) = manifest.require_default_document(&site.config.default_document) {
                    tracing::warn!(domain = %site.config.domain, "{e}");
                }
                println!(
                    "  assets: {} files, {} bytes, fingerprint {}",
                    manifest.entries.len(), manifest.total_size(), manifest.fingerprint()
                );
            }
            Err(e) => tracing::warn!(domain = %site.config.domain, "{e}"),
        }
    }
    Ok(())
}

#[cfg(feature = "aws")]
async fn deploy(config: &Config, sites: &[SiteStack]) -> anyhow::Result<()> {
    use sitestack::provision::{apply_all, CloudFormationBackend};

    let backend = CloudFormationBackend::new(&sdk_config(config).await);
    let outputs = apply_all(&backend, sites).await?;
    for (site, outputs) in sites.iter().zip(outputs) {
        println!("{}", site.config.domain);
        for (key, value) in outputs {
            println!("  {key}: {value}");
        }
    }
    Ok(())
}

#[cfg(feature = "aws")]
async fn destroy(config: &Config, domain: &str) -> anyhow::Result<()> {
    use sitestack::provision::{CloudFormationBackend, Provisioner};

    let site = config.sites.iter().find(|s| s.domain == domain)
        .with_context(|| format!("{domain} is not declared in the config file"))?;
    let stack_name = site.stack_name()?;
    let backend = CloudFormationBackend::new(&sdk_config(config).await);
    backend.teardown(&stack_name).await?;
    println!("deleted {stack_name}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    initialise_logging(cli.verbose)?;

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Synth { out_dir } => {
            let sites = build(&config).await?;
            let out_dir = out_dir.unwrap_or_else(|| config.out_dir.clone());
            synth(&sites, &out_dir)?;
        }
        Commands::Check => {
            let sites = build(&config).await?;
            print_check(&sites);
        }
        Commands::Plan => {
            let sites = build(&config).await?;
            print_plan(&sites)?;
        }
        Commands::DeployScript { output } => {
            let sites = build(&config).await?;
            synth(&sites, &config.out_dir)?;
            let path = deploy_script::write(&output, &config, &sites)?;
            println!("{}", path.display());
        }
        #[cfg(feature = "aws")]
        Commands::Deploy => {
            let sites = build(&config).await?;
            deploy(&config, &sites).await?;
        }
        #[cfg(feature = "aws")]
        Commands::Destroy { domain } => destroy(&config, &domain).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_logging_install_is_an_error() {
        initialise_logging(false).unwrap();
        let err = initialise_logging(true).unwrap_err();
        assert!(err.to_string().contains("tracing subscriber"), "{err}");
    }
}
