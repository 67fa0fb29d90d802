use clap::{Parser, Subcommand};
use fleetpkg::{ClientProfile, PackageRequest, ServiceConfig, Structure, VersionPolicy};

#[derive(Parser)]
#[command(name = "fleetpkg")]
#[command(author, version, about = "Package-source ingestion and dependency resolution for fleet configuration management", long_about = None)]
struct Cli {
    /// Path to the sources declaration document
    #[arg(long, default_value = "sources.xml", global = true)]
    sources: String,

    /// On-disk cache root for downloaded repository indices
    #[arg(long, default_value = "cache", global = true)]
    cache: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the dependency closure for a client's package requests
    Resolve {
        /// Client hostname
        #[arg(long)]
        hostname: String,

        /// Client architecture (e.g. amd64)
        #[arg(long)]
        arch: String,

        /// Client group membership (repeatable)
        #[arg(long = "group")]
        groups: Vec<String>,

        /// Also follow recommended packages
        #[arg(long)]
        recommended: bool,

        /// Explicit package names
        packages: Vec<String>,
    },

    /// Print the generated repository-definition file for a client
    Config {
        #[arg(long)]
        hostname: String,

        #[arg(long)]
        arch: String,

        #[arg(long = "group")]
        groups: Vec<String>,
    },

    /// Force re-download of all source data
    Refresh,

    /// Re-parse source data from the on-disk cache
    Reload,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ServiceConfig::new(&cli.sources, &cli.cache);
    config.version_policy = VersionPolicy::Auto;
    let service = fleetpkg::PackageService::new(config)?;

    match cli.command {
        Commands::Resolve {
            hostname,
            arch,
            groups,
            recommended,
            packages,
        } => {
            service.reload().await?;
            let profile = ClientProfile::new(hostname, arch).with_groups(groups);
            let requests = packages
                .into_iter()
                .map(|name| PackageRequest::Package {
                    name,
                    recommended: recommended.then_some(true),
                })
                .collect();
            let mut structures = vec![Structure::new("cli", requests)];
            let resolution = service.resolve_client(&profile, &mut structures)?;

            for entry in &resolution.entries {
                println!("{} ({})", entry.name, entry.kind);
            }
            if !resolution.unknown.is_empty() {
                eprintln!("unknown packages: {}", resolution.unknown.join(", "));
            }
            service.end_client_run(&profile.hostname);
        }
        Commands::Config {
            hostname,
            arch,
            groups,
        } => {
            service.reload().await?;
            let profile = ClientProfile::new(hostname, arch).with_groups(groups);
            print!("{}", service.get_config(&profile));
            service.end_client_run(&profile.hostname);
        }
        Commands::Refresh => {
            service.refresh().await?;
            println!("refreshed {} sources", service.source_count());
        }
        Commands::Reload => {
            service.reload().await?;
            println!("reloaded {} sources", service.source_count());
        }
    }

    Ok(())
}
