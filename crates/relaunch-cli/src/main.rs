mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "relaunch",
    about = "Rebuild and relaunch a containerized service, keeping its data"
)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    /// Rebuild from scratch (drop the image, ignore layer cache, re-pull base images)
    #[arg(long, short = 'f')]
    force: bool,

    /// Accept durable storage that differs from the previous instance's (data is not copied)
    #[arg(long)]
    allow_storage_change: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone)]
pub(crate) struct GlobalOpts {
    /// Project directory (source tree, relaunch.toml, env file)
    #[arg(long, short = 'C', global = true, default_value = ".")]
    pub project_dir: PathBuf,

    /// Config file (defaults to <project-dir>/relaunch.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync source, rebuild the image, and replace the running instance (default)
    Deploy {
        /// Rebuild from scratch (drop the image, ignore layer cache, re-pull base images)
        #[arg(long, short = 'f')]
        force: bool,
        /// Accept durable storage that differs from the previous instance's (data is not copied)
        #[arg(long)]
        allow_storage_change: bool,
    },
    /// Show the running instance
    Status,
    /// Stream the instance's logs
    Logs {
        /// Follow log output
        #[arg(long, short = 'f')]
        follow: bool,
        /// Number of lines to show from the end
        #[arg(long, short = 'n')]
        tail: Option<u32>,
    },
    /// Check docker, git, and configuration readiness
    Doctor,
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

    match cli.command {
        None => commands::deploy(&cli.global, cli.force, cli.allow_storage_change).await?,
        Some(Commands::Deploy {
            force,
            allow_storage_change,
        }) => {
            commands::deploy(
                &cli.global,
                force || cli.force,
                allow_storage_change || cli.allow_storage_change,
            )
            .await?
        }
        Some(Commands::Status) => commands::status(&cli.global).await?,
        Some(Commands::Logs { follow, tail }) => commands::logs(&cli.global, follow, tail).await?,
        Some(Commands::Doctor) => commands::doctor(&cli.global).await?,
    }

    Ok(())
}
