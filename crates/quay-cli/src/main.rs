//! quay - declarative artifact acquisition and environment activation.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use quay_cli::{Cli, Commands, cmd};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Install {
            artifacts,
            version,
            force,
            language,
            all_languages,
        } => {
            cmd::install::install(
                cli.home,
                &artifacts,
                version.as_deref(),
                force,
                language,
                all_languages,
            )
            .await
        }
        Commands::Uninstall { artifacts } => cmd::uninstall::uninstall(cli.home, &artifacts).await,
        Commands::Activate { project } => cmd::activate::activate(cli.home, project).await,
        Commands::Deactivate => cmd::deactivate::deactivate(cli.home).await,
        Commands::List => cmd::list::list(cli.home).await,
    }
}
