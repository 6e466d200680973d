mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use streetsight_classifiers::{ClassificationService, ServiceConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Classify {
            image,
            config,
            pretty,
            verbose,
        } => {
            init_tracing(verbose);

            let service = start_service(&config).await?;
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("Failed to read image {}", image.display()))?;
            let result = service.classify(&bytes).await?;

            print_json(&result, pretty)?;
        }
        Commands::Status { config, verbose } => {
            init_tracing(verbose);

            let service = start_service(&config).await?;
            print_json(&service.status(), true)?;
        }
    }

    Ok(())
}

async fn start_service(config_path: &Path) -> anyhow::Result<ClassificationService> {
    let config = ServiceConfig::load(config_path)?;
    tracing::debug!(labels = %config.labels_path.display(), "Using service config");

    let service = ClassificationService::new(config);
    service
        .initialize()
        .await
        .context("Failed to initialize classification service")?;
    Ok(service)
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("streetsight=debug,streetsight_classifiers=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("streetsight=info,streetsight_classifiers=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
