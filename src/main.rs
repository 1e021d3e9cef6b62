use clap::Parser;
use cachefield::cli::{Cli, Commands};
use cachefield::types::config::Config;
use cachefield::CacheFieldResult;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> CacheFieldResult<()> {
    let cli = Cli::parse();

    // Load configuration first (no logging yet)
    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default_config()
    };

    // CLI flags take precedence over config
    let log_level = if cli.quiet {
        "error".to_string()
    } else if cli.verbose {
        "debug".to_string()
    } else {
        config.general.log_level.clone()
    };

    let filter = EnvFilter::from_default_env().add_directive(
        format!("cachefield={}", log_level)
            .parse()
            .unwrap_or_else(|_| "cachefield=info".parse().expect("fallback directive is valid")),
    );

    if config.general.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    tracing::debug!("Configuration loaded from: {}", cli.config.display());

    match cli.command {
        Commands::Init { path } => {
            cachefield::cli::commands::init(path).await?;
        }
        Commands::Migrate => {
            cachefield::cli::commands::migrate(&config).await?;
        }
        Commands::Doctor => {
            cachefield::cli::commands::doctor(&config).await?;
        }
        Commands::Status => {
            cachefield::cli::commands::status(&config).await?;
        }
        Commands::Sweep { include_expired } => {
            cachefield::cli::commands::sweep(&config, include_expired).await?;
        }
        Commands::Jobs { limit } => {
            cachefield::cli::commands::jobs(&config, limit).await?;
        }
        Commands::Version => {
            cachefield::cli::commands::version();
        }
    }

    Ok(())
}
