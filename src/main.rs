mod cli;
mod commands;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use speechpipe::config::Config;
use speechpipe::speech::models::UnavailableLoader;

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("speechpipe=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let (mut config, config_path) = Config::load_with_path(cli.config.as_deref())?;
    if let Some(path) = &config_path {
        tracing::debug!("Using config {}", path.display());
    }

    match cli.command {
        Commands::Run {
            input,
            profile,
            stages,
        } => {
            if let Some(profile) = profile {
                config.pipeline.profile = profile;
                config.pipeline.stages = None;
            }
            if !stages.is_empty() {
                config.pipeline.stages = Some(stages);
            }
            commands::run_file(config, &input, Arc::new(UnavailableLoader))
        }
        Commands::Vad { input } => {
            config.validate()?;
            let stdout = std::io::stdout();
            commands::vad_file(&config, &input, &mut stdout.lock()).map(|_| ())
        }
        Commands::Worker => {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            commands::run_worker_stdio(
                stdin.lock(),
                &mut stdout.lock(),
                Arc::new(UnavailableLoader),
            )
        }
        Commands::InitConfig { output } => commands::init_config(output).map(|_| ()),
        Commands::ShowConfig => commands::show_config(&config, config_path.as_deref()),
    }
}
