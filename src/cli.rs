use clap::{Parser, Subcommand};
use std::path::PathBuf;

use speechpipe::{PipelineProfile, Stage};

#[derive(Parser, Debug)]
#[command(
    name = "speechpipe",
    version,
    about = "Voice activity detection with wakeword and keyword stages"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the speech pipeline over a WAV file and print events as JSON lines
    Run {
        /// Mono WAV file at the configured sample rate
        #[arg(short, long)]
        input: PathBuf,

        /// Stage preset (overrides the config file)
        #[arg(long)]
        profile: Option<PipelineProfile>,

        /// Explicit stage, repeatable (overrides the profile)
        #[arg(long = "stage")]
        stages: Vec<Stage>,
    },

    /// Run calibration and VAD only, printing activity changes
    Vad {
        /// Mono WAV file at the configured sample rate
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Speak the JSON worker protocol over stdin/stdout
    Worker,

    /// Write a commented default config file
    InitConfig {
        /// Destination (defaults to the platform config directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    ShowConfig,
}
