use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clipforge")]
#[command(author, version, about = "Media edit pipelines compiled to ffmpeg")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile and execute a pipeline file
    Run {
        /// Pipeline JSON file
        #[arg(required = true)]
        pipeline: PathBuf,

        /// Print the execution result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Execute several pipeline files concurrently
    Batch {
        /// Pipeline JSON files
        #[arg(required = true)]
        pipelines: Vec<PathBuf>,

        /// Maximum concurrent jobs (defaults to the config, then CPU count)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Print the execution results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compile a pipeline and print the program without executing it
    Compile {
        /// Pipeline JSON file
        #[arg(required = true)]
        pipeline: PathBuf,
    },

    /// Probe a media file and display its streams
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate the configuration file
    ValidateConfig,

    /// Display version information
    Version,
}
