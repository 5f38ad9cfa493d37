use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "livesim")]
#[command(author, version, about = "Live DASH simulation from looping VoD content")]
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
    /// Analyze content and write segment timelines
    Analyze {
        /// Representations to analyze (all configured if empty)
        representations: Vec<String>,
    },

    /// Write one live init or media segment to a file
    Segment {
        /// Representation to serve
        #[arg(required = true)]
        representation: String,

        /// Live segment number (init segment if omitted)
        #[arg(short, long)]
        number: Option<u32>,

        /// Second representation to mux with
        #[arg(long)]
        mux: Option<String>,

        /// Wall-clock time in seconds since the epoch (defaults to now)
        #[arg(long)]
        at: Option<f64>,

        /// Output file
        #[arg(short, long, required = true)]
        output: PathBuf,
    },

    /// Print the availability window
    Window {
        /// Wall-clock time in seconds since the epoch (defaults to now)
        #[arg(long)]
        at: Option<f64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },
}
