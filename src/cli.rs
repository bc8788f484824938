use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue media files (or directories of them) and generate subtitles
    Run {
        /// Input files or directories
        #[arg(short, long, num_args = 1.., required = true)]
        input: Vec<PathBuf>,

        /// Source language code, or "auto"
        #[arg(short, long, default_value = "auto")]
        language: String,

        /// Whisper model name (defaults to transcriber.default_model)
        #[arg(short, long)]
        model: Option<String>,

        /// Translate subtitles into this language
        #[arg(short, long)]
        translate_to: Option<String>,

        /// Also burn the subtitles into a copy of each video
        #[arg(long)]
        hard_sub: bool,

        /// Output directory for subtitle files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Write the default configuration as TOML
    Config {
        /// Destination file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
}
