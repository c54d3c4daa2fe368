//! CLI Module
//!
//! Command-line interface for the voxform voice engine.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// voxform - voice transformation engine
#[derive(Parser, Debug)]
#[command(name = "voxform")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory of user presets (built-ins only when omitted)
    #[arg(long, global = true)]
    pub preset_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Where effect settings come from
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsSource {
    /// JSON file with effect settings
    #[arg(short, long, conflicts_with = "preset")]
    pub settings: Option<PathBuf>,

    /// Preset id to take settings from
    #[arg(short, long)]
    pub preset: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a WAV file through the effect chain
    #[command(name = "render")]
    Render {
        /// Input WAV file
        input: PathBuf,

        /// Output WAV file
        output: PathBuf,

        #[command(flatten)]
        source: SettingsSource,

        /// Output bit depth (16 or 24)
        #[arg(short, long, default_value_t = 16)]
        bit_depth: u16,

        /// Output sample rate (input rate when omitted)
        #[arg(short = 'r', long)]
        sample_rate: Option<u32>,

        /// Normalize the rendered output
        #[arg(short, long)]
        normalize: bool,
    },

    /// Print the voice profile of a WAV file
    #[command(name = "analyze")]
    Analyze {
        /// Input WAV file
        input: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run the quality check battery on a WAV file
    #[command(name = "qa")]
    Qa {
        /// Input WAV file
        input: PathBuf,

        #[command(flatten)]
        source: SettingsSource,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Render every WAV file under a directory
    #[command(name = "batch")]
    Batch {
        /// Directory to scan for .wav files
        input_dir: PathBuf,

        /// Directory for rendered files
        output_dir: PathBuf,

        #[command(flatten)]
        source: SettingsSource,

        /// Run quality checks on each rendered file
        #[arg(short, long)]
        quality: bool,
    },

    /// Manage presets
    #[command(name = "presets", subcommand)]
    Presets(PresetCommand),
}

#[derive(Subcommand, Debug)]
pub enum PresetCommand {
    /// List presets
    List {
        /// Only presets matching this text
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Print one preset as JSON
    Show {
        id: String,
    },

    /// Save settings from a JSON file as a new preset
    Create {
        name: String,

        /// JSON file with effect settings
        #[arg(short, long)]
        settings: PathBuf,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Comma-separated tags
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Delete a user preset
    Delete {
        id: String,
    },

    /// Write presets as a JSON array
    Export {
        /// Destination file
        output: PathBuf,

        /// Preset ids to export
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Import presets from a JSON array
    Import {
        input: PathBuf,
    },
}
