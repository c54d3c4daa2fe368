//! voxform CLI - Voice Transformation Engine
//!
//! Command-line interface for the voxform voice engine.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use voxform::cli::commands::{self, Library};
use voxform::cli::{Cli, Commands, PresetCommand};
use voxform::engine::io::ExportOptions;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "voxform=debug" } else { "voxform=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("voxform v{}", env!("CARGO_PKG_VERSION"));

    let mut library = commands::open_library(cli.preset_dir.as_deref())
        .context("failed to open preset library")?;

    match cli.command {
        Some(cmd) => handle_command(cmd, &mut library),
        None => {
            println!("voxform v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands, library: &mut Library) -> anyhow::Result<()> {
    match cmd {
        Commands::Render {
            input,
            output,
            source,
            bit_depth,
            sample_rate,
            normalize,
        } => {
            let settings = commands::resolve_settings(&source, library)?;
            let options = ExportOptions {
                bit_depth,
                sample_rate,
                normalize,
                ..ExportOptions::default()
            };
            commands::render(&input, &output, &settings, &options)
                .with_context(|| format!("failed to render {}", input.display()))?;
        }
        Commands::Analyze { input, json } => commands::analyze(&input, json)?,
        Commands::Qa {
            input,
            source,
            json,
        } => {
            let settings = commands::resolve_settings(&source, library)?;
            commands::qa(&input, &settings, json)?;
        }
        Commands::Batch {
            input_dir,
            output_dir,
            source,
            quality,
        } => {
            let settings = commands::resolve_settings(&source, library)?;
            commands::batch(&input_dir, &output_dir, &settings, quality)?;
        }
        Commands::Presets(preset_cmd) => match preset_cmd {
            PresetCommand::List { search } => commands::list_presets(library, search.as_deref())?,
            PresetCommand::Show { id } => commands::show_preset(library, &id)?,
            PresetCommand::Create {
                name,
                settings,
                description,
                tags,
            } => commands::create_preset(library, &name, &description, &settings, &tags)?,
            PresetCommand::Delete { id } => commands::delete_preset(library, &id)?,
            PresetCommand::Export { output, ids } => {
                commands::export_presets(library, &output, &ids)?
            }
            PresetCommand::Import { input } => commands::import_presets(library, &input)?,
        },
    }
    Ok(())
}
