use std::{path::PathBuf, process};

use clap::{Parser, ValueEnum};
use log::{error, info, warn};

use dae2sc::convert::{ConversionReport, Severity, convert_dae_animations, convert_dae_to_scene};
use dae2sc::settings::{ImportSettings, UpAxis, load_import_settings};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UpAxisArg {
    Y,
    Z,
}

#[derive(Parser, Debug)]
#[command(name = "dae2sc")]
#[command(about = "Converts Collada documents into native scenes and animations")]
struct CliArgs {
    /// Only bake animation clips into .anim files.
    #[arg(long)]
    animations_only: bool,

    /// Import settings JSON; flags below override its values.
    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long, value_enum)]
    up_axis: Option<UpAxisArg>,

    /// Meters per output unit.
    #[arg(long)]
    unit_scale: Option<f32>,

    /// Directory for produced files; defaults to each input's directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long, short)]
    verbose: bool,

    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn main() {
    let args = CliArgs::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let settings = match resolve_settings(&args) {
        Ok(settings) => settings,
        Err(err) => {
            error!("{err:#}");
            process::exit(2);
        }
    };

    let mut failed = 0usize;
    for input in &args.inputs {
        let result = if args.animations_only {
            convert_dae_animations(input, args.output_dir.as_deref(), &settings)
        } else {
            convert_dae_to_scene(input, args.output_dir.as_deref(), &settings)
        };
        match result {
            Ok(report) => print_report(&report),
            Err(err) => {
                failed += 1;
                error!("{}: {err:#}", input.display());
            }
        }
    }

    if failed > 0 {
        error!("{} of {} documents failed", failed, args.inputs.len());
        process::exit(1);
    }
}

fn resolve_settings(args: &CliArgs) -> anyhow::Result<ImportSettings> {
    let mut settings = match &args.settings {
        Some(path) => load_import_settings(path)?,
        None => ImportSettings::default(),
    };
    if let Some(axis) = args.up_axis {
        settings.target_up_axis = match axis {
            UpAxisArg::Y => UpAxis::Y,
            UpAxisArg::Z => UpAxis::Z,
        };
    }
    if let Some(unit_scale) = args.unit_scale {
        settings.unit_scale = unit_scale;
    }
    Ok(settings)
}

fn print_report(report: &ConversionReport) {
    let input = report.input_path.display();
    for issue in &report.issues {
        match issue.severity {
            Severity::Error => error!("{}: [{}] {}", input, issue.code, issue.message),
            Severity::Warning => warn!("{}: [{}] {}", input, issue.code, issue.message),
            Severity::Info => info!("{}: [{}] {}", input, issue.code, issue.message),
        }
    }
    if let Some(scene_path) = &report.scene_path {
        println!(
            "{} -> {} (nodes {}, meshes {}, skinned {}, materials {}, animations {})",
            report.input_path.display(),
            scene_path.display(),
            report.node_count,
            report.mesh_count,
            report.skinned_mesh_count,
            report.material_count,
            report.animation_count
        );
    }
    for path in &report.animation_paths {
        println!("{} -> {}", report.input_path.display(), path.display());
    }
}
