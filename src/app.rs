//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and layers them over the loaded settings
//! - ingests measurement files (or generates synthetic sources)
//! - runs the global fit and evaluates the curve
//! - prints reports/plots
//! - writes the fit report, figure and optional exports

use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Command, DemoArgs, FitArgs, PlotArgs};
use crate::data::{DEMO_SOURCES, SampleConfig, generate_sample};
use crate::error::AppError;
use crate::settings::Settings;

pub mod pipeline;

/// Entry point for the `geff` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        settings.log.level = level.clone();
    }
    crate::logging::setup_log(&settings.log.level)?;

    match cli.command {
        Command::Fit(args) => handle_fit(args, settings),
        Command::Plot(args) => handle_plot(args, &settings),
        Command::Demo(args) => handle_demo(args, settings),
    }
}

fn handle_fit(args: FitArgs, mut settings: Settings) -> Result<(), AppError> {
    args.fit.apply(&mut settings);
    args.output.apply(&mut settings);

    let ingest = crate::io::load_measurements(&args.efficiency, &args.normalization)?;
    println!("{}", crate::report::format_ingest_summary(&ingest));
    let run = pipeline::run_fit(ingest.set, &settings)?;
    present(&run, &settings)
}

fn handle_demo(args: DemoArgs, mut settings: Settings) -> Result<(), AppError> {
    args.fit.apply(&mut settings);
    args.output.apply(&mut settings);

    let sample = generate_sample(
        &DEMO_SOURCES,
        &SampleConfig {
            seed: args.seed,
            rel_error: args.rel_error,
            ..SampleConfig::default()
        },
    )?;
    for (s, (name, scale)) in sample.names.iter().zip(&sample.true_scales).enumerate() {
        info!("demo source #{s} is {name} with true scale {scale}");
    }

    let run = pipeline::run_fit(sample.set, &settings)?;
    present(&run, &settings)
}

fn handle_plot(args: PlotArgs, settings: &Settings) -> Result<(), AppError> {
    let curve = crate::io::read_curve_json(&args.curve)?;

    let width = args.width.unwrap_or(settings.output.plot_width);
    let height = args.height.unwrap_or(settings.output.plot_height);
    println!("{}", crate::plot::render_ascii_plot_from_curve_file(&curve, width, height));

    if let Some(path) = &args.svg {
        let size = (settings.output.svg_width, settings.output.svg_height);
        crate::plot::render_svg(path, &[], &curve.grid, size)?;
        info!("figure written to {}", path.display());
    }
    Ok(())
}

/// Print the terminal report and write every configured output.
fn present(run: &pipeline::RunOutput, settings: &Settings) -> Result<(), AppError> {
    let out = &settings.output;

    println!("{}", crate::report::format_fit_summary(&run.fit));
    println!("{}", crate::report::format_covariance(&run.fit));
    println!("{}", crate::report::format_correlation(&run.fit));
    println!(
        "{}",
        crate::report::format_efficiency_table(&run.curve, settings.fit.range_start, settings.fit.range_end)?
    );

    if out.plot {
        println!(
            "{}",
            crate::plot::render_ascii_plot(&run.points, &run.grid, out.plot_width, out.plot_height)
        );
    }

    if let Some(path) = &out.fit_result {
        crate::io::write_fit_result(path, &run.fit)?;
        info!("fit report written to {}", path.display());
    }
    if let Some(path) = &out.svg {
        crate::plot::render_svg(path, &run.points, &run.grid, (out.svg_width, out.svg_height))?;
        info!("figure written to {}", path.display());
    }
    if let Some(path) = &out.curve_json {
        crate::io::write_curve_json(path, &run.curve_file())?;
        info!("curve written to {}", path.display());
    }
    if let Some(path) = &out.curve_csv {
        crate::io::write_curve_csv(path, run.grid.points())?;
        info!("curve table written to {}", path.display());
    }

    Ok(())
}
