mod cli;
mod config;
mod error;
mod pipeline;
mod run_artifacts;
mod run_context;
mod video;
mod web;

use anyhow::Result;
use cli::{Args, Command, EstimateArgs, ReportArgs, RunArgs};
use config::{DetectorSettings, RunConfiguration};
use pipeline::progress::RunEstimate;
use run_artifacts::RunReport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use web::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    match args.command {
        Command::Run(run) => tokio::task::spawn_blocking(move || run_command(run)).await??,
        Command::Estimate(estimate) => estimate_command(estimate)?,
        Command::Serve(serve) => run_server(serve).await?,
        Command::Report(report) => report_command(report)?,
    }

    Ok(())
}

fn run_command(args: RunArgs) -> Result<()> {
    let config =
        RunConfiguration::from_surface(args.sampling.frame_stride, args.sampling.max_duration)?
            .with_max_frame_dimension(args.max_dimension);
    config.validate()?;
    let detector = DetectorSettings {
        model_path: args.detector.model,
        min_confidence: args.detector.min_confidence,
    };

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Stop requested, finishing current frame");
        stop_handler.store(true, Ordering::Relaxed);
    })?;

    let report = video::processor::process_video(
        &args.video,
        config,
        &detector,
        args.save_frames,
        stop,
    )?;

    if let Some(path) = &args.report {
        run_artifacts::write_report(&report, path)?;
        tracing::info!("Wrote report to {}", path.display());
    }

    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Counting results:");
    for (label, total) in &report.class_totals {
        println!("  {}: {}", label, total);
    }
    if report.cancelled {
        println!("Stopped early after {} frames.", report.frames_read);
    }
    println!("Done! {} frames processed.", report.processed_frame_count);
}

fn report_command(args: ReportArgs) -> Result<()> {
    let report = run_artifacts::read_report(&args.path)?;
    print_report(&report);
    Ok(())
}

fn estimate_command(args: EstimateArgs) -> Result<()> {
    let config =
        RunConfiguration::from_surface(args.sampling.frame_stride, args.sampling.max_duration)?;
    println!("{}", RunEstimate::new(&config, args.fps));
    Ok(())
}
