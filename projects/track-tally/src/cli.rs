use clap::{Args as ClapArgs, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Count tracked objects in a local video file
    Run(RunArgs),
    /// Show what a sampling configuration will cost before running it
    Estimate(EstimateArgs),
    /// Serve the HTTP API for uploads and live progress
    Serve(ServeArgs),
    /// Print the class totals of a saved run report
    Report(ReportArgs),
}

#[derive(ClapArgs, Debug)]
pub struct SamplingArgs {
    /// Run detection on every Nth frame
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..=30))]
    pub frame_stride: u32,

    /// Maximum number of seconds of video to process
    #[arg(long, default_value_t = 60.0)]
    pub max_duration: f64,
}

#[derive(ClapArgs, Debug)]
pub struct DetectorArgs {
    /// Path to the RT-DETR ONNX model
    #[arg(long, env = "TRACK_TALLY_MODEL")]
    pub model: String,

    /// Detections below this confidence are discarded
    #[arg(long, default_value_t = 0.25)]
    pub min_confidence: f32,
}

#[derive(ClapArgs, Debug)]
pub struct RunArgs {
    /// Video file to process
    pub video: PathBuf,

    #[command(flatten)]
    pub sampling: SamplingArgs,

    /// Frames larger than this are downscaled before detection
    #[arg(long, default_value_t = 640)]
    pub max_dimension: u32,

    #[command(flatten)]
    pub detector: DetectorArgs,

    /// Directory for annotated JPEGs of processed frames
    #[arg(long)]
    pub save_frames: Option<PathBuf>,

    /// Write the run report as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct EstimateArgs {
    #[command(flatten)]
    pub sampling: SamplingArgs,

    /// Frame rate to assume for the source video
    #[arg(long, default_value_t = 30.0)]
    pub fps: f64,
}

#[derive(ClapArgs, Debug)]
pub struct ReportArgs {
    /// JSON report written by `run --report`
    pub path: PathBuf,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    /// Host to bind to
    #[arg(long, env = "TRACK_TALLY_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to bind to
    #[arg(long, env = "TRACK_TALLY_PORT", default_value_t = 12206)]
    pub port: u16,

    /// Path to the RT-DETR ONNX model
    #[arg(long, env = "TRACK_TALLY_MODEL")]
    pub model: String,

    /// Detections below this confidence are discarded
    #[arg(long, default_value_t = 0.25)]
    pub min_confidence: f32,

    /// Largest accepted upload, in megabytes
    #[arg(long, env = "TRACK_TALLY_MAX_UPLOAD_MB", default_value_t = 200)]
    pub max_upload_mb: usize,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let args = Args::try_parse_from([
            "track-tally",
            "run",
            "clip.mp4",
            "--model",
            "rtdetr.onnx",
        ])
        .unwrap();
        let Command::Run(run) = args.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(run.video, PathBuf::from("clip.mp4"));
        assert_eq!(run.sampling.frame_stride, 5);
        assert_eq!(run.sampling.max_duration, 60.0);
        assert_eq!(run.max_dimension, 640);
        assert!(run.report.is_none());
    }

    #[test]
    fn test_serve_upload_limit_default() {
        let args =
            Args::try_parse_from(["track-tally", "serve", "--model", "rtdetr.onnx"]).unwrap();
        let Command::Serve(serve) = args.command else {
            panic!("expected serve subcommand");
        };
        assert_eq!(serve.max_upload_mb, 200);
    }

    #[test]
    fn test_stride_out_of_range_rejected() {
        let res = Args::try_parse_from(["track-tally", "estimate", "--frame-stride", "31"]);
        assert!(res.is_err());
        let res = Args::try_parse_from(["track-tally", "estimate", "--frame-stride", "0"]);
        assert!(res.is_err());
    }
}
