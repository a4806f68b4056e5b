// Progress and throughput estimates. Pure functions, no hidden state.

use crate::config::RunConfiguration;
use serde::Serialize;

/// FPS assumed for estimates made before a video is opened.
pub const NOMINAL_FPS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateError {
    /// A ratio was requested with a zero denominator.
    DivisionUndefined(&'static str),
}

impl std::fmt::Display for EstimateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EstimateError::DivisionUndefined(what) => {
                write!(f, "Division undefined: {} is zero", what)
            }
        }
    }
}

impl std::error::Error for EstimateError {}

pub fn frames_to_process(duration_seconds: f64, native_fps: f64) -> usize {
    let frames = (duration_seconds * native_fps).floor();
    if frames.is_finite() && frames > 0.0 {
        frames as usize
    } else {
        0
    }
}

pub fn estimated_processed_frames(total_frames_to_process: usize, stride: u32) -> usize {
    total_frames_to_process / stride.max(1) as usize
}

pub fn estimated_output_duration(source_duration_seconds: f64, stride: u32) -> f64 {
    source_duration_seconds / stride.max(1) as f64
}

pub fn efficiency_ratio(
    estimated_processed_frames: usize,
    total_frames_to_process: usize,
) -> Result<f64, EstimateError> {
    if total_frames_to_process == 0 {
        return Err(EstimateError::DivisionUndefined("total frames to process"));
    }
    Ok(estimated_processed_frames as f64 / total_frames_to_process as f64)
}

pub fn eta_seconds(frames_remaining: usize, native_fps: f64) -> Result<f64, EstimateError> {
    if native_fps == 0.0 {
        return Err(EstimateError::DivisionUndefined("native fps"));
    }
    Ok(frames_remaining as f64 / native_fps)
}

/// Pre-run summary of what a configuration will cost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunEstimate {
    pub assumed_fps: f64,
    pub frames_to_process: usize,
    pub processed_frames: usize,
    pub skipped_frames: usize,
    pub output_duration_seconds: f64,
    /// Output duration minus source duration (never positive)
    pub duration_delta_seconds: f64,
    pub compression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub efficiency_percent: Option<f64>,
}

impl RunEstimate {
    pub fn new(config: &RunConfiguration, assumed_fps: f64) -> Self {
        let duration = config.max_duration_seconds;
        let stride = config.frame_stride;
        let total = frames_to_process(duration, assumed_fps);
        let processed = estimated_processed_frames(total, stride);
        let output_duration = estimated_output_duration(duration, stride);

        Self {
            assumed_fps,
            frames_to_process: total,
            processed_frames: processed,
            skipped_frames: total - processed,
            output_duration_seconds: output_duration,
            duration_delta_seconds: output_duration - duration,
            compression: format!("{}:1", stride),
            efficiency_percent: efficiency_ratio(processed, total).ok().map(|r| r * 100.0),
        }
    }
}

impl std::fmt::Display for RunEstimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Estimated output duration: {:.1}s ({:+.1}s)",
            self.output_duration_seconds, self.duration_delta_seconds
        )?;
        writeln!(
            f,
            "Estimated frames:          {} (-{})",
            self.processed_frames, self.skipped_frames
        )?;
        writeln!(f, "Compression:               {}", self.compression)?;
        match self.efficiency_percent {
            Some(pct) => write!(f, "Efficiency:                {:.1}%", pct),
            None => write!(f, "Efficiency:                n/a"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_to_process_floors() {
        assert_eq!(frames_to_process(60.0, 30.0), 1800);
        assert_eq!(frames_to_process(10.0, 29.97), 299);
        assert_eq!(frames_to_process(10.0, 0.0), 0);
    }

    #[test]
    fn test_processed_never_exceeds_total() {
        for total in 0..300usize {
            for stride in 1..=30u32 {
                let processed = estimated_processed_frames(total, stride);
                assert!(processed <= total);
                if total > 0 {
                    assert_eq!(processed == total, stride == 1);
                }
            }
        }
    }

    #[test]
    fn test_output_duration() {
        assert_eq!(estimated_output_duration(60.0, 5), 12.0);
        assert_eq!(estimated_output_duration(60.0, 1), 60.0);
    }

    #[test]
    fn test_division_guards() {
        assert_eq!(
            efficiency_ratio(0, 0),
            Err(EstimateError::DivisionUndefined("total frames to process"))
        );
        assert!(eta_seconds(10, 0.0).is_err());
        assert_eq!(efficiency_ratio(360, 1800), Ok(0.2));
        assert_eq!(eta_seconds(90, 30.0), Ok(3.0));
    }

    #[test]
    fn test_run_estimate_defaults() {
        let estimate = RunEstimate::new(&RunConfiguration::default(), NOMINAL_FPS);
        assert_eq!(estimate.frames_to_process, 1800);
        assert_eq!(estimate.processed_frames, 360);
        assert_eq!(estimate.skipped_frames, 1440);
        assert_eq!(estimate.output_duration_seconds, 12.0);
        assert_eq!(estimate.duration_delta_seconds, -48.0);
        assert_eq!(estimate.compression, "5:1");
        assert_eq!(estimate.efficiency_percent, Some(20.0));
    }

    #[test]
    fn test_run_estimate_without_frames() {
        let estimate = RunEstimate::new(&RunConfiguration::default(), 0.0);
        assert_eq!(estimate.frames_to_process, 0);
        assert_eq!(estimate.efficiency_percent, None);
        assert!(estimate.to_string().contains("n/a"));
    }
}
