// Run configuration: validated once, immutable for the lifetime of a run.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FRAME_STRIDE: u32 = 5;
pub const DEFAULT_MAX_DURATION_SECS: f64 = 60.0;
pub const DEFAULT_MAX_DIMENSION: u32 = 640;

/// Bounds accepted from the user-facing surfaces (CLI flags, HTTP form fields).
pub const SURFACE_MAX_STRIDE: u32 = 30;
pub const SURFACE_MIN_DURATION_SECS: f64 = 5.0;
pub const SURFACE_MAX_DURATION_SECS: f64 = 3e8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub frame_stride: u32,
    pub max_duration_seconds: f64,
    pub max_frame_dimension: u32,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            frame_stride: DEFAULT_FRAME_STRIDE,
            max_duration_seconds: DEFAULT_MAX_DURATION_SECS,
            max_frame_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

impl RunConfiguration {
    pub fn new(
        frame_stride: u32,
        max_duration_seconds: f64,
        max_frame_dimension: u32,
    ) -> Result<Self, PipelineError> {
        let config = Self {
            frame_stride,
            max_duration_seconds,
            max_frame_dimension,
        };
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from user input, enforcing the surface ranges
    /// on top of the core constraints.
    pub fn from_surface(
        frame_stride: u32,
        max_duration_seconds: f64,
    ) -> Result<Self, PipelineError> {
        if frame_stride > SURFACE_MAX_STRIDE {
            return Err(PipelineError::configuration(format!(
                "frame stride must be between 1 and {}, got {}",
                SURFACE_MAX_STRIDE, frame_stride
            )));
        }
        if !(SURFACE_MIN_DURATION_SECS..=SURFACE_MAX_DURATION_SECS).contains(&max_duration_seconds)
        {
            return Err(PipelineError::configuration(format!(
                "max duration must be between {} and {} seconds, got {}",
                SURFACE_MIN_DURATION_SECS, SURFACE_MAX_DURATION_SECS, max_duration_seconds
            )));
        }
        Self::new(frame_stride, max_duration_seconds, DEFAULT_MAX_DIMENSION)
    }

    pub fn with_max_frame_dimension(mut self, max_frame_dimension: u32) -> Self {
        self.max_frame_dimension = max_frame_dimension;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.frame_stride < 1 {
            return Err(PipelineError::configuration(
                "frame stride must be at least 1",
            ));
        }
        // NaN fails this comparison too
        if !(self.max_duration_seconds > 0.0) {
            return Err(PipelineError::configuration(format!(
                "max duration must be positive, got {}",
                self.max_duration_seconds
            )));
        }
        if self.max_frame_dimension == 0 {
            return Err(PipelineError::configuration(
                "max frame dimension must be positive",
            ));
        }
        Ok(())
    }
}

/// Settings for the bundled detector/tracker capability.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub model_path: String,
    pub min_confidence: f32,
}
