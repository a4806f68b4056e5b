use super::FrameSource;
use crate::error::PipelineError;
use anyhow::Result;
use opencv::{
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_HW_ACCELERATION,
        VIDEO_ACCELERATION_ANY,
    },
};
use std::path::Path;

const FALLBACK_FPS: f64 = 30.0;

/// Frame source backed by OpenCV's `VideoCapture`.
pub struct OpencvReader {
    capture: VideoCapture,
    source_fps: f64,
    total_frames: usize,
    released: bool,
}

impl OpencvReader {
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let source_open = |reason: String| PipelineError::SourceOpen {
            path: path.to_path_buf(),
            reason,
        };
        let path_str = path
            .to_str()
            .ok_or_else(|| source_open("path is not valid UTF-8".to_string()))?;

        let mut capture =
            VideoCapture::from_file(path_str, CAP_ANY).map_err(|e| source_open(e.to_string()))?;
        if !capture.is_opened().map_err(|e| source_open(e.to_string()))? {
            return Err(source_open("container could not be opened".to_string()));
        }

        // Try to enable hardware acceleration (VideoToolbox on macOS, VA-API on Linux, etc.)
        match capture.set(CAP_PROP_HW_ACCELERATION, VIDEO_ACCELERATION_ANY as f64) {
            Ok(true) => tracing::debug!("OpencvReader: hardware acceleration enabled"),
            _ => tracing::debug!("OpencvReader: hardware acceleration not available"),
        }

        let mut fps = capture.get(CAP_PROP_FPS).unwrap_or(0.0);
        if !(fps > 0.0) {
            tracing::warn!(
                "OpencvReader: Failed to get FPS from metadata, falling back to {}",
                FALLBACK_FPS
            );
            fps = FALLBACK_FPS;
        }
        let raw_count = capture.get(CAP_PROP_FRAME_COUNT).unwrap_or(0.0);
        let total_frames = if raw_count > 0.0 {
            raw_count as usize
        } else {
            tracing::warn!("OpencvReader: frame count unknown, duration cap will bound the run");
            usize::MAX
        };

        tracing::info!(
            "OpencvReader: opened {}, duration={:.2}s, fps={:.2}, stream_frames={}",
            path_str,
            raw_count / fps,
            fps,
            raw_count
        );

        Ok(Self {
            capture,
            source_fps: fps,
            total_frames,
            released: false,
        })
    }
}

impl FrameSource for OpencvReader {
    fn frame_count(&self) -> usize {
        self.total_frames
    }

    fn source_fps(&self) -> f64 {
        self.source_fps
    }

    fn next_frame(&mut self) -> Result<Option<Mat>> {
        if self.released {
            return Ok(None);
        }
        let mut frame = Mat::default();
        let success = self.capture.read(&mut frame)?;
        if !success || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.capture.release() {
            tracing::warn!("OpencvReader: failed to release capture: {}", e);
        }
    }
}

impl Drop for OpencvReader {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_is_source_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.mp4");
        match OpencvReader::open(&path) {
            Err(PipelineError::SourceOpen { path: p, .. }) => assert_eq!(p, path),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opening a missing file should fail"),
        }
    }

    #[test]
    fn test_open_garbage_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.mp4");
        std::fs::write(&path, b"definitely not a video").unwrap();
        assert!(matches!(
            OpencvReader::open(&path),
            Err(PipelineError::SourceOpen { .. })
        ));
    }
}
