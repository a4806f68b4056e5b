use crate::config::{DetectorSettings, RunConfiguration};
use crate::pipeline::detection::shared_detector;
use crate::pipeline::orchestrator::{Pipeline, RunObserver};
use crate::pipeline::types::{Detection, ProgressUpdate, RunState};
use crate::run_artifacts::RunReport;
use crate::run_context::VideoInput;
use crate::video::opencv_reader::OpencvReader;
use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use opencv::core::{Mat, Vector};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Terminal observer: drives a progress bar and optionally saves annotated frames.
pub struct VideoSession {
    pb: ProgressBar,
    frames_dir: Option<PathBuf>,
}

impl VideoSession {
    pub fn new(frames_dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = &frames_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create frames dir {}", dir.display()))?;
        }

        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({msg})")?
                .progress_chars("#>-"),
        );

        Ok(Self { pb, frames_dir })
    }
}

impl RunObserver for VideoSession {
    fn on_state(&mut self, state: RunState) {
        match state {
            RunState::Done => self.pb.finish_with_message("Done"),
            RunState::Failed => self.pb.abandon_with_message("Failed"),
            _ => tracing::debug!("Run state: {:?}", state),
        }
    }

    fn on_frame(&mut self, frame_index: usize, frame: &Mat, _detections: &[Detection]) {
        let Some(dir) = &self.frames_dir else {
            return;
        };
        let filename = format!("frame_{:06}.jpg", frame_index);
        let path = dir.join(&filename);
        let written = path
            .to_str()
            .ok_or_else(|| anyhow!("non UTF-8 path"))
            .and_then(|p| Ok(opencv::imgcodecs::imwrite(p, frame, &Vector::new())?));
        if let Err(e) = written {
            tracing::warn!("Failed to write annotated frame {}: {}", filename, e);
        }
    }

    fn on_progress(&mut self, update: &ProgressUpdate) {
        if self.pb.length() != Some(update.frames_total as u64) {
            self.pb.set_length(update.frames_total as u64);
        }
        self.pb.set_position(update.frames_done as u64);
        let eta = update
            .eta_seconds
            .map(|s| format!("{:.1}s left", s))
            .unwrap_or_else(|| "eta n/a".to_string());
        self.pb
            .set_message(format!("{} processed, {}", update.processed_frames, eta));
    }
}

/// Processes a local video file end to end with the shared detector.
pub fn process_video(
    video_path: &Path,
    config: RunConfiguration,
    detector_settings: &DetectorSettings,
    frames_dir: Option<PathBuf>,
    stop: Arc<AtomicBool>,
) -> Result<RunReport> {
    let detector = shared_detector(detector_settings)?;
    let mut detector = detector
        .lock()
        .map_err(|_| anyhow!("Detector mutex poisoned"))?;
    detector.set_min_confidence(detector_settings.min_confidence);

    let mut session = VideoSession::new(frames_dir)?;
    let mut pipeline = Pipeline::new(config, &mut *detector)?;
    let report = pipeline.run_video(
        VideoInput::Path(video_path.to_path_buf()),
        OpencvReader::open,
        &mut session,
        &stop,
    )?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{self, Scalar};
    use opencv::prelude::*;

    #[test]
    fn test_session_saves_processed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let frames_dir = dir.path().join("frames");
        let mut session = VideoSession::new(Some(frames_dir.clone())).unwrap();

        let frame =
            Mat::new_rows_cols_with_default(32, 32, core::CV_8UC3, Scalar::all(0.0)).unwrap();
        session.on_frame(15, &frame, &[]);

        assert!(frames_dir.join("frame_000015.jpg").exists());
    }

    #[test]
    fn test_session_tracks_progress_length() {
        let mut session = VideoSession::new(None).unwrap();
        session.on_progress(&ProgressUpdate {
            frames_done: 3,
            frames_total: 90,
            progress_fraction: 3.0 / 90.0,
            processed_frames: 1,
            eta_seconds: Some(2.9),
        });
        assert_eq!(session.pb.length(), Some(90));
        assert_eq!(session.pb.position(), 3);
    }
}
