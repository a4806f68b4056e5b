// Pipeline orchestrator: drives one counting run from open to report
//
// Owns the frame loop and the run state machine. Every exit path
// (exhaustion, duration cap, stop request, fatal error) passes through
// Finalizing, which releases the frame source before totals are computed.

use crate::config::RunConfiguration;
use crate::error::PipelineError;
use crate::pipeline::annotate::Annotator;
use crate::pipeline::detection::DetectorTracker;
use crate::pipeline::ledger::AggregationLedger;
use crate::pipeline::preprocess::normalize;
use crate::pipeline::progress::{eta_seconds, frames_to_process};
use crate::pipeline::sampler::should_process;
use crate::pipeline::tracker::{TrackerConfig, TrackingContext};
use crate::pipeline::types::{Detection, ProgressUpdate, RunState};
use crate::run_artifacts::RunReport;
use crate::run_context::VideoInput;
use crate::video::FrameSource;
use chrono::Utc;
use opencv::core::Mat;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Receives everything a run publishes while it executes.
pub trait RunObserver {
    fn on_state(&mut self, _state: RunState) {}

    /// Called for each processed frame after annotation.
    fn on_frame(&mut self, _frame_index: usize, _frame: &Mat, _detections: &[Detection]) {}

    /// Called once per pulled frame, processed or skipped.
    fn on_progress(&mut self, _update: &ProgressUpdate) {}
}

/// What the frame loop hands to Finalizing.
struct StreamOutcome {
    ledger: AggregationLedger,
    frames_read: usize,
    processed_frames: usize,
    frames_total: usize,
    native_fps: f64,
    cancelled: bool,
}

pub struct Pipeline<'a, D: DetectorTracker> {
    config: RunConfiguration,
    detector: &'a mut D,
    annotator: Annotator,
    tracker_config: TrackerConfig,
}

impl<'a, D: DetectorTracker> Pipeline<'a, D> {
    /// Validates `config`; invalid configurations never reach Initializing.
    pub fn new(config: RunConfiguration, detector: &'a mut D) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            detector,
            annotator: Annotator::default(),
            tracker_config: TrackerConfig::default(),
        })
    }

    /// Opens `input`, runs it to completion and disposes of the input.
    ///
    /// Uploaded inputs are deleted before this returns, whatever the outcome.
    pub fn run_video<S, O, R>(
        &mut self,
        input: VideoInput,
        open_source: O,
        observer: &mut R,
        stop: &AtomicBool,
    ) -> Result<RunReport, PipelineError>
    where
        S: FrameSource,
        O: FnOnce(&Path) -> Result<S, PipelineError>,
        R: RunObserver,
    {
        let started = Instant::now();
        observer.on_state(RunState::Initializing);

        let outcome = match open_source(input.path()) {
            Ok(mut source) => self.stream_and_release(&mut source, observer, stop),
            Err(e) => {
                observer.on_state(RunState::Finalizing);
                Err(e)
            }
        };
        drop(input);

        self.finish(outcome, observer, started)
    }

    /// Runs an already opened source. The source is released before returning.
    #[cfg(test)]
    pub fn run<S, R>(
        &mut self,
        source: &mut S,
        observer: &mut R,
        stop: &AtomicBool,
    ) -> Result<RunReport, PipelineError>
    where
        S: FrameSource,
        R: RunObserver,
    {
        let started = Instant::now();
        observer.on_state(RunState::Initializing);
        let outcome = self.stream_and_release(source, observer, stop);
        self.finish(outcome, observer, started)
    }

    fn stream_and_release<S, R>(
        &mut self,
        source: &mut S,
        observer: &mut R,
        stop: &AtomicBool,
    ) -> Result<StreamOutcome, PipelineError>
    where
        S: FrameSource,
        R: RunObserver,
    {
        let streamed = self.stream(source, observer, stop);
        observer.on_state(RunState::Finalizing);
        source.release();
        streamed
    }

    fn stream<S, R>(
        &mut self,
        source: &mut S,
        observer: &mut R,
        stop: &AtomicBool,
    ) -> Result<StreamOutcome, PipelineError>
    where
        S: FrameSource,
        R: RunObserver,
    {
        let native_fps = source.source_fps();
        let frames_total = source
            .frame_count()
            .min(frames_to_process(self.config.max_duration_seconds, native_fps));
        let stride = self.config.frame_stride;

        tracing::info!(
            "Processing {} frames at {:.1} FPS (stride {}, {} classes)",
            frames_total,
            native_fps,
            stride,
            self.detector.class_names().len()
        );

        let mut context = TrackingContext::new(self.tracker_config);
        let mut ledger = AggregationLedger::new();
        let mut frame_index = 0;
        let mut processed_frames = 0;
        let mut cancelled = false;

        observer.on_state(RunState::Streaming);

        while frame_index < frames_total {
            if stop.load(Ordering::Relaxed) {
                tracing::info!("Stop requested at frame {}", frame_index);
                cancelled = true;
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::debug!("Source exhausted after {} frames", frame_index);
                    break;
                }
                Err(e) => {
                    return Err(PipelineError::FrameRead {
                        frame_index,
                        reason: format!("{:#}", e),
                    })
                }
            };

            if should_process(frame_index, stride) {
                let mut frame = normalize(frame, self.config.max_frame_dimension).map_err(|e| {
                    PipelineError::FrameRead {
                        frame_index,
                        reason: format!("resize failed: {:#}", e),
                    }
                })?;

                let detections = self.detector.infer(&frame, &mut context).map_err(|e| {
                    PipelineError::Inference {
                        frame_index,
                        reason: format!("{:#}", e),
                    }
                })?;

                // Annotation is display-only; a drawing failure never affects counts
                if let Err(e) = self.annotator.annotate(&mut frame, &detections) {
                    tracing::warn!("Failed to annotate frame {}: {}", frame_index, e);
                }
                observer.on_frame(frame_index, &frame, &detections);

                ledger.record(&detections);
                processed_frames += 1;
            }

            let frames_done = frame_index + 1;
            observer.on_progress(&ProgressUpdate {
                frames_done,
                frames_total,
                progress_fraction: frames_done as f64 / frames_total as f64,
                processed_frames,
                eta_seconds: eta_seconds(frames_total - frames_done, native_fps).ok(),
            });

            frame_index += 1;
        }

        Ok(StreamOutcome {
            ledger,
            frames_read: frame_index,
            processed_frames,
            frames_total,
            native_fps,
            cancelled,
        })
    }

    fn finish<R: RunObserver>(
        &self,
        outcome: Result<StreamOutcome, PipelineError>,
        observer: &mut R,
        started: Instant,
    ) -> Result<RunReport, PipelineError> {
        match outcome {
            Ok(outcome) => {
                let report = RunReport {
                    class_totals: outcome.ledger.finalize(),
                    processed_frame_count: outcome.processed_frames,
                    frames_read: outcome.frames_read,
                    frames_total: outcome.frames_total,
                    native_fps: outcome.native_fps,
                    cancelled: outcome.cancelled,
                    elapsed_seconds: started.elapsed().as_secs_f64(),
                    finished_at: Utc::now(),
                };
                tracing::info!(
                    "Run finished: {} processed frames, {} tracks, {} observations",
                    report.processed_frame_count,
                    outcome.ledger.track_count(),
                    report.total_observations()
                );
                observer.on_state(RunState::Done);
                Ok(report)
            }
            Err(e) => {
                tracing::error!("Run failed: {}", e);
                observer.on_state(RunState::Failed);
                Err(e)
            }
        }
    }
}
