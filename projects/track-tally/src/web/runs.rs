// Run registry: background execution of uploaded videos
//
// Each run executes on its own thread and publishes into a shared
// `ProcessingState` that HTTP handlers read.

use crate::config::DetectorSettings;
use crate::pipeline::annotate::encode_jpeg;
use crate::pipeline::detection::shared_detector;
use crate::pipeline::orchestrator::{Pipeline, RunObserver};
use crate::pipeline::types::{Detection, ProcessingState, ProgressUpdate, RunState};
use crate::run_artifacts::RunReport;
use crate::run_context::{RunContext, VideoInput};
use crate::video::opencv_reader::OpencvReader;
use anyhow::{anyhow, Result};
use opencv::core::Mat;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::thread;

// Global registry of runs started by this process
lazy_static::lazy_static! {
    static ref RUN_REGISTRY: RwLock<HashMap<String, Arc<ProcessingState>>> =
        RwLock::new(HashMap::new());
}

pub fn get_run(run_id: &str) -> Option<Arc<ProcessingState>> {
    RUN_REGISTRY.read().ok()?.get(run_id).cloned()
}

pub fn list_runs() -> Vec<Arc<ProcessingState>> {
    let mut runs: Vec<_> = RUN_REGISTRY
        .read()
        .map(|r| r.values().cloned().collect())
        .unwrap_or_default();
    runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
    runs
}

fn register_run(run_id: &str, state: Arc<ProcessingState>) {
    tracing::info!("Registering run: {}", run_id);
    if let Ok(mut registry) = RUN_REGISTRY.write() {
        registry.insert(run_id.to_string(), state);
    }
}

/// Request a stop; the run finishes its current frame and finalizes.
pub fn stop_run(run_id: &str) -> bool {
    if let Some(state) = get_run(run_id) {
        state.stop_requested.store(true, Ordering::Relaxed);
        true
    } else {
        false
    }
}

/// Publishes pipeline events into the shared state.
///
/// Terminal states are published by the run thread once the report or the
/// error is stored, so readers never see `Done` without totals.
struct StateObserver {
    state: Arc<ProcessingState>,
}

impl RunObserver for StateObserver {
    fn on_state(&mut self, state: RunState) {
        if !state.is_terminal() {
            self.state.set_state(state);
        }
    }

    fn on_frame(&mut self, frame_index: usize, frame: &Mat, _detections: &[Detection]) {
        match encode_jpeg(frame) {
            Ok(jpeg) => self.state.publish_frame(jpeg),
            Err(e) => tracing::warn!("Failed to encode frame {}: {}", frame_index, e),
        }
    }

    fn on_progress(&mut self, update: &ProgressUpdate) {
        self.state.set_progress(*update);
    }
}

/// Registers `ctx` and runs it on a dedicated thread.
pub fn start_run(ctx: RunContext, detector: DetectorSettings) -> Arc<ProcessingState> {
    start_run_with(ctx, move |ctx, state| execute_run(ctx, &detector, state))
}

fn start_run_with<F>(ctx: RunContext, job: F) -> Arc<ProcessingState>
where
    F: FnOnce(RunContext, &Arc<ProcessingState>) -> Result<RunReport> + Send + 'static,
{
    let state = Arc::new(ProcessingState::new(ctx.run_id.clone()));
    register_run(&ctx.run_id, state.clone());

    let worker_state = state.clone();
    thread::spawn(move || {
        let run_id = ctx.run_id.clone();
        if let VideoInput::Upload(upload) = &ctx.input {
            tracing::info!(
                "Run {} started on upload {}",
                run_id,
                upload.original_name().unwrap_or("<unnamed>")
            );
        }
        // A panic unwinds through ctx, so the upload is still removed
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(ctx, &worker_state)));
        match outcome {
            Ok(Ok(report)) => {
                worker_state.complete(report);
                worker_state.set_state(RunState::Done);
                tracing::info!("Run {} finished", run_id);
            }
            Ok(Err(e)) => {
                tracing::error!("Run {} failed: {:#}", run_id, e);
                worker_state.fail(format!("{:#}", e));
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("Run {} panicked: {}", run_id, reason);
                worker_state.fail(format!("Run crashed: {}", reason));
            }
        }
    });

    state
}

fn execute_run(
    ctx: RunContext,
    detector: &DetectorSettings,
    state: &Arc<ProcessingState>,
) -> Result<RunReport> {
    // ctx owns the upload; any early return drops it and removes the temp file
    let shared = shared_detector(detector)?;
    let mut guard = shared
        .lock()
        .map_err(|_| anyhow!("Detector crashed in a concurrent run"))?;
    guard.set_min_confidence(detector.min_confidence);

    let mut observer = StateObserver {
        state: state.clone(),
    };
    let mut pipeline = Pipeline::new(ctx.config, &mut *guard)?;
    let report = pipeline.run_video(
        ctx.input,
        OpencvReader::open,
        &mut observer,
        &state.stop_requested,
    )?;
    Ok(report)
}
