use crate::run_artifacts::RunReport;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

/// Integer pixel bounding box, `x1 < x2` and `y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    /// Truncates float corners to pixels. Returns `None` when the box collapses.
    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Self> {
        let bbox = Self {
            x1: x1 as i32,
            y1: y1 as i32,
            x2: x2 as i32,
            y2: y2 as i32,
        };
        (bbox.x1 < bbox.x2 && bbox.y1 < bbox.y2).then_some(bbox)
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() as f32 * self.height() as f32
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }
        let intersection = (ix2 - ix1) as f32 * (iy2 - iy1) as f32;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// One object found in one frame. Lives only for that frame's processing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_label: String,
    pub confidence: f32,
    pub bbox: BBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
}

/// Lifecycle of a single counting run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Initializing,
    Streaming,
    Finalizing,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

/// Emitted once per pulled frame, processed or skipped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub frames_done: usize,
    pub frames_total: usize,
    pub progress_fraction: f64,
    pub processed_frames: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
}

/// Run state shared between the worker thread and HTTP handlers
#[derive(Debug)]
pub struct ProcessingState {
    pub run_id: String,
    pub stop_requested: AtomicBool,
    pub state: RwLock<RunState>,
    pub progress: RwLock<Option<ProgressUpdate>>,
    /// Latest annotated frame, JPEG encoded
    pub latest_frame: RwLock<Option<Vec<u8>>>,
    pub frames_published: AtomicUsize,
    pub report: RwLock<Option<RunReport>>,
    pub error: RwLock<Option<String>>,
    pub start_time: std::time::Instant,
}

impl ProcessingState {
    pub fn new(run_id: String) -> Self {
        Self {
            run_id,
            stop_requested: AtomicBool::new(false),
            state: RwLock::new(RunState::Initializing),
            progress: RwLock::new(None),
            latest_frame: RwLock::new(None),
            frames_published: AtomicUsize::new(0),
            report: RwLock::new(None),
            error: RwLock::new(None),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn set_state(&self, state: RunState) {
        if let Ok(mut current) = self.state.write() {
            *current = state;
        }
    }

    pub fn current_state(&self) -> RunState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(RunState::Failed)
    }

    pub fn set_progress(&self, update: ProgressUpdate) {
        if let Ok(mut progress) = self.progress.write() {
            *progress = Some(update);
        }
    }

    pub fn publish_frame(&self, jpeg: Vec<u8>) {
        if let Ok(mut frame) = self.latest_frame.write() {
            *frame = Some(jpeg);
            self.frames_published.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn complete(&self, report: RunReport) {
        if let Ok(mut slot) = self.report.write() {
            *slot = Some(report);
        }
    }

    pub fn fail(&self, message: String) {
        if let Ok(mut slot) = self.error.write() {
            *slot = Some(message);
        }
        self.set_state(RunState::Failed);
    }

    pub fn to_status_json(&self) -> serde_json::Value {
        let state = self.current_state();
        let progress = self.progress.read().ok().and_then(|p| *p);
        // Totals are only surfaced once the run reached Done
        let report = if state == RunState::Done {
            self.report.read().ok().and_then(|r| r.clone())
        } else {
            None
        };
        let error = self.error.read().ok().and_then(|e| e.clone());

        serde_json::json!({
            "run_id": self.run_id,
            "state": state,
            "progress": progress,
            "frames_published": self.frames_published.load(Ordering::Relaxed),
            "stop_requested": self.stop_requested.load(Ordering::Relaxed),
            "elapsed_seconds": self.start_time.elapsed().as_secs_f64(),
            "report": report,
            "error": error,
        })
    }
}
