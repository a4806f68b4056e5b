use std::path::PathBuf;

/// Fatal outcomes of a counting run. Each variant maps to one user-visible message.
#[derive(Debug)]
pub enum PipelineError {
    /// Rejected before the run starts.
    Configuration(String),
    /// Uploaded bytes could not be persisted for decoding.
    Upload(std::io::Error),
    /// The video container could not be opened.
    SourceOpen { path: PathBuf, reason: String },
    /// The decoder failed after the source was opened.
    FrameRead { frame_index: usize, reason: String },
    /// The detector/tracker failed on a processed frame.
    Inference { frame_index: usize, reason: String },
}

impl PipelineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }

    /// Short machine-readable kind, used in status payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Upload(_) => "upload",
            PipelineError::SourceOpen { .. } => "source_open",
            PipelineError::FrameRead { .. } => "frame_read",
            PipelineError::Inference { .. } => "inference",
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Upload(err)
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            PipelineError::Upload(e) => write!(f, "Failed to store uploaded video: {}", e),
            PipelineError::SourceOpen { path, reason } => {
                write!(f, "Unable to open video {}: {}", path.display(), reason)
            }
            PipelineError::FrameRead {
                frame_index,
                reason,
            } => write!(f, "Failed to read frame {}: {}", frame_index, reason),
            PipelineError::Inference {
                frame_index,
                reason,
            } => write!(f, "Detection failed on frame {}: {}", frame_index, reason),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Upload(e) => Some(e),
            _ => None,
        }
    }
}
