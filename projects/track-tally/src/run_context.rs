use crate::config::RunConfiguration;
use crate::error::PipelineError;
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::NamedTempFile;

/// Uploaded video persisted to a temporary `.mp4` file.
///
/// Bytes are appended as they arrive. The file is deleted when this value
/// is dropped, on every exit path.
#[derive(Debug)]
pub struct UploadedVideo {
    file: NamedTempFile,
    original_name: Option<String>,
    len: u64,
}

impl UploadedVideo {
    pub fn create(original_name: Option<String>) -> Result<Self, PipelineError> {
        let file = tempfile::Builder::new()
            .prefix("track-tally-")
            .suffix(".mp4")
            .tempfile()?;
        Ok(Self {
            file,
            original_name,
            len: 0,
        })
    }

    pub fn append(&mut self, chunk: &[u8]) -> Result<(), PipelineError> {
        self.file.write_all(chunk)?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    /// Flushes the file so decoders see every byte.
    pub fn finish(&mut self) -> Result<(), PipelineError> {
        self.file.flush()?;
        tracing::debug!(
            "Stored upload {:?} ({} bytes) at {}",
            self.original_name,
            self.len,
            self.file.path().display()
        );
        Ok(())
    }

    #[cfg(test)]
    pub fn from_bytes(bytes: &[u8], original_name: Option<String>) -> Result<Self, PipelineError> {
        let mut upload = Self::create(original_name)?;
        upload.append(bytes)?;
        upload.finish()?;
        Ok(upload)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn original_name(&self) -> Option<&str> {
        self.original_name.as_deref()
    }
}

/// Where a run reads its video from.
#[derive(Debug)]
pub enum VideoInput {
    /// A caller-owned file, left untouched.
    Path(PathBuf),
    /// An upload owned by the run and removed when the run ends.
    Upload(UploadedVideo),
}

impl VideoInput {
    pub fn path(&self) -> &Path {
        match self {
            VideoInput::Path(p) => p,
            VideoInput::Upload(u) => u.path(),
        }
    }
}

/// Everything needed to start one run.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub config: RunConfiguration,
    pub input: VideoInput,
}

impl RunContext {
    pub fn new(config: RunConfiguration, input: VideoInput) -> Self {
        Self {
            run_id: new_run_id(),
            config,
            input,
        }
    }
}

/// Timestamp-based run id, unique within the process.
pub fn new_run_id() -> String {
    static SEQUENCE: AtomicUsize = AtomicUsize::new(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("run-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_removed_on_drop() {
        let upload = UploadedVideo::from_bytes(b"fake mp4 bytes", Some("clip.mp4".into())).unwrap();
        let path = upload.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert_eq!(std::fs::read(&path).unwrap(), b"fake mp4 bytes");
        assert_eq!(upload.original_name(), Some("clip.mp4"));

        let input = VideoInput::Upload(upload);
        assert_eq!(input.path(), path.as_path());
        drop(input);
        assert!(!path.exists());
    }

    #[test]
    fn test_upload_appends_chunks() {
        let mut upload = UploadedVideo::create(None).unwrap();
        assert!(upload.is_empty());
        upload.append(b"abc").unwrap();
        upload.append(b"def").unwrap();
        upload.finish().unwrap();
        assert_eq!(upload.len(), 6);
        assert_eq!(std::fs::read(upload.path()).unwrap(), b"abcdef");
    }

    #[test]
    fn test_path_input_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video.mp4");
        std::fs::write(&path, b"x").unwrap();
        drop(VideoInput::Path(path.clone()));
        assert!(path.exists());
    }

    #[test]
    fn test_run_ids_unique() {
        let a = new_run_id();
        let b = new_run_id();
        assert_ne!(a, b);
        assert!(a.starts_with("run-"));
    }
}
