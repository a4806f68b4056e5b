pub mod opencv_reader;
pub mod processor;

use anyhow::Result;
use opencv::core::Mat;

/// Sequential frame extraction over a video container.
pub trait FrameSource {
    /// Frames the container reports; `usize::MAX` when unknown.
    fn frame_count(&self) -> usize;
    fn source_fps(&self) -> f64;
    /// Next decoded frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Mat>>;
    /// Releases the underlying decoder. Must be safe to call more than once.
    fn release(&mut self);
}
