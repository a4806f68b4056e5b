use anyhow::Result;
use opencv::core::{self, Mat};
use opencv::imgproc;
use opencv::prelude::*;

/// Target `(width, height)` for a frame whose larger side exceeds `max_dimension`.
/// Returns `None` when the frame already fits.
pub fn scaled_size(width: i32, height: i32, max_dimension: u32) -> Option<(i32, i32)> {
    let largest = width.max(height);
    if largest <= 0 || largest as i64 <= max_dimension as i64 {
        return None;
    }
    let scale = max_dimension as f64 / largest as f64;
    let w = ((width as f64 * scale) as i32).max(1);
    let h = ((height as f64 * scale) as i32).max(1);
    Some((w, h))
}

/// Downscales `frame` so its larger side is at most `max_dimension`, keeping aspect ratio.
/// Frames that already fit are returned as-is.
pub fn normalize(frame: Mat, max_dimension: u32) -> Result<Mat> {
    let size = frame.size()?;
    let Some((w, h)) = scaled_size(size.width, size.height, max_dimension) else {
        return Ok(frame);
    };

    let mut resized = Mat::default();
    imgproc::resize(
        &frame,
        &mut resized,
        core::Size::new(w, h),
        0.0,
        0.0,
        imgproc::INTER_AREA,
    )?;
    tracing::trace!(
        "Resized frame {}x{} -> {}x{}",
        size.width,
        size.height,
        w,
        h
    );
    Ok(resized)
}
