/// Returns true when the frame at `frame_index` should go through detection.
///
/// `stride` is validated to be at least 1 before a run starts.
pub fn should_process(frame_index: usize, stride: u32) -> bool {
    frame_index % stride as usize == 0
}
