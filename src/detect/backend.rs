use crate::detect::result::MotionResult;
use crate::frame::Frame;

/// Motion backend trait.
///
/// A backend compares the previously processed frame with the current one. Both frames have
/// the same dimensions; resizing happens upstream in the pipeline. Backends hold no per-session
/// state: the reference frame belongs to the pipeline session.
pub trait MotionBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Compare two frames of identical dimensions.
    fn detect(&mut self, previous: &Frame, current: &Frame) -> MotionResult;
}
