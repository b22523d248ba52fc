/// Outcome of comparing a frame against the reference frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MotionResult {
    /// Did any boundary exceed the noise gate?
    pub motion_detected: bool,
    /// Every extracted boundary, in detection order, unfiltered.
    pub regions: Vec<BoundingRegion>,
}

/// Axis-aligned box around one connected region of the motion mask, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Number of mask pixels enclosed by the boundary.
    pub area: u64,
}
