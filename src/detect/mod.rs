mod backend;
pub mod contours;
mod motion;
mod result;

pub use backend::MotionBackend;
pub use motion::DifferenceDetector;
pub use result::{BoundingRegion, MotionResult};
