pub mod frame;
pub mod pattern;

pub use frame::{Frame, FrameMetadata, PixelFormat, Plane, VideoParams};
pub use pattern::{SourceError, TestPattern};
