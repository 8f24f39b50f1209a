pub mod header;
pub mod reader;
pub mod segment;

#[cfg(test)]
pub(crate) mod testing;

pub use header::{FrameFields, HeaderSnapshot, ShmHeader, HEADER_SIZE};
pub use reader::{FrameSnapshot, ReadError, SegmentReader};
pub use segment::{PosixShm, SegmentBackend, SegmentError, SegmentHandle, SegmentManager};
