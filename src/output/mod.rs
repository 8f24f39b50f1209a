pub mod driver;
pub mod publisher;

use thiserror::Error;

use crate::capture::VideoParams;
use crate::format::{layout, pixel, Layout, LayoutError, UnsupportedFormat, WireFormat};
use crate::shm::{FrameFields, SegmentError};

pub use driver::{ControlReply, ControlRequest, ShmOutput};
pub use publisher::{FramePublisher, NoOverlay, Overlay, PublishError};

/// Why a format change could not be applied
#[derive(Debug, Error)]
pub enum ConfigureError {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedFormat),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Segment(#[from] SegmentError),
}

/// Resolved output format for one configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameGeometry {
    pub params: VideoParams,
    pub wire: WireFormat,
    pub layout: Layout,
}

impl FrameGeometry {
    pub fn new(params: VideoParams) -> Result<Self, ConfigureError> {
        let wire = pixel::map(params.format)?;
        let layout = layout::for_wire(params.width, params.height, wire)?;
        Ok(Self {
            params,
            wire,
            layout,
        })
    }

    /// Value of the header `bytes` field
    ///
    /// Planar layouts have no flat per-pixel multiplier and report 0.
    pub fn header_bytes(&self) -> u32 {
        if self.wire.is_planar() {
            0
        } else {
            self.wire.bytes_per_pixel()
        }
    }

    /// Header fields for a frame of this geometry
    pub fn fields(&self, fps: f32) -> FrameFields {
        FrameFields {
            width: self.params.width,
            height: self.params.height,
            bytes: self.header_bytes(),
            stride: self.layout.stride,
            planes: self.wire.planes(),
            format: self.wire.tag(),
            fps,
        }
    }
}
