use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Decoded frame handed to the output by the host
///
/// Plane data is mutable so the overlay step can composite in place.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Pixel planes, in luma/chroma-U/chroma-V order for planar formats
    pub planes: Vec<Plane>,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Time the frame was handed over, for latency tracking
    pub timestamp: Instant,
}

/// One pixel plane with its own row stride (may include padding)
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: BytesMut,
    pub stride: usize,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pts: Option<Duration>, // Presentation timestamp if the decoder has one
    pub nominal_fps: f32,
}

/// Pixel formats a decoder may hand us
///
/// Only a subset of these can be published, see [`crate::format::pixel::map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Yuv420p,
    Nv12,
    Uyvy422,
    Yuyv422,
    Rgb24,
    Bgr24,
    Rgb565,
    Rgba,
}

/// Geometry announced by the host on a format change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Frame {
    pub fn new(planes: Vec<Plane>, meta: FrameMetadata) -> Self {
        Self {
            planes,
            meta,
            timestamp: Instant::now(),
        }
    }

    /// Parameters a host would announce for a stream of frames like this one
    pub fn params(&self) -> VideoParams {
        VideoParams {
            width: self.meta.width,
            height: self.meta.height,
            format: self.meta.format,
        }
    }
}

impl Plane {
    pub fn new(data: BytesMut, stride: usize) -> Self {
        Self { data, stride }
    }

    /// Zero-filled plane of `rows` rows of `stride` bytes
    pub fn zeroed(stride: usize, rows: usize) -> Self {
        Self {
            data: BytesMut::zeroed(stride * rows),
            stride,
        }
    }
}
