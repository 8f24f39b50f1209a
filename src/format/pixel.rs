//! Decoder pixel format -> wire format mapping

use std::fmt;

use thiserror::Error;

use crate::capture::PixelFormat;

/// The decoder handed us a pixel format the segment cannot carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unsupported pixel format: {0:?}")]
pub struct UnsupportedFormat(pub PixelFormat);

/// Pixel layouts understood by segment readers
///
/// Tags are FourCC-style constants shared with readers and never derived from
/// the decoder's own format numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// Planar 4:2:0, 8-bit, Y then U then V
    I420,
    /// Packed 4:2:2, U Y0 V Y1
    Uyvy,
    /// Packed 24-bit R G B
    Rgb24,
}

impl WireFormat {
    pub const I420_TAG: u32 = u32::from_le_bytes(*b"I420");
    pub const UYVY_TAG: u32 = u32::from_le_bytes(*b"UYVY");
    pub const RGB24_TAG: u32 = u32::from_le_bytes([24, b'B', b'G', b'R']);

    pub const fn tag(self) -> u32 {
        match self {
            WireFormat::I420 => Self::I420_TAG,
            WireFormat::Uyvy => Self::UYVY_TAG,
            WireFormat::Rgb24 => Self::RGB24_TAG,
        }
    }

    pub const fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            Self::I420_TAG => Some(WireFormat::I420),
            Self::UYVY_TAG => Some(WireFormat::Uyvy),
            Self::RGB24_TAG => Some(WireFormat::Rgb24),
            _ => None,
        }
    }

    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            WireFormat::I420 => 1,
            WireFormat::Uyvy => 2,
            WireFormat::Rgb24 => 3,
        }
    }

    pub const fn is_planar(self) -> bool {
        matches!(self, WireFormat::I420)
    }

    pub const fn planes(self) -> u32 {
        if self.is_planar() {
            3
        } else {
            1
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireFormat::I420 => "I420",
            WireFormat::Uyvy => "UYVY",
            WireFormat::Rgb24 => "RGB24",
        };
        f.write_str(name)
    }
}

/// Map a decoder format onto the wire format it is published as
pub fn map(format: PixelFormat) -> Result<WireFormat, UnsupportedFormat> {
    // Keep this exhaustive: a new decoder format must be classified here.
    match format {
        PixelFormat::Yuv420p => Ok(WireFormat::I420),
        PixelFormat::Uyvy422 => Ok(WireFormat::Uyvy),
        PixelFormat::Rgb24 => Ok(WireFormat::Rgb24),
        PixelFormat::Nv12
        | PixelFormat::Yuyv422
        | PixelFormat::Bgr24
        | PixelFormat::Rgb565
        | PixelFormat::Rgba => Err(UnsupportedFormat(format)),
    }
}

/// Whether frames in `format` can be published at all
pub fn is_supported(format: PixelFormat) -> bool {
    map(format).is_ok()
}
