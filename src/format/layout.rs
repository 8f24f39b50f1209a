//! Payload layout for a frame geometry

use thiserror::Error;

use crate::shm::HEADER_SIZE;

use super::pixel::WireFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },

    #[error("{width}x{height} frame does not fit a 32-bit segment")]
    TooLarge { width: u32, height: u32 },
}

/// Placement of one plane inside the payload region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Byte offset from the start of the payload
    pub offset: usize,
    /// Destination row stride, also the number of bytes in a row
    pub stride: usize,
    pub rows: usize,
}

impl PlaneLayout {
    pub fn len(&self) -> usize {
        self.stride * self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Row stride of the primary plane
    pub stride: u32,
    /// Bytes following the header
    pub payload_size: u32,
    pub planes: Vec<PlaneLayout>,
}

impl Layout {
    /// Bytes needed for header plus payload
    pub fn segment_size(&self) -> usize {
        HEADER_SIZE + self.payload_size as usize
    }
}

/// Compute stride and payload size for a frame
///
/// Planar input is 4:2:0: a full luma plane followed by U and V planes at half
/// width and half height. Odd dimensions round the chroma planes down.
pub fn compute(
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    planar: bool,
) -> Result<Layout, LayoutError> {
    if width == 0 || height == 0 {
        return Err(LayoutError::ZeroDimension { width, height });
    }
    let too_large = || LayoutError::TooLarge { width, height };

    if planar {
        let luma = width.checked_mul(height).ok_or_else(too_large)?;
        let (cw, ch) = (width / 2, height / 2);
        let chroma = cw * ch;
        let payload_size = chroma
            .checked_mul(2)
            .and_then(|c| c.checked_add(luma))
            .ok_or_else(too_large)?;
        if HEADER_SIZE as u64 + payload_size as u64 > u32::MAX as u64 {
            return Err(too_large());
        }

        let luma_plane = PlaneLayout {
            offset: 0,
            stride: width as usize,
            rows: height as usize,
        };
        let u_plane = PlaneLayout {
            offset: luma as usize,
            stride: cw as usize,
            rows: ch as usize,
        };
        let v_plane = PlaneLayout {
            offset: luma as usize + chroma as usize,
            ..u_plane
        };

        Ok(Layout {
            stride: width,
            payload_size,
            planes: vec![luma_plane, u_plane, v_plane],
        })
    } else {
        let stride = width.checked_mul(bytes_per_pixel).ok_or_else(too_large)?;
        let payload_size = stride.checked_mul(height).ok_or_else(too_large)?;
        if HEADER_SIZE as u64 + payload_size as u64 > u32::MAX as u64 {
            return Err(too_large());
        }

        Ok(Layout {
            stride,
            payload_size,
            planes: vec![PlaneLayout {
                offset: 0,
                stride: stride as usize,
                rows: height as usize,
            }],
        })
    }
}

/// Layout for `width`x`height` frames in `wire` format
pub fn for_wire(width: u32, height: u32, wire: WireFormat) -> Result<Layout, LayoutError> {
    compute(width, height, wire.bytes_per_pixel(), wire.is_planar())
}
