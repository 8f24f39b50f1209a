//! Synthetic frame source standing in for a decoder

use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument};

use crate::capture::frame::{Frame, FrameMetadata, Plane, VideoParams};
use crate::format::{layout, pixel, LayoutError, UnsupportedFormat, WireFormat};
use crate::SourceConfig;

const MAX_FPS: f32 = 1000.0;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedFormat),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("frame rate must be in (0, 1000], got {0}")]
    Fps(f32),
}

/// Moving gradient test pattern in any publishable format
pub struct TestPattern {
    config: SourceConfig,
    wire: WireFormat,
    sequence: u64,
}

impl TestPattern {
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        if !(config.fps > 0.0 && config.fps <= MAX_FPS) {
            return Err(SourceError::Fps(config.fps));
        }
        let wire = pixel::map(config.format)?;
        layout::for_wire(config.width, config.height, wire)?;

        info!(
            "Test pattern: {}x{} {:?} @ {} fps, {} bytes row padding",
            config.width, config.height, config.format, config.fps, config.padding
        );

        Ok(Self {
            config,
            wire,
            sequence: 0,
        })
    }

    pub fn params(&self) -> VideoParams {
        VideoParams {
            width: self.config.width,
            height: self.config.height,
            format: self.config.format,
        }
    }

    pub fn interval(&self) -> Duration {
        self.pts(1)
    }

    /// Presentation time of frame `sequence`
    fn pts(&self, sequence: u64) -> Duration {
        Duration::from_secs_f64(sequence as f64 / f64::from(self.config.fps))
    }

    /// Render the next frame
    #[instrument(skip(self), fields(sequence = self.sequence))]
    pub fn next_frame(&mut self) -> Result<Frame, SourceError> {
        let params = self.params();
        let mut planes = alloc_planes(params, self.config.padding)?;
        let shift = (self.sequence * 4) as usize;

        match self.wire {
            WireFormat::I420 => {
                let width = params.width as usize;
                fill_rows(&mut planes[0], width, |x, _| (x + shift) as u8);
                for chroma in &mut planes[1..] {
                    let row = width / 2;
                    fill_rows(chroma, row, |_, _| 128);
                }
            }
            WireFormat::Uyvy => {
                let row = params.width as usize * 2;
                fill_rows(&mut planes[0], row, |x, _| {
                    if x % 2 == 0 {
                        128
                    } else {
                        (x / 2 + shift) as u8
                    }
                });
            }
            WireFormat::Rgb24 => {
                let row = params.width as usize * 3;
                let blue = self.sequence as u8;
                fill_rows(&mut planes[0], row, |x, y| match x % 3 {
                    0 => (x / 3 + shift) as u8,
                    1 => y as u8,
                    _ => blue,
                });
            }
        }

        let meta = FrameMetadata {
            sequence: self.sequence,
            width: params.width,
            height: params.height,
            format: params.format,
            pts: Some(self.pts(self.sequence)),
            nominal_fps: self.config.fps,
        };
        self.sequence += 1;

        Ok(Frame::new(planes, meta))
    }
}

/// Zeroed planes for `params`, each row padded by `padding` bytes
pub fn alloc_planes(params: VideoParams, padding: usize) -> Result<Vec<Plane>, SourceError> {
    let wire = pixel::map(params.format)?;
    let layout = layout::for_wire(params.width, params.height, wire)?;
    Ok(layout
        .planes
        .iter()
        .map(|p| Plane::zeroed(p.stride + padding, p.rows))
        .collect())
}

fn fill_rows(plane: &mut Plane, row_bytes: usize, pixel: impl Fn(usize, usize) -> u8) {
    if plane.stride == 0 {
        return;
    }
    for (y, row) in plane.data.chunks_mut(plane.stride).enumerate() {
        for (x, byte) in row[..row_bytes].iter_mut().enumerate() {
            *byte = pixel(x, y);
        }
    }
}
