//! Frame publication into a mapped segment

use std::time::Instant;

use thiserror::Error;
use tracing::{instrument, trace};

use super::FrameGeometry;
use crate::capture::{Frame, Plane, VideoParams};
use crate::format::PlaneLayout;
use crate::shm::SegmentHandle;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("no frame to publish")]
    NoFrame,

    #[error("output is not configured")]
    NotConfigured,

    #[error("frame {actual:?} does not match the configured {expected:?}")]
    FormatMismatch {
        expected: VideoParams,
        actual: VideoParams,
    },

    #[error("plane {plane}: {reason}")]
    PlaneMismatch { plane: usize, reason: &'static str },

    #[error("segment payload holds {have} bytes, layout needs {need}")]
    SegmentTooSmall { have: usize, need: usize },
}

/// On-screen display compositing, applied to each frame before it is copied
pub trait Overlay {
    fn draw(&mut self, frame: &mut Frame);
}

/// Overlay that leaves frames untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOverlay;

impl Overlay for NoOverlay {
    fn draw(&mut self, _frame: &mut Frame) {}
}

/// Writes frames into a segment under the busy flag
pub struct FramePublisher<O = NoOverlay> {
    overlay: O,
}

impl<O: Overlay> FramePublisher<O> {
    pub fn new(overlay: O) -> Self {
        Self { overlay }
    }

    pub fn overlay(&self) -> &O {
        &self.overlay
    }

    /// Publish one frame, returning the new frame count
    ///
    /// Nothing is written to the segment unless the frame matches `geometry`.
    /// The busy flag is advisory: readers that see it set retry later.
    #[instrument(skip_all, fields(sequence = tracing::field::Empty))]
    pub fn publish(
        &mut self,
        handle: &mut SegmentHandle<'_>,
        frame: Option<&mut Frame>,
        geometry: &FrameGeometry,
    ) -> Result<u32, PublishError> {
        let frame = frame.ok_or(PublishError::NoFrame)?;
        tracing::Span::current().record("sequence", frame.meta.sequence);

        if frame.params() != geometry.params {
            return Err(PublishError::FormatMismatch {
                expected: geometry.params,
                actual: frame.params(),
            });
        }
        let need = geometry.layout.payload_size as usize;
        if handle.payload().len() < need {
            return Err(PublishError::SegmentTooSmall {
                have: handle.payload().len(),
                need,
            });
        }

        check_planes(&frame.planes, &geometry.layout.planes)?;
        let started = Instant::now();
        self.overlay.draw(frame);

        let (header, payload) = handle.split();
        header.write_fields(&geometry.fields(frame.meta.nominal_fps));
        header.begin_write();
        for (src, dst) in frame.planes.iter().zip(&geometry.layout.planes) {
            let region = &mut payload[dst.offset..dst.offset + dst.len()];
            copy_plane(region, dst.stride, &src.data, src.stride, dst.rows);
        }
        let count = header.end_write();

        trace!(count, "frame published");
        metrics::counter!("shmvo_frames_published").increment(1);
        metrics::histogram!("shmvo_publish_time_us").record(started.elapsed().as_micros() as f64);

        Ok(count)
    }
}

impl Default for FramePublisher<NoOverlay> {
    fn default() -> Self {
        Self::new(NoOverlay)
    }
}

fn check_planes(planes: &[Plane], layout: &[PlaneLayout]) -> Result<(), PublishError> {
    if planes.len() < layout.len() {
        return Err(PublishError::PlaneMismatch {
            plane: planes.len(),
            reason: "missing plane",
        });
    }

    for (index, (src, dst)) in planes.iter().zip(layout).enumerate() {
        if dst.is_empty() {
            continue;
        }
        if src.stride == 0 {
            return Err(PublishError::PlaneMismatch {
                plane: index,
                reason: "zero stride",
            });
        }
        let row = src.stride.min(dst.stride);
        let need = (dst.rows - 1)
            .checked_mul(src.stride)
            .and_then(|n| n.checked_add(row))
            .ok_or(PublishError::PlaneMismatch {
                plane: index,
                reason: "stride overflows the plane size",
            })?;
        if src.data.len() < need {
            return Err(PublishError::PlaneMismatch {
                plane: index,
                reason: "plane holds fewer rows than the frame height",
            });
        }
    }
    Ok(())
}

/// Copy `rows` rows of `min(src_stride, dst_stride)` bytes each
fn copy_plane(dst: &mut [u8], dst_stride: usize, src: &[u8], src_stride: usize, rows: usize) {
    if dst_stride == 0 || src_stride == 0 {
        return;
    }
    let row = src_stride.min(dst_stride);
    for (dst_row, src_row) in dst
        .chunks_mut(dst_stride)
        .zip(src.chunks(src_stride))
        .take(rows)
    {
        dst_row[..row].copy_from_slice(&src_row[..row]);
    }
}
