//! Video-output driver over a shared-memory segment
//!
//! Hosts drive it through the usual output lifecycle: `preinit`, then
//! `reconfig` on every format change, `draw_frame`/`flip_page` per frame and
//! `uninit` at the end. Only one segment exists per output at a time.

use tracing::{debug, error, info, instrument, warn};

use super::publisher::{FramePublisher, NoOverlay, Overlay, PublishError};
use super::{ConfigureError, FrameGeometry};
use crate::capture::{Frame, PixelFormat, VideoParams};
use crate::format::pixel;
use crate::shm::{PosixShm, SegmentBackend, SegmentManager};
use crate::OutputConfig;

/// Host control request, identified by the host's request number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    NotImplemented,
}

/// Publishes every drawn frame into a named shared-memory segment
///
/// The segment is released by `uninit` or when the output is dropped.
pub struct ShmOutput<B: SegmentBackend = PosixShm, O = NoOverlay> {
    buffer_name: String,
    segments: SegmentManager<B>,
    publisher: FramePublisher<O>,
    geometry: Option<FrameGeometry>,
}

impl ShmOutput {
    /// Output writing to real POSIX shared memory
    pub fn preinit(config: &OutputConfig) -> Self {
        Self::with_backend(config, PosixShm, NoOverlay)
    }
}

impl<B: SegmentBackend, O: Overlay> ShmOutput<B, O> {
    pub fn with_backend(config: &OutputConfig, backend: B, overlay: O) -> Self {
        debug!(buffer_name = %config.buffer_name, "preinit");
        Self {
            buffer_name: config.buffer_name.clone(),
            segments: SegmentManager::with_backend(backend),
            publisher: FramePublisher::new(overlay),
            geometry: None,
        }
    }

    pub fn buffer_name(&self) -> &str {
        &self.buffer_name
    }

    pub fn geometry(&self) -> Option<&FrameGeometry> {
        self.geometry.as_ref()
    }

    pub fn segments(&self) -> &SegmentManager<B> {
        &self.segments
    }

    pub fn overlay(&self) -> &O {
        self.publisher.overlay()
    }

    /// Whether frames in `format` can be drawn
    pub fn query_support(&self, format: PixelFormat) -> bool {
        pixel::is_supported(format)
    }

    /// Apply a format change, recreating the segment if the geometry changed
    ///
    /// Unsupported formats and invalid dimensions are rejected before the
    /// current segment is touched.
    #[instrument(skip(self), fields(buffer_name = %self.buffer_name))]
    pub fn reconfig(&mut self, params: VideoParams) -> Result<(), ConfigureError> {
        info!(
            "reconfig w: {} h: {} format: {:?}",
            params.width, params.height, params.format
        );

        let geometry = FrameGeometry::new(params)?;
        if self.segments.is_configured() && self.geometry.as_ref() == Some(&geometry) {
            debug!("geometry unchanged, keeping segment");
            return Ok(());
        }

        info!(
            stride = geometry.layout.stride,
            bytes = geometry.header_bytes(),
            video_buffer_size = geometry.layout.payload_size,
            format = %geometry.wire,
            "writing output to shared buffer {:?}",
            self.buffer_name
        );

        self.geometry = None;
        self.segments
            .configure(&self.buffer_name, geometry.layout.segment_size())?;
        self.geometry = Some(geometry);
        Ok(())
    }

    /// Publish a frame; failures are logged and the frame is dropped
    pub fn draw_frame(&mut self, frame: Option<&mut Frame>) {
        if let Err(e) = self.try_draw_frame(frame) {
            metrics::counter!("shmvo_frames_rejected").increment(1);
            match e {
                PublishError::NoFrame => debug!("draw_frame called without a frame"),
                e => error!(error = %e, "frame not published"),
            }
        }
    }

    /// Publish a frame, returning the new frame count
    pub fn try_draw_frame(&mut self, frame: Option<&mut Frame>) -> Result<u32, PublishError> {
        let frame = frame.ok_or(PublishError::NoFrame)?;
        let (Some(geometry), Some(mut handle)) = (self.geometry.as_ref(), self.segments.handle())
        else {
            return Err(PublishError::NotConfigured);
        };
        self.publisher.publish(&mut handle, Some(frame), geometry)
    }

    /// Frames are visible as soon as they are drawn
    pub fn flip_page(&mut self) {}

    pub fn control(&mut self, request: ControlRequest) -> ControlReply {
        debug!(?request, "control request not implemented");
        ControlReply::NotImplemented
    }

    /// Release the segment; safe to call at any time, any number of times
    #[instrument(skip(self))]
    pub fn uninit(&mut self) {
        self.geometry = None;
        if let Err(e) = self.segments.teardown() {
            warn!(error = %e, "uninit: segment release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, TestPattern};
    use crate::format::UnsupportedFormat;
    use crate::shm::testing::{Event, MemBackend};
    use crate::shm::HEADER_SIZE;
    use crate::SourceConfig;

    fn output() -> ShmOutput<MemBackend> {
        let config = OutputConfig {
            buffer_name: "frames".into(),
        };
        ShmOutput::with_backend(&config, MemBackend::default(), NoOverlay)
    }

    fn source(width: u32, height: u32, format: PixelFormat) -> TestPattern {
        TestPattern::new(SourceConfig {
            width,
            height,
            fps: 30.0,
            format,
            frames: None,
            padding: 8,
        })
        .unwrap()
    }

    #[test]
    fn test_query_support() {
        let output = output();
        assert!(output.query_support(PixelFormat::Yuv420p));
        assert!(output.query_support(PixelFormat::Uyvy422));
        assert!(output.query_support(PixelFormat::Rgb24));
        assert!(!output.query_support(PixelFormat::Nv12));
        assert!(!output.query_support(PixelFormat::Rgb565));
    }

    #[test]
    fn test_unsupported_format_creates_nothing() {
        let mut output = output();
        let err = output
            .reconfig(VideoParams {
                width: 640,
                height: 480,
                format: PixelFormat::Bgr24,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigureError::Unsupported(UnsupportedFormat(PixelFormat::Bgr24))
        ));
        assert!(output.segments().backend().events.is_empty());
        assert!(output.geometry().is_none());
    }

    #[test]
    fn test_rgb_320x240() {
        let mut output = output();
        let mut source = source(320, 240, PixelFormat::Rgb24);
        output.reconfig(source.params()).unwrap();

        let geometry = output.geometry().unwrap();
        assert_eq!(geometry.layout.stride, 960);
        assert_eq!(geometry.layout.payload_size, 230400);
        assert_eq!(geometry.header_bytes(), 3);
        assert_eq!(output.segments().size(), Some(HEADER_SIZE + 230400));

        let mut frame = source.next_frame().unwrap();
        assert_eq!(output.try_draw_frame(Some(&mut frame)), Ok(1));
        output.flip_page();
    }

    #[test]
    fn test_reconfig_releases_old_segment_first() {
        let mut output = output();
        let mut small = source(64, 48, PixelFormat::Yuv420p);
        let mut large = source(128, 96, PixelFormat::Yuv420p);

        output.reconfig(small.params()).unwrap();
        output.draw_frame(Some(&mut small.next_frame().unwrap()));
        output.reconfig(large.params()).unwrap();

        let backend = output.segments().backend();
        assert_eq!(backend.max_live, 1);
        assert_eq!(backend.live, 1);
        assert_eq!(backend.objects(), 1);
        assert_eq!(
            &backend.events[1..3],
            &[Event::Unmap("/frames".into()), Event::Unlink("/frames".into())]
        );

        // Fresh segment, fresh counter.
        let mut frame = large.next_frame().unwrap();
        assert_eq!(output.try_draw_frame(Some(&mut frame)), Ok(1));
    }

    #[test]
    fn test_same_geometry_keeps_segment() {
        let mut output = output();
        let mut source = source(16, 16, PixelFormat::Uyvy422);
        output.reconfig(source.params()).unwrap();
        output.draw_frame(Some(&mut source.next_frame().unwrap()));
        output.reconfig(source.params()).unwrap();

        assert_eq!(output.segments().backend().creates(), 1);
        let mut frame = source.next_frame().unwrap();
        assert_eq!(output.try_draw_frame(Some(&mut frame)), Ok(2));
    }

    #[test]
    fn test_invalid_reconfig_keeps_segment() {
        let mut output = output();
        output.reconfig(source(16, 16, PixelFormat::Rgb24).params()).unwrap();
        assert!(output
            .reconfig(VideoParams {
                width: 0,
                height: 16,
                format: PixelFormat::Rgb24
            })
            .is_err());

        // Invalid parameters never reach the segment.
        assert_eq!(output.segments().backend().creates(), 1);
        assert!(output.segments().is_configured());
    }

    #[test]
    fn test_draw_without_configuration() {
        let mut output = output();
        let mut frame = source(8, 8, PixelFormat::Rgb24).next_frame().unwrap();
        assert_eq!(
            output.try_draw_frame(Some(&mut frame)),
            Err(PublishError::NotConfigured)
        );
        assert_eq!(output.try_draw_frame(None), Err(PublishError::NoFrame));

        // Logged, not propagated.
        output.draw_frame(None);
        output.draw_frame(Some(&mut frame));
    }

    #[test]
    fn test_stale_frame_after_format_change() {
        let mut output = output();
        let mut old = source(8, 8, PixelFormat::Rgb24);
        output.reconfig(old.params()).unwrap();
        output
            .reconfig(VideoParams {
                width: 8,
                height: 8,
                format: PixelFormat::Yuv420p,
            })
            .unwrap();

        let mut frame = old.next_frame().unwrap();
        assert!(matches!(
            output.try_draw_frame(Some(&mut frame)),
            Err(PublishError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_uninit_anytime() {
        let mut output = output();
        output.uninit();
        output.uninit();

        output.reconfig(source(8, 8, PixelFormat::Rgb24).params()).unwrap();
        output.uninit();
        output.uninit();

        let backend = output.segments().backend();
        assert_eq!(backend.live, 0);
        assert_eq!(backend.objects(), 0);
        assert!(output.geometry().is_none());
    }

    #[test]
    fn test_control_not_implemented() {
        let mut output = output();
        assert_eq!(
            output.control(ControlRequest(42)),
            ControlReply::NotImplemented
        );
    }

    #[test]
    fn test_wrong_sized_frame_metadata() {
        let mut output = output();
        output.reconfig(source(8, 8, PixelFormat::Rgb24).params()).unwrap();

        let mut frame = source(8, 8, PixelFormat::Rgb24).next_frame().unwrap();
        frame.meta = FrameMetadata {
            width: 9,
            ..frame.meta.clone()
        };
        assert!(output.try_draw_frame(Some(&mut frame)).is_err());
        assert_eq!(
            output.segments().backend().events.len(),
            1,
            "rejected frames never touch the segment lifecycle"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_posix_end_to_end() {
        use crate::format::WireFormat;
        use crate::shm::testing::unique_name;
        use crate::shm::SegmentReader;

        let name = unique_name("driver");
        let mut output = ShmOutput::preinit(&OutputConfig {
            buffer_name: name.clone(),
        });
        let mut source = source(6, 4, PixelFormat::Yuv420p);
        output.reconfig(source.params()).unwrap();

        let mut frame = source.next_frame().unwrap();
        output.draw_frame(Some(&mut frame));

        let reader = SegmentReader::open(&name).unwrap();
        let snapshot = reader.read_frame().unwrap();
        assert_eq!(snapshot.format, Some(WireFormat::I420));
        assert_eq!(snapshot.header.frame_count, 1);
        assert_eq!(snapshot.header.bytes, 0);
        assert_eq!(snapshot.header.planes, 3);
        assert_eq!(snapshot.payload.len(), 6 * 4 + 2 * 3 * 2);
        assert_eq!(&snapshot.payload[..6], &frame.planes[0].data[..6]);

        output.uninit();
        assert!(SegmentReader::open(&name).is_err());
    }
}
