//! Read side of a segment

use std::fs::File;
use std::io;
use std::sync::atomic::{fence, Ordering};

use bytes::Bytes;
use memmap2::{Mmap, MmapOptions};
use nix::fcntl::OFlag;
use nix::sys::mman::shm_open;
use nix::sys::stat::Mode;
use thiserror::Error;

use super::header::{HeaderSnapshot, ShmHeader, HEADER_SIZE};
use crate::format::WireFormat;
use crate::utils::shm_object_name;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("invalid shared memory name {name:?}")]
    InvalidName { name: String },

    #[error("failed to open shared memory {name:?}: {source}")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("shared memory {name:?} is not a frame segment: {reason}")]
    Invalid { name: String, reason: &'static str },

    /// The writer holds the busy flag; retry, and re-open if it persists
    #[error("frame is being written")]
    Busy,

    #[error("segment now carries {video_buffer_size} payload bytes, re-open it")]
    Resized { video_buffer_size: u32 },
}

/// One consistent frame copied out of a segment
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub header: HeaderSnapshot,
    /// `None` when the tag is not one this crate knows
    pub format: Option<WireFormat>,
    pub payload: Bytes,
}

/// Read-only attachment to a segment published by another process
pub struct SegmentReader {
    name: String,
    map: Mmap,
}

impl SegmentReader {
    pub fn open(name: &str) -> Result<Self, ReadError> {
        let name = shm_object_name(name).ok_or_else(|| ReadError::InvalidName {
            name: name.to_owned(),
        })?;
        let open_error = |source: io::Error| ReadError::Open {
            name: name.clone(),
            source,
        };

        let fd = shm_open(name.as_str(), OFlag::O_RDONLY, Mode::empty())
            .map_err(|e| open_error(e.into()))?;
        let file = File::from(fd);
        // SAFETY: read-only shared mapping; header fields are read through atomics.
        let map = unsafe { MmapOptions::new().map(&file) }.map_err(open_error)?;

        let reader = Self { name, map };
        if reader.shm_header()?.header_size() as usize != HEADER_SIZE {
            return Err(reader.invalid("header size mismatch"));
        }
        Ok(reader)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> Result<HeaderSnapshot, ReadError> {
        Ok(self.shm_header()?.snapshot())
    }

    /// Copy the current frame out of the segment
    ///
    /// Fails with [`ReadError::Busy`] if the writer was active before or
    /// during the copy.
    pub fn read_frame(&self) -> Result<FrameSnapshot, ReadError> {
        let header = self.shm_header()?;
        let before = header.snapshot();
        if before.busy {
            return Err(ReadError::Busy);
        }

        let end = HEADER_SIZE + before.video_buffer_size as usize;
        if end > self.map.len() {
            return Err(ReadError::Resized {
                video_buffer_size: before.video_buffer_size,
            });
        }
        let payload = Bytes::copy_from_slice(&self.map[HEADER_SIZE..end]);

        fence(Ordering::Acquire);
        if header.is_busy() || header.frame_count() != before.frame_count {
            return Err(ReadError::Busy);
        }

        Ok(FrameSnapshot {
            format: WireFormat::from_tag(before.format),
            header: before,
            payload,
        })
    }

    fn shm_header(&self) -> Result<&ShmHeader, ReadError> {
        ShmHeader::from_bytes(&self.map).ok_or_else(|| self.invalid("shorter than the header"))
    }

    fn invalid(&self, reason: &'static str) -> ReadError {
        ReadError::Invalid {
            name: self.name.clone(),
            reason,
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::shm::testing::unique_name;
    use crate::shm::{FrameFields, SegmentManager};

    #[test]
    fn test_read_published_payload() {
        let name = unique_name("reader");
        let mut manager = SegmentManager::new();
        {
            let mut handle = manager.configure(&name, HEADER_SIZE + 6).unwrap();
            let (header, payload) = handle.split();
            header.write_fields(&FrameFields {
                width: 2,
                height: 1,
                bytes: 3,
                stride: 6,
                planes: 1,
                format: WireFormat::Rgb24.tag(),
                fps: 25.0,
            });
            header.begin_write();
            payload.copy_from_slice(&[1, 2, 3, 4, 5, 6]);
            header.end_write();
        }

        let reader = SegmentReader::open(&name).unwrap();
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.format, Some(WireFormat::Rgb24));
        assert_eq!(frame.header.frame_count, 1);
        assert_eq!(frame.header.width, 2);
        assert_eq!(&frame.payload[..], &[1, 2, 3, 4, 5, 6]);

        manager.handle().unwrap().header().begin_write();
        assert!(matches!(reader.read_frame(), Err(ReadError::Busy)));
    }

    #[test]
    fn test_retired_segment_reads_busy() {
        let name = unique_name("retired");
        let mut manager = SegmentManager::new();
        manager.configure(&name, HEADER_SIZE + 16).unwrap();
        let reader = SegmentReader::open(&name).unwrap();
        assert!(reader.read_frame().is_ok());

        manager.configure(&name, HEADER_SIZE + 32).unwrap();
        assert!(matches!(reader.read_frame(), Err(ReadError::Busy)));

        let reopened = SegmentReader::open(&name).unwrap();
        assert_eq!(reopened.header().unwrap().video_buffer_size, 32);
    }

    #[test]
    fn test_open_missing_segment() {
        let err = SegmentReader::open(&unique_name("missing")).err().unwrap();
        assert!(matches!(err, ReadError::Open { .. }));
    }
}
