//! Named shared-memory segment lifecycle

use std::fs::File;
use std::io;
use std::ops::DerefMut;

use memmap2::{MmapMut, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::header::{ShmHeader, HEADER_SIZE};
use crate::utils::shm_object_name;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("invalid shared memory name {name:?}")]
    InvalidName { name: String },

    #[error("invalid segment size {size}: must hold the 44 byte header and fit in 32 bits")]
    InvalidSize { size: usize },

    #[error("failed to create shared memory {name:?} of {size} bytes: {source}")]
    Create {
        name: String,
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("failed to map shared memory {name:?} of {size} bytes: {source}")]
    Map {
        name: String,
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("failed to release shared memory {name:?}: {source}")]
    Release {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Source of named, mapped memory regions
///
/// [`PosixShm`] is the real thing; tests substitute an accounting double.
pub trait SegmentBackend {
    type Region: DerefMut<Target = [u8]>;

    /// Create `name` sized to exactly `size` bytes and map it
    ///
    /// Fails with [`SegmentError::Create`] if `name` already exists. If sizing
    /// or mapping fails, the object must be unlinked before the error is
    /// returned.
    fn create(&mut self, name: &str, size: usize) -> Result<Self::Region, SegmentError>;

    /// Unmap a region previously returned by `create`
    fn unmap(&mut self, _name: &str, region: Self::Region) -> Result<(), SegmentError> {
        drop(region);
        Ok(())
    }

    /// Remove the named object so no new reader can attach
    fn unlink(&mut self, name: &str) -> Result<(), SegmentError>;
}

/// POSIX `shm_open` objects mapped read/write
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixShm;

impl SegmentBackend for PosixShm {
    type Region = MmapMut;

    fn create(&mut self, name: &str, size: usize) -> Result<MmapMut, SegmentError> {
        let create_error = |source: io::Error| SegmentError::Create {
            name: name.to_owned(),
            size,
            source,
        };
        let mode = Mode::S_IRUSR | Mode::S_IWUSR;

        // Never adopt an existing object: another producer may still hold it
        // mapped, and resizing it under them would fault their writes.
        let exclusive = OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR;
        let fd = match shm_open(name, exclusive, mode) {
            Ok(fd) => fd,
            Err(Errno::EEXIST) => {
                warn!(name, "shared memory object already exists, refusing to take it over");
                return Err(create_error(Errno::EEXIST.into()));
            }
            Err(e) => return Err(create_error(e.into())),
        };

        let len = nix::libc::off_t::try_from(size).map_err(|_| {
            release_after_failure(name);
            create_error(io::Error::new(io::ErrorKind::InvalidInput, "size exceeds off_t"))
        })?;
        if let Err(e) = ftruncate(&fd, len) {
            release_after_failure(name);
            return Err(create_error(e.into()));
        }

        let file = File::from(fd);
        // SAFETY: the mapping is shared with other processes by design; all
        // header access goes through atomics and payload bytes are plain data.
        match unsafe { MmapOptions::new().len(size).map_mut(&file) } {
            Ok(map) => Ok(map),
            Err(source) => {
                release_after_failure(name);
                Err(SegmentError::Map {
                    name: name.to_owned(),
                    size,
                    source,
                })
            }
        }
    }

    fn unlink(&mut self, name: &str) -> Result<(), SegmentError> {
        shm_unlink(name).map_err(|e| SegmentError::Release {
            name: name.to_owned(),
            source: e.into(),
        })
    }
}

fn release_after_failure(name: &str) {
    if let Err(e) = shm_unlink(name) {
        warn!(name, error = %e, "failed to unlink shared memory after a failed setup");
    }
}

/// Borrowed view of a live segment: header plus payload region
///
/// The borrow ties the view to the manager, so it cannot outlive a resize or
/// teardown.
#[derive(Debug)]
pub struct SegmentHandle<'a> {
    header: &'a ShmHeader,
    payload: &'a mut [u8],
}

impl<'a> SegmentHandle<'a> {
    fn new(region: &'a mut [u8]) -> Option<Self> {
        if region.len() < HEADER_SIZE {
            return None;
        }
        let (head, payload) = region.split_at_mut(HEADER_SIZE);
        let header = ShmHeader::from_bytes_mut(head)?;
        Some(Self { header, payload })
    }

    pub fn header(&self) -> &ShmHeader {
        self.header
    }

    pub fn payload(&self) -> &[u8] {
        &*self.payload
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut *self.payload
    }

    /// Header and writable payload at once
    pub fn split(&mut self) -> (&ShmHeader, &mut [u8]) {
        (self.header, &mut *self.payload)
    }
}

struct Segment<R> {
    name: String,
    size: usize,
    region: R,
}

/// Owner of at most one named segment at a time
pub struct SegmentManager<B: SegmentBackend = PosixShm> {
    backend: B,
    live: Option<Segment<B::Region>>,
}

impl SegmentManager<PosixShm> {
    pub fn new() -> Self {
        Self::with_backend(PosixShm)
    }
}

impl Default for SegmentManager<PosixShm> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: SegmentBackend> SegmentManager<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            live: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_configured(&self) -> bool {
        self.live.is_some()
    }

    /// Object name of the live segment
    pub fn name(&self) -> Option<&str> {
        self.live.as_ref().map(|s| s.name.as_str())
    }

    /// Size in bytes of the live segment
    pub fn size(&self) -> Option<usize> {
        self.live.as_ref().map(|s| s.size)
    }

    /// Replace the current segment with a fresh one of `total_size` bytes
    ///
    /// The header is stamped with its own size and the payload size, the frame
    /// counter starts at zero.
    #[instrument(skip(self))]
    pub fn configure(
        &mut self,
        name: &str,
        total_size: usize,
    ) -> Result<SegmentHandle<'_>, SegmentError> {
        let object = shm_object_name(name).ok_or_else(|| SegmentError::InvalidName {
            name: name.to_owned(),
        })?;
        if total_size < HEADER_SIZE || u32::try_from(total_size).is_err() {
            return Err(SegmentError::InvalidSize { size: total_size });
        }

        if let Err(e) = self.teardown() {
            warn!(error = %e, "previous segment was not fully released");
        }

        let mut region = self.backend.create(&object, total_size)?;
        let video_buffer_size = (total_size - HEADER_SIZE) as u32;

        let usable = region.len() == total_size
            && match SegmentHandle::new(&mut region) {
                Some(handle) => {
                    handle.header().init(video_buffer_size);
                    true
                }
                None => false,
            };
        if !usable {
            self.release(&object, region);
            return Err(misaligned(object, total_size));
        }

        info!(
            name = %object,
            size = total_size,
            video_buffer_size,
            "shared memory segment ready"
        );

        let segment = self.live.insert(Segment {
            name: object,
            size: total_size,
            region,
        });
        SegmentHandle::new(&mut segment.region)
            .ok_or_else(|| misaligned(segment.name.clone(), total_size))
    }

    /// View of the live segment, if any
    pub fn handle(&mut self) -> Option<SegmentHandle<'_>> {
        let segment = self.live.as_mut()?;
        SegmentHandle::new(&mut segment.region)
    }

    /// Unmap and unlink the live segment
    ///
    /// The busy flag is left raised in the retired segment. A no-op when
    /// nothing is configured. Both steps are always attempted; the first
    /// failure is returned.
    #[instrument(skip(self))]
    pub fn teardown(&mut self) -> Result<(), SegmentError> {
        let Some(mut segment) = self.live.take() else {
            return Ok(());
        };
        debug!(name = %segment.name, size = segment.size, "releasing segment");

        // Readers still attached to the old object keep seeing busy.
        if let Some(handle) = SegmentHandle::new(&mut segment.region) {
            handle.header().begin_write();
        }

        let unmapped = self.backend.unmap(&segment.name, segment.region);
        let unlinked = self.backend.unlink(&segment.name);
        match (unmapped, unlinked) {
            (Err(e), Err(other)) => {
                warn!(error = %other, "unlink also failed");
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn release(&mut self, name: &str, region: B::Region) {
        if let Err(e) = self.backend.unmap(name, region) {
            warn!(error = %e, "failed to unmap rejected segment");
        }
        if let Err(e) = self.backend.unlink(name) {
            warn!(error = %e, "failed to unlink rejected segment");
        }
    }
}

impl<B: SegmentBackend> Drop for SegmentManager<B> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(error = %e, "segment release on drop failed");
        }
    }
}

fn misaligned(name: String, size: usize) -> SegmentError {
    SegmentError::Map {
        name,
        size,
        source: io::Error::new(
            io::ErrorKind::InvalidData,
            "mapped region is short or misaligned",
        ),
    }
}
