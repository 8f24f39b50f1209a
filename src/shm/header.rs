//! Fixed binary header at the start of every segment
//!
//! ```text
//! offset  field
//!      0  u32 header_size
//!      4  u32 video_buffer_size
//!      8  u32 width
//!     12  u32 height
//!     16  u32 bytes
//!     20  u32 stride
//!     24  u32 planes
//!     28  u32 format             wire tag
//!     32  u32 frame_count
//!     36  u32 busy               advisory, 1 while the payload is written
//!     40  f32 fps
//!     44  payload (video_buffer_size bytes)
//! ```
//!
//! Fields are native endian. Every field is an atomic so the header can be
//! viewed through a shared reference while other processes read or write it.

use std::mem;
use std::sync::atomic::{fence, AtomicU32, Ordering};

/// In-memory view of the segment header
#[repr(C)]
#[derive(Debug)]
pub struct ShmHeader {
    header_size: AtomicU32,
    video_buffer_size: AtomicU32,
    width: AtomicU32,
    height: AtomicU32,
    bytes: AtomicU32,
    stride: AtomicU32,
    planes: AtomicU32,
    format: AtomicU32,
    frame_count: AtomicU32,
    busy: AtomicU32,
    fps: AtomicU32, // f32 bits
}

pub const HEADER_SIZE: usize = mem::size_of::<ShmHeader>();

const _: () = assert!(HEADER_SIZE == 44);
const _: () = assert!(mem::align_of::<ShmHeader>() == 4);

/// Per-frame header fields written by the publisher
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameFields {
    pub width: u32,
    pub height: u32,
    pub bytes: u32,
    pub stride: u32,
    pub planes: u32,
    pub format: u32,
    pub fps: f32,
}

/// Plain copy of every header field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaderSnapshot {
    pub header_size: u32,
    pub video_buffer_size: u32,
    pub width: u32,
    pub height: u32,
    pub bytes: u32,
    pub stride: u32,
    pub planes: u32,
    pub format: u32,
    pub frame_count: u32,
    pub busy: bool,
    pub fps: f32,
}

impl ShmHeader {
    /// View the start of a read-only mapping as a header
    ///
    /// Returns `None` when the buffer is too short or not 4-byte aligned. The
    /// returned view must only be loaded from.
    pub fn from_bytes(bytes: &[u8]) -> Option<&ShmHeader> {
        if !Self::fits(bytes) {
            return None;
        }
        // SAFETY: length and alignment checked above; every bit pattern is a
        // valid AtomicU32 and all access goes through atomics.
        Some(unsafe { &*(bytes.as_ptr() as *const ShmHeader) })
    }

    /// View the start of a writable mapping as a header
    pub fn from_bytes_mut(bytes: &mut [u8]) -> Option<&ShmHeader> {
        if !Self::fits(bytes) {
            return None;
        }
        // SAFETY: as above, with write provenance from the mutable borrow.
        Some(unsafe { &*(bytes.as_mut_ptr() as *const ShmHeader) })
    }

    fn fits(bytes: &[u8]) -> bool {
        bytes.len() >= HEADER_SIZE && bytes.as_ptr() as usize % mem::align_of::<Self>() == 0
    }

    /// Stamp the fields that stay fixed for the life of a segment
    ///
    /// Also resets the frame counter and clears the busy flag.
    pub fn init(&self, video_buffer_size: u32) {
        self.header_size.store(HEADER_SIZE as u32, Ordering::Relaxed);
        self.video_buffer_size.store(video_buffer_size, Ordering::Relaxed);
        self.frame_count.store(0, Ordering::Relaxed);
        self.busy.store(0, Ordering::Release);
    }

    pub fn write_fields(&self, fields: &FrameFields) {
        self.width.store(fields.width, Ordering::Relaxed);
        self.height.store(fields.height, Ordering::Relaxed);
        self.bytes.store(fields.bytes, Ordering::Relaxed);
        self.stride.store(fields.stride, Ordering::Relaxed);
        self.planes.store(fields.planes, Ordering::Relaxed);
        self.format.store(fields.format, Ordering::Relaxed);
        self.fps.store(fields.fps.to_bits(), Ordering::Relaxed);
    }

    /// Raise the busy flag ahead of payload writes
    pub fn begin_write(&self) {
        self.busy.store(1, Ordering::Relaxed);
        fence(Ordering::Release);
    }

    /// Bump the frame counter and drop the busy flag
    ///
    /// Returns the new frame count.
    pub fn end_write(&self) -> u32 {
        let count = self.frame_count.load(Ordering::Relaxed).wrapping_add(1);
        self.frame_count.store(count, Ordering::Relaxed);
        self.busy.store(0, Ordering::Release);
        count
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire) != 0
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count.load(Ordering::Acquire)
    }

    pub fn header_size(&self) -> u32 {
        self.header_size.load(Ordering::Relaxed)
    }

    pub fn video_buffer_size(&self) -> u32 {
        self.video_buffer_size.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HeaderSnapshot {
        let busy = self.is_busy();
        HeaderSnapshot {
            header_size: self.header_size.load(Ordering::Relaxed),
            video_buffer_size: self.video_buffer_size.load(Ordering::Relaxed),
            width: self.width.load(Ordering::Relaxed),
            height: self.height.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            stride: self.stride.load(Ordering::Relaxed),
            planes: self.planes.load(Ordering::Relaxed),
            format: self.format.load(Ordering::Relaxed),
            frame_count: self.frame_count.load(Ordering::Relaxed),
            busy,
            fps: f32::from_bits(self.fps.load(Ordering::Relaxed)),
        }
    }
}
