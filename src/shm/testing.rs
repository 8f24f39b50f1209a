//! Accounting double for segment lifecycle tests

use std::collections::HashSet;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::segment::{SegmentBackend, SegmentError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Create { name: String, size: usize },
    Unmap(String),
    Unlink(String),
}

/// Heap region with the 8-byte alignment a page mapping would give
pub struct MemRegion {
    words: Vec<u64>,
    len: usize,
}

impl MemRegion {
    fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)],
            len,
        }
    }
}

impl Deref for MemRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: `words` holds at least `len` initialised bytes.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }
}

impl DerefMut for MemRegion {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, borrowed mutably.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.len) }
    }
}

/// Backend that records every create/unmap/unlink
#[derive(Debug, Default)]
pub struct MemBackend {
    pub events: Vec<Event>,
    /// Regions mapped and not yet unmapped
    pub live: usize,
    /// Highest value `live` ever reached
    pub max_live: usize,
    pub(crate) objects: HashSet<String>,
    pub fail_create: bool,
    pub fail_map: bool,
    pub fail_unlink: bool,
}

impl MemBackend {
    /// Named objects created and not yet unlinked
    pub fn objects(&self) -> usize {
        self.objects.len()
    }

    pub fn creates(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Create { .. }))
            .count()
    }
}

impl SegmentBackend for MemBackend {
    type Region = MemRegion;

    fn create(&mut self, name: &str, size: usize) -> Result<MemRegion, SegmentError> {
        if self.fail_create {
            return Err(SegmentError::Create {
                name: name.to_owned(),
                size,
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            });
        }

        if !self.objects.insert(name.to_owned()) {
            return Err(SegmentError::Create {
                name: name.to_owned(),
                size,
                source: io::Error::from(io::ErrorKind::AlreadyExists),
            });
        }
        self.events.push(Event::Create {
            name: name.to_owned(),
            size,
        });

        if self.fail_map {
            self.objects.remove(name);
            self.events.push(Event::Unlink(name.to_owned()));
            return Err(SegmentError::Map {
                name: name.to_owned(),
                size,
                source: io::Error::from(io::ErrorKind::OutOfMemory),
            });
        }

        self.live += 1;
        self.max_live = self.max_live.max(self.live);
        Ok(MemRegion::zeroed(size))
    }

    fn unmap(&mut self, name: &str, region: MemRegion) -> Result<(), SegmentError> {
        drop(region);
        self.live -= 1;
        self.events.push(Event::Unmap(name.to_owned()));
        Ok(())
    }

    fn unlink(&mut self, name: &str) -> Result<(), SegmentError> {
        if self.fail_unlink {
            return Err(SegmentError::Release {
                name: name.to_owned(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        self.objects.remove(name);
        self.events.push(Event::Unlink(name.to_owned()));
        Ok(())
    }
}

/// Object name no other test (or test process) is using
pub fn unique_name(tag: &str) -> String {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    format!(
        "shmvo-test-{tag}-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    )
}
