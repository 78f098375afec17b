//! Single-producer/single-consumer byte ring crossing the real-time boundary.
//!
//! The fan-out writes raw sample bytes from the audio callback; an encoder or
//! recorder worker drains them at its own pace. Storage is either a plain heap
//! allocation or an anonymous `mmap` region laid out as header + data, so the
//! same ring can be inspected by a peer process.
use std::cell::UnsafeCell;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};
use once_cell::sync::Lazy;

/// Header stored at the front of a shared memory ring.
#[repr(C, align(64))]
pub struct RingBufferHeader {
    capacity_bytes: u64,
    write_index: AtomicU64,
    read_index: AtomicU64,
    last_timestamp_ns: AtomicU64,
}

impl RingBufferHeader {
    fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes: capacity_bytes as u64,
            write_index: AtomicU64::new(0),
            read_index: AtomicU64::new(0),
            last_timestamp_ns: AtomicU64::new(0),
        }
    }
}

enum RingStorage {
    Local {
        header: RingBufferHeader,
        data: UnsafeCell<Box<[u8]>>,
    },
    Shared {
        // Keeps the mapping alive; all access goes through the raw pointers.
        _mmap: MmapMut,
        header_ptr: *const RingBufferHeader,
        data_ptr: *mut u8,
    },
}

unsafe impl Send for RingStorage {}
unsafe impl Sync for RingStorage {}

/// Lock-free byte ring. One thread may push, one thread may pop.
///
/// Indices are monotonically increasing byte counters; the slot for an index
/// is `index % capacity`. The producer owns `write_index`, the consumer owns
/// `read_index`, except for [`reset`](Self::reset) which the producer uses to
/// discard unread content.
///
/// A consumer copy can race a producer `reset` followed by a `push` into the
/// same slots. Such a copy may read torn bytes; the read-index CAS that
/// commits it then fails and [`pop`](Self::pop) reports 0, so torn data is
/// never returned as read.
pub struct SharedRingBuffer {
    storage: RingStorage,
    capacity: usize,
}

unsafe impl Send for SharedRingBuffer {}
unsafe impl Sync for SharedRingBuffer {}

impl SharedRingBuffer {
    /// Create a heap-backed ring holding `capacity_bytes` bytes.
    pub fn new_local(capacity_bytes: usize) -> Self {
        Self {
            storage: RingStorage::Local {
                header: RingBufferHeader::new(capacity_bytes),
                data: UnsafeCell::new(vec![0u8; capacity_bytes].into_boxed_slice()),
            },
            capacity: capacity_bytes,
        }
    }

    /// Create a ring backed by an anonymous shared memory mapping.
    pub fn new_shared(capacity_bytes: usize) -> std::io::Result<Self> {
        let bytes = size_of::<RingBufferHeader>() + capacity_bytes;
        let mut mmap = MmapOptions::new().len(bytes).map_anon()?;
        let header_ptr = mmap.as_mut_ptr() as *mut RingBufferHeader;
        // SAFETY: the mapping is page aligned and large enough for the header.
        unsafe {
            header_ptr.write(RingBufferHeader::new(capacity_bytes));
        }
        let data_ptr = unsafe { mmap.as_mut_ptr().add(size_of::<RingBufferHeader>()) };
        Ok(Self {
            storage: RingStorage::Shared {
                _mmap: mmap,
                header_ptr,
                data_ptr,
            },
            capacity: capacity_bytes,
        })
    }

    fn header(&self) -> &RingBufferHeader {
        match &self.storage {
            RingStorage::Local { header, .. } => header,
            RingStorage::Shared { header_ptr, .. } => unsafe { &**header_ptr },
        }
    }

    fn data_ptr(&self) -> *mut u8 {
        match &self.storage {
            RingStorage::Local { data, .. } => unsafe { (*data.get()).as_mut_ptr() },
            RingStorage::Shared { data_ptr, .. } => *data_ptr,
        }
    }

    /// Total capacity in bytes.
    pub fn capacity_bytes(&self) -> usize {
        self.header().capacity_bytes as usize
    }

    /// Whether the ring lives in a shared memory mapping.
    pub fn is_shared(&self) -> bool {
        matches!(self.storage, RingStorage::Shared { .. })
    }

    /// Bytes that can currently be pushed without overwriting unread data.
    pub fn write_space(&self) -> usize {
        self.capacity - self.available_read()
    }

    /// Bytes ready for reading.
    pub fn available_read(&self) -> usize {
        let header = self.header();
        let write_index = header.write_index.load(Ordering::Acquire);
        let read_index = header.read_index.load(Ordering::Acquire);
        write_index.saturating_sub(read_index).min(self.capacity as u64) as usize
    }

    /// Push bytes into the ring, returning the number written.
    pub fn push(&self, bytes: &[u8], timestamp_ns: Option<u64>) -> usize {
        if bytes.is_empty() || self.capacity == 0 {
            return 0;
        }
        let header = self.header();
        let capacity = self.capacity as u64;
        let write_index = header.write_index.load(Ordering::Relaxed);
        let read_index = header.read_index.load(Ordering::Acquire);
        let used = write_index.saturating_sub(read_index).min(capacity);
        let free = (capacity - used) as usize;
        if free == 0 {
            return 0;
        }
        let to_write = bytes.len().min(free);

        let start = (write_index % capacity) as usize;
        let first = (self.capacity - start).min(to_write);
        let data = self.data_ptr();
        // SAFETY: the producer exclusively owns the free region
        // [write_index, read_index + capacity).
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), data.add(start), first);
            if to_write > first {
                std::ptr::copy_nonoverlapping(bytes.as_ptr().add(first), data, to_write - first);
            }
        }

        header
            .write_index
            .store(write_index + to_write as u64, Ordering::Release);
        let timestamp = timestamp_ns.unwrap_or_else(monotonic_timestamp_ns);
        header.last_timestamp_ns.store(timestamp, Ordering::Release);
        to_write
    }

    /// Pop bytes into `out`, returning the number read.
    ///
    /// A concurrent [`reset`](Self::reset) wins over an in-progress pop: the
    /// copied bytes are then treated as discarded and 0 is returned.
    pub fn pop(&self, out: &mut [u8]) -> usize {
        if out.is_empty() || self.capacity == 0 {
            return 0;
        }
        let header = self.header();
        let capacity = self.capacity as u64;
        let read_index = header.read_index.load(Ordering::Acquire);
        let write_index = header.write_index.load(Ordering::Acquire);
        let available = write_index.saturating_sub(read_index).min(capacity) as usize;
        if available == 0 {
            return 0;
        }
        let to_read = out.len().min(available);

        let start = (read_index % capacity) as usize;
        let first = (self.capacity - start).min(to_read);
        let data = self.data_ptr();
        // SAFETY: [read_index, write_index) is published by the producer and
        // not rewritten until the read index moves past it, except after a
        // producer reset. In that case the bytes copied here may be torn and
        // the compare-exchange below rejects them.
        unsafe {
            std::ptr::copy_nonoverlapping(data.add(start), out.as_mut_ptr(), first);
            if to_read > first {
                std::ptr::copy_nonoverlapping(data, out.as_mut_ptr().add(first), to_read - first);
            }
        }

        match header.read_index.compare_exchange(
            read_index,
            read_index + to_read as u64,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => to_read,
            Err(_) => 0,
        }
    }

    /// Drop up to `bytes` unread bytes without copying. Consumer side.
    pub fn discard(&self, bytes: usize) -> usize {
        let header = self.header();
        let read_index = header.read_index.load(Ordering::Acquire);
        let write_index = header.write_index.load(Ordering::Acquire);
        let available = write_index.saturating_sub(read_index).min(self.capacity as u64);
        let bytes = (bytes as u64).min(available);
        if bytes == 0 {
            return 0;
        }
        match header.read_index.compare_exchange(
            read_index,
            read_index + bytes,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => bytes as usize,
            Err(_) => 0,
        }
    }

    /// Empty the ring from the producer side. Returns the bytes discarded.
    pub fn reset(&self) -> usize {
        let header = self.header();
        let write_index = header.write_index.load(Ordering::Acquire);
        let mut read_index = header.read_index.load(Ordering::Acquire);
        loop {
            if read_index >= write_index {
                return 0;
            }
            match header.read_index.compare_exchange_weak(
                read_index,
                write_index,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return (write_index - read_index) as usize,
                Err(current) => read_index = current,
            }
        }
    }

    /// Timestamp of the last write.
    pub fn last_timestamp_ns(&self) -> u64 {
        self.header().last_timestamp_ns.load(Ordering::Acquire)
    }

    /// Fraction of the ring holding unread data.
    pub fn fill_ratio(&self) -> f32 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.available_read() as f32 / self.capacity as f32
    }
}

/// Monotonic timestamp in nanoseconds since the first call in this process.
pub fn monotonic_timestamp_ns() -> u64 {
    static START: Lazy<std::time::Instant> = Lazy::new(std::time::Instant::now);
    let elapsed = START.elapsed();
    (elapsed.as_secs() * 1_000_000_000) + elapsed.subsec_nanos() as u64
}
