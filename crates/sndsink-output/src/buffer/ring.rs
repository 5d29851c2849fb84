//! Lock-free byte ring between a blocking device writer and the device
//! callback.
//!
//! The playback thread is the only producer and the cpal callback the only
//! consumer.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Lock-free single-producer, single-consumer ring of PCM bytes.
///
/// The consumer runs on the real-time audio thread, so reads never allocate
/// or lock.
pub struct ByteRing {
    /// The underlying storage.
    buffer: Box<[UnsafeCell<u8>]>,
    /// Total bytes ever read.
    read_pos: AtomicUsize,
    /// Total bytes ever written.
    write_pos: AtomicUsize,
    /// Capacity (power of 2 for efficient modulo).
    capacity: usize,
    mask: usize,
}

impl ByteRing {
    /// Create a ring holding at least `capacity` bytes.
    ///
    /// The capacity is rounded up to the next power of 2.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let buffer = (0..capacity).map(|_| UnsafeCell::new(0u8)).collect();

        Self {
            buffer,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes available for reading.
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Bytes that can be written without overwriting unread data.
    pub fn free(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn is_full(&self) -> bool {
        self.free() == 0
    }

    fn base_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.buffer.as_ptr())
    }

    /// Write as many bytes as fit. Producer side only.
    ///
    /// Returns the number of bytes written.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let read_pos = self.read_pos.load(Ordering::Acquire);

        let space = self.capacity - write_pos.wrapping_sub(read_pos);
        let to_write = bytes.len().min(space);
        if to_write == 0 {
            return 0;
        }

        let start = write_pos & self.mask;
        let first = to_write.min(self.capacity - start);
        let base = self.base_ptr();

        // SAFETY: single producer; the region [start, start + to_write) modulo
        // capacity is free space the consumer will not read until write_pos
        // is published below.
        #[allow(unsafe_code)]
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(start), first);
            if first < to_write {
                std::ptr::copy_nonoverlapping(bytes.as_ptr().add(first), base, to_write - first);
            }
        }

        self.write_pos
            .store(write_pos.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Read up to `out.len()` bytes. Consumer side only.
    ///
    /// Returns the number of bytes read.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let write_pos = self.write_pos.load(Ordering::Acquire);

        let available = write_pos.wrapping_sub(read_pos);
        let to_read = out.len().min(available);
        if to_read == 0 {
            return 0;
        }

        let start = read_pos & self.mask;
        let first = to_read.min(self.capacity - start);
        let base = self.base_ptr();

        // SAFETY: single consumer; the region was published by the producer's
        // Release store observed above and is not rewritten until read_pos
        // advances.
        #[allow(unsafe_code)]
        unsafe {
            std::ptr::copy_nonoverlapping(base.add(start), out.as_mut_ptr(), first);
            if first < to_read {
                std::ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), to_read - first);
            }
        }

        self.read_pos
            .store(read_pos.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// Discard everything currently buffered. Consumer side only.
    pub fn clear(&self) {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write_pos, Ordering::Release);
    }
}

// SAFETY: producer and consumer touch disjoint regions, coordinated through
// the atomic positions.
#[allow(unsafe_code)]
unsafe impl Sync for ByteRing {}

/// Thread-safe reference to a byte ring.
pub type SharedByteRing = Arc<ByteRing>;

/// Create a new shared byte ring.
pub fn shared_byte_ring(capacity: usize) -> SharedByteRing {
    Arc::new(ByteRing::new(capacity))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;

    #[test]
    fn test_basic_write_read() {
        let ring = ByteRing::new(1024);

        let bytes = [1u8, 2, 3, 4, 5];
        assert_eq!(ring.write(&bytes), 5);
        assert_eq!(ring.available(), 5);

        let mut out = [0u8; 5];
        assert_eq!(ring.read(&mut out), 5);
        assert_eq!(out, bytes);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_capacity_rounds_up() {
        assert_eq!(ByteRing::new(1000).capacity(), 1024);
        assert_eq!(ByteRing::new(0).capacity(), 1);
    }

    #[test]
    fn test_wraparound() {
        let ring = ByteRing::new(8);

        assert_eq!(ring.write(&[1u8; 6]), 6);
        let mut out = [0u8; 4];
        assert_eq!(ring.read(&mut out), 4);

        assert_eq!(ring.write(&[2u8; 5]), 5);

        let mut rest = [0u8; 7];
        assert_eq!(ring.read(&mut rest), 7);
        assert_eq!(&rest[..2], &[1, 1]);
        assert_eq!(&rest[2..], &[2; 5]);
    }

    #[test]
    fn test_full_ring_rejects_writes() {
        let ring = ByteRing::new(4);

        assert_eq!(ring.write(&[1u8; 6]), 4);
        assert!(ring.is_full());
        assert_eq!(ring.write(&[2]), 0);

        let mut one = [0u8; 1];
        ring.read(&mut one);
        assert_eq!(ring.write(&[2]), 1);
    }

    #[test]
    fn test_clear() {
        let ring = ByteRing::new(16);
        ring.write(&[7u8; 10]);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.free(), 16);
    }

    #[test]
    fn test_concurrent_order_is_preserved() {
        use std::thread;

        let ring = shared_byte_ring(64);
        let writer_ring = ring.clone();
        let total = 10_000usize;

        let writer = thread::spawn(move || {
            let data: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
            let mut offset = 0;
            while offset < data.len() {
                let written = writer_ring.write(&data[offset..(offset + 37).min(data.len())]);
                offset += written;
                if written == 0 {
                    thread::yield_now();
                }
            }
        });

        let mut received = Vec::with_capacity(total);
        let mut chunk = [0u8; 29];
        while received.len() < total {
            let read = ring.read(&mut chunk);
            received.extend_from_slice(&chunk[..read]);
            if read == 0 {
                thread::yield_now();
            }
        }
        writer.join().unwrap();

        assert!(received
            .iter()
            .enumerate()
            .all(|(i, b)| *b == (i % 251) as u8));
    }
}
