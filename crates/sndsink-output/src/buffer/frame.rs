//! Fixed-capacity staging buffer for one block of interleaved PCM.

use sndsink_core::{Error, Result};

/// Staging buffer between an upstream pull and a device write.
///
/// The capacity is fixed at construction and is always a whole number of
/// frames. Only complete frames are ever handed to the device; a trailing
/// partial frame from a short pull is carried to the front of the buffer and
/// completed by the next pull.
pub struct FrameBuffer {
    data: Box<[u8]>,
    frame_bytes: usize,
    filled: usize,
}

impl FrameBuffer {
    /// Create a buffer of at most `capacity` bytes for frames of `frame_bytes`.
    ///
    /// The capacity is rounded down to a multiple of the frame size, but is
    /// never smaller than one frame.
    pub fn new(capacity: usize, frame_bytes: usize) -> Self {
        let frame_bytes = frame_bytes.max(1);
        let capacity = (capacity / frame_bytes).max(1) * frame_bytes;

        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            frame_bytes,
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub const fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Bytes currently held, including any partial frame.
    pub const fn len(&self) -> usize {
        self.filled
    }

    pub const fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Bytes of the trailing partial frame.
    pub const fn remainder(&self) -> usize {
        self.filled % self.frame_bytes
    }

    /// Unfilled space for the next pull.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.filled..]
    }

    /// Mark `len` bytes of the spare region as filled.
    ///
    /// Fails if `len` exceeds the spare region; the buffer is left unchanged.
    pub fn commit(&mut self, len: usize) -> Result<()> {
        let spare = self.data.len() - self.filled;
        if len > spare {
            return Err(Error::Source(format!(
                "source reported {len} bytes into a {spare}-byte buffer"
            )));
        }
        self.filled += len;
        Ok(())
    }

    /// The complete frames currently held.
    pub fn frames(&self) -> &[u8] {
        &self.data[..self.filled - self.remainder()]
    }

    /// Drop the complete frames, moving any partial frame to the front.
    ///
    /// Returns the number of bytes dropped.
    pub fn consume_frames(&mut self) -> usize {
        let remainder = self.remainder();
        let consumed = self.filled - remainder;
        if remainder > 0 {
            self.data.copy_within(consumed..self.filled, 0);
        }
        self.filled = remainder;
        consumed
    }

    /// Forget everything, including a partial frame.
    pub fn clear(&mut self) {
        self.filled = 0;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_capacity_is_frame_aligned() {
        assert_eq!(FrameBuffer::new(4096, 4).capacity(), 4096);
        assert_eq!(FrameBuffer::new(4096, 6).capacity(), 4092);
        assert_eq!(FrameBuffer::new(2, 6).capacity(), 6);
        assert_eq!(FrameBuffer::new(4096, 0).frame_bytes(), 1);
    }

    #[test]
    fn test_full_block() {
        let mut buf = FrameBuffer::new(8, 4);
        buf.spare_mut().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        buf.commit(8).unwrap();

        assert_eq!(buf.frames(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buf.consume_frames(), 8);
        assert!(buf.is_empty());
        assert_eq!(buf.spare_mut().len(), 8);
    }

    #[test]
    fn test_partial_frame_is_carried() {
        let mut buf = FrameBuffer::new(8, 4);
        buf.spare_mut()[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        buf.commit(6).unwrap();

        assert_eq!(buf.frames(), &[1, 2, 3, 4]);
        assert_eq!(buf.remainder(), 2);
        assert_eq!(buf.consume_frames(), 4);

        assert_eq!(buf.len(), 2);
        buf.spare_mut()[..2].copy_from_slice(&[7, 8]);
        buf.commit(2).unwrap();
        assert_eq!(buf.frames(), &[5, 6, 7, 8]);
    }

    #[test]
    fn test_commit_past_capacity_fails() {
        let mut buf = FrameBuffer::new(8, 4);
        buf.commit(4).unwrap();
        assert!(buf.commit(5).is_err());
        assert_eq!(buf.len(), 4);
    }

    proptest! {
        #[test]
        fn prop_frames_are_always_whole(
            frame_bytes in 1usize..=32,
            pulls in proptest::collection::vec(0usize..=4096, 1..20),
        ) {
            let mut buf = FrameBuffer::new(4096, frame_bytes);
            let mut total_in = 0usize;
            let mut total_out = 0usize;

            for pull in pulls {
                let len = pull.min(buf.spare_mut().len());
                buf.commit(len).unwrap();
                total_in += len;

                prop_assert_eq!(buf.frames().len() % frame_bytes, 0);
                total_out += buf.consume_frames();
                prop_assert!(buf.len() < frame_bytes);
            }

            prop_assert_eq!(total_in, total_out + buf.len());
        }
    }
}
