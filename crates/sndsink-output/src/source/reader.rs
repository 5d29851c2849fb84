//! Raw PCM from any [`Read`] implementation.

use std::io::{ErrorKind, Read};

use sndsink_core::Result;

use super::{BlockSource, Pulled};

/// Source that reads headerless interleaved PCM from a reader (file, pipe,
/// stdin).
pub struct ReaderSource<R> {
    reader: R,
    finished: bool,
}

impl<R: Read + Send> ReaderSource<R> {
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }
}

impl<R: Read + Send> BlockSource for ReaderSource<R> {
    /// Fills the whole buffer unless the reader hits end-of-file first.
    fn pull(&mut self, buf: &mut [u8]) -> Result<Pulled> {
        if self.finished {
            return Ok(Pulled::end(0));
        }

        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.finished = true;
                    return Ok(Pulled::end(filled));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Pulled::data(filled))
    }
}
