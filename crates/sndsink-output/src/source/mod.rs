//! Upstream sources the playback loop pulls PCM blocks from.
//!
//! A source is the player-side half of the sink: the playback loop calls
//! [`BlockSource::pull`] once per cycle from its own thread, at whatever pace
//! the device accepts data.

pub mod channel;
pub mod reader;
pub mod tone;

pub use channel::{block_channel, BlockSender, ChannelSource};
pub use reader::ReaderSource;
pub use tone::ToneSource;

use sndsink_core::{Result, StreamParams};

/// Outcome of a single pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulled {
    /// Bytes written into the caller's buffer.
    pub len: usize,
    /// No data will follow `len`.
    pub end_of_stream: bool,
}

impl Pulled {
    /// `len` bytes were produced and more will follow.
    pub const fn data(len: usize) -> Self {
        Self {
            len,
            end_of_stream: false,
        }
    }

    /// `len` final bytes were produced.
    pub const fn end(len: usize) -> Self {
        Self {
            len,
            end_of_stream: true,
        }
    }
}

/// Pull-based supplier of interleaved PCM bytes.
pub trait BlockSource: Send {
    /// Fill a prefix of `buf` with the next bytes of the stream.
    ///
    /// May block until data is ready. An `Err` ends the session as a source
    /// failure; it is never retried.
    fn pull(&mut self, buf: &mut [u8]) -> Result<Pulled>;

    /// Called once, before the first pull, with the parameters the device
    /// actually accepted. Bytes pulled afterwards must be in this layout.
    fn negotiated(&mut self, _params: &StreamParams) {}
}

impl<S: BlockSource + ?Sized> BlockSource for Box<S> {
    fn pull(&mut self, buf: &mut [u8]) -> Result<Pulled> {
        (**self).pull(buf)
    }

    fn negotiated(&mut self, params: &StreamParams) {
        (**self).negotiated(params);
    }
}
