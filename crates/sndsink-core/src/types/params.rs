//! Stream parameters negotiated with an output device.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::SampleFormat;
use crate::{Error, Result};

/// Sample rate, channel count, and sample format of an interleaved PCM stream.
///
/// Used both for what a host requests and for what a device actually
/// accepted; the latter is fixed for the lifetime of an open session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StreamParams {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channels per frame.
    pub channels: u16,
    /// Encoding of each sample.
    pub format: SampleFormat,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            format: SampleFormat::S16Le,
        }
    }
}

impl StreamParams {
    pub const fn new(sample_rate: u32, channels: u16, format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            format,
        }
    }

    /// Bytes in one interleaved frame (`channels × bytes_per_sample`).
    pub const fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    /// Bytes consumed by one second of audio.
    pub const fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.bytes_per_frame() as u64
    }

    /// Whether `len` bytes hold a whole number of frames.
    pub const fn is_frame_aligned(&self, len: usize) -> bool {
        let frame = self.bytes_per_frame();
        frame != 0 && len % frame == 0
    }

    /// Playback time of `len` bytes.
    pub fn duration_of(&self, len: usize) -> Duration {
        let per_second = self.bytes_per_second();
        if per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(len as f64 / per_second as f64)
    }

    /// Reject parameters no device could be configured with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidParams("sample rate must be non-zero".into()));
        }
        if self.channels == 0 {
            return Err(Error::InvalidParams("channel count must be non-zero".into()));
        }
        Ok(())
    }
}

impl fmt::Display for StreamParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}",
            self.sample_rate, self.channels, self.format
        )
    }
}
