//! Output devices and the backends that open them.
//!
//! A [`DeviceBackend`] is the host-facing half of the sink: it knows how to
//! find a device, agree on [`StreamParams`] with it, and hand back an open
//! [`OutputDevice`]. The playback loop only ever talks to the device through
//! the blocking [`OutputDevice::write`] call.

pub mod capture;
pub mod cpal_backend;
pub mod negotiate;

pub use capture::{CaptureBackend, CaptureEvent, CaptureLog};
pub use cpal_backend::{list_output_devices, CpalBackend, CpalDevice, DeviceInfo};
pub use negotiate::negotiate;

use std::fmt;

use sndsink_core::{Result, SampleFormat, StreamParams};

/// One configuration a device advertises: a channel count and sample format
/// over an inclusive range of rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceMode {
    pub channels: u16,
    pub min_rate: u32,
    pub max_rate: u32,
    pub format: SampleFormat,
}

impl DeviceMode {
    pub const fn new(channels: u16, min_rate: u32, max_rate: u32, format: SampleFormat) -> Self {
        Self {
            channels,
            min_rate,
            max_rate,
            format,
        }
    }

    /// A mode with a single supported rate.
    pub const fn fixed(channels: u16, rate: u32, format: SampleFormat) -> Self {
        Self::new(channels, rate, rate, format)
    }

    /// Whether the mode can play `params` without any substitution.
    pub fn supports(&self, params: &StreamParams) -> bool {
        self.channels == params.channels
            && self.format == params.format
            && params.sample_rate >= self.min_rate
            && params.sample_rate <= self.max_rate
    }

    /// Modes with no channels or an empty rate range are ignored.
    pub const fn is_usable(&self) -> bool {
        self.channels > 0 && self.max_rate > 0 && self.min_rate <= self.max_rate
    }

    /// Clamp a rate into the supported range.
    pub const fn clamp_rate(&self, rate: u32) -> u32 {
        if rate < self.min_rate {
            self.min_rate
        } else if rate > self.max_rate {
            self.max_rate
        } else {
            rate
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min_rate == self.max_rate {
            write!(f, "{} Hz, {} ch, {}", self.min_rate, self.channels, self.format)
        } else {
            write!(
                f,
                "{}-{} Hz, {} ch, {}",
                self.min_rate, self.max_rate, self.channels, self.format
            )
        }
    }
}

/// Identity of the output a backend opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    pub name: String,
    pub description: String,
}

/// An open output device.
///
/// Only the playback loop's thread ever touches a device, so implementations
/// need not be `Send`.
pub trait OutputDevice {
    /// Parameters the device was opened with.
    fn params(&self) -> StreamParams;

    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Hand a block of whole frames to the device, blocking until all of it
    /// has been accepted.
    fn write(&mut self, block: &[u8]) -> Result<()>;

    /// Block until everything written so far has been played.
    fn drain(&mut self) -> Result<()>;

    /// Release the device. Calling it twice is harmless.
    fn close(&mut self);
}

/// Opens output devices.
pub trait DeviceBackend: Send + Sync + 'static {
    type Device: OutputDevice;

    /// Name and description of the output, available without opening it.
    fn info(&self) -> OutputInfo;

    /// Open the device, negotiating the closest supported parameters to
    /// `requested`.
    ///
    /// # Errors
    ///
    /// `DeviceUnavailable` if the device cannot be found or opened,
    /// `NegotiationFailed` if it supports nothing usable.
    fn open(&self, requested: &StreamParams) -> Result<Self::Device>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_supports() {
        let mode = DeviceMode::new(2, 44_100, 48_000, SampleFormat::S16Le);
        assert!(mode.supports(&StreamParams::new(44_100, 2, SampleFormat::S16Le)));
        assert!(mode.supports(&StreamParams::new(48_000, 2, SampleFormat::S16Le)));
        assert!(!mode.supports(&StreamParams::new(96_000, 2, SampleFormat::S16Le)));
        assert!(!mode.supports(&StreamParams::new(44_100, 1, SampleFormat::S16Le)));
        assert!(!mode.supports(&StreamParams::new(44_100, 2, SampleFormat::S16Be)));
    }

    #[test]
    fn test_clamp_rate() {
        let mode = DeviceMode::new(2, 44_100, 48_000, SampleFormat::F32Le);
        assert_eq!(mode.clamp_rate(8_000), 44_100);
        assert_eq!(mode.clamp_rate(46_000), 46_000);
        assert_eq!(mode.clamp_rate(192_000), 48_000);
    }

    #[test]
    fn test_usable() {
        assert!(DeviceMode::fixed(1, 8_000, SampleFormat::U8).is_usable());
        assert!(!DeviceMode::fixed(0, 8_000, SampleFormat::U8).is_usable());
        assert!(!DeviceMode::new(2, 48_000, 44_100, SampleFormat::U8).is_usable());
    }

    #[test]
    fn test_display() {
        let mode = DeviceMode::new(2, 44_100, 48_000, SampleFormat::S16Le);
        assert_eq!(mode.to_string(), "44100-48000 Hz, 2 ch, s16le");
        let fixed = DeviceMode::fixed(1, 8_000, SampleFormat::U8);
        assert_eq!(fixed.to_string(), "8000 Hz, 1 ch, u8");
    }
}
