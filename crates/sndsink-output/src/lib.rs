//! # sndsink-output
//!
//! PCM output adapter: takes interleaved sample blocks from an upstream
//! source and feeds them to an audio device at the pace the device plays
//! them.
//!
//! Features:
//! - Exact-or-nearest negotiation of rate, channels and sample format
//! - Whole-frame writes, whatever block sizes the source produces
//! - Cooperative stop, pause and drain on a dedicated playback thread
//! - cpal output through a lock-free byte ring

pub mod buffer;
pub mod controller;
pub mod device;
pub mod playback;
pub mod source;

pub use controller::OutputSink;
pub use device::{
    list_output_devices, CaptureBackend, CpalBackend, DeviceBackend, DeviceMode, OutputDevice,
    OutputInfo,
};
pub use playback::SinkEvent;
pub use source::{BlockSource, Pulled};
