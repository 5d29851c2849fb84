//! Core domain types for sndsink.

pub mod format;
pub mod params;
pub mod state;

pub use format::{SampleFormat, SampleKind};
pub use params::StreamParams;
pub use state::{EndReason, PlaybackState, SinkStatus};
