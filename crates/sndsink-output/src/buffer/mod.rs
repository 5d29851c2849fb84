//! Buffers used between the upstream source, the playback loop, and the
//! device callback.

pub mod frame;
pub mod ring;

pub use frame::FrameBuffer;
pub use ring::{shared_byte_ring, ByteRing, SharedByteRing};
