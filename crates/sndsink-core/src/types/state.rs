//! Playback run state and status snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::StreamParams;
use crate::Error;

/// State of the playback loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No session has run yet, or one is being opened.
    #[default]
    Idle,
    /// Feeding the device.
    Running,
    /// Flushing buffered samples before closing the device.
    Draining,
    /// Device closed; the loop has exited.
    Stopped,
}

impl PlaybackState {
    /// Whether the loop owns an open device (`isRunning`).
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Draining)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// `Idle -> Draining` covers a session whose first pull failed.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Stopped, Self::Idle)
                | (Self::Idle, Self::Running | Self::Draining)
                | (Self::Running, Self::Draining)
                | (Self::Draining, Self::Stopped)
        )
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why a playback session ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum EndReason {
    /// Upstream reported end-of-stream.
    EndOfStream,
    /// A stop was requested.
    Stopped,
    /// Pulling from upstream failed.
    SourceFailed(String),
    /// The device rejected a write.
    WriteFailed(String),
}

impl EndReason {
    /// Whether the session ended because something failed.
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::SourceFailed(_) | Self::WriteFailed(_))
    }

    /// The failure as an [`Error`], if this reason is one.
    pub fn to_error(&self) -> Option<Error> {
        match self {
            Self::SourceFailed(msg) => Some(Error::Source(msg.clone())),
            Self::WriteFailed(msg) => Some(Error::WriteFailed(msg.clone())),
            Self::EndOfStream | Self::Stopped => None,
        }
    }
}

/// Point-in-time view of an output sink.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SinkStatus {
    /// Current loop state.
    pub state: PlaybackState,
    /// Whether feeding is paused.
    pub paused: bool,
    /// Parameters in effect for the current (or last) session.
    pub params: Option<StreamParams>,
    /// Name of the opened device.
    pub device: Option<String>,
    /// Blocks written to the device this session.
    pub blocks_written: u64,
    /// Bytes written to the device this session.
    pub bytes_written: u64,
    /// How the last session ended.
    pub end_reason: Option<EndReason>,
}

impl SinkStatus {
    pub const fn is_running(&self) -> bool {
        self.state.is_running()
    }
}
