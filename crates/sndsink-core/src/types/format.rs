//! Interleaved PCM sample encodings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Encoding of a single interleaved PCM sample.
///
/// Multi-byte variants carry their byte order; single-byte variants have none.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Unsigned 8-bit.
    U8,
    /// Signed 8-bit.
    S8,
    /// Signed 16-bit, little-endian.
    #[default]
    S16Le,
    /// Signed 16-bit, big-endian.
    S16Be,
    /// Unsigned 16-bit, little-endian.
    U16Le,
    /// Unsigned 16-bit, big-endian.
    U16Be,
    /// Signed 24-bit packed into 3 bytes, little-endian.
    S24Le,
    /// Signed 32-bit, little-endian.
    S32Le,
    /// Signed 32-bit, big-endian.
    S32Be,
    /// IEEE 754 32-bit float, little-endian.
    F32Le,
}

/// Sample encoding without byte order.
///
/// Two formats of the same kind carry identical sample values and differ only
/// in how the bytes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Signed(u16),
    Unsigned(u16),
    Float(u16),
}

impl SampleKind {
    /// Bit depth of the sample.
    pub const fn bits(self) -> u16 {
        match self {
            Self::Signed(bits) | Self::Unsigned(bits) | Self::Float(bits) => bits,
        }
    }

    /// Whether both kinds belong to the same family (signed, unsigned, float).
    pub const fn same_family(self, other: Self) -> bool {
        matches!(
            (self, other),
            (Self::Signed(_), Self::Signed(_))
                | (Self::Unsigned(_), Self::Unsigned(_))
                | (Self::Float(_), Self::Float(_))
        )
    }
}

impl SampleFormat {
    /// Every supported format, narrowest first.
    pub const ALL: [Self; 10] = [
        Self::U8,
        Self::S8,
        Self::S16Le,
        Self::S16Be,
        Self::U16Le,
        Self::U16Be,
        Self::S24Le,
        Self::S32Le,
        Self::S32Be,
        Self::F32Le,
    ];

    /// Bytes occupied by one sample of one channel.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 | Self::S8 => 1,
            Self::S16Le | Self::S16Be | Self::U16Le | Self::U16Be => 2,
            Self::S24Le => 3,
            Self::S32Le | Self::S32Be | Self::F32Le => 4,
        }
    }

    /// Bit depth of the sample.
    pub const fn bits(self) -> u16 {
        self.kind().bits()
    }

    /// Sample encoding ignoring byte order.
    pub const fn kind(self) -> SampleKind {
        match self {
            Self::U8 => SampleKind::Unsigned(8),
            Self::S8 => SampleKind::Signed(8),
            Self::S16Le | Self::S16Be => SampleKind::Signed(16),
            Self::U16Le | Self::U16Be => SampleKind::Unsigned(16),
            Self::S24Le => SampleKind::Signed(24),
            Self::S32Le | Self::S32Be => SampleKind::Signed(32),
            Self::F32Le => SampleKind::Float(32),
        }
    }

    /// Whether samples are signed (floats count as signed).
    pub const fn is_signed(self) -> bool {
        !matches!(self.kind(), SampleKind::Unsigned(_))
    }

    /// Whether samples are floating point.
    pub const fn is_float(self) -> bool {
        matches!(self.kind(), SampleKind::Float(_))
    }

    /// Whether the bytes of a sample are stored least-significant first.
    ///
    /// Single-byte formats report `true`.
    pub const fn is_little_endian(self) -> bool {
        !matches!(self, Self::S16Be | Self::U16Be | Self::S32Be)
    }

    /// Lowercase tag used in configuration and on the command line.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::S8 => "s8",
            Self::S16Le => "s16le",
            Self::S16Be => "s16be",
            Self::U16Le => "u16le",
            Self::U16Be => "u16be",
            Self::S24Le => "s24le",
            Self::S32Le => "s32le",
            Self::S32Be => "s32be",
            Self::F32Le => "f32le",
        }
    }

    /// Encode a normalized sample (`-1.0..=1.0`) into `out`.
    ///
    /// `out` must be exactly [`bytes_per_sample`](Self::bytes_per_sample) long.
    /// Out-of-range input is clamped.
    pub fn encode_f32(self, sample: f32, out: &mut [u8]) {
        let s = if sample.is_nan() {
            0.0
        } else {
            sample.clamp(-1.0, 1.0)
        };

        match self {
            Self::U8 => out.copy_from_slice(&[((s + 1.0) * 127.5).round() as u8]),
            Self::S8 => out.copy_from_slice(&((s * 127.0).round() as i8).to_le_bytes()),
            Self::S16Le => {
                out.copy_from_slice(&((s * f32::from(i16::MAX)).round() as i16).to_le_bytes());
            }
            Self::S16Be => {
                out.copy_from_slice(&((s * f32::from(i16::MAX)).round() as i16).to_be_bytes());
            }
            Self::U16Le => out.copy_from_slice(&(((s + 1.0) * 32_767.5).round() as u16).to_le_bytes()),
            Self::U16Be => out.copy_from_slice(&(((s + 1.0) * 32_767.5).round() as u16).to_be_bytes()),
            Self::S24Le => {
                let value = (s * 8_388_607.0).round() as i32;
                out.copy_from_slice(&value.to_le_bytes()[..3]);
            }
            Self::S32Le => {
                out.copy_from_slice(&((f64::from(s) * f64::from(i32::MAX)).round() as i32).to_le_bytes());
            }
            Self::S32Be => {
                out.copy_from_slice(&((f64::from(s) * f64::from(i32::MAX)).round() as i32).to_be_bytes());
            }
            Self::F32Le => out.copy_from_slice(&s.to_le_bytes()),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SampleFormat {
    type Err = Error;

    /// Parse a format tag. Separators and case are ignored, and a bare
    /// multi-byte tag (`s16`) means little-endian.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_lowercase();

        let format = match normalized.as_str() {
            "u8" => Self::U8,
            "s8" => Self::S8,
            "s16" | "s16le" => Self::S16Le,
            "s16be" => Self::S16Be,
            "u16" | "u16le" => Self::U16Le,
            "u16be" => Self::U16Be,
            "s24" | "s24le" => Self::S24Le,
            "s32" | "s32le" => Self::S32Le,
            "s32be" => Self::S32Be,
            "f32" | "f32le" | "float" => Self::F32Le,
            _ => {
                return Err(Error::InvalidParams(format!("unknown sample format: {s}")));
            }
        };
        Ok(format)
    }
}
