//! Sine test tone in whatever format the device accepted.

use std::f64::consts::TAU;

use sndsink_core::{Result, StreamParams};

use super::{BlockSource, Pulled};

/// Generates a sine wave on every channel.
///
/// The tone is rendered in the negotiated parameters, so it plays correctly
/// even when the device substituted a different rate or format.
pub struct ToneSource {
    frequency: f64,
    amplitude: f32,
    duration_secs: Option<f64>,
    params: StreamParams,
    phase: f64,
    remaining_frames: Option<u64>,
}

impl ToneSource {
    /// An endless tone.
    pub fn new(frequency: f64, amplitude: f32) -> Self {
        let params = StreamParams::default();
        Self {
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            duration_secs: None,
            params,
            phase: 0.0,
            remaining_frames: None,
        }
    }

    /// Stop after `secs` seconds of audio.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs.max(0.0));
        self.remaining_frames = Some(self.frames_for(secs));
        self
    }

    fn frames_for(&self, secs: f64) -> u64 {
        (secs.max(0.0) * f64::from(self.params.sample_rate)).round() as u64
    }
}

impl BlockSource for ToneSource {
    fn negotiated(&mut self, params: &StreamParams) {
        self.params = *params;
        if let Some(secs) = self.duration_secs {
            self.remaining_frames = Some(self.frames_for(secs));
        }
    }

    fn pull(&mut self, buf: &mut [u8]) -> Result<Pulled> {
        let frame_bytes = self.params.bytes_per_frame();
        let sample_bytes = self.params.format.bytes_per_sample();
        let mut frames = (buf.len() / frame_bytes) as u64;
        if let Some(remaining) = self.remaining_frames {
            frames = frames.min(remaining);
        }

        let step = TAU * self.frequency / f64::from(self.params.sample_rate);
        let len = frames as usize * frame_bytes;
        for frame in buf[..len].chunks_exact_mut(frame_bytes) {
            let value = self.amplitude * self.phase.sin() as f32;
            for sample in frame.chunks_exact_mut(sample_bytes) {
                self.params.format.encode_f32(value, sample);
            }
            self.phase = (self.phase + step) % TAU;
        }

        match self.remaining_frames.as_mut() {
            Some(remaining) => {
                *remaining -= frames;
                if *remaining == 0 {
                    Ok(Pulled::end(len))
                } else {
                    Ok(Pulled::data(len))
                }
            }
            None => Ok(Pulled::data(len)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;
    use sndsink_core::SampleFormat;

    #[test]
    fn test_fills_whole_frames() {
        let mut tone = ToneSource::new(440.0, 0.5);
        tone.negotiated(&StreamParams::new(48_000, 2, SampleFormat::S24Le));

        let mut buf = [0u8; 100];
        let pulled = tone.pull(&mut buf).unwrap();
        assert_eq!(pulled, Pulled::data(96));
    }

    #[test]
    fn test_channels_carry_same_sample() {
        let mut tone = ToneSource::new(1000.0, 1.0);
        tone.negotiated(&StreamParams::new(8_000, 2, SampleFormat::S16Le));

        let mut buf = [0u8; 16];
        tone.pull(&mut buf).unwrap();
        for frame in buf.chunks_exact(4) {
            assert_eq!(frame[..2], frame[2..]);
        }
        // Second frame is sin(2π/8) at full scale.
        let second = i16::from_le_bytes([buf[4], buf[5]]);
        assert!((23_000..23_300).contains(&second));
    }

    #[test]
    fn test_duration_uses_negotiated_rate() {
        let mut tone = ToneSource::new(440.0, 0.2).with_duration(0.01);
        tone.negotiated(&StreamParams::new(8_000, 1, SampleFormat::U8));

        let mut buf = [0u8; 64];
        assert_eq!(tone.pull(&mut buf).unwrap(), Pulled::data(64));
        assert_eq!(tone.pull(&mut buf).unwrap(), Pulled::end(16));
        assert_eq!(tone.pull(&mut buf).unwrap(), Pulled::end(0));
    }
}
