//! Audio output using cpal.
//!
//! cpal drives playback from its own callback thread, while the playback loop
//! wants a blocking `write`. [`CpalDevice`] bridges the two with a
//! [`ByteRing`](crate::buffer::ByteRing): `write` fills the ring and waits
//! while it is full, the callback drains it and decodes bytes into the
//! device's native sample type.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SizedSample, Stream, StreamConfig, SupportedBufferSize};
use parking_lot::Mutex;
use sndsink_core::{Error, Result, SampleFormat, SinkConfig, StreamParams};
use tracing::{debug, error, info, warn};

use super::{negotiate, DeviceBackend, DeviceMode, OutputDevice, OutputInfo};
use crate::buffer::{shared_byte_ring, SharedByteRing};

/// Sleep between attempts to push into a full ring.
const WRITE_POLL: Duration = Duration::from_millis(2);

/// Device buffer latency assumed when the host does not report one.
const FALLBACK_LATENCY: Duration = Duration::from_millis(50);

/// Device periods per `buffer_ms`.
const PERIODS: u64 = 4;

/// Smallest ring allocated between the writer and the callback.
const MIN_RING_BYTES: usize = 4096;

/// Output backend for the host's audio devices.
#[derive(Debug, Clone)]
pub struct CpalBackend {
    device: Option<String>,
    buffer_ms: u32,
    drain_timeout: Duration,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::from_config(&SinkConfig::default())
    }
}

impl CpalBackend {
    /// Backend for the host default device.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self {
            device: config.device.clone(),
            buffer_ms: config.buffer_ms,
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
        }
    }
}

impl DeviceBackend for CpalBackend {
    type Device = CpalDevice;

    fn info(&self) -> OutputInfo {
        let host = cpal::default_host();
        let name = pick_device(&host, self.device.as_deref())
            .ok()
            .and_then(|d| d.name().ok())
            .or_else(|| self.device.clone())
            .unwrap_or_else(|| "default".to_string());
        OutputInfo {
            name,
            description: format!("{} audio output", host.id().name()),
        }
    }

    fn open(&self, requested: &StreamParams) -> Result<CpalDevice> {
        requested.validate()?;

        let host = cpal::default_host();
        let device = pick_device(&host, self.device.as_deref())?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio output device: {name}");

        let ranges: Vec<cpal::SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| {
                Error::DeviceUnavailable(format!("Failed to query output configs: {e}"))
            })?
            .collect();
        let modes: Vec<DeviceMode> = ranges.iter().flat_map(modes_for_range).collect();
        debug!("Device '{name}' offers {} modes", modes.len());

        let params = negotiate(requested, &modes)?;
        let sample_format = cpal_format_for(params.format).ok_or_else(|| {
            Error::NegotiationFailed(format!("{} has no native device format", params.format))
        })?;

        let buffer_size = ranges
            .iter()
            .find(|r| {
                r.channels() == params.channels
                    && r.sample_format() == sample_format
                    && (r.min_sample_rate().0..=r.max_sample_rate().0)
                        .contains(&params.sample_rate)
            })
            .map_or(BufferSize::Default, |r| {
                pick_buffer_size(r.buffer_size(), &params, self.buffer_ms)
            });
        let config = StreamConfig {
            channels: params.channels,
            sample_rate: cpal::SampleRate(params.sample_rate),
            buffer_size,
        };
        debug!("Output config: {params}, buffer {buffer_size:?}");

        let ring_bytes = usize::try_from(
            params.bytes_per_second() * u64::from(self.buffer_ms) / 1000,
        )
        .unwrap_or(usize::MAX)
        .max(MIN_RING_BYTES);
        let shared = CallbackShared {
            ring: shared_byte_ring(ring_bytes),
            failure: Arc::new(Mutex::new(None)),
            feeding: Arc::new(AtomicBool::new(false)),
            underruns: Arc::new(AtomicU64::new(0)),
            frame_bytes: params.bytes_per_frame(),
        };

        let stream = match params.format {
            SampleFormat::U8 => build_stream::<u8>(&device, &config, &shared, |b| b[0]),
            SampleFormat::S8 => {
                build_stream::<i8>(&device, &config, &shared, |b| i8::from_le_bytes([b[0]]))
            }
            SampleFormat::S16Le => build_stream::<i16>(&device, &config, &shared, |b| {
                i16::from_le_bytes([b[0], b[1]])
            }),
            SampleFormat::S16Be => build_stream::<i16>(&device, &config, &shared, |b| {
                i16::from_be_bytes([b[0], b[1]])
            }),
            SampleFormat::U16Le => build_stream::<u16>(&device, &config, &shared, |b| {
                u16::from_le_bytes([b[0], b[1]])
            }),
            SampleFormat::U16Be => build_stream::<u16>(&device, &config, &shared, |b| {
                u16::from_be_bytes([b[0], b[1]])
            }),
            SampleFormat::S32Le => build_stream::<i32>(&device, &config, &shared, |b| {
                i32::from_le_bytes([b[0], b[1], b[2], b[3]])
            }),
            SampleFormat::S32Be => build_stream::<i32>(&device, &config, &shared, |b| {
                i32::from_be_bytes([b[0], b[1], b[2], b[3]])
            }),
            SampleFormat::F32Le => build_stream::<f32>(&device, &config, &shared, |b| {
                f32::from_le_bytes([b[0], b[1], b[2], b[3]])
            }),
            SampleFormat::S24Le => {
                return Err(Error::NegotiationFailed(
                    "24-bit packed samples are not supported by cpal".into(),
                ))
            }
        }?;

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(format!("Failed to start stream: {e}")))?;

        let latency = match buffer_size {
            BufferSize::Fixed(frames) => {
                Duration::from_secs_f64(f64::from(frames) / f64::from(params.sample_rate))
            }
            BufferSize::Default => FALLBACK_LATENCY,
        };

        Ok(CpalDevice {
            stream: Some(stream),
            name,
            params,
            shared,
            latency,
            stall_timeout: self.drain_timeout,
        })
    }
}

/// State shared between [`CpalDevice`] and its stream callback.
#[derive(Clone)]
struct CallbackShared {
    ring: SharedByteRing,
    /// Set by the stream error callback.
    failure: Arc<Mutex<Option<String>>>,
    /// Underruns only count while the writer is actively feeding.
    feeding: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
    frame_bytes: usize,
}

fn build_stream<T: SizedSample + Send + 'static>(
    device: &Device,
    config: &StreamConfig,
    shared: &CallbackShared,
    decode: fn(&[u8]) -> T,
) -> Result<Stream> {
    let sample_bytes = std::mem::size_of::<T>();
    let failure = Arc::clone(&shared.failure);
    let err_fn = move |err: cpal::StreamError| {
        error!("Audio stream error: {err}");
        *failure.lock() = Some(err.to_string());
    };

    let shared = shared.clone();
    let mut scratch: Vec<u8> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let wanted = data.len() * sample_bytes;
                if scratch.len() < wanted {
                    scratch.resize(wanted, 0);
                }

                // Whole frames only, so channels stay aligned across callbacks.
                let whole = shared.ring.available() / shared.frame_bytes * shared.frame_bytes;
                let read = shared.ring.read(&mut scratch[..wanted.min(whole)]);
                let samples = read / sample_bytes;

                for (out, bytes) in data.iter_mut().zip(scratch[..read].chunks_exact(sample_bytes)) {
                    *out = decode(bytes);
                }
                for out in &mut data[samples..] {
                    *out = T::EQUILIBRIUM;
                }

                if samples < data.len() && shared.feeding.load(Ordering::Acquire) {
                    shared.underruns.fetch_add(1, Ordering::Relaxed);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(format!("Failed to build stream: {e}")))
}

/// An open cpal output stream.
pub struct CpalDevice {
    stream: Option<Stream>,
    name: String,
    params: StreamParams,
    shared: CallbackShared,
    latency: Duration,
    stall_timeout: Duration,
}

impl CpalDevice {
    /// Callbacks that ran out of data while the device was being fed.
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    fn check_failure(&self) -> Result<()> {
        match self.shared.failure.lock().as_ref() {
            Some(message) => Err(Error::WriteFailed(message.clone())),
            None => Ok(()),
        }
    }
}

impl OutputDevice for CpalDevice {
    fn params(&self) -> StreamParams {
        self.params
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, block: &[u8]) -> Result<()> {
        if self.stream.is_none() {
            return Err(Error::WriteFailed("device is closed".into()));
        }
        self.shared.feeding.store(true, Ordering::Release);

        let mut offset = 0;
        let mut last_progress = Instant::now();
        while offset < block.len() {
            self.check_failure()?;
            let written = self.shared.ring.write(&block[offset..]);
            if written > 0 {
                offset += written;
                last_progress = Instant::now();
            } else if last_progress.elapsed() > self.stall_timeout {
                return Err(Error::WriteFailed(
                    "device stopped consuming audio".into(),
                ));
            } else {
                thread::sleep(WRITE_POLL);
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.shared.feeding.store(false, Ordering::Release);

        let deadline = Instant::now() + self.stall_timeout;
        while !self.shared.ring.is_empty() {
            self.check_failure()?;
            if Instant::now() >= deadline {
                return Err(Error::WriteFailed(format!(
                    "drain timed out with {} bytes unplayed",
                    self.shared.ring.available()
                )));
            }
            thread::sleep(WRITE_POLL);
        }
        // The host still holds up to one period after the ring empties.
        thread::sleep(self.latency);
        self.check_failure()
    }

    fn close(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        self.shared.feeding.store(false, Ordering::Release);
        if let Err(e) = stream.pause() {
            debug!("Failed to pause stream on close: {e}");
        }
        drop(stream);
        self.shared.ring.clear();

        let underruns = self.underruns();
        if underruns > 0 {
            warn!("Device '{}' underran {underruns} times", self.name);
        }
        debug!("Closed output device '{}'", self.name);
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// An output device as reported by [`list_output_devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub modes: Vec<DeviceMode>,
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| Error::DeviceUnavailable(format!("Failed to list devices: {e}")))?
        .filter_map(|device| {
            let name = device.name().ok()?;
            let modes = match device.supported_output_configs() {
                Ok(ranges) => ranges.flat_map(|r| modes_for_range(&r)).collect(),
                Err(e) => {
                    debug!("Skipping modes for '{name}': {e}");
                    Vec::new()
                }
            };
            Some(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                modes,
            })
        })
        .collect();

    Ok(devices)
}

/// Pick the first output device matching `needle` (case-insensitive), or the
/// default device.
fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<Device> {
    if let Some(needle) = needle {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::DeviceUnavailable(format!("No output devices: {e}")))?;
        return devices
            .find(|d| d.name().is_ok_and(|n| matches_device_name(&n, needle)))
            .ok_or_else(|| Error::DeviceUnavailable(format!("No output device matched: {needle}")));
    }

    host.default_output_device()
        .ok_or_else(|| Error::DeviceUnavailable("No output device found".to_string()))
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

fn modes_for_range(range: &cpal::SupportedStreamConfigRange) -> Vec<DeviceMode> {
    formats_for(range.sample_format())
        .iter()
        .map(|&format| {
            DeviceMode::new(
                range.channels(),
                range.min_sample_rate().0,
                range.max_sample_rate().0,
                format,
            )
        })
        .collect()
}

/// Formats a cpal sample type can carry. Byte order is decoded in the
/// callback, so both orders map onto the same native type.
const fn formats_for(format: cpal::SampleFormat) -> &'static [SampleFormat] {
    match format {
        cpal::SampleFormat::U8 => &[SampleFormat::U8],
        cpal::SampleFormat::I8 => &[SampleFormat::S8],
        cpal::SampleFormat::I16 => &[SampleFormat::S16Le, SampleFormat::S16Be],
        cpal::SampleFormat::U16 => &[SampleFormat::U16Le, SampleFormat::U16Be],
        cpal::SampleFormat::I32 => &[SampleFormat::S32Le, SampleFormat::S32Be],
        cpal::SampleFormat::F32 => &[SampleFormat::F32Le],
        _ => &[],
    }
}

const fn cpal_format_for(format: SampleFormat) -> Option<cpal::SampleFormat> {
    match format {
        SampleFormat::U8 => Some(cpal::SampleFormat::U8),
        SampleFormat::S8 => Some(cpal::SampleFormat::I8),
        SampleFormat::S16Le | SampleFormat::S16Be => Some(cpal::SampleFormat::I16),
        SampleFormat::U16Le | SampleFormat::U16Be => Some(cpal::SampleFormat::U16),
        SampleFormat::S32Le | SampleFormat::S32Be => Some(cpal::SampleFormat::I32),
        SampleFormat::F32Le => Some(cpal::SampleFormat::F32),
        SampleFormat::S24Le => None,
    }
}

/// Period size for roughly `buffer_ms / PERIODS` of audio, within what the
/// device allows.
fn pick_buffer_size(range: &SupportedBufferSize, params: &StreamParams, buffer_ms: u32) -> BufferSize {
    match range {
        SupportedBufferSize::Range { min, max } if min <= max => {
            let target = u64::from(params.sample_rate) * u64::from(buffer_ms) / 1000 / PERIODS;
            let target = u32::try_from(target).unwrap_or(u32::MAX);
            BufferSize::Fixed(target.clamp(*min, *max))
        }
        _ => BufferSize::Default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("MacBook Pro Speakers", "speakers"));
        assert!(matches_device_name("USB DAC", " usb "));
        assert!(!matches_device_name("USB DAC", "hdmi"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn test_format_mapping_round_trips() {
        for format in SampleFormat::ALL {
            match cpal_format_for(format) {
                Some(native) => assert!(formats_for(native).contains(&format)),
                None => assert_eq!(format, SampleFormat::S24Le),
            }
        }
    }

    #[test]
    fn test_both_byte_orders_share_native_type() {
        assert_eq!(
            formats_for(cpal::SampleFormat::I16),
            &[SampleFormat::S16Le, SampleFormat::S16Be]
        );
        assert!(formats_for(cpal::SampleFormat::F64).is_empty());
    }

    #[test]
    fn test_pick_buffer_size_clamps() {
        let params = StreamParams::new(48_000, 2, SampleFormat::F32Le);
        let range = SupportedBufferSize::Range { min: 64, max: 8192 };
        assert_eq!(pick_buffer_size(&range, &params, 200), BufferSize::Fixed(2400));

        let tight = SupportedBufferSize::Range { min: 64, max: 512 };
        assert_eq!(pick_buffer_size(&tight, &params, 200), BufferSize::Fixed(512));

        assert_eq!(
            pick_buffer_size(&SupportedBufferSize::Unknown, &params, 200),
            BufferSize::Default
        );
    }

    #[test]
    fn test_list_devices() {
        // May find nothing on machines without audio hardware.
        let _ = list_output_devices();
    }
}
