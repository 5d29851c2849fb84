use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use sndsink_core::{SampleFormat, SinkConfig};

#[derive(Parser, Debug)]
#[command(name = "sndsink", version, about = "Play raw PCM through an audio output device")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Overrides for the configured output.
#[derive(ClapArgs, Debug, Default)]
pub struct OutputArgs {
    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Requested sample rate in Hz
    #[arg(long, global = true)]
    pub rate: Option<u32>,

    /// Requested channel count
    #[arg(long, global = true)]
    pub channels: Option<u16>,

    /// Requested sample format (u8, s16le, s16be, s24le, s32le, f32le, ...)
    #[arg(long, global = true)]
    pub format: Option<SampleFormat>,

    /// Bytes pulled from the source per cycle
    #[arg(long, global = true)]
    pub block_bytes: Option<usize>,

    /// Device-side buffering target in milliseconds
    #[arg(long, global = true)]
    pub buffer_ms: Option<u32>,

    /// Record writes in memory instead of opening a device
    #[arg(long, global = true)]
    pub dry_run: bool,
}

impl OutputArgs {
    /// Apply command-line overrides on top of a loaded config.
    pub fn apply(&self, config: &mut SinkConfig) {
        if let Some(device) = &self.device {
            config.device = Some(device.clone());
        }
        if let Some(rate) = self.rate {
            config.params.sample_rate = rate;
        }
        if let Some(channels) = self.channels {
            config.params.channels = channels;
        }
        if let Some(format) = self.format {
            config.params.format = format;
        }
        if let Some(block_bytes) = self.block_bytes {
            config.block_bytes = block_bytes;
        }
        if let Some(buffer_ms) = self.buffer_ms {
            config.buffer_ms = buffer_ms;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List output devices and the modes they support
    Devices,

    /// Play headerless interleaved PCM from a file or stdin
    Play {
        /// Path to raw PCM; `-` or omitted reads stdin
        path: Option<PathBuf>,
    },

    /// Play a sine test tone
    Tone {
        /// Frequency in Hz
        #[arg(long, default_value_t = 440.0)]
        freq: f64,

        /// Length in seconds; plays until interrupted when omitted
        #[arg(long)]
        seconds: Option<f64>,

        /// Peak amplitude between 0 and 1
        #[arg(long, default_value_t = 0.2)]
        amplitude: f32,
    },
}
