//! # sndsink
//!
//! Command-line host for the output sink: lists devices, plays raw PCM from
//! a file or stdin, and plays test tones.

mod cli;

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use sndsink_core::{EndReason, SinkConfig};
use sndsink_output::source::{ReaderSource, ToneSource};
use sndsink_output::{
    list_output_devices, BlockSource, CaptureBackend, CpalBackend, DeviceBackend, OutputSink,
    SinkEvent,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sndsink=info,sndsink_output=info".into()),
        )
        .init();

    let args = cli::Args::parse();
    debug!("Starting sndsink v{}", env!("CARGO_PKG_VERSION"));

    let source: Box<dyn BlockSource> = match &args.cmd {
        cli::Command::Devices => return print_devices(),
        cli::Command::Play { path } => open_pcm(path.as_deref())?,
        cli::Command::Tone {
            freq,
            seconds,
            amplitude,
        } => {
            let tone = ToneSource::new(*freq, *amplitude);
            Box::new(match seconds {
                Some(secs) => tone.with_duration(*secs),
                None => tone,
            })
        }
    };

    let mut config = load_config(args.config.as_deref())?;
    args.output.apply(&mut config);
    config.validate().context("invalid output configuration")?;

    if args.output.dry_run {
        let backend = CaptureBackend::new()
            .with_name("dry-run")
            .discard_data()
            .realtime();
        let log = backend.log();
        play(backend, &config, source)?;
        println!("dry run: {} bytes written", log.bytes_written());
        Ok(())
    } else {
        play(CpalBackend::from_config(&config), &config, source)
    }
}

fn load_config(path: Option<&Path>) -> Result<SinkConfig> {
    match path {
        Some(path) => SinkConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => SinkConfig::load_default().context("failed to load default config"),
    }
}

fn open_pcm(path: Option<&Path>) -> Result<Box<dyn BlockSource>> {
    match path {
        None => Ok(Box::new(ReaderSource::new(io::stdin()))),
        Some(path) if path.as_os_str() == "-" => Ok(Box::new(ReaderSource::new(io::stdin()))),
        Some(path) => {
            let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
            info!("Playing {}", path.display());
            Ok(Box::new(ReaderSource::new(BufReader::new(file))))
        }
    }
}

/// Run one session to completion, stopping it on Ctrl-C.
fn play<B: DeviceBackend>(
    backend: B,
    config: &SinkConfig,
    source: Box<dyn BlockSource>,
) -> Result<()> {
    let sink = Arc::new(OutputSink::with_config(backend, config)?);
    let output = sink.info();
    info!("Output: {} ({})", output.name, output.description);

    let handler_sink = Arc::clone(&sink);
    if let Err(e) = ctrlc::set_handler(move || handler_sink.stop()) {
        warn!("Failed to install Ctrl-C handler: {e}");
    }

    let events = sink.events();
    let params = sink.start(config.params, source)?;
    if params != config.params {
        warn!("Requested {}, playing {params}", config.params);
    }

    // Returns even if the output thread dies without publishing Finished.
    let reason = sink.await_stopped();
    for event in events.try_iter() {
        if let SinkEvent::StateChanged(state) = event {
            debug!("Output {state}");
        }
    }

    let status = sink.status();
    info!(
        "Wrote {} blocks ({} bytes)",
        status.blocks_written, status.bytes_written
    );

    match reason {
        Some(EndReason::SourceFailed(msg)) => bail!("source failed: {msg}"),
        Some(EndReason::WriteFailed(msg)) => bail!("device write failed: {msg}"),
        Some(EndReason::Stopped) => {
            info!("Interrupted");
            Ok(())
        }
        Some(EndReason::EndOfStream) => Ok(()),
        None => bail!("audio output thread exited without finishing"),
    }
}

fn print_devices() -> Result<()> {
    let devices = list_output_devices()?;
    if devices.is_empty() {
        println!("no output devices found");
        return Ok(());
    }

    for device in devices {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{}{marker}", device.name);
        for mode in &device.modes {
            println!("    {mode}");
        }
    }
    Ok(())
}
