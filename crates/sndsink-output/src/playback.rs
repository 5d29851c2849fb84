//! The playback loop: pull a block, write it, check for stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use sndsink_core::{EndReason, PlaybackState, Result, SinkStatus, StreamParams};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::FrameBuffer;
use crate::device::{DeviceBackend, OutputDevice};
use crate::source::{BlockSource, Pulled};

/// How long a paused loop sleeps between checks of the control flags.
const PAUSE_POLL: Duration = Duration::from_millis(20);

/// Notifications published by a running sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// The device was opened with these parameters.
    Opened(StreamParams),
    /// The loop moved to a new state.
    StateChanged(PlaybackState),
    /// The session ended.
    Finished(EndReason),
}

/// Flags the controller uses to steer a running loop.
#[derive(Debug, Default)]
pub(crate) struct SessionControl {
    stop: AtomicBool,
    pause: AtomicBool,
}

impl SessionControl {
    /// Clear both flags before a new session starts.
    pub(crate) fn reset(&self) {
        self.stop.store(false, Ordering::Release);
        self.pause.store(false, Ordering::Release);
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.pause.store(paused, Ordering::Release);
    }

    pub(crate) fn paused(&self) -> bool {
        self.pause.load(Ordering::Acquire)
    }
}

/// Everything a session shares with its controller.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub(crate) control: Arc<SessionControl>,
    pub(crate) status: Arc<RwLock<SinkStatus>>,
    pub(crate) events: Sender<SinkEvent>,
}

/// Run one session to completion on the calling thread.
///
/// The outcome of opening the device and of the first pull is reported on
/// `ready` before any blocking writes; after that, the session runs until
/// end-of-stream, a stop request, or a failure.
pub(crate) fn run_session<B, S>(
    backend: &B,
    requested: StreamParams,
    block_bytes: usize,
    mut source: S,
    ctx: SessionContext,
    ready: &Sender<Result<StreamParams>>,
) where
    B: DeviceBackend + ?Sized,
    S: BlockSource,
{
    let device = match backend.open(&requested) {
        Ok(device) => device,
        Err(e) => {
            error!("Failed to open output device: {e}");
            let _ = ready.send(Err(e));
            return;
        }
    };

    let params = device.params();
    info!("Audio output opened: {params}, device: {}", device.name());
    {
        let mut status = ctx.status.write();
        status.params = Some(params);
        status.device = Some(device.name().to_string());
    }
    let _ = ctx.events.send(SinkEvent::Opened(params));
    source.negotiated(&params);

    let buffer = FrameBuffer::new(block_bytes, params.bytes_per_frame());
    let mut playback = PlaybackLoop::new(device, source, buffer, ctx);

    let first = playback.pull();
    if first.is_ok() {
        playback.set_state(PlaybackState::Running);
    }
    let _ = ready.send(Ok(params));

    let reason = playback.run(first);
    playback.finish(reason);
}

/// Owns the device and the source for the lifetime of one session.
struct PlaybackLoop<D: OutputDevice, S: BlockSource> {
    device: D,
    source: S,
    buffer: FrameBuffer,
    ctx: SessionContext,
}

impl<D: OutputDevice, S: BlockSource> PlaybackLoop<D, S> {
    const fn new(device: D, source: S, buffer: FrameBuffer, ctx: SessionContext) -> Self {
        Self {
            device,
            source,
            buffer,
            ctx,
        }
    }

    fn pull(&mut self) -> Result<Pulled> {
        let pulled = self.source.pull(self.buffer.spare_mut())?;
        self.buffer.commit(pulled.len)?;
        Ok(pulled)
    }

    fn run(&mut self, first: Result<Pulled>) -> EndReason {
        let mut next = first;
        loop {
            let pulled = match next {
                Ok(pulled) => pulled,
                Err(e) => {
                    error!("Source failed: {e}");
                    return EndReason::SourceFailed(e.to_string());
                }
            };

            if let Err(e) = self.write_frames() {
                error!("Device write failed: {e}");
                return EndReason::WriteFailed(e.to_string());
            }

            if pulled.end_of_stream {
                if self.buffer.remainder() > 0 {
                    warn!(
                        "Discarding {} trailing bytes that do not form a whole frame",
                        self.buffer.remainder()
                    );
                    self.buffer.clear();
                }
                debug!("Source reached end of stream");
                return EndReason::EndOfStream;
            }

            if self.ctx.control.stop_requested() || self.wait_while_paused() {
                debug!("Stop requested");
                return EndReason::Stopped;
            }

            next = self.pull();
        }
    }

    /// Write every complete frame held by the buffer.
    fn write_frames(&mut self) -> Result<()> {
        let frames = self.buffer.frames();
        if frames.is_empty() {
            return Ok(());
        }
        self.device.write(frames)?;
        let written = self.buffer.consume_frames();

        let mut status = self.ctx.status.write();
        status.blocks_written += 1;
        status.bytes_written += written as u64;
        trace!(
            "Wrote block {} ({written} bytes)",
            status.blocks_written
        );
        Ok(())
    }

    /// Park while paused. Returns true if a stop arrived meanwhile.
    fn wait_while_paused(&self) -> bool {
        if !self.ctx.control.paused() {
            return false;
        }

        info!("Playback paused");
        self.ctx.status.write().paused = true;
        while self.ctx.control.paused() {
            if self.ctx.control.stop_requested() {
                return true;
            }
            thread::park_timeout(PAUSE_POLL);
        }
        self.ctx.status.write().paused = false;
        info!("Playback resumed");

        self.ctx.control.stop_requested()
    }

    fn finish(mut self, reason: EndReason) {
        self.set_state(PlaybackState::Draining);

        if matches!(reason, EndReason::WriteFailed(_)) {
            debug!("Skipping drain after write failure");
        } else if let Err(e) = self.device.drain() {
            warn!("Drain incomplete: {e}");
        }
        self.device.close();

        {
            let mut status = self.ctx.status.write();
            status.end_reason = Some(reason.clone());
            status.paused = false;
        }
        self.set_state(PlaybackState::Stopped);

        match &reason {
            EndReason::EndOfStream => info!("Playback finished"),
            EndReason::Stopped => info!("Playback stopped"),
            EndReason::SourceFailed(msg) | EndReason::WriteFailed(msg) => {
                error!("Playback ended with error: {msg}");
            }
        }
        let _ = self.ctx.events.send(SinkEvent::Finished(reason));
    }

    fn set_state(&self, new_state: PlaybackState) {
        let old_state = {
            let mut status = self.ctx.status.write();
            let old = status.state;
            status.state = new_state;
            old
        };

        if old_state != new_state {
            if !old_state.can_transition_to(new_state) {
                warn!("Unexpected state change: {old_state} -> {new_state}");
            }
            debug!("State changed: {old_state} -> {new_state}");
            let _ = self.ctx.events.send(SinkEvent::StateChanged(new_state));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;
    use crate::device::{CaptureBackend, CaptureEvent};
    use crate::source::ReaderSource;
    use crossbeam_channel::{bounded, unbounded, Receiver};
    use sndsink_core::{Error, SampleFormat};
    use std::io::Cursor;

    fn context() -> (SessionContext, Receiver<SinkEvent>) {
        let (events, rx) = unbounded();
        let ctx = SessionContext {
            control: Arc::new(SessionControl::default()),
            status: Arc::new(RwLock::new(SinkStatus::default())),
            events,
        };
        (ctx, rx)
    }

    fn run<S: BlockSource>(
        backend: &CaptureBackend,
        params: StreamParams,
        block_bytes: usize,
        source: S,
        ctx: &SessionContext,
    ) -> Result<StreamParams> {
        let (ready_tx, ready_rx) = bounded(1);
        run_session(backend, params, block_bytes, source, ctx.clone(), &ready_tx);
        ready_rx.recv().unwrap()
    }

    #[test]
    fn test_session_writes_whole_frames_and_drops_tail() {
        let backend = CaptureBackend::new();
        let log = backend.log();
        let (ctx, _events) = context();
        let params = StreamParams::new(8_000, 2, SampleFormat::S16Le);

        // 10 bytes: two whole 4-byte frames plus a 2-byte tail.
        let source = ReaderSource::new(Cursor::new(vec![7u8; 10]));
        run(&backend, params, 6, source, &ctx).unwrap();

        assert_eq!(log.write_lengths(), vec![4, 4]);
        let status = ctx.status.read();
        assert_eq!(status.bytes_written, 8);
        assert_eq!(status.end_reason, Some(EndReason::EndOfStream));
    }

    #[test]
    fn test_state_events_in_order() {
        let backend = CaptureBackend::new();
        let (ctx, events) = context();
        let params = StreamParams::default();

        let source = ReaderSource::new(Cursor::new(vec![0u8; 8]));
        run(&backend, params, 4096, source, &ctx).unwrap();

        let received: Vec<SinkEvent> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                SinkEvent::Opened(params),
                SinkEvent::StateChanged(PlaybackState::Running),
                SinkEvent::StateChanged(PlaybackState::Draining),
                SinkEvent::StateChanged(PlaybackState::Stopped),
                SinkEvent::Finished(EndReason::EndOfStream),
            ]
        );
    }

    #[test]
    fn test_open_failure_reports_on_ready() {
        let backend = CaptureBackend::new().unavailable("no such device");
        let log = backend.log();
        let (ctx, events) = context();

        let source = ReaderSource::new(Cursor::new(Vec::new()));
        let err = run(&backend, StreamParams::default(), 4096, source, &ctx).unwrap_err();

        assert!(matches!(err, Error::DeviceUnavailable(_)));
        assert!(log.events().is_empty());
        assert!(events.try_recv().is_err());
        assert_eq!(ctx.status.read().state, PlaybackState::Idle);
    }

    #[test]
    fn test_stop_flag_ends_after_one_write() {
        let backend = CaptureBackend::new();
        let log = backend.log();
        let (ctx, _events) = context();
        ctx.control.request_stop();

        let source = ReaderSource::new(std::io::repeat(1));
        run(&backend, StreamParams::default(), 64, source, &ctx).unwrap();

        assert_eq!(log.write_lengths(), vec![64]);
        assert_eq!(ctx.status.read().end_reason, Some(EndReason::Stopped));
        assert_eq!(log.count(&CaptureEvent::Drained), 1);
    }

    #[test]
    fn test_write_failure_skips_drain() {
        let backend = CaptureBackend::new().fail_writes_after(1);
        let log = backend.log();
        let (ctx, _events) = context();

        let source = ReaderSource::new(std::io::repeat(1));
        run(&backend, StreamParams::default(), 64, source, &ctx).unwrap();

        let status = ctx.status.read();
        assert!(matches!(status.end_reason, Some(EndReason::WriteFailed(_))));
        assert_eq!(status.state, PlaybackState::Stopped);
        assert_eq!(log.count(&CaptureEvent::Drained), 0);
        assert_eq!(log.count(&CaptureEvent::Closed), 1);
    }
}
