//! Lifecycle control of an output sink: start, stop, pause, status.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use sndsink_core::config::DEFAULT_BLOCK_BYTES;
use sndsink_core::{
    EndReason, Error, PlaybackState, Result, SinkConfig, SinkStatus, StreamParams,
};
use tracing::{debug, error, info, warn};

use crate::device::{DeviceBackend, OutputInfo};
use crate::playback::{run_session, SessionContext, SessionControl, SinkEvent};
use crate::source::BlockSource;

/// A spawned playback thread.
struct Session {
    handle: JoinHandle<()>,
    /// Never sent on; disconnects when the thread exits.
    done: Receiver<()>,
}

impl Session {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    fn join(self) {
        if self.handle.join().is_err() {
            error!("Audio output thread panicked");
        }
    }
}

/// Audio output sink.
///
/// Each [`start`](Self::start) runs one session on a dedicated thread that
/// owns the device until the session ends. Control calls only flip atomic
/// flags; they never touch the device.
pub struct OutputSink<B: DeviceBackend> {
    backend: Arc<B>,
    block_bytes: usize,
    control: Arc<SessionControl>,
    status: Arc<RwLock<SinkStatus>>,
    session: Mutex<Option<Session>>,
    event_tx: Sender<SinkEvent>,
    event_rx: Receiver<SinkEvent>,
}

impl<B: DeviceBackend> OutputSink<B> {
    /// Create an idle sink. No device is touched until `start`.
    pub fn new(backend: B) -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            backend: Arc::new(backend),
            block_bytes: DEFAULT_BLOCK_BYTES,
            control: Arc::new(SessionControl::default()),
            status: Arc::new(RwLock::new(SinkStatus::default())),
            session: Mutex::new(None),
            event_tx,
            event_rx,
        }
    }

    /// Create a sink using the block size from `config`.
    pub fn with_config(backend: B, config: &SinkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(backend).with_block_bytes(config.block_bytes))
    }

    /// Bytes pulled from the source per cycle.
    #[must_use]
    pub fn with_block_bytes(mut self, block_bytes: usize) -> Self {
        self.block_bytes = block_bytes.max(1);
        self
    }

    /// Name and description of the output.
    pub fn info(&self) -> OutputInfo {
        self.backend.info()
    }

    /// Open the device and start feeding it from `source`.
    ///
    /// Blocks until the device is open and the first block has been pulled,
    /// then returns the parameters the device accepted. A source failure on
    /// that first pull still returns `Ok`; the session ends immediately and
    /// the failure is reported by [`last_error`](Self::last_error).
    pub fn start<S>(&self, requested: StreamParams, source: S) -> Result<StreamParams>
    where
        S: BlockSource + 'static,
    {
        requested.validate()?;

        let ready_rx = {
            let mut slot = self.session.lock();
            // A Stopped session has published Finished and is only unwinding.
            let stopped = self.status.read().state == PlaybackState::Stopped;
            if !stopped && slot.as_ref().is_some_and(Session::is_alive) {
                warn!("Start ignored: output already running");
                return Err(Error::AlreadyRunning);
            }
            if let Some(previous) = slot.take() {
                previous.join();
            }

            self.control.reset();
            *self.status.write() = SinkStatus::default();

            let (ready_tx, ready_rx) = bounded(1);
            let (done_tx, done_rx) = bounded::<()>(0);
            let ctx = SessionContext {
                control: Arc::clone(&self.control),
                status: Arc::clone(&self.status),
                events: self.event_tx.clone(),
            };
            let backend = Arc::clone(&self.backend);
            let block_bytes = self.block_bytes;

            // The device is opened inside the thread (cpal::Stream is not Send).
            let handle = thread::Builder::new()
                .name("audio-output".to_string())
                .spawn(move || {
                    let _done = done_tx;
                    run_session(&*backend, requested, block_bytes, source, ctx, &ready_tx);
                })
                .map_err(|e| Error::Internal(format!("Failed to spawn output thread: {e}")))?;

            *slot = Some(Session {
                handle,
                done: done_rx,
            });
            ready_rx
        };

        match ready_rx.recv() {
            Ok(Ok(params)) => {
                info!("Output started: {params}");
                Ok(params)
            }
            Ok(Err(e)) => {
                self.join_session();
                Err(e)
            }
            Err(_) => {
                self.join_session();
                Err(Error::Internal(
                    "audio output thread exited before reporting".into(),
                ))
            }
        }
    }

    /// Ask the running session to stop.
    ///
    /// Returns immediately; the loop drains and closes the device at its next
    /// iteration boundary. A no-op when nothing is running.
    pub fn stop(&self) {
        let slot = self.session.lock();
        match slot.as_ref() {
            Some(session) if session.is_alive() => {
                debug!("Stop requested");
                self.control.request_stop();
                session.handle.thread().unpark();
            }
            _ => debug!("Stop ignored: output not running"),
        }
    }

    /// Stop feeding the device without ending the session. A no-op when
    /// nothing is running.
    pub fn pause(&self) {
        if self.is_alive() {
            self.control.set_paused(true);
        }
    }

    pub fn resume(&self) {
        let slot = self.session.lock();
        if let Some(session) = slot.as_ref().filter(|s| s.is_alive()) {
            self.control.set_paused(false);
            session.handle.thread().unpark();
        }
    }

    /// Snapshot of the sink's state. Safe to call at any time.
    pub fn status(&self) -> SinkStatus {
        self.status.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.status.read().is_running()
    }

    /// Parameters of the current (or last) session.
    pub fn params(&self) -> Option<StreamParams> {
        self.status.read().params
    }

    /// The failure that ended the last session, if it ended with one.
    pub fn last_error(&self) -> Option<Error> {
        self.status
            .read()
            .end_reason
            .as_ref()
            .and_then(EndReason::to_error)
    }

    /// Block until the current session has stopped.
    ///
    /// Returns how the last session ended, or `None` if none has run.
    pub fn await_stopped(&self) -> Option<EndReason> {
        if let Some(done) = self.done_signal() {
            let _ = done.recv();
        }
        self.reap();
        self.status.read().end_reason.clone()
    }

    /// Like [`await_stopped`](Self::await_stopped) with a deadline.
    pub fn await_stopped_timeout(&self, timeout: Duration) -> Result<Option<EndReason>> {
        if let Some(done) = self.done_signal() {
            if let Err(RecvTimeoutError::Timeout) = done.recv_timeout(timeout) {
                return Err(Error::Timeout);
            }
        }
        self.reap();
        Ok(self.status.read().end_reason.clone())
    }

    /// [`stop`](Self::stop) then [`await_stopped`](Self::await_stopped).
    pub fn stop_and_wait(&self) -> Option<EndReason> {
        self.stop();
        self.await_stopped()
    }

    /// Receiver for sink events. Every clone competes for the same events.
    pub fn events(&self) -> Receiver<SinkEvent> {
        self.event_rx.clone()
    }

    /// Try to receive an event without blocking.
    pub fn try_recv_event(&self) -> Option<SinkEvent> {
        self.event_rx.try_recv().ok()
    }

    fn is_alive(&self) -> bool {
        self.session.lock().as_ref().is_some_and(Session::is_alive)
    }

    fn done_signal(&self) -> Option<Receiver<()>> {
        self.session.lock().as_ref().map(|s| s.done.clone())
    }

    /// Join a session thread that has already reported its outcome and is
    /// about to exit.
    fn join_session(&self) {
        if let Some(session) = self.session.lock().take() {
            session.join();
        }
    }

    /// Join the session thread if it has exited.
    fn reap(&self) {
        let mut slot = self.session.lock();
        if slot.as_ref().is_some_and(|s| !s.is_alive()) {
            if let Some(session) = slot.take() {
                session.join();
            }
        }
    }
}

impl<B: DeviceBackend> Drop for OutputSink<B> {
    fn drop(&mut self) {
        self.stop();
        self.control.set_paused(false);
        if let Some(session) = self.session.get_mut().take() {
            session.join();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests use unwrap for brevity
mod tests {
    use super::*;
    use crate::device::CaptureBackend;
    use crate::source::ReaderSource;
    use std::io::Cursor;

    #[test]
    fn test_idle_sink() {
        let sink = OutputSink::new(CaptureBackend::new());
        assert!(!sink.is_running());
        assert_eq!(sink.status().state, PlaybackState::Idle);
        assert!(sink.params().is_none());
        assert!(sink.last_error().is_none());
        assert_eq!(sink.await_stopped(), None);
        sink.stop();
        sink.pause();
        sink.resume();
        assert_eq!(sink.info().name, "capture");
    }

    #[test]
    fn test_start_rejects_invalid_params() {
        let sink = OutputSink::new(CaptureBackend::new());
        let source = ReaderSource::new(Cursor::new(Vec::new()));
        let err = sink
            .start(StreamParams::new(0, 2, Default::default()), source)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[test]
    fn test_restart_after_end_of_stream() {
        let backend = CaptureBackend::new();
        let log = backend.log();
        let sink = OutputSink::new(backend);

        for _ in 0..2 {
            let source = ReaderSource::new(Cursor::new(vec![0u8; 16]));
            sink.start(StreamParams::default(), source).unwrap();
            assert_eq!(sink.await_stopped(), Some(EndReason::EndOfStream));
        }
        assert_eq!(log.bytes_written(), 32);
    }

    #[test]
    fn test_with_config_uses_block_size() {
        let config = SinkConfig {
            block_bytes: 8,
            ..SinkConfig::default()
        };
        let backend = CaptureBackend::new();
        let log = backend.log();
        let sink = OutputSink::with_config(backend, &config).unwrap();

        let source = ReaderSource::new(Cursor::new(vec![0u8; 24]));
        sink.start(StreamParams::default(), source).unwrap();
        sink.await_stopped();
        assert_eq!(log.write_lengths(), vec![8, 8, 8]);
    }
}
