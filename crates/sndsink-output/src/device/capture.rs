//! In-memory output backend.
//!
//! Records every device operation instead of playing it. Used for dry runs
//! and for exercising the playback loop without audio hardware.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use sndsink_core::{Error, Result, StreamParams};
use tracing::debug;

use super::{negotiate, DeviceBackend, DeviceMode, OutputDevice, OutputInfo};

/// One recorded device operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Opened(StreamParams),
    /// A block handed to the device. `data` is empty when the backend
    /// discards payloads.
    Write {
        len: usize,
        data: Vec<u8>,
    },
    Drained,
    Closed,
}

/// Shared view of everything a [`CaptureBackend`] recorded.
#[derive(Debug, Clone, Default)]
pub struct CaptureLog {
    events: Arc<Mutex<Vec<CaptureEvent>>>,
}

impl CaptureLog {
    fn push(&self, event: CaptureEvent) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<CaptureEvent> {
        self.events.lock().clone()
    }

    /// Payloads of every write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                CaptureEvent::Write { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Lengths of every write, in order.
    pub fn write_lengths(&self) -> Vec<usize> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                CaptureEvent::Write { len, .. } => Some(*len),
                _ => None,
            })
            .collect()
    }

    pub fn bytes_written(&self) -> usize {
        self.write_lengths().iter().sum()
    }

    pub fn count(&self, wanted: &CaptureEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == wanted).count()
    }
}

/// Backend whose devices record into a [`CaptureLog`].
///
/// Without modes every valid request is accepted as is. With modes, requests
/// go through [`negotiate`] like a real device would.
#[derive(Debug, Clone)]
pub struct CaptureBackend {
    name: String,
    modes: Option<Vec<DeviceMode>>,
    log: CaptureLog,
    keep_data: bool,
    realtime: bool,
    fail_open: Option<String>,
    fail_write_after: Option<usize>,
}

impl Default for CaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend {
    pub fn new() -> Self {
        Self {
            name: "capture".to_string(),
            modes: None,
            log: CaptureLog::default(),
            keep_data: true,
            realtime: false,
            fail_open: None,
            fail_write_after: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Restrict the device to `modes`.
    #[must_use]
    pub fn with_modes(mut self, modes: Vec<DeviceMode>) -> Self {
        self.modes = Some(modes);
        self
    }

    /// Record write lengths only.
    #[must_use]
    pub const fn discard_data(mut self) -> Self {
        self.keep_data = false;
        self
    }

    /// Block each write for the playback time of its bytes, like a device
    /// whose buffer is always full.
    #[must_use]
    pub const fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    /// Make every `open` fail as if the device were missing.
    #[must_use]
    pub fn unavailable(mut self, reason: impl Into<String>) -> Self {
        self.fail_open = Some(reason.into());
        self
    }

    /// Accept `writes` writes, then fail every later one.
    #[must_use]
    pub const fn fail_writes_after(mut self, writes: usize) -> Self {
        self.fail_write_after = Some(writes);
        self
    }

    pub fn log(&self) -> CaptureLog {
        self.log.clone()
    }
}

impl DeviceBackend for CaptureBackend {
    type Device = CaptureDevice;

    fn info(&self) -> OutputInfo {
        OutputInfo {
            name: self.name.clone(),
            description: "In-memory capture device".to_string(),
        }
    }

    fn open(&self, requested: &StreamParams) -> Result<CaptureDevice> {
        if let Some(reason) = &self.fail_open {
            return Err(Error::DeviceUnavailable(reason.clone()));
        }

        let params = match &self.modes {
            Some(modes) => negotiate(requested, modes)?,
            None => {
                requested.validate()?;
                *requested
            }
        };

        debug!("Capture device '{}' opened at {params}", self.name);
        self.log.push(CaptureEvent::Opened(params));

        Ok(CaptureDevice {
            name: self.name.clone(),
            params,
            log: self.log.clone(),
            keep_data: self.keep_data,
            realtime: self.realtime,
            writes_left: self.fail_write_after,
            closed: false,
        })
    }
}

/// Device opened by [`CaptureBackend`].
pub struct CaptureDevice {
    name: String,
    params: StreamParams,
    log: CaptureLog,
    keep_data: bool,
    realtime: bool,
    writes_left: Option<usize>,
    closed: bool,
}

impl OutputDevice for CaptureDevice {
    fn params(&self) -> StreamParams {
        self.params
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, block: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::WriteFailed("device is closed".into()));
        }
        if let Some(left) = self.writes_left.as_mut() {
            if *left == 0 {
                return Err(Error::WriteFailed("device disconnected".into()));
            }
            *left -= 1;
        }

        let data = if self.keep_data {
            block.to_vec()
        } else {
            Vec::new()
        };
        self.log.push(CaptureEvent::Write {
            len: block.len(),
            data,
        });

        if self.realtime {
            thread::sleep(self.params.duration_of(block.len()));
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.log.push(CaptureEvent::Drained);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.push(CaptureEvent::Closed);
        }
    }
}

impl Drop for CaptureDevice {
    fn drop(&mut self) {
        self.close();
    }
}
