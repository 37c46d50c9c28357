//! Byte transports for the dock.

use crate::{Error, Result};
use hidapi::{HidApi, HidDevice};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// A report-oriented transport to the dock.
pub trait DockTransport: Send {
    /// Writes one output report. Returns the number of bytes written.
    fn write(&mut self, report: &[u8]) -> Result<usize>;

    /// Reads one input report into `buf`. Returns 0 when nothing is pending.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Switches between blocking and non-blocking reads.
    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()>;
}

/// The HID interface number used for image and key traffic.
const DOCK_INTERFACE: i32 = 0;

/// USB HID transport backed by hidapi.
pub struct HidTransport {
    device: HidDevice,
}

impl HidTransport {
    /// Opens the first dock matching `vid:pid`.
    pub fn open(vid: u16, pid: u16) -> Result<Self> {
        let api = HidApi::new()?;

        let devices: Vec<_> = api
            .device_list()
            .filter(|d| d.vendor_id() == vid && d.product_id() == pid)
            .collect();

        for dev in &devices {
            debug!(
                "Found HID device: path={:?}, interface={}",
                dev.path(),
                dev.interface_number()
            );
        }

        let device_info = devices
            .iter()
            .find(|d| d.interface_number() == DOCK_INTERFACE)
            .or_else(|| devices.first())
            .ok_or(Error::DockNotFound { vid, pid })?;

        let device = device_info.open_device(&api).map_err(|e| {
            debug!("Failed to open device: {}", e);
            Error::DockNotFound { vid, pid }
        })?;

        info!(
            "Dock opened (VID:{:04X} PID:{:04X}, interface={})",
            vid,
            pid,
            device_info.interface_number()
        );

        Ok(Self { device })
    }
}

impl DockTransport for HidTransport {
    fn write(&mut self, report: &[u8]) -> Result<usize> {
        Ok(self.device.write(report)?)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.device.read(buf)?)
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        Ok(self.device.set_blocking_mode(!nonblocking)?)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    written: Vec<Vec<u8>>,
    pending: VecDeque<Vec<u8>>,
    nonblocking: bool,
    failing: Option<[u8; 3]>,
}

/// In-memory transport for headless runs and tests.
///
/// Clones share state: keep one handle to inspect written reports and to
/// queue input frames while the other is owned by a [`DockDevice`].
///
/// [`DockDevice`]: super::DockDevice
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    /// Creates an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues an input frame to be returned by the next read.
    pub fn push_frame(&self, frame: &[u8]) {
        self.state().pending.push_back(frame.to_vec());
    }

    /// Returns every report written so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    /// Drops recorded writes.
    pub fn clear_written(&self) {
        self.state().written.clear();
    }

    /// Makes writes of the given `CRT` command fail, or none with `None`.
    pub fn fail_command(&self, command: Option<&[u8; 3]>) {
        self.state().failing = command.copied();
    }

    /// Whether reads were switched to non-blocking.
    pub fn is_nonblocking(&self) -> bool {
        self.state().nonblocking
    }
}

impl DockTransport for MemoryTransport {
    fn write(&mut self, report: &[u8]) -> Result<usize> {
        let mut state = self.state();
        if let Some(command) = state.failing {
            if report.get(1..6) == Some(b"CRT\0\0".as_slice())
                && report.get(6..9) == Some(command.as_slice())
            {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "injected write failure",
                )));
            }
        }
        state.written.push(report.to_vec());
        Ok(report.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.state().pending.pop_front() {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        self.state().nonblocking = nonblocking;
        Ok(())
    }
}
