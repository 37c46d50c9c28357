//! Dock device controller.

use super::keymap::tile_to_wire_key;
use super::protocol::{
    build_background_header, build_brightness_packet, build_clear_packet, build_connect_packet,
    build_data_chunks, build_key_image_header, build_refresh_packet, build_wake_packet,
    decode_frame, FrameEvent, ALL_KEYS, INPUT_REPORT_SIZE,
};
use super::transport::{DockTransport, HidTransport};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Poll period while waiting for the ready-ACK.
const READY_POLL: Duration = Duration::from_millis(5);

/// Dock controller over any [`DockTransport`].
///
/// Reads and writes share one transport lock, held only for a single
/// command or a single non-blocking read, so a read loop thread and a
/// writer can interleave.
pub struct DockDevice<T: DockTransport = HidTransport> {
    transport: Mutex<T>,
    busy: AtomicBool,
}

impl<T: DockTransport> DockDevice<T> {
    /// Wraps an already-open transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport: Mutex::new(transport),
            busy: AtomicBool::new(false),
        }
    }

    fn transport(&self) -> MutexGuard<'_, T> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(transport: &mut T, report: &[u8]) -> Result<()> {
        let written = transport.write(report)?;
        if written < report.len() {
            return Err(Error::ShortWrite {
                written,
                expected: report.len(),
            });
        }
        Ok(())
    }

    fn send_one(&self, report: &[u8]) -> Result<()> {
        Self::send(&mut self.transport(), report)
    }

    /// Switches the transport to non-blocking reads so an owned read loop
    /// can poll it.
    pub fn disable_auto_read(&self) -> Result<()> {
        self.transport().set_nonblocking(true)
    }

    /// Wakes the screen.
    pub fn wake(&self) -> Result<()> {
        self.send_one(&build_wake_packet())
    }

    /// Sets the screen brightness (0-100).
    pub fn set_brightness(&self, percent: u8) -> Result<()> {
        self.send_one(&build_brightness_packet(percent))?;
        debug!("Dock brightness set to {}%", percent.min(100));
        Ok(())
    }

    /// Clears every key image.
    pub fn clear_all(&self) -> Result<()> {
        self.send_one(&build_clear_packet(ALL_KEYS))
    }

    /// Commits pending images to the screen.
    pub fn refresh(&self) -> Result<()> {
        self.send_one(&build_refresh_packet())
    }

    /// Sends a keep-alive.
    pub fn heartbeat(&self) -> Result<()> {
        self.send_one(&build_connect_packet())
    }

    /// Uploads a JPEG key image for a tile position. Does not refresh.
    pub fn set_key_image(&self, row: u8, col: u8, jpeg: &[u8]) -> Result<()> {
        let key = tile_to_wire_key(row, col)?;
        let header = build_key_image_header(key, jpeg)?;

        let mut transport = self.transport();
        Self::send(&mut transport, &header)?;
        for chunk in build_data_chunks(jpeg) {
            Self::send(&mut transport, &chunk)?;
        }

        debug!(
            "Key image sent for ({}, {}) as key {} ({} bytes)",
            row,
            col,
            key,
            jpeg.len()
        );
        Ok(())
    }

    /// Uploads a full-screen JPEG background and commits it.
    ///
    /// Marks the device busy before sending; the flag is cleared when a
    /// ready-ACK frame is observed by [`DockDevice::read_frame`].
    pub fn set_background(&self, jpeg: &[u8]) -> Result<()> {
        let header = build_background_header(jpeg)?;
        self.busy.store(true, Ordering::SeqCst);

        let result = (|| {
            let mut transport = self.transport();
            Self::send(&mut transport, &header)?;
            for chunk in build_data_chunks(jpeg) {
                Self::send(&mut transport, &chunk)?;
            }
            Self::send(&mut transport, &build_refresh_packet())
        })();

        if result.is_err() {
            self.busy.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Whether a background write is awaiting its ready-ACK.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Waits until the busy flag clears. Returns false on timeout.
    ///
    /// Some other thread must be calling [`DockDevice::read_frame`].
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(READY_POLL);
        }
        true
    }

    /// Reads and decodes one pending input frame.
    ///
    /// Returns `None` when nothing is pending. A ready-ACK frame clears the
    /// busy flag as a side effect.
    pub fn read_frame(&self) -> Result<Option<FrameEvent>> {
        let mut buf = [0u8; INPUT_REPORT_SIZE];
        let n = self.transport().read(&mut buf)?;
        if n == 0 {
            return Ok(None);
        }

        let event = decode_frame(&buf[..n]);
        if event.ready && self.busy.swap(false, Ordering::SeqCst) {
            debug!("Dock ready-ACK received");
        }
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dock::protocol::{BUFFER_SIZE, PAYLOAD_SIZE};
    use crate::dock::MemoryTransport;

    fn frame(header: [u8; 2], key: u8, status: u8) -> Vec<u8> {
        let mut f = vec![0u8; 13];
        f[3] = header[0];
        f[4] = header[1];
        f[9] = key;
        f[10] = status;
        f
    }

    #[test]
    fn test_key_image_chunks() {
        let transport = MemoryTransport::new();
        let dock = DockDevice::new(transport.clone());

        let jpeg = vec![0x42; PAYLOAD_SIZE * 2 + 1];
        dock.set_key_image(0, 0, &jpeg).unwrap();

        let written = transport.written();
        assert_eq!(written.len(), 4);
        assert!(written.iter().all(|r| r.len() == BUFFER_SIZE));
        assert_eq!(&written[0][6..9], b"BAT");
        // Tile (0, 0) is button 1, which the dock addresses as key 11
        assert_eq!(written[0][13], 11);
    }

    #[test]
    fn test_invalid_tile_rejected() {
        let transport = MemoryTransport::new();
        let dock = DockDevice::new(transport.clone());
        assert!(matches!(
            dock.set_key_image(3, 0, &[1, 2, 3]),
            Err(Error::InvalidTile { row: 3, col: 0 })
        ));
        assert!(transport.written().is_empty());
    }

    #[test]
    fn test_background_busy_cleared_by_ack() {
        let transport = MemoryTransport::new();
        let dock = DockDevice::new(transport.clone());

        dock.set_background(&[0u8; 10]).unwrap();
        assert!(dock.is_busy());
        assert_eq!(&transport.written().last().unwrap()[6..9], b"STP");

        // A key frame with a non-zero header keeps the device busy
        transport.push_frame(&frame([1, 0], 1, 0x01));
        let event = dock.read_frame().unwrap().unwrap();
        assert!(event.button.is_some());
        assert!(dock.is_busy());

        transport.push_frame(&frame([0, 0], 0xFF, 0));
        let event = dock.read_frame().unwrap().unwrap();
        assert!(event.ready);
        assert_eq!(event.button, None);
        assert!(!dock.is_busy());
        assert!(dock.wait_ready(Duration::from_millis(1)));
    }

    #[test]
    fn test_read_frame_empty() {
        let dock = DockDevice::new(MemoryTransport::new());
        assert!(dock.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_disable_auto_read() {
        let transport = MemoryTransport::new();
        let dock = DockDevice::new(transport.clone());
        dock.disable_auto_read().unwrap();
        assert!(transport.is_nonblocking());
    }

    #[test]
    #[ignore]
    fn test_device_open() {
        let transport = HidTransport::open(crate::DOCK_VID, crate::DOCK_PID).unwrap();
        let dock = DockDevice::new(transport);
        dock.wake().unwrap();
    }
}
