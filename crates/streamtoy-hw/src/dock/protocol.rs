//! Dock protocol definitions and encoding.
//!
//! Protocol structure:
//! - Output report: 1 report byte + 1024 payload bytes
//! - Command prefix: `CRT\0\0` followed by an ASCII command
//! - Image commands (`BAT`, `LOG`) carry a big-endian length header and are
//!   followed by the JPEG payload split into report-sized chunks
//! - Input report: byte 9 holds the key index, byte 10 the key status,
//!   bytes 3 and 4 both zero signal that the dock is ready again

use super::keymap;
use crate::{Error, Result};

/// Payload size of one output report.
pub const PAYLOAD_SIZE: usize = 1024;

/// Report byte size (HID report ID).
pub const REPORT_SIZE: usize = 1;

/// Total buffer size including report byte.
pub const BUFFER_SIZE: usize = REPORT_SIZE + PAYLOAD_SIZE;

/// Size of an input report.
pub const INPUT_REPORT_SIZE: usize = 512;

/// Command prefix.
pub const PREFIX: &[u8; 5] = b"CRT\0\0";

/// Offset of the key index in an input frame.
pub const KEY_OFFSET: usize = 9;

/// Offset of the key status in an input frame.
pub const STATUS_OFFSET: usize = 10;

/// Key index meaning "no key event in this frame".
pub const NO_EVENT: u8 = 0xFF;

/// Key status for a press.
pub const STATUS_PRESSED: u8 = 0x01;

/// Key number addressing every key in a clear command.
pub const ALL_KEYS: u8 = 0xFF;

/// Dock commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Wake the screen.
    Wake,
    /// Set screen brightness (0-100).
    Brightness,
    /// Clear one key or all keys.
    Clear,
    /// Commit pending images to the screen.
    Refresh,
    /// Key image header.
    KeyImage,
    /// Full-screen background image header.
    Background,
    /// Keep-alive.
    Connect,
}

impl Command {
    /// Returns the ASCII command tag.
    pub fn tag(&self) -> &'static [u8] {
        match self {
            Command::Wake => b"DIS",
            Command::Brightness => b"LIG",
            Command::Clear => b"CLE",
            Command::Refresh => b"STP",
            Command::KeyImage => b"BAT",
            Command::Background => b"LOG",
            Command::Connect => b"CONNECT",
        }
    }
}

/// Builds a command packet with trailing argument bytes.
fn build_command(command: Command, args: &[u8]) -> [u8; BUFFER_SIZE] {
    let mut buffer = [0u8; BUFFER_SIZE];
    // Skip report byte (index 0)
    let mut offset = REPORT_SIZE;
    for part in [PREFIX.as_slice(), command.tag(), args] {
        buffer[offset..offset + part.len()].copy_from_slice(part);
        offset += part.len();
    }
    buffer
}

/// Builds a wake-screen packet.
pub fn build_wake_packet() -> [u8; BUFFER_SIZE] {
    build_command(Command::Wake, &[])
}

/// Builds a brightness packet. Values above 100 are clamped.
pub fn build_brightness_packet(percent: u8) -> [u8; BUFFER_SIZE] {
    build_command(Command::Brightness, &[0, 0, percent.min(100)])
}

/// Builds a clear packet for one wire key, or [`ALL_KEYS`].
pub fn build_clear_packet(key: u8) -> [u8; BUFFER_SIZE] {
    build_command(Command::Clear, &[0, 0, 0, key])
}

/// Builds a refresh (commit) packet.
pub fn build_refresh_packet() -> [u8; BUFFER_SIZE] {
    build_command(Command::Refresh, &[])
}

/// Builds a keep-alive packet.
pub fn build_connect_packet() -> [u8; BUFFER_SIZE] {
    build_command(Command::Connect, &[])
}

fn payload_len(payload: &[u8]) -> Result<[u8; 4]> {
    u32::try_from(payload.len())
        .map(u32::to_be_bytes)
        .map_err(|_| Error::PayloadTooLarge(payload.len()))
}

/// Builds the header packet announcing a key image of `payload` bytes.
pub fn build_key_image_header(key: u8, payload: &[u8]) -> Result<[u8; BUFFER_SIZE]> {
    let len = payload_len(payload)?;
    Ok(build_command(
        Command::KeyImage,
        &[len[0], len[1], len[2], len[3], key],
    ))
}

/// Builds the header packet announcing a full-screen background image.
pub fn build_background_header(payload: &[u8]) -> Result<[u8; BUFFER_SIZE]> {
    let len = payload_len(payload)?;
    Ok(build_command(
        Command::Background,
        &[len[0], len[1], len[2], len[3], 0x01],
    ))
}

/// Splits an image payload into zero-padded report-sized chunks.
pub fn build_data_chunks(payload: &[u8]) -> impl Iterator<Item = [u8; BUFFER_SIZE]> + '_ {
    payload.chunks(PAYLOAD_SIZE).map(|chunk| {
        let mut buffer = [0u8; BUFFER_SIZE];
        buffer[REPORT_SIZE..REPORT_SIZE + chunk.len()].copy_from_slice(chunk);
        buffer
    })
}

/// A decoded key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    /// Key index as read from the wire.
    pub raw: u8,
    /// Tile row (0 = top).
    pub row: u8,
    /// Tile column.
    pub col: u8,
    /// True on press, false on release.
    pub pressed: bool,
}

/// What an input frame carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameEvent {
    /// Header bytes 3 and 4 were both zero.
    pub ready: bool,
    /// Key transition, if the frame carried a recognised one.
    pub button: Option<ButtonEvent>,
}

/// Interprets an input frame.
///
/// The ready check and the key decode are independent: a frame may be a
/// ready-ACK, a key transition, both, or neither.
pub fn decode_frame(frame: &[u8]) -> FrameEvent {
    let ready = frame.len() > 4 && frame[3] == 0 && frame[4] == 0;

    let button = if frame.len() > STATUS_OFFSET {
        decode_button(frame[KEY_OFFSET], frame[STATUS_OFFSET])
    } else {
        None
    };

    FrameEvent { ready, button }
}

fn decode_button(raw: u8, status: u8) -> Option<ButtonEvent> {
    if raw == NO_EVENT {
        return None;
    }
    let (row, col) = keymap::raw_to_tile(raw)?;
    let pressed = match status {
        STATUS_PRESSED => true,
        0x00 | 0x02 => false,
        _ => return None,
    };
    Some(ButtonEvent {
        raw,
        row,
        col,
        pressed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(header: [u8; 2], key: u8, status: u8) -> [u8; 13] {
        let mut f = *b"ACK\0\0OK\0\0\0\0\0\0";
        f[3] = header[0];
        f[4] = header[1];
        f[KEY_OFFSET] = key;
        f[STATUS_OFFSET] = status;
        f
    }

    #[test]
    fn test_command_prefix() {
        let packet = build_refresh_packet();
        assert_eq!(packet[0], 0);
        assert_eq!(&packet[1..6], PREFIX);
        assert_eq!(&packet[6..9], b"STP");
        assert!(packet[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_brightness_packet_clamps() {
        let packet = build_brightness_packet(250);
        assert_eq!(&packet[6..9], b"LIG");
        assert_eq!(packet[11], 100);
    }

    #[test]
    fn test_key_image_header() {
        let payload = vec![0xAB; 3000];
        let packet = build_key_image_header(11, &payload).unwrap();
        assert_eq!(&packet[6..9], b"BAT");
        assert_eq!(&packet[9..13], &3000u32.to_be_bytes());
        assert_eq!(packet[13], 11);
    }

    #[test]
    fn test_data_chunks_padding() {
        let payload = vec![0x11; PAYLOAD_SIZE + 10];
        let chunks: Vec<_> = build_data_chunks(&payload).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0][0], 0);
        assert!(chunks[0][1..].iter().all(|&b| b == 0x11));
        assert!(chunks[1][1..11].iter().all(|&b| b == 0x11));
        assert!(chunks[1][11..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_ready_without_key() {
        let event = decode_frame(&frame([0, 0], NO_EVENT, 0));
        assert!(event.ready);
        assert_eq!(event.button, None);
    }

    #[test]
    fn test_decode_press_and_release() {
        let event = decode_frame(&frame([1, 0], 1, STATUS_PRESSED));
        assert!(!event.ready);
        assert_eq!(
            event.button,
            Some(ButtonEvent {
                raw: 1,
                row: 0,
                col: 0,
                pressed: true
            })
        );

        let event = decode_frame(&frame([1, 0], 13, 0x02));
        let button = event.button.unwrap();
        assert_eq!((button.row, button.col, button.pressed), (2, 2, false));

        let event = decode_frame(&frame([1, 0], 13, 0x00));
        assert!(!event.button.unwrap().pressed);
    }

    #[test]
    fn test_decode_ignores_unknown() {
        assert_eq!(decode_frame(&frame([1, 0], 16, STATUS_PRESSED)).button, None);
        assert_eq!(decode_frame(&frame([1, 0], 0, STATUS_PRESSED)).button, None);
        assert_eq!(decode_frame(&frame([1, 0], 4, 0x07)).button, None);
        assert_eq!(decode_frame(&[0, 0]), FrameEvent::default());
    }
}
