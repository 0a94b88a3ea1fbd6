//! Command frames for the thermometer's command characteristic.
//!
//! Every frame is eight bytes and starts and ends with the same opcode.
//! After notifications are enabled, [`HANDSHAKE`] must be written in order to
//! make the sensor start streaming temperatures.

/// Length of a command frame.
pub const FRAME_LEN: usize = 8;

/// A single command frame.
pub type Frame = [u8; FRAME_LEN];

/// Opens the session.
pub const OPEN_SESSION: u8 = 0x23;

/// Arms one probe channel. Format: `[ARM_PROBE, channel, 0, 0, 0, 0, 0, ARM_PROBE]`.
pub const ARM_PROBE: u8 = 0x22;

/// Starts streaming.
pub const START_STREAM: u8 = 0x24;

/// Startup sequence, written byte-for-byte in this order.
pub const HANDSHAKE: [Frame; 8] = [
    [0x23, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x23],
    [0x22, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x22],
    [0x22, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x22],
    [0x22, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x22],
    [0x22, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x22],
    [0x22, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x22],
    [0x22, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x22],
    [0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x24],
];
