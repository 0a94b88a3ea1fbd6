//! Bluetooth UUIDs for the six-probe BBQ thermometer.
//!
//! The thermometer exposes a single vendor service (`fff0`) whose
//! characteristics carry settings, status and temperature notifications
//! plus one write-only command endpoint.

use uuid::{Uuid, uuid};

// --- Vendor Service UUID ---

/// Vendor service holding every thermometer characteristic.
pub const THERMOMETER_SERVICE: Uuid = uuid!("0000fff0-0000-1000-8000-00805f9b34fb");

// --- Vendor Characteristic UUIDs ---

/// Settings/status notification characteristic.
pub const SETTINGS_NOTIFY: Uuid = uuid!("0000fff1-0000-1000-8000-00805f9b34fb");

/// Secondary status notification characteristic.
pub const STATUS_NOTIFY: Uuid = uuid!("0000fff3-0000-1000-8000-00805f9b34fb");

/// Command characteristic; the startup handshake is written here.
pub const COMMAND: Uuid = uuid!("0000fff4-0000-1000-8000-00805f9b34fb");

/// Temperature notification characteristic (six probe readings).
pub const TEMPERATURES: Uuid = uuid!("0000fff5-0000-1000-8000-00805f9b34fb");

/// Characteristics that must have notifications enabled before the handshake.
pub const NOTIFY_CHARACTERISTICS: [Uuid; 3] = [SETTINGS_NOTIFY, STATUS_NOTIFY, TEMPERATURES];

// --- Standard descriptor UUIDs ---

/// Client Characteristic Configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");
