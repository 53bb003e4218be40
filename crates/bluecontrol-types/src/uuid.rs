//! Bluetooth UUIDs for bluecontrol peripherals.
//!
//! The peripheral exposes one writable command characteristic and up to six
//! notifying read characteristics, one per controllable parameter. All of them
//! live in the Bluetooth base UUID range.

use uuid::{Uuid, uuid};

// --- Command characteristic ---

/// Writable characteristic that receives `GET`/`SET` command strings.
pub const COMMAND_WRITE: Uuid = uuid!("0000ffa1-0000-1000-8000-00805f9b34fb");

// --- Notifying read characteristics ---

/// Current telemetry. Also the only read channel in the single-channel layout.
pub const READ_CURRENT: Uuid = uuid!("0000ffa2-0000-1000-8000-00805f9b34fb");

/// Voltage telemetry.
pub const READ_VOLTAGE: Uuid = uuid!("0000ffb2-0000-1000-8000-00805f9b34fb");

/// Frequency telemetry.
pub const READ_FREQUENCY: Uuid = uuid!("0000ffc2-0000-1000-8000-00805f9b34fb");

/// Left channel frequency telemetry.
pub const READ_L_FREQ: Uuid = uuid!("0000ffd2-0000-1000-8000-00805f9b34fb");

/// Right channel frequency telemetry.
pub const READ_R_FREQ: Uuid = uuid!("0000ffe2-0000-1000-8000-00805f9b34fb");

/// Volume telemetry.
pub const READ_VOLUME: Uuid = uuid!("0000fff2-0000-1000-8000-00805f9b34fb");

// --- Standard descriptors ---

/// Client Characteristic Configuration Descriptor, written to enable notifications.
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// Value written to the CCCD to enable notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_write_uuid() {
        assert_eq!(
            COMMAND_WRITE.to_string(),
            "0000ffa1-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_read_uuids_are_distinct() {
        let reads = [
            READ_CURRENT,
            READ_VOLTAGE,
            READ_FREQUENCY,
            READ_L_FREQ,
            READ_R_FREQ,
            READ_VOLUME,
        ];
        for (i, a) in reads.iter().enumerate() {
            assert_ne!(*a, COMMAND_WRITE);
            for b in &reads[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_uuids_use_bluetooth_base() {
        let base_suffix = "-0000-1000-8000-00805f9b34fb";
        for uuid in [
            COMMAND_WRITE,
            READ_CURRENT,
            READ_VOLUME,
            CLIENT_CHARACTERISTIC_CONFIG,
        ] {
            assert!(uuid.to_string().ends_with(base_suffix));
        }
    }

    #[test]
    fn test_cccd_parses_from_uppercase() {
        let parsed = Uuid::parse_str("00002902-0000-1000-8000-00805F9B34FB").unwrap();
        assert_eq!(parsed, CLIENT_CHARACTERISTIC_CONFIG);
    }
}
