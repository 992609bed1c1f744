use std::time::Duration;
use uuid::Uuid;

/**
 * The UUID of the Bluetooth BLE service exposed by Progressor-style dynamometers.
 */
pub const PROGRESSOR_SERVICE: &str = "7e4e1701-1ea6-40c9-9dcc-13d34ffead57";

/**
 * The UUID of the Progressor GATT characteristic that notifies batched weight samples.
 */
pub const PROGRESSOR_DATA_CHARACTERISTIC: &str = "7e4e1702-1ea6-40c9-9dcc-13d34ffead57";

/**
 * The UUID of the Progressor GATT characteristic that accepts control commands.
 */
pub const PROGRESSOR_CONTROL_CHARACTERISTIC: &str = "7e4e1703-1ea6-40c9-9dcc-13d34ffead57";

/// Command written to the control characteristic to start continuous weight streaming.
pub const PROGRESSOR_CMD_START_MEASUREMENT: [u8; 1] = [0x65];

/// Packet-type tag of a batched weight notification. Anything else is dropped.
pub const PROGRESSOR_WEIGHT_TAG: u8 = 0x01;

/// Tag + count header, in bytes.
pub const PROGRESSOR_HEADER_LEN: usize = 2;

/// One record: 4-byte LE f32 weight (kg) + 4-byte LE u32 timestamp (microseconds).
pub const PROGRESSOR_RECORD_LEN: usize = 8;

/// Notifications shorter than this cannot carry a valid header and are dropped.
pub const PROGRESSOR_MIN_PACKET_LEN: usize = 6;

/**
 * The UUID of the Bluetooth BLE service exposed by 24-bit load-cell training boards.
 */
pub const BOARD_SERVICE: &str = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";

/**
 * The UUID of the board GATT characteristic that notifies raw 3-byte samples.
 */
pub const BOARD_DATA_CHARACTERISTIC: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a8";

/// One raw board sample: 24-bit big-endian signed integer.
pub const BOARD_SAMPLE_LEN: usize = 3;

/// Conversion from raw board counts to kilograms.
pub const BOARD_KG_PER_COUNT: f64 = 0.001;

/// Sample rate the board streams at; used to synthesize timestamps.
pub const BOARD_SAMPLE_RATE_HZ: u32 = 80;

/// Manufacturer (company) identifier carried by the advertising crane scale.
pub const SCALE_MANUFACTURER_ID: u16 = 0x0100;

/// Substring of the advertised local name of the crane scale.
pub const SCALE_NAME_FRAGMENT: &str = "IF_B7";

/// Byte offset of the big-endian i16 weight within the prefix-stripped manufacturer data.
pub const SCALE_WEIGHT_OFFSET: usize = 12;

/// Width of the manufacturer-ID prefix when the platform has not stripped it.
pub const SCALE_MANUFACTURER_PREFIX_LEN: usize = 2;

/// Manufacturer data shorter than this cannot carry a weight field and is dropped.
pub const SCALE_MIN_PAYLOAD_LEN: usize = 14;

/// Raw advertisement weight is hundredths of a kilogram.
pub const SCALE_WEIGHT_DIVISOR: f64 = 100.0;

/// Advertising rate assumed before the first advertisement establishes a time reference.
pub const SCALE_FALLBACK_RATE_HZ: u32 = 10;

/// No advertisement within this window means the scale is presumed out of range.
pub const ADVERT_STALE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a write to a control characteristic may take.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(2);

/// How long service/characteristic discovery may take before the attempt is restarted.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// First retry delay after a failed connection.
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the exponential retry delay.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Exponent cap: 2^5 * base already exceeds the delay ceiling.
pub const RETRY_EXPONENT_CAP: u32 = 5;

/**
 * How long (without any sample arriving) until the supervisor performs a
 * preserve-auto-reconnect disconnect. Used when the host application sits in
 * the background holding a connection open.
 */
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);

/// One kilogram in pounds.
pub const KG_TO_LBS: f64 = 2.20462;

pub fn make_progressor_service_uuid() -> Uuid {
    Uuid::parse_str(PROGRESSOR_SERVICE).unwrap()
}

pub fn make_progressor_data_uuid() -> Uuid {
    Uuid::parse_str(PROGRESSOR_DATA_CHARACTERISTIC).unwrap()
}

pub fn make_progressor_control_uuid() -> Uuid {
    Uuid::parse_str(PROGRESSOR_CONTROL_CHARACTERISTIC).unwrap()
}

pub fn make_board_service_uuid() -> Uuid {
    Uuid::parse_str(BOARD_SERVICE).unwrap()
}

pub fn make_board_data_uuid() -> Uuid {
    Uuid::parse_str(BOARD_DATA_CHARACTERISTIC).unwrap()
}

/// Retry delay for the given attempt number: `min(base * 2^min(n, 5), max)`.
pub fn retry_delay(retry_count: u32) -> Duration {
    let factor = 1u32 << retry_count.min(RETRY_EXPONENT_CAP);
    let delay = RETRY_BASE_DELAY * factor;
    delay.min(RETRY_MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_then_caps() {
        let seconds: Vec<u64> = (0..6).map(|n| retry_delay(n).as_secs()).collect();
        assert_eq!(seconds, vec![1, 2, 4, 8, 16, 30]);
    }

    #[test]
    fn retry_delay_stays_capped_for_large_counts() {
        assert_eq!(retry_delay(6), RETRY_MAX_DELAY);
        assert_eq!(retry_delay(1000), RETRY_MAX_DELAY);
    }
}
