//! Per-protocol payload parsing into [`TimestampedSample`]s.
//!
//! Parsers are pure with respect to BLE plumbing: the supervisor hands them
//! raw notification bytes or advertisement records and forwards whatever
//! samples come out. Malformed or foreign payloads are ordinary BLE noise
//! and simply produce no samples.

use std::time::Instant;

use log::debug;

use crate::device::constants::{
    BOARD_KG_PER_COUNT, BOARD_SAMPLE_LEN, BOARD_SAMPLE_RATE_HZ, PROGRESSOR_HEADER_LEN,
    PROGRESSOR_MIN_PACKET_LEN, PROGRESSOR_RECORD_LEN, PROGRESSOR_WEIGHT_TAG,
    SCALE_FALLBACK_RATE_HZ, SCALE_MANUFACTURER_PREFIX_LEN, SCALE_MIN_PAYLOAD_LEN,
    SCALE_WEIGHT_DIVISOR, SCALE_WEIGHT_OFFSET,
};
use crate::device::types::TimestampedSample;

/// Batched-notification dynamometer protocol: `[tag][count]` header followed
/// by 8-byte records of `{f32 LE weight kg, u32 LE timestamp µs}`. Devices
/// batch around 16 samples per notification; every complete record is
/// emitted.
pub struct ProgressorTransport;

impl ProgressorTransport {
    pub fn parse_notification(payload: &[u8]) -> Vec<TimestampedSample> {
        if payload.len() < PROGRESSOR_MIN_PACKET_LEN {
            debug!("Dropping short progressor packet ({} bytes)", payload.len());
            return Vec::new();
        }

        if payload[0] != PROGRESSOR_WEIGHT_TAG {
            return Vec::new();
        }

        let body = &payload[PROGRESSOR_HEADER_LEN..];
        let mut samples = Vec::with_capacity(body.len() / PROGRESSOR_RECORD_LEN);

        // Trailing partial record bytes are ignored.
        for record in body.chunks_exact(PROGRESSOR_RECORD_LEN) {
            let weight = f32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            let timestamp = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
            samples.push(TimestampedSample {
                weight_kg: weight as f64,
                device_timestamp: timestamp,
            });
        }

        samples
    }
}

/// Training-board protocol: a stream of 24-bit big-endian signed samples,
/// each scaled by a fixed conversion constant. The board sends no
/// timestamps, so the transport synthesizes them from a running sample
/// index at the board's nominal sample rate.
pub struct BoardTransport {
    sample_index: u32,
}

impl BoardTransport {
    pub fn new() -> Self {
        BoardTransport { sample_index: 0 }
    }

    pub fn parse_notification(&mut self, payload: &[u8]) -> Vec<TimestampedSample> {
        let period_micros = 1_000_000 / BOARD_SAMPLE_RATE_HZ;
        let mut samples = Vec::with_capacity(payload.len() / BOARD_SAMPLE_LEN);

        for raw in payload.chunks_exact(BOARD_SAMPLE_LEN) {
            // Sign-extend the 24-bit value.
            let counts = (i32::from_be_bytes([0, raw[0], raw[1], raw[2]]) << 8) >> 8;
            let timestamp = self.sample_index.wrapping_mul(period_micros);
            self.sample_index = self.sample_index.wrapping_add(1);

            samples.push(TimestampedSample {
                weight_kg: counts as f64 * BOARD_KG_PER_COUNT,
                device_timestamp: timestamp,
            });
        }

        samples
    }
}

impl Default for BoardTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Advertisement-only crane scale: never connected, one sample per
/// manufacturer-data record. The weight is a big-endian i16 in hundredths
/// of a kilogram at a fixed offset; when the manufacturer-ID prefix has not
/// been stripped by the platform the offset shifts by its width.
///
/// Timestamps are fully synthetic: elapsed time since the first
/// advertisement, with a constant-rate fallback before that reference
/// exists.
pub struct AdvertScaleTransport {
    started_at: Option<Instant>,
    sample_index: u32,
}

impl AdvertScaleTransport {
    pub fn new() -> Self {
        AdvertScaleTransport {
            started_at: None,
            sample_index: 0,
        }
    }

    pub fn parse_advertisement(
        &mut self,
        data: &[u8],
        prefix_present: bool,
        now: Instant,
    ) -> Option<TimestampedSample> {
        let (offset, min_len) = if prefix_present {
            (
                SCALE_WEIGHT_OFFSET + SCALE_MANUFACTURER_PREFIX_LEN,
                SCALE_MIN_PAYLOAD_LEN + SCALE_MANUFACTURER_PREFIX_LEN,
            )
        } else {
            (SCALE_WEIGHT_OFFSET, SCALE_MIN_PAYLOAD_LEN)
        };

        if data.len() < min_len {
            debug!("Dropping short scale advertisement ({} bytes)", data.len());
            return None;
        }

        let raw = i16::from_be_bytes([data[offset], data[offset + 1]]);
        let weight_kg = raw as f64 / SCALE_WEIGHT_DIVISOR;

        let device_timestamp = match self.started_at {
            Some(start) => now.duration_since(start).as_micros() as u32,
            None => {
                self.started_at = Some(now);
                self.sample_index
                    .wrapping_mul(1_000_000 / SCALE_FALLBACK_RATE_HZ)
            }
        };
        self.sample_index = self.sample_index.wrapping_add(1);

        Some(TimestampedSample {
            weight_kg,
            device_timestamp,
        })
    }
}

impl Default for AdvertScaleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn progressor_packet(records: &[(f32, u32)]) -> Vec<u8> {
        let mut payload = vec![PROGRESSOR_WEIGHT_TAG, records.len() as u8];
        for (weight, ts) in records {
            payload.extend_from_slice(&weight.to_le_bytes());
            payload.extend_from_slice(&ts.to_le_bytes());
        }
        payload
    }

    #[test]
    fn progressor_parses_all_batched_records() {
        let records: Vec<(f32, u32)> = (0..16).map(|i| (i as f32 * 0.5, i * 12_500)).collect();
        let payload = progressor_packet(&records);

        let samples = ProgressorTransport::parse_notification(&payload);
        assert_eq!(samples.len(), 16);
        assert_eq!(samples[3].weight_kg, 1.5);
        assert_eq!(samples[3].device_timestamp, 37_500);
    }

    #[test]
    fn progressor_rejects_short_packet() {
        assert!(ProgressorTransport::parse_notification(&[PROGRESSOR_WEIGHT_TAG, 1, 0, 0, 0]).is_empty());
        assert!(ProgressorTransport::parse_notification(&[]).is_empty());
    }

    #[test]
    fn progressor_rejects_foreign_tag() {
        let mut payload = progressor_packet(&[(1.0, 100)]);
        payload[0] = 0x02;
        assert!(ProgressorTransport::parse_notification(&payload).is_empty());
    }

    #[test]
    fn progressor_ignores_trailing_partial_record() {
        let mut payload = progressor_packet(&[(2.5, 1_000), (3.5, 2_000)]);
        payload.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let samples = ProgressorTransport::parse_notification(&payload);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].weight_kg, 3.5);
    }

    #[test]
    fn board_converts_fixed_point_counts() {
        let mut transport = BoardTransport::new();
        // 0x004E20 = 20000 counts = 20.0kg at 0.001 kg/count.
        let samples = transport.parse_notification(&[0x00, 0x4E, 0x20]);
        assert_eq!(samples.len(), 1);
        assert!((samples[0].weight_kg - 20.0).abs() < 1e-9);
    }

    #[test]
    fn board_sign_extends_negative_counts() {
        let mut transport = BoardTransport::new();
        // 0xFFFF9C = -100 counts.
        let samples = transport.parse_notification(&[0xFF, 0xFF, 0x9C]);
        assert!((samples[0].weight_kg - (-0.1)).abs() < 1e-9);
    }

    #[test]
    fn board_synthesizes_evenly_spaced_timestamps() {
        let mut transport = BoardTransport::new();
        let samples = transport.parse_notification(&[0, 0, 1, 0, 0, 2, 0, 0, 3]);
        let period = 1_000_000 / BOARD_SAMPLE_RATE_HZ;
        assert_eq!(samples[0].device_timestamp, 0);
        assert_eq!(samples[1].device_timestamp, period);
        assert_eq!(samples[2].device_timestamp, 2 * period);

        // The index survives across notifications.
        let more = transport.parse_notification(&[0, 0, 4]);
        assert_eq!(more[0].device_timestamp, 3 * period);
    }

    fn scale_advert(weight_hundredths: i16) -> Vec<u8> {
        let mut data = vec![0u8; SCALE_WEIGHT_OFFSET];
        data.extend_from_slice(&weight_hundredths.to_be_bytes());
        data
    }

    #[test]
    fn scale_parses_weight_at_fixed_offset() {
        let mut transport = AdvertScaleTransport::new();
        let sample = transport
            .parse_advertisement(&scale_advert(1234), false, Instant::now())
            .unwrap();
        assert!((sample.weight_kg - 12.34).abs() < 1e-9);
    }

    #[test]
    fn scale_handles_negative_weight() {
        let mut transport = AdvertScaleTransport::new();
        let sample = transport
            .parse_advertisement(&scale_advert(-50), false, Instant::now())
            .unwrap();
        assert!((sample.weight_kg - (-0.5)).abs() < 1e-9);
    }

    #[test]
    fn scale_rejects_short_payload() {
        let mut transport = AdvertScaleTransport::new();
        let data = vec![0u8; SCALE_WEIGHT_OFFSET + 1];
        assert!(transport
            .parse_advertisement(&data, false, Instant::now())
            .is_none());
    }

    #[test]
    fn scale_applies_prefix_offset_correction() {
        let mut transport = AdvertScaleTransport::new();
        let mut data = vec![0u8; SCALE_MANUFACTURER_PREFIX_LEN];
        data.extend_from_slice(&scale_advert(500));

        let sample = transport
            .parse_advertisement(&data, true, Instant::now())
            .unwrap();
        assert!((sample.weight_kg - 5.0).abs() < 1e-9);
    }

    #[test]
    fn scale_timestamps_track_elapsed_time() {
        let mut transport = AdvertScaleTransport::new();
        let start = Instant::now();

        let first = transport
            .parse_advertisement(&scale_advert(100), false, start)
            .unwrap();
        assert_eq!(first.device_timestamp, 0);

        let later = transport
            .parse_advertisement(&scale_advert(100), false, start + Duration::from_millis(250))
            .unwrap();
        assert_eq!(later.device_timestamp, 250_000);
    }
}
