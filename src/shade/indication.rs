//! Inbound shade indication parsing and deduplication (design §4.3).
//!
//! Indications arrive as independent payloads, each prefixed with the
//! source device ID. A checksum-based dedup drops consecutive duplicates
//! from the same source, and a cross-path filter also rejects payloads
//! byte-identical to the most recent inbound indication seen within 500ms,
//! regardless of source (design §9), by treating the comparison as
//! bytewise equality.

use embassy_time::{Duration, Instant};

use crate::shade::command::RailKind;

const CROSS_PATH_WINDOW: Duration = Duration::from_millis(500);

/// One parsed datum forwarded to the database collaborator (design §6).
#[derive(Debug, Clone, PartialEq)]
pub enum IndicationEvent {
    Position { rail: RailKind, value: u16 },
    Battery { millivolts: u16 },
    ScenePosition { scene_id: u8, position: u16 },
    FirmwareVersion(String),
    GroupBitmap([u8; 32]),
    ShadeType(u8),
    DebugMetric { code: u8, value: u16 },
    /// Synthesized by a discovery pass rather than parsed from the wire: the
    /// device was seen in a beacon reply and should be recorded.
    DeviceDiscovered { unique_id: u64, device_type: u8 },
}

/// A parsed datum paired with the device that reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadeEvent {
    pub device_id: u16,
    pub event: IndicationEvent,
}

fn checksum(device_id: u16, payload: &[u8]) -> u8 {
    let mut sum: u8 = 0;
    for b in device_id.to_le_bytes() {
        sum = sum.wrapping_add(b);
    }
    for &b in payload {
        sum = sum.wrapping_add(b);
    }
    sum
}

/// Tracks enough state to reject duplicate indications (design §4.3 step 1).
pub struct IndicationDedup {
    last_checksum: Option<u8>,
    last_payload: Option<Vec<u8>>,
    last_seen: Option<Instant>,
}

impl Default for IndicationDedup {
    fn default() -> Self {
        IndicationDedup { last_checksum: None, last_payload: None, last_seen: None }
    }
}

impl IndicationDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `(device_id, payload)` should be dropped as a
    /// duplicate, updating internal state regardless of outcome so the
    /// next call compares against this one.
    pub fn is_duplicate(&mut self, device_id: u16, payload: &[u8], now: Instant) -> bool {
        let sum = checksum(device_id, payload);
        let checksum_dup = self.last_checksum == Some(sum);
        let cross_path_dup = match (&self.last_payload, self.last_seen) {
            (Some(last), Some(seen)) => {
                last.as_slice() == payload && now.saturating_duration_since(seen) <= CROSS_PATH_WINDOW
            }
            _ => false,
        };
        self.last_checksum = Some(sum);
        self.last_payload = Some(payload.to_vec());
        self.last_seen = Some(now);
        checksum_dup || cross_path_dup
    }
}

fn rail_from_opcode(op: u8) -> Option<RailKind> {
    match op {
        b'P' => Some(RailKind::Primary),
        b'M' => Some(RailKind::Secondary),
        b'T' => Some(RailKind::Vane),
        _ => None,
    }
}

fn kind_from_byte(byte: u8) -> RailKind {
    match byte {
        1 => RailKind::Secondary,
        2 => RailKind::Vane,
        _ => RailKind::Primary,
    }
}

/// Parse one opcode-and-arguments sub-packet starting at `bytes[0]`,
/// returning the event and the number of bytes consumed.
fn parse_sub_packet(bytes: &[u8]) -> Option<(IndicationEvent, usize)> {
    let (&op, rest) = bytes.split_first()?;
    match op {
        b'P' | b'M' | b'T' => {
            let rail = rail_from_opcode(op)?;
            let value = u16::from_le_bytes(rest.get(0..2)?.try_into().ok()?);
            Some((IndicationEvent::Position { rail, value }, 3))
        }
        b'G' => {
            let kind_byte = *rest.first()?;
            let value = u16::from_le_bytes(rest.get(1..3)?.try_into().ok()?);
            Some((IndicationEvent::Position { rail: kind_from_byte(kind_byte), value }, 4))
        }
        b'B' => {
            let millivolts = u16::from_le_bytes(rest.get(0..2)?.try_into().ok()?);
            Some((IndicationEvent::Battery { millivolts }, 3))
        }
        b'S' => {
            let scene_id = *rest.first()?;
            let position = u16::from_le_bytes(rest.get(1..3)?.try_into().ok()?);
            Some((IndicationEvent::ScenePosition { scene_id, position }, 4))
        }
        b'F' => {
            let len = *rest.first()? as usize;
            let text_bytes = rest.get(1..1 + len)?;
            let text = String::from_utf8_lossy(text_bytes).into_owned();
            Some((IndicationEvent::FirmwareVersion(text), 2 + len))
        }
        b'K' => {
            let bitmap: [u8; 32] = rest.get(0..32)?.try_into().ok()?;
            Some((IndicationEvent::GroupBitmap(bitmap), 33))
        }
        b'Y' => {
            let shade_type = *rest.first()?;
            Some((IndicationEvent::ShadeType(shade_type), 2))
        }
        b'D' => {
            let code = *rest.first()?;
            let value = u16::from_le_bytes(rest.get(1..3)?.try_into().ok()?);
            Some((IndicationEvent::DebugMetric { code, value }, 4))
        }
        _ => None,
    }
}

/// Parse a `ShadeDataInd` body (`device_id(2 LE) + opcode stream`) into the
/// data it reports. Single-packet payloads start with `!<op>`; multi-packet
/// payloads start with `!Z` followed by length-prefixed sub-packets, each
/// `[sub-len][op][args...]` with `sub-len` counting the bytes after it.
pub fn parse_indication_body(body: &[u8]) -> Vec<ShadeEvent> {
    let Some(device_bytes) = body.get(0..2) else { return Vec::new() };
    let device_id = u16::from_le_bytes([device_bytes[0], device_bytes[1]]);
    let rest = &body[2..];

    let Some((&marker, after_marker)) = rest.split_first() else { return Vec::new() };
    if marker != b'!' {
        return Vec::new();
    }

    let Some((&discriminator, after_disc)) = after_marker.split_first() else { return Vec::new() };
    let mut events = Vec::new();
    if discriminator == b'Z' {
        let mut cursor = after_disc;
        while let Some((&sub_len, after_len)) = cursor.split_first() {
            let sub_len = sub_len as usize;
            let Some(sub_bytes) = after_len.get(0..sub_len) else { break };
            if let Some((event, _)) = parse_sub_packet(sub_bytes) {
                events.push(ShadeEvent { device_id, event });
            }
            cursor = &after_len[sub_len..];
        }
    } else if let Some((event, _)) = parse_sub_packet(after_marker) {
        events.push(ShadeEvent { device_id, event });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_packet_position_report_parses() {
        let mut body = vec![0x73, 0x48]; // device id
        body.push(b'!');
        body.push(b'P');
        body.extend_from_slice(&50u16.to_le_bytes());
        let events = parse_indication_body(&body);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].device_id, 0x4873);
        assert_eq!(events[0].event, IndicationEvent::Position { rail: RailKind::Primary, value: 50 });
    }

    #[test]
    fn multi_packet_stream_parses_each_sub_packet() {
        let mut body = vec![0x01, 0x00];
        body.push(b'!');
        body.push(b'Z');
        body.push(3); // sub-len
        body.push(b'B');
        body.extend_from_slice(&3000u16.to_le_bytes());
        body.push(2); // sub-len
        body.push(b'Y');
        body.push(0x14);
        let events = parse_indication_body(&body);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, IndicationEvent::Battery { millivolts: 3000 });
        assert_eq!(events[1].event, IndicationEvent::ShadeType(0x14));
    }

    #[test]
    fn identical_checksum_is_treated_as_duplicate() {
        let mut dedup = IndicationDedup::new();
        let payload = vec![b'!', b'B', 0, 0];
        let t0 = Instant::from_millis(0);
        assert!(!dedup.is_duplicate(1, &payload, t0));
        assert!(dedup.is_duplicate(1, &payload, t0 + Duration::from_millis(10)));
    }

    #[test]
    fn cross_path_duplicate_rejected_within_window_regardless_of_source() {
        let mut dedup = IndicationDedup::new();
        let payload = vec![b'!', b'B', 1, 0];
        let t0 = Instant::from_millis(0);
        assert!(!dedup.is_duplicate(1, &payload, t0));
        // Different source device, identical payload, within 500ms: still a duplicate.
        assert!(dedup.is_duplicate(2, &payload, t0 + Duration::from_millis(100)));
    }

    #[test]
    fn duplicate_outside_window_is_accepted() {
        let mut dedup = IndicationDedup::new();
        let payload = vec![b'!', b'B', 2, 0];
        let t0 = Instant::from_millis(0);
        assert!(!dedup.is_duplicate(1, &payload, t0));
        assert!(!dedup.is_duplicate(2, &payload, t0 + Duration::from_millis(600)));
    }
}
