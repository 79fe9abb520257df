//! Shade and scene-controller discovery, and network-join mode (design
//! §4.3).
//!
//! A discovery pass issues a beacon request, waits 3s for replies, and
//! accumulates them into a FIFO, filtering echoes from device ID zero,
//! devices already on the list, and device types that don't match the
//! caller's filter. `Absolute` mode and scene-controller discovery stop
//! after one pass; `Conditional` mode repeats while replies keep arriving,
//! up to four consecutive empty passes.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver as ChannelReceiver;
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};
use log::{debug, info};

use crate::serial::framer::RoutedFrame;

const BEACON_WAIT: Duration = Duration::from_secs(3);
const MAX_EMPTY_PASSES: u32 = 4;
const NETWORK_JOIN_TIMEOUT: Duration = Duration::from_secs(12);

pub type BeaconInbound = ChannelReceiver<'static, CriticalSectionRawMutex, RoutedFrame, 32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    Absolute,
    Conditional,
}

/// A parsed `BeaconInd` body: `network_id(2) device_id(2) unique_id(8)
/// device_type(1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconIndication {
    pub network_id: u16,
    pub device_id: u16,
    pub unique_id: u64,
    pub device_type: u8,
}

pub fn parse_beacon(body: &[u8]) -> Option<BeaconIndication> {
    if body.len() != 13 {
        return None;
    }
    Some(BeaconIndication {
        network_id: u16::from_le_bytes([body[0], body[1]]),
        device_id: u16::from_le_bytes([body[2], body[3]]),
        unique_id: u64::from_le_bytes(body[4..12].try_into().ok()?),
        device_type: body[12],
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub device_id: u16,
    pub unique_id: u64,
    pub device_type: u8,
}

/// A beacon's `device_type` byte has bit 0 set for a tilt-motor shade, which
/// the weekly battery sweep classifies against [`crate::shade::battery`]'s
/// lower voltage thresholds.
pub fn is_tilt_motor_device_type(device_type: u8) -> bool {
    device_type & 0x01 != 0
}

/// Accumulates beacon replies for a single discovery pass, applying the
/// echo/duplicate/filter rules.
#[derive(Debug, Default)]
pub struct DiscoveryFifo {
    found: Vec<DiscoveredDevice>,
}

impl DiscoveryFifo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a beacon reply; returns `true` if it was accepted and added.
    pub fn offer(&mut self, beacon: BeaconIndication, device_type_filter: Option<u8>) -> bool {
        if beacon.device_id == 0 {
            return false;
        }
        if self.found.iter().any(|d| d.device_id == beacon.device_id) {
            return false;
        }
        if let Some(filter) = device_type_filter {
            if beacon.device_type != filter {
                return false;
            }
        }
        self.found.push(DiscoveredDevice {
            device_id: beacon.device_id,
            unique_id: beacon.unique_id,
            device_type: beacon.device_type,
        });
        true
    }

    pub fn drain(&mut self) -> Vec<DiscoveredDevice> {
        std::mem::take(&mut self.found)
    }
}

/// Run a full discovery sequence: issue a beacon, collect replies for 3s,
/// and for `Conditional` mode keep repeating until `MAX_EMPTY_PASSES`
/// consecutive passes add nothing new.
pub async fn run_discovery(
    inbound: &BeaconInbound,
    mut issue_beacon: impl FnMut(),
    mode: DiscoveryMode,
    device_type_filter: Option<u8>,
) -> Vec<DiscoveredDevice> {
    let mut fifo = DiscoveryFifo::new();
    let mut empty_passes = 0u32;

    loop {
        issue_beacon();
        let added_this_pass = collect_one_pass(inbound, &mut fifo, device_type_filter).await;
        if added_this_pass == 0 {
            empty_passes += 1;
        } else {
            empty_passes = 0;
        }
        info!("discovery pass complete: {added_this_pass} new device(s)");

        let keep_going = mode == DiscoveryMode::Conditional && empty_passes < MAX_EMPTY_PASSES;
        if !keep_going {
            break;
        }
    }
    fifo.drain()
}

async fn collect_one_pass(inbound: &BeaconInbound, fifo: &mut DiscoveryFifo, device_type_filter: Option<u8>) -> u32 {
    let deadline = Instant::now() + BEACON_WAIT;
    let mut added = 0u32;
    loop {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else { break };
        match select(inbound.receive(), Timer::after(remaining)).await {
            Either::First(frame) => {
                if let Some(beacon) = parse_beacon(&frame.body) {
                    if fifo.offer(beacon, device_type_filter) {
                        added += 1;
                    } else {
                        debug!("discovery: ignored beacon from device {:#06x}", beacon.device_id);
                    }
                }
            }
            Either::Second(_) => break,
        }
    }
    added
}

/// Network-join mode: accept the first beacon whose network ID is neither
/// "all networks" nor the factory default, with a 12s timeout.
pub async fn run_network_join(
    inbound: &BeaconInbound,
    all_networks_id: u16,
    factory_default_id: u16,
) -> Option<BeaconIndication> {
    let deadline = Instant::now() + NETWORK_JOIN_TIMEOUT;
    loop {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else { return None };
        match select(inbound.receive(), Timer::after(remaining)).await {
            Either::First(frame) => {
                if let Some(beacon) = parse_beacon(&frame.body) {
                    if beacon.network_id != all_networks_id && beacon.network_id != factory_default_id {
                        return Some(beacon);
                    }
                }
            }
            Either::Second(_) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(device_id: u16, device_type: u8) -> BeaconIndication {
        BeaconIndication { network_id: 0x1234, device_id, unique_id: 0xAABB, device_type }
    }

    #[test]
    fn device_id_zero_is_ignored() {
        let mut fifo = DiscoveryFifo::new();
        assert!(!fifo.offer(beacon(0, 0x14), None));
    }

    #[test]
    fn duplicate_device_id_within_pass_is_ignored() {
        let mut fifo = DiscoveryFifo::new();
        assert!(fifo.offer(beacon(1, 0x14), None));
        assert!(!fifo.offer(beacon(1, 0x14), None));
    }

    #[test]
    fn device_type_filter_rejects_mismatch() {
        let mut fifo = DiscoveryFifo::new();
        assert!(!fifo.offer(beacon(1, 0x10), Some(0x14)));
        assert!(fifo.offer(beacon(2, 0x14), Some(0x14)));
    }

    #[test]
    fn beacon_ind_body_round_trips() {
        let mut body = vec![];
        body.extend_from_slice(&0x1234u16.to_le_bytes());
        body.extend_from_slice(&0x4873u16.to_le_bytes());
        body.extend_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        body.push(0x14);
        let beacon = parse_beacon(&body).unwrap();
        assert_eq!(beacon.network_id, 0x1234);
        assert_eq!(beacon.device_id, 0x4873);
        assert_eq!(beacon.device_type, 0x14);
    }
}
