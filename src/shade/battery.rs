//! Weekly battery sweep (design §4.3): query every battery-powered shade,
//! derive a coarse level, and raise a fault notification if any shade is
//! low.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver as ChannelReceiver;
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Timer};
use log::debug;

use crate::serial::framer::RoutedFrame;

const QUERY_SPACING: Duration = Duration::from_secs(4);
const MAX_QUERIES: u32 = 7;
const MAX_SAMPLES: usize = 5;

/// Non-tilt-motor low/high thresholds, millivolts-equivalent units.
const STANDARD_THRESHOLDS: (u16, u16) = (110, 120);
/// Tilt-motor shades run at lower voltage, so their thresholds are lower too.
const TILT_MOTOR_THRESHOLDS: (u16, u16) = (100, 110);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoarseLevel {
    Red,
    Yellow,
    Green,
}

impl CoarseLevel {
    pub fn is_low(self) -> bool {
        matches!(self, CoarseLevel::Red | CoarseLevel::Yellow)
    }
}

pub fn classify(reading: u16, is_tilt_motor: bool) -> CoarseLevel {
    let (low, high) = if is_tilt_motor { TILT_MOTOR_THRESHOLDS } else { STANDARD_THRESHOLDS };
    if reading < low {
        CoarseLevel::Red
    } else if reading < high {
        CoarseLevel::Yellow
    } else {
        CoarseLevel::Green
    }
}

pub type BatteryInbound = ChannelReceiver<'static, CriticalSectionRawMutex, RoutedFrame, 32>;

/// Query one shade's battery level: up to [`MAX_QUERIES`] requests spaced
/// [`QUERY_SPACING`] apart, stopping once [`MAX_SAMPLES`] valid replies
/// accumulate. Returns the maximum sample, or `None` if the shade never
/// replied.
pub async fn sweep_one_shade(device_id: u16, inbound: &BatteryInbound, mut send_query: impl FnMut()) -> Option<u16> {
    let mut samples = Vec::with_capacity(MAX_SAMPLES);
    for attempt in 0..MAX_QUERIES {
        if samples.len() >= MAX_SAMPLES {
            break;
        }
        send_query();
        match select(inbound.receive(), Timer::after(QUERY_SPACING)).await {
            Either::First(frame) => {
                if let Some(voltage) = parse_battery_reply(device_id, &frame.body) {
                    samples.push(voltage);
                }
            }
            Either::Second(_) => {
                debug!("battery sweep: shade {device_id:#06x} attempt {attempt} timed out");
            }
        }
    }
    samples.into_iter().max()
}

fn parse_battery_reply(expected_device_id: u16, body: &[u8]) -> Option<u16> {
    let reported_id = u16::from_le_bytes(body.get(0..2)?.try_into().ok()?);
    if reported_id != expected_device_id {
        return None;
    }
    let events = crate::shade::indication::parse_indication_body(body);
    events.into_iter().find_map(|e| match e.event {
        crate::shade::indication::IndicationEvent::Battery { millivolts } => Some(millivolts),
        _ => None,
    })
}

/// The outcome of sweeping the whole fleet: per-shade coarse level (`None`
/// for a shade that never answered) and whether any shade is low.
pub struct SweepResult {
    pub readings: Vec<(u16, Option<CoarseLevel>)>,
}

impl SweepResult {
    pub fn low_battery_count(&self) -> usize {
        self.readings.iter().filter(|(_, level)| level.map(CoarseLevel::is_low).unwrap_or(false)).count()
    }

    pub fn any_low(&self) -> bool {
        self.low_battery_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_uses_tilt_motor_thresholds() {
        assert_eq!(classify(99, true), CoarseLevel::Red);
        assert_eq!(classify(105, true), CoarseLevel::Yellow);
        assert_eq!(classify(110, true), CoarseLevel::Green);
    }

    #[test]
    fn classify_uses_standard_thresholds() {
        assert_eq!(classify(109, false), CoarseLevel::Red);
        assert_eq!(classify(115, false), CoarseLevel::Yellow);
        assert_eq!(classify(120, false), CoarseLevel::Green);
    }

    #[test]
    fn sweep_result_counts_low_shades() {
        let result = SweepResult {
            readings: vec![
                (1, Some(CoarseLevel::Red)),
                (2, Some(CoarseLevel::Yellow)),
                (3, None),
            ],
        };
        assert_eq!(result.low_battery_count(), 2);
        assert!(result.any_low());
    }
}
