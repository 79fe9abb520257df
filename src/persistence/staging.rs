//! Staged hub-data sink: folds shade indications into the JSON blob the
//! remote coordinator's `RefreshRemoteData` exchange uploads, and forwards
//! low-battery counts onward as a [`RemoteEvent`] (design §4.3's "database
//! collaborator", §4.5's data-sync upload).
//!
//! [`shade::service::IndicationSink`] is a synchronous trait (the shade
//! service calls it from inside its own poll loop, not from an async
//! context), so the fault path uses [`RemoteEventSender::try_send`] rather
//! than awaiting — the same non-blocking-from-sync-context shape the
//! serial reader thread uses for [`crate::serial::port::RxByteChannel`].
//!
//! [`DeviceRegistry`] shares the same device map with callers outside the
//! shade service that need a device list of their own, namely the weekly
//! battery sweep.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::persistence::files::DATA_SYNC_STAGING;
use crate::remote::{RemoteEvent, RemoteEventSender};
use crate::shade::discovery::is_tilt_motor_device_type;
use crate::shade::indication::{IndicationEvent, ShadeEvent};
use crate::shade::service::IndicationSink;

type DeviceMap = BTreeMap<u16, Map<String, Value>>;

pub struct StagingSink {
    state_dir: PathBuf,
    devices: Arc<Mutex<DeviceMap>>,
    remote_events: RemoteEventSender,
}

impl StagingSink {
    pub fn new(state_dir: PathBuf, remote_events: RemoteEventSender) -> Self {
        StagingSink { state_dir, devices: Arc::new(Mutex::new(BTreeMap::new())), remote_events }
    }

    /// A cheap-to-clone handle onto the same device map, for readers outside
    /// the shade service (the scheduler's weekly battery sweep) that need to
    /// know which devices have been discovered so far.
    pub fn registry(&self) -> DeviceRegistry {
        DeviceRegistry { devices: self.devices.clone() }
    }

    fn staging_path(&self) -> PathBuf {
        self.state_dir.join(DATA_SYNC_STAGING)
    }

    fn flush(&self, devices: &BTreeMap<u16, Map<String, Value>>) {
        let mut root = Map::new();
        for (device_id, fields) in devices {
            root.insert(device_id.to_string(), Value::Object(fields.clone()));
        }
        let text = serde_json::to_string(&Value::Object(root)).expect("serialization cannot fail");
        let path = self.staging_path();
        let tmp = path.with_extension("tmp");
        if let Err(e) = std::fs::write(&tmp, &text) {
            warn!("staging sink: could not write {}: {e}", tmp.display());
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, &path) {
            warn!("staging sink: could not commit {}: {e}", path.display());
        }
    }
}

fn apply(fields: &mut Map<String, Value>, event: &IndicationEvent) {
    match event {
        IndicationEvent::Position { rail, value } => {
            fields.insert(format!("position_{rail:?}").to_lowercase(), Value::from(*value));
        }
        IndicationEvent::Battery { millivolts } => {
            fields.insert("battery_millivolts".to_string(), Value::from(*millivolts));
        }
        IndicationEvent::ScenePosition { scene_id, position } => {
            fields.insert(format!("scene_{scene_id}_position"), Value::from(*position));
        }
        IndicationEvent::FirmwareVersion(version) => {
            fields.insert("firmware_version".to_string(), Value::from(version.clone()));
        }
        IndicationEvent::GroupBitmap(bitmap) => {
            fields.insert("group_bitmap".to_string(), Value::from(hex::encode(bitmap)));
        }
        IndicationEvent::ShadeType(kind) => {
            fields.insert("shade_type".to_string(), Value::from(*kind));
        }
        IndicationEvent::DebugMetric { code, value } => {
            fields.insert(format!("debug_{code:#04x}"), Value::from(*value));
        }
        IndicationEvent::DeviceDiscovered { unique_id, device_type } => {
            fields.insert("unique_id".to_string(), Value::from(format!("{unique_id:016x}")));
            fields.insert("device_type".to_string(), Value::from(*device_type));
        }
    }
}

/// Read-only view of the discovered-device map, shared with callers outside
/// the shade service that need a device list without owning it (the
/// scheduler's weekly battery sweep, design §4.3/§8).
#[derive(Clone)]
pub struct DeviceRegistry {
    devices: Arc<Mutex<DeviceMap>>,
}

impl DeviceRegistry {
    /// Every device with a recorded `device_type`, paired with whether it's
    /// a tilt-motor shade, in the shape `ShadeService::battery_sweep` wants.
    pub fn known_devices(&self) -> Vec<(u16, bool)> {
        let devices = self.devices.lock().expect("staging sink mutex poisoned");
        devices
            .iter()
            .filter_map(|(&device_id, fields)| {
                let device_type = fields.get("device_type")?.as_u64()? as u8;
                Some((device_id, is_tilt_motor_device_type(device_type)))
            })
            .collect()
    }
}

impl IndicationSink for StagingSink {
    fn record(&mut self, event: ShadeEvent) {
        let mut devices = self.devices.lock().expect("staging sink mutex poisoned");
        let fields = devices.entry(event.device_id).or_default();
        apply(fields, &event.event);
        debug!("staging sink: device {:#06x} updated", event.device_id);
        self.flush(&devices);
    }

    fn fault(&mut self, low_count: usize) {
        if self.remote_events.try_send(RemoteEvent::Fault { low_battery_count: low_count as u32 }).is_err() {
            warn!("staging sink: remote event channel full, dropped low-battery fault");
        }
    }
}

pub fn staged_path(state_dir: &Path) -> PathBuf {
    state_dir.join(DATA_SYNC_STAGING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shade::command::RailKind;
    use crate::remote::RemoteEventChannel;

    fn leaked_channel() -> &'static RemoteEventChannel {
        Box::leak(Box::new(RemoteEventChannel::new()))
    }

    #[test]
    fn recording_a_position_event_updates_the_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        let channel = leaked_channel();
        let mut sink = StagingSink::new(dir.path().to_path_buf(), channel.sender());
        sink.record(ShadeEvent { device_id: 9, event: IndicationEvent::Position { rail: RailKind::Primary, value: 42 } });

        let text = std::fs::read_to_string(staged_path(dir.path())).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["9"]["position_primary"], 42);
    }

    #[test]
    fn fault_forwards_low_battery_count_without_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let channel = leaked_channel();
        let mut sink = StagingSink::new(dir.path().to_path_buf(), channel.sender());
        sink.fault(3);
        assert!(channel.try_receive().is_ok());
    }

    #[test]
    fn discovered_device_is_staged_and_shows_up_in_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let channel = leaked_channel();
        let mut sink = StagingSink::new(dir.path().to_path_buf(), channel.sender());
        let registry = sink.registry();

        sink.record(ShadeEvent { device_id: 0x4873, event: IndicationEvent::DeviceDiscovered { unique_id: 0x1122_3344, device_type: 0x15 } });

        let known = registry.known_devices();
        assert_eq!(known, vec![(0x4873, true)]);

        let text = std::fs::read_to_string(staged_path(dir.path())).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["18547"]["device_type"], 0x15);
    }

    #[test]
    fn devices_without_a_device_type_are_excluded_from_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let channel = leaked_channel();
        let mut sink = StagingSink::new(dir.path().to_path_buf(), channel.sender());
        let registry = sink.registry();

        sink.record(ShadeEvent { device_id: 9, event: IndicationEvent::Position { rail: RailKind::Primary, value: 42 } });

        assert!(registry.known_devices().is_empty());
    }
}
