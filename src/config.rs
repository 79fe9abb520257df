//! Process-wide configuration container.
//!
//! Replaces the original firmware's scattered global mutable variables
//! (current time offset, sunrise/sunset minutes, low-battery count, cloud
//! PIN) with a single container. Readers take a cheap [`GatewaySnapshot`]
//! clone and never block; writers go through [`GatewayConfig::update`],
//! which is only ever called from the scheduler or remote coordinator tasks
//! per the design's shared-resource policy.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// On-disk / environment-overridable settings, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct GatewayConfig {
    /// Serial device path for the radio co-processor link.
    pub serial_port: String,
    /// UART baud rate for the radio co-processor link.
    pub serial_baud_rate: u32,
    /// Base directory for all persisted files (§6 file list).
    pub state_dir: PathBuf,
    /// Cloud API base URL, e.g. `https://api.example.com`.
    pub cloud_base_url: String,
    /// IANA time zone name used for the TimeServer exchange.
    pub time_zone: String,
    /// Optional fixed lat/lon for sunrise/sunset computation.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Remote-action PIN; remote actions are disabled when absent.
    pub remote_action_pin: Option<String>,
    /// Host hardware revision string reported on firmware checks.
    pub hardware_revision: String,
    /// This build's own firmware revision number, compiled in; a host
    /// firmware update always restarts the process, so the running
    /// binary's own revision is always accurate.
    pub host_firmware_revision: u32,
    /// Number of radio-config reset/start attempts before giving up
    /// (resolves the open question in design §4.6).
    pub radio_reset_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            serial_port: "/dev/ttyUSB0".to_string(),
            serial_baud_rate: 115_200,
            state_dir: PathBuf::from("/var/lib/shadelink"),
            cloud_base_url: "https://api.example.com".to_string(),
            time_zone: "America/Denver".to_string(),
            latitude: None,
            longitude: None,
            remote_action_pin: None,
            hardware_revision: "1.0".to_string(),
            host_firmware_revision: 1,
            radio_reset_attempts: 3,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any field the file omits is not supported by `toml` directly, so
    /// every field is required in the file; callers ship a template.
    pub fn load(path: &Path) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path).map_err(|source| GatewayError::PersistRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| GatewayError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn state_path(&self, file_name: &str) -> PathBuf {
        self.state_dir.join(file_name)
    }
}

/// Mutable process-wide state, consolidated per the design's redesign note
/// on global variables. Updated only by the scheduler (time/location) or
/// the remote coordinator (low-battery count), read everywhere else.
#[derive(Debug, Clone)]
pub struct GatewaySnapshot {
    /// UTC offset in seconds reported by the most recent TimeServer exchange.
    pub utc_offset_seconds: i32,
    /// DST offset in seconds, included in `utc_offset_seconds` once applied.
    pub dst_offset_seconds: i32,
    /// Minutes past local midnight for today's sunrise, if known.
    pub sunrise_minutes: Option<u32>,
    /// Minutes past local midnight for today's sunset, if known.
    pub sunset_minutes: Option<u32>,
    /// Count of shades currently reporting Red or Yellow battery level.
    pub low_battery_count: u32,
    /// Whether the Nest integration reports rush-hour or away mode active.
    pub scene_suppressed: bool,
    /// Whether scheduled scene entries fire at all, toggled by the remote
    /// `enable-schedules`/`disable-schedules` actions (design §4.5).
    pub schedules_enabled: bool,
}

impl GatewaySnapshot {
    /// Scene entries should be skipped while schedules are off or the Nest
    /// integration is actively suppressing them.
    pub fn schedules_should_fire(&self) -> bool {
        self.schedules_enabled && !self.scene_suppressed
    }
}

impl Default for GatewaySnapshot {
    fn default() -> Self {
        GatewaySnapshot {
            utc_offset_seconds: 0,
            dst_offset_seconds: 0,
            sunrise_minutes: None,
            sunset_minutes: None,
            low_battery_count: 0,
            scene_suppressed: false,
            schedules_enabled: true,
        }
    }
}

/// Shared handle to process configuration and mutable snapshot.
#[derive(Clone)]
pub struct SharedConfig {
    config: Arc<GatewayConfig>,
    snapshot: Arc<RwLock<GatewaySnapshot>>,
}

impl SharedConfig {
    pub fn new(config: GatewayConfig) -> Self {
        SharedConfig {
            config: Arc::new(config),
            snapshot: Arc::new(RwLock::new(GatewaySnapshot::default())),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Take a lock-free-to-use clone of the current mutable state.
    pub fn snapshot(&self) -> GatewaySnapshot {
        self.snapshot.read().expect("snapshot lock poisoned").clone()
    }

    /// Apply a mutation. Only the scheduler and remote coordinator call this.
    pub fn update(&self, f: impl FnOnce(&mut GatewaySnapshot)) {
        let mut guard = self.snapshot.write().expect("snapshot lock poisoned");
        f(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_toml() {
        let cfg = GatewayConfig::default();
        let text = toml::to_string(&cfg).expect("serialize");
        let back: GatewayConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(cfg, back);
    }

    #[test]
    fn snapshot_updates_are_visible_to_new_readers() {
        let shared = SharedConfig::new(GatewayConfig::default());
        shared.update(|s| s.low_battery_count = 2);
        assert_eq!(shared.snapshot().low_battery_count, 2);
    }
}
