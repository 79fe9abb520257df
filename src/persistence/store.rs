//! The persisted-data device: registration state behind a single mutex
//! (design §5's "persisted-data device is guarded by one mutex").
//!
//! Every cloud call, scheduler flash commit, or configuration write that
//! touches persisted state acquires the same [`embassy_sync::mutex::Mutex`]
//! for the duration of the write, so two writers can never race on the same
//! file.

use std::path::Path;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::persistence::files::REGISTRATION;

/// Hub credentials issued by the cloud at registration time (design §6's
/// Basic-Auth scheme: 16-hex-char hub ID, 64-hex-char hub key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubIdentity {
    pub hub_id: String,
    pub hub_key: String,
    pub registered_at_unix: i64,
}

/// Process-wide persisted state other than the radio config blob (which
/// has its own file and its own load/save pair in `radio_config::nvconfig`).
#[derive(Debug, Clone, Default)]
pub struct PersistedStore {
    pub registration: Option<HubIdentity>,
}

impl PersistedStore {
    /// Load `reg.dat` if present; a missing or unparseable file means "not
    /// registered", not an error — the remote coordinator treats that the
    /// same way as a fresh, never-registered hub.
    pub fn load(state_dir: &Path) -> Self {
        let path = state_dir.join(REGISTRATION);
        let registration = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<HubIdentity>(&text).ok());
        PersistedStore { registration }
    }

    /// Commit a successful registration exchange, written atomically
    /// (temp file + rename) like the radio-config blob.
    pub fn save_registration(&mut self, state_dir: &Path, identity: HubIdentity) -> Result<(), GatewayError> {
        let path = state_dir.join(REGISTRATION);
        let text = serde_json::to_string_pretty(&identity).expect("serialization cannot fail");
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, text).map_err(|source| GatewayError::PersistWrite { path: tmp.clone(), source })?;
        std::fs::rename(&tmp, &path).map_err(|source| GatewayError::PersistWrite { path: path.clone(), source })?;
        self.registration = Some(identity);
        Ok(())
    }

    /// `Unregister`: delete the file and clear the in-memory copy. A
    /// missing file is not an error — the end state is identical either
    /// way.
    pub fn clear_registration(&mut self, state_dir: &Path) -> Result<(), GatewayError> {
        let path = state_dir.join(REGISTRATION);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(GatewayError::PersistWrite { path, source }),
        }
        self.registration = None;
        Ok(())
    }
}

pub type SharedStore = Mutex<CriticalSectionRawMutex, PersistedStore>;

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> HubIdentity {
        HubIdentity {
            hub_id: "0123456789abcdef".to_string(),
            hub_key: "f".repeat(64),
            registered_at_unix: 1_700_000_000,
        }
    }

    #[test]
    fn registration_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PersistedStore::default();
        store.save_registration(dir.path(), identity()).unwrap();

        let reloaded = PersistedStore::load(dir.path());
        assert_eq!(reloaded.registration, Some(identity()));
    }

    #[test]
    fn missing_registration_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistedStore::load(dir.path());
        assert!(store.registration.is_none());
    }

    #[test]
    fn unregister_removes_file_and_clears_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PersistedStore::default();
        store.save_registration(dir.path(), identity()).unwrap();
        store.clear_registration(dir.path()).unwrap();
        assert!(store.registration.is_none());

        let reloaded = PersistedStore::load(dir.path());
        assert!(reloaded.registration.is_none());
    }

    #[test]
    fn unregister_without_prior_registration_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PersistedStore::default();
        assert!(store.clear_registration(dir.path()).is_ok());
    }
}
