//! Remote-server coordinator: one mailbox of typed events, each handled as
//! a one-shot cloud exchange serialized behind the persisted-data mutex
//! (design §4.5).
//!
//! The original threaded every cloud concern through one big state machine
//! keyed on a raw event mask. Here each concern is a variant of
//! [`RemoteEvent`], and [`RemoteCoordinator::run`] drains them off a bounded
//! channel one at a time — the same shape `dispatch::run` and
//! `shade::service::ShadeService::run` use for their own event loops.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, NaiveTime};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver as ChannelReceiver, Sender as ChannelSender};
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::config::SharedConfig;
use crate::persistence::files::{
    DATA_SYNC_STAGING, HOST_FIRMWARE_IMAGE, HOST_FIRMWARE_MD5, RADIO_FIRMWARE_IMAGE, RADIO_FIRMWARE_MD5,
    RADIO_FIRMWARE_VERSION,
};
use crate::persistence::{HubIdentity, SharedStore};
use crate::remote::action_server::{ActionKind, ActionServer, ExecutionOutcome, ReportOutcome};
use crate::remote::firmware::{self, FirmwareManifest};
use crate::remote::rest::RestClient;
use crate::remote::time_server::{self, TimeServerResponse};
use crate::scheduler::entry::Callback;
use crate::scheduler::SharedScheduler;
use crate::shade::{ShadeCommand, ShadeServiceHandle};

const EVENT_CHANNEL_SIZE: usize = 16;

pub type RemoteEventChannel = Channel<CriticalSectionRawMutex, RemoteEvent, EVENT_CHANNEL_SIZE>;
pub type RemoteEventReceiver = ChannelReceiver<'static, CriticalSectionRawMutex, RemoteEvent, EVENT_CHANNEL_SIZE>;
pub type RemoteEventSender = ChannelSender<'static, CriticalSectionRawMutex, RemoteEvent, EVENT_CHANNEL_SIZE>;

/// Minimum gap, in seconds, between two `FirmwareCheck` exchanges.
const FIRMWARE_CHECK_FLOOR_SECONDS: u32 = 30 * 60;
/// Retry delay for a `TimeServer` exchange that failed.
const TIME_SERVER_RETRY_SECONDS: u32 = 5 * 60;
/// Retry delay for a `RemoteAction` fetch failure, before the backoff
/// ladder in [`ActionServer::should_back_off`] engages.
const REMOTE_ACTION_DEFAULT_RETRY_SECONDS: u32 = 60;
/// Daily `TimeServer` re-check target and its jitter window, reused from
/// the battery-sweep/daily-reset jitter bound (design §4.3/§4.4).
const TIME_SERVER_DAILY_TARGET: (u32, u32, u32) = (2, 30, 0);
const TIME_SERVER_JITTER_MINUTES: u32 = 30;

#[derive(Debug, Clone)]
pub enum RemoteEvent {
    TimeServer,
    FirmwareCheck,
    RemoteAction,
    Fault { low_battery_count: u32 },
    RefreshRemoteData,
    Register,
    Unregister,
    ActionResponse { action_id: String, outcome: ExecutionOutcome },
}

#[derive(Serialize)]
struct RegistrationRequest<'a> {
    pin: &'a str,
    #[serde(rename = "hardwareRevision")]
    hardware_revision: &'a str,
}

#[derive(Deserialize)]
struct RegistrationResponse {
    #[serde(rename = "hubId")]
    hub_id: String,
    #[serde(rename = "hubKey")]
    hub_key: String,
}

pub struct RemoteCoordinator {
    events: RemoteEventReceiver,
    rest: RestClient,
    action_server: ActionServer,
    store: &'static SharedStore,
    config: SharedConfig,
    scheduler: &'static SharedScheduler,
    shades: ShadeServiceHandle,
    state_dir: PathBuf,
    time_server_armed: bool,
}

impl RemoteCoordinator {
    pub fn new(
        events: RemoteEventReceiver,
        config: SharedConfig,
        store: &'static SharedStore,
        scheduler: &'static SharedScheduler,
        shades: ShadeServiceHandle,
    ) -> Result<Self, crate::error::RemoteServerStatus> {
        let base_url = config.config().cloud_base_url.clone();
        let state_dir = config.config().state_dir.clone();
        let rest = RestClient::new(base_url.clone())?;
        let action_server = ActionServer::new(RestClient::new(base_url)?);
        Ok(RemoteCoordinator {
            events,
            rest,
            action_server,
            store,
            config,
            scheduler,
            shades,
            state_dir,
            time_server_armed: false,
        })
    }

    pub async fn run(mut self) {
        loop {
            let event = self.events.receive().await;
            self.handle(event).await;
        }
    }

    async fn handle(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::TimeServer => self.handle_time_server().await,
            RemoteEvent::FirmwareCheck => self.handle_firmware_check().await,
            RemoteEvent::RemoteAction => self.handle_remote_action().await,
            RemoteEvent::Fault { low_battery_count } => self.handle_fault(low_battery_count).await,
            RemoteEvent::RefreshRemoteData => self.handle_refresh_remote_data().await,
            RemoteEvent::Register => self.handle_register().await,
            RemoteEvent::Unregister => self.handle_unregister().await,
            RemoteEvent::ActionResponse { action_id, outcome } => {
                self.handle_action_response(action_id, outcome).await
            }
        }
    }

    async fn identity(&self) -> Option<HubIdentity> {
        self.store.lock().await.registration.clone()
    }

    async fn handle_time_server(&mut self) {
        let cfg = self.config.config();
        let mut path = format!("/api/v2/times?tz={}", cfg.time_zone);
        if let (Some(lat), Some(lon)) = (cfg.latitude, cfg.longitude) {
            path.push_str(&format!("&lat={lat}&lon={lon}"));
        }
        let result: Result<TimeServerResponse, _> = self.rest.get_json(&path, None);
        match result.and_then(|response| time_server::parse(&response)) {
            Ok(parsed) => {
                let now = Local::now();
                let jump = time_server::jump_seconds(now, &parsed);
                self.config.update(|s| {
                    s.utc_offset_seconds = parsed.utc_offset_seconds;
                    s.sunrise_minutes = parsed.sunrise_minutes;
                    s.sunset_minutes = parsed.sunset_minutes;
                });
                let needs_refresh = {
                    let mut scheduler = self.scheduler.lock().await;
                    scheduler.set_sun_times(parsed.sunrise_minutes, parsed.sunset_minutes);
                    scheduler.on_time_change(now, jump)
                };
                if needs_refresh {
                    self.scheduler.lock().await.insert_countdown(0, Callback::TimeJumpDataRefresh);
                }
                if !self.time_server_armed {
                    let mut rng = rand::thread_rng();
                    let (h, m, s) = TIME_SERVER_DAILY_TARGET;
                    let base = NaiveTime::from_hms_opt(h, m, s).expect("valid time");
                    let jitter_minutes = rng.gen_range(0..TIME_SERVER_JITTER_MINUTES) as i64;
                    let target = base + chrono::Duration::minutes(jitter_minutes);
                    self.scheduler.lock().await.insert_daily(target, Callback::TimeServerCheck, now);
                    self.time_server_armed = true;
                }
                info!("time server exchange ok, utc offset {}s", parsed.utc_offset_seconds);
            }
            Err(status) => {
                warn!("time server exchange failed: {status}");
                self.scheduler.lock().await.insert_countdown(TIME_SERVER_RETRY_SECONDS, Callback::TimeServerCheck);
            }
        }
    }

    async fn handle_firmware_check(&mut self) {
        let cfg = self.config.config();
        let path = format!("/api/v2/firmware?revision={}&hardware={}", cfg.host_firmware_revision, cfg.hardware_revision);
        let result: Result<FirmwareManifest, _> = self.rest.get_json(&path, None);
        if let Ok(manifest) = result {
            self.apply_firmware_manifest(&manifest).await;
        } else if let Err(status) = result {
            warn!("firmware manifest fetch failed: {status}");
        }
        self.scheduler.lock().await.insert_countdown(FIRMWARE_CHECK_FLOOR_SECONDS, Callback::FirmwareCheck);
    }

    async fn apply_firmware_manifest(&self, manifest: &FirmwareManifest) {
        let current_radio_revision = firmware::read_radio_revision(&self.radio_revision_path());
        let (host_newer, radio_newer) = firmware::is_newer(manifest, self.config.config().host_firmware_revision, current_radio_revision);

        if host_newer && self.download_and_verify(&manifest.fw_url, &manifest.fw_md5, HOST_FIRMWARE_IMAGE, HOST_FIRMWARE_MD5).await {
            info!("host firmware revision {} verified, resetting to apply", manifest.revision);
            std::process::exit(0);
        }
        if radio_newer && self.download_and_verify(&manifest.rf_url, &manifest.rf_md5, RADIO_FIRMWARE_IMAGE, RADIO_FIRMWARE_MD5).await {
            if firmware::write_radio_revision(&self.radio_revision_path(), manifest.rf_revision).is_ok() {
                info!("co-processor firmware revision {} verified and committed", manifest.rf_revision);
            }
        }
    }

    fn radio_revision_path(&self) -> PathBuf {
        self.state_dir.join(RADIO_FIRMWARE_VERSION)
    }

    async fn download_and_verify(&self, url: &str, expected_md5: &str, image_file: &str, sidecar_file: &str) -> bool {
        let dest = self.state_dir.join(image_file);
        let sidecar = self.state_dir.join(sidecar_file);
        if let Err(status) = firmware::download_file(self.rest.inner_client(), url, &dest) {
            warn!("firmware download failed: {status}");
            return false;
        }
        match firmware::verify_and_commit(&dest, expected_md5, &sidecar) {
            Ok(()) => true,
            Err(status) => {
                warn!("firmware verification failed: {status}");
                false
            }
        }
    }

    async fn handle_remote_action(&mut self) {
        if self.config.config().remote_action_pin.is_none() {
            debug!("remote action fetch skipped: no pin configured");
            return;
        }
        let Some(identity) = self.identity().await else {
            debug!("remote action fetch skipped: not registered");
            return;
        };

        match self.action_server.fetch_pending(&identity) {
            Ok(response) => {
                for action in &response.actions {
                    let outcome = self.execute_action(&action.action).await;
                    let report = self.action_server.report_status(&identity, &action.id, outcome, action.id.clone());
                    if report == ReportOutcome::Unauthorized {
                        warn!("remote action report unauthorized, clearing registration");
                        let _ = self.store.lock().await.clear_registration(&self.state_dir);
                        return;
                    }
                }
                let delay = response.next_update_minutes.max(1) * 60;
                self.scheduler.lock().await.insert_countdown(delay, Callback::RemoteActionCheck);
            }
            Err(status) => {
                warn!("remote action fetch failed: {status}");
                let delay = if self.action_server.should_back_off() {
                    self.action_server.backoff_duration().as_secs() as u32
                } else {
                    REMOTE_ACTION_DEFAULT_RETRY_SECONDS
                };
                self.scheduler.lock().await.insert_countdown(delay, Callback::RemoteActionCheck);
            }
        }
    }

    async fn execute_action(&self, action: &ActionKind) -> ExecutionOutcome {
        match action {
            ActionKind::ActivateScene { scene_id } => self.submit_scene(vec![*scene_id]).await,
            ActionKind::ActivateMultiScene { scene_ids } => self.submit_scene(scene_ids.clone()).await,
            ActionKind::EnableSchedules => {
                self.config.update(|s| s.schedules_enabled = true);
                ExecutionOutcome::Completed
            }
            ActionKind::DisableSchedules => {
                self.config.update(|s| s.schedules_enabled = false);
                ExecutionOutcome::Completed
            }
            ActionKind::ClearNest => {
                self.config.update(|s| s.scene_suppressed = false);
                ExecutionOutcome::Completed
            }
        }
    }

    async fn submit_scene(&self, scene_ids: Vec<u16>) -> ExecutionOutcome {
        let ids: Vec<u8> = scene_ids.iter().map(|&id| id.min(u8::MAX as u16) as u8).collect();
        match ShadeCommand::execute_scene(Address::group_list(&[]), ids) {
            Ok(command) => {
                self.shades.submit(command).await;
                ExecutionOutcome::Completed
            }
            Err(e) => {
                warn!("remote scene activation rejected: {e}");
                ExecutionOutcome::Failed
            }
        }
    }

    async fn handle_fault(&mut self, low_battery_count: u32) {
        self.config.update(|s| s.low_battery_count = low_battery_count);
        if let Some(identity) = self.identity().await {
            let path = format!("/api/v2/lowBatteryNotifications?count={low_battery_count}");
            let result: Result<(), _> = self.rest.post_json(&path, Some(&identity), &());
            if let Err(status) = result {
                warn!("low battery notification failed: {status}");
            }
        }
    }

    async fn handle_refresh_remote_data(&mut self) {
        let Some(identity) = self.identity().await else {
            debug!("data refresh skipped: not registered");
            return;
        };
        let staging = self.state_dir.join(DATA_SYNC_STAGING);
        let Ok(text) = std::fs::read_to_string(&staging) else {
            debug!("no staged sync data to send");
            return;
        };
        let Ok(payload) = serde_json::from_str::<serde_json::Value>(&text) else {
            warn!("staged sync data at {} is not valid json", staging.display());
            return;
        };
        let result: Result<(), _> = self.rest.post_json("/api/v2/hubData/", Some(&identity), &payload);
        match result {
            Ok(()) => {
                let _ = std::fs::remove_file(&staging);
            }
            Err(status) => warn!("data sync failed: {status}"),
        }
    }

    async fn handle_register(&mut self) {
        let Some(pin) = self.config.config().remote_action_pin.clone() else {
            debug!("registration skipped: no pin configured");
            return;
        };
        let body = RegistrationRequest { pin: &pin, hardware_revision: &self.config.config().hardware_revision };
        let result: Result<RegistrationResponse, _> = self.rest.post_json("/api/v2/hubRegistration/", None, &body);
        match result {
            Ok(response) => {
                let registered_at_unix = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
                let identity = HubIdentity { hub_id: response.hub_id, hub_key: response.hub_key, registered_at_unix };
                if let Err(e) = self.store.lock().await.save_registration(&self.state_dir, identity) {
                    warn!("failed to persist registration: {e}");
                } else {
                    info!("hub registered with cloud service");
                }
            }
            Err(status) => warn!("registration failed: {status}"),
        }
    }

    async fn handle_unregister(&mut self) {
        let Some(identity) = self.identity().await else {
            debug!("unregister skipped: not registered");
            return;
        };
        let path = format!("/api/v2/hubRegistration/{}", identity.hub_id);
        match self.rest.delete(&path, Some(&identity)) {
            Ok(()) => {
                if let Err(e) = self.store.lock().await.clear_registration(&self.state_dir) {
                    warn!("failed to clear registration: {e}");
                } else {
                    info!("hub unregistered");
                }
            }
            Err(status) => warn!("unregister failed: {status}"),
        }
    }

    async fn handle_action_response(&mut self, action_id: String, outcome: ExecutionOutcome) {
        let Some(identity) = self.identity().await else {
            debug!("action response skipped: not registered");
            return;
        };
        let message_id = action_id.clone();
        let report = self.action_server.report_status(&identity, &action_id, outcome, message_id);
        if report == ReportOutcome::Unauthorized {
            warn!("action response unauthorized, clearing registration");
            let _ = self.store.lock().await.clear_registration(&self.state_dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_request_serializes_expected_field_names() {
        let body = RegistrationRequest { pin: "1234", hardware_revision: "1.0" };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"pin\":\"1234\""));
        assert!(json.contains("\"hardwareRevision\":\"1.0\""));
    }
}
