//! Timed callback service: one-shot delays, daily wall-clock entries, and
//! scene entries, ticked once a second (design §4.4).

pub mod clock;
pub mod entry;

use chrono::{DateTime, Local, NaiveTime};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use slotmap::SlotMap;

use entry::{next_daily_fire, next_scene_fire, Callback, EntryKind, ScheduleEntry, SceneTime};
pub use entry::ScheduleToken;

/// Guards the single scheduler instance shared between the tick task and
/// every remote-coordinator/shade-service caller that arms or cancels
/// entries (design §5: "guarded by one mutex").
pub type SharedScheduler = embassy_sync::mutex::Mutex<CriticalSectionRawMutex, Scheduler>;

/// Ticks re-arm the HTTP-active gate up to this ceiling (design §4.4: "up
/// to a 2-minute ceiling").
const HTTP_ACTIVE_CEILING_SECONDS: u32 = 120;

/// A real-time-clock jump larger than this, in either direction, also
/// schedules a scene-database refresh (design §4.4).
const TIME_CHANGE_REFRESH_THRESHOLD_SECONDS: i64 = 60;

pub struct Scheduler {
    entries: SlotMap<ScheduleToken, ScheduleEntry>,
    http_active_seconds_left: u32,
    sunrise_minutes: Option<u32>,
    sunset_minutes: Option<u32>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            entries: SlotMap::with_key(),
            http_active_seconds_left: 0,
            sunrise_minutes: None,
            sunset_minutes: None,
        }
    }

    /// Record sunrise/sunset minutes-past-midnight from the most recent
    /// TimeServer exchange, used to resolve scene entries expressed as an
    /// offset from sunrise/sunset.
    pub fn set_sun_times(&mut self, sunrise_minutes: Option<u32>, sunset_minutes: Option<u32>) {
        self.sunrise_minutes = sunrise_minutes;
        self.sunset_minutes = sunset_minutes;
    }

    pub fn insert_countdown(&mut self, seconds: u32, callback: Callback) -> ScheduleToken {
        self.entries.insert(ScheduleEntry { kind: EntryKind::CountDown { remaining_seconds: seconds }, callback })
    }

    pub fn insert_daily(&mut self, time: NaiveTime, callback: Callback, now: DateTime<Local>) -> ScheduleToken {
        let next_fire = next_daily_fire(now, time);
        self.entries.insert(ScheduleEntry { kind: EntryKind::Daily { time, next_fire }, callback })
    }

    /// Insert a scene entry; returns `None` if it needs a sunrise/sunset
    /// result that hasn't arrived yet (the caller should retry once the
    /// TimeServer exchange completes).
    pub fn insert_scene(&mut self, time: SceneTime, callback: Callback, now: DateTime<Local>) -> Option<ScheduleToken> {
        let next_fire = next_scene_fire(now, time, self.sunrise_minutes, self.sunset_minutes)?;
        Some(self.entries.insert(ScheduleEntry { kind: EntryKind::Scene { time, next_fire }, callback }))
    }

    /// Cancel by token. A no-op, returning `false`, if the entry already
    /// fired or was never present (design §5: "cancellable at any time
    /// except during their own firing").
    pub fn cancel(&mut self, token: ScheduleToken) -> bool {
        self.entries.remove(token).is_some()
    }

    /// Seconds until `token` next fires, or `None` if the token is
    /// unknown. Used by the remote coordinator to decide whether it's
    /// worth waking early for a firmware check (design §4.4).
    pub fn seconds_until(&self, token: ScheduleToken, now: DateTime<Local>) -> Option<i64> {
        let entry = self.entries.get(token)?;
        match entry.kind {
            EntryKind::CountDown { remaining_seconds } => Some(remaining_seconds as i64),
            EntryKind::Daily { next_fire, .. } | EntryKind::Scene { next_fire, .. } => {
                Some((next_fire - now).num_seconds().max(0))
            }
        }
    }

    /// Advance every entry by one second, firing and re-arming as needed.
    /// Returns the callbacks whose entries fired this tick, in no
    /// particular order (scene entries recall by ID; two can legitimately
    /// fire the same second).
    pub fn tick(&mut self, now: DateTime<Local>) -> Vec<Callback> {
        if self.http_active_seconds_left > 0 {
            self.http_active_seconds_left -= 1;
        }

        let mut fired = Vec::new();
        let tokens: Vec<ScheduleToken> = self.entries.keys().collect();
        for token in tokens {
            let Some(entry) = self.entries.get_mut(token) else { continue };
            match &mut entry.kind {
                EntryKind::CountDown { remaining_seconds } => {
                    if *remaining_seconds == 0 {
                        fired.push(entry.callback.clone());
                        self.entries.remove(token);
                    } else {
                        *remaining_seconds -= 1;
                    }
                }
                EntryKind::Daily { time, next_fire } => {
                    if now >= *next_fire {
                        fired.push(entry.callback.clone());
                        *next_fire = next_daily_fire(now, *time);
                    }
                }
                EntryKind::Scene { time, next_fire } => {
                    if now >= *next_fire {
                        fired.push(entry.callback.clone());
                        if let Some(recomputed) = next_scene_fire(now, *time, self.sunrise_minutes, self.sunset_minutes) {
                            *next_fire = recomputed;
                        } else {
                            self.entries.remove(token);
                        }
                    }
                }
            }
        }
        fired
    }

    /// Reset the HTTP-active gate: called on any REST call completing
    /// (design §4.4). Re-armed every tick up to a 2-minute ceiling.
    pub fn note_http_activity(&mut self) {
        self.http_active_seconds_left = HTTP_ACTIVE_CEILING_SECONDS;
    }

    pub fn is_http_active(&self) -> bool {
        self.http_active_seconds_left > 0
    }

    /// Handle a real-time-clock jump of `jump_seconds` (positive or
    /// negative): recompute every daily and scene entry's absolute next
    /// fire against the new `now`, and report whether the jump is large
    /// enough to also warrant scheduling a scene-database refresh (design
    /// §4.4).
    pub fn on_time_change(&mut self, now: DateTime<Local>, jump_seconds: i64) -> bool {
        for entry in self.entries.values_mut() {
            match &mut entry.kind {
                EntryKind::Daily { time, next_fire } => {
                    *next_fire = next_daily_fire(now, *time);
                }
                EntryKind::Scene { time, next_fire } => {
                    if let Some(recomputed) = next_scene_fire(now, *time, self.sunrise_minutes, self.sunset_minutes) {
                        *next_fire = recomputed;
                    }
                }
                EntryKind::CountDown { .. } => {}
            }
        }
        jump_seconds.abs() > TIME_CHANGE_REFRESH_THRESHOLD_SECONDS
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
    }

    #[test]
    fn countdown_fires_exactly_once_after_its_ticks() {
        let mut scheduler = Scheduler::new();
        scheduler.insert_countdown(3, Callback::DailyReset);
        let now = local(2026, 3, 5, 0, 0, 0);
        assert!(scheduler.tick(now).is_empty());
        assert!(scheduler.tick(now).is_empty());
        assert!(scheduler.tick(now).is_empty());
        let fired = scheduler.tick(now);
        assert_eq!(fired, vec![Callback::DailyReset]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn daily_entry_fires_once_and_rearms_tomorrow() {
        let mut scheduler = Scheduler::new();
        let target = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        let token = scheduler.insert_daily(target, Callback::MidnightSceneRefresh, local(2026, 3, 5, 10, 59, 55));

        assert!(scheduler.tick(local(2026, 3, 5, 10, 59, 59)).is_empty());
        let fired = scheduler.tick(local(2026, 3, 5, 11, 0, 0));
        assert_eq!(fired, vec![Callback::MidnightSceneRefresh]);

        let remaining = scheduler.seconds_until(token, local(2026, 3, 5, 11, 0, 0)).unwrap();
        assert_eq!(remaining, 24 * 3600);
    }

    #[test]
    fn cancel_is_a_no_op_for_a_stale_token() {
        let mut scheduler = Scheduler::new();
        let token = scheduler.insert_countdown(5, Callback::DailyReset);
        assert!(scheduler.cancel(token));
        assert!(!scheduler.cancel(token));
    }

    #[test]
    fn http_active_gate_counts_down_and_resets() {
        let mut scheduler = Scheduler::new();
        assert!(!scheduler.is_http_active());
        scheduler.note_http_activity();
        assert!(scheduler.is_http_active());
        for _ in 0..HTTP_ACTIVE_CEILING_SECONDS {
            scheduler.tick(local(2026, 3, 5, 0, 0, 0));
        }
        assert!(!scheduler.is_http_active());
    }

    #[test]
    fn large_time_jump_reports_refresh_needed() {
        let mut scheduler = Scheduler::new();
        assert!(!scheduler.on_time_change(local(2026, 3, 5, 12, 0, 0), 30));
        assert!(scheduler.on_time_change(local(2026, 3, 5, 12, 0, 0), 7200));
    }

    #[test]
    fn time_jump_recomputes_daily_entry_to_tomorrow() {
        let mut scheduler = Scheduler::new();
        let target = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        let token = scheduler.insert_daily(target, Callback::MidnightSceneRefresh, local(2026, 3, 5, 10, 0, 0));
        scheduler.on_time_change(local(2026, 3, 5, 12, 0, 0), 7200);
        let remaining = scheduler.seconds_until(token, local(2026, 3, 5, 12, 0, 0)).unwrap();
        assert_eq!(remaining, 23 * 3600);
    }
}
