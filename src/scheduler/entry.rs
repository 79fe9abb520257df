//! Schedule entries: count-down, daily wall-clock, and scene entries
//! (design §4.4).
//!
//! The original threaded these as a manually-linked list with raw
//! callback pointers. Here each entry lives in a [`slotmap::SlotMap`],
//! referenced by a [`ScheduleToken`] generational key, and the callback is
//! a tagged [`Callback`] variant rather than a type-erased pointer (design
//! §9's redesign notes on both points).

use chrono::{DateTime, Local, NaiveTime};
use slotmap::new_key_type;

new_key_type! {
    /// Opaque handle to a scheduled entry. Cancellation takes this, never
    /// a raw index; a stale token after firing or cancellation is a clean
    /// no-op.
    pub struct ScheduleToken;
}

/// What happens when an entry fires. Replaces the original's void-pointer
/// callback with a typed, inspectable descriptor (design §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    /// Re-arm the TimeServer exchange (design §4.5's randomized daily
    /// re-check near 02:30 local).
    TimeServerCheck,
    /// Re-arm the firmware manifest poll (design §4.5's 30-minute floor).
    FirmwareCheck,
    /// Re-arm the pending-action fetch (design §4.5's `next_update_minutes`
    /// or backoff-ladder delay).
    RemoteActionCheck,
    /// Midnight tick: refresh the scene database and re-arm itself.
    MidnightSceneRefresh,
    /// Scheduled data-refresh after a large real-time-clock jump.
    TimeJumpDataRefresh,
    /// Persist current wall-clock time and reset the host process.
    DailyReset,
    /// Weekly low-battery sweep across every battery-powered shade.
    BatterySweep,
    /// Recall a stored scene by ID (design §3's scene entries).
    SceneExecute { scene_id: u16 },
}

/// A fixed local wall-clock time of day, or a sunrise/sunset-relative
/// offset in minutes (design §3/§4.4's scene-entry flavors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneTime {
    Clock(NaiveTime),
    SunriseOffsetMinutes(i32),
    SunsetOffsetMinutes(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    CountDown { remaining_seconds: u32 },
    Daily { time: NaiveTime, next_fire: DateTime<Local> },
    Scene { time: SceneTime, next_fire: DateTime<Local> },
}

#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub kind: EntryKind,
    pub callback: Callback,
}

/// True if `target` can still fire today, i.e. strictly after the current
/// local time of day (design §4.4's `is_happening_today`).
pub fn is_happening_today(now: NaiveTime, target: NaiveTime) -> bool {
    now < target
}

/// Compute the next local instant at which `target` fires: today if it
/// hasn't passed yet, otherwise tomorrow.
pub fn next_daily_fire(now: DateTime<Local>, target: NaiveTime) -> DateTime<Local> {
    let today = now.date_naive();
    let candidate = today.and_time(target).and_local_timezone(Local).earliest().unwrap_or(now);
    if is_happening_today(now.time(), target) {
        candidate
    } else {
        let tomorrow = today.succ_opt().unwrap_or(today);
        tomorrow.and_time(target).and_local_timezone(Local).earliest().unwrap_or(candidate)
    }
}

/// Resolve a [`SceneTime`] against known sunrise/sunset minutes-past-midnight
/// (from the most recent TimeServer exchange), producing the next fire
/// instant the same way [`next_daily_fire`] does for a fixed clock time.
/// Returns `None` if a sunrise/sunset offset is requested but the time
/// server hasn't supplied one yet.
pub fn next_scene_fire(
    now: DateTime<Local>,
    time: SceneTime,
    sunrise_minutes: Option<u32>,
    sunset_minutes: Option<u32>,
) -> Option<DateTime<Local>> {
    let clock_time = match time {
        SceneTime::Clock(t) => t,
        SceneTime::SunriseOffsetMinutes(offset) => minutes_to_time(sunrise_minutes? as i32 + offset),
        SceneTime::SunsetOffsetMinutes(offset) => minutes_to_time(sunset_minutes? as i32 + offset),
    };
    Some(next_daily_fire(now, clock_time))
}

fn minutes_to_time(total_minutes: i32) -> NaiveTime {
    let wrapped = total_minutes.rem_euclid(24 * 60);
    NaiveTime::from_hms_opt((wrapped / 60) as u32, (wrapped % 60) as u32, 0).expect("wrapped minutes are in range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
    }

    #[test]
    fn daily_fire_advances_exactly_24_hours_after_firing() {
        let target = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        let before = local(2026, 3, 5, 10, 59, 55);
        let first = next_daily_fire(before, target);
        assert_eq!(first, local(2026, 3, 5, 11, 0, 0));

        let after = local(2026, 3, 5, 11, 0, 0);
        let next = next_daily_fire(after, target);
        assert_eq!(next, local(2026, 3, 6, 11, 0, 0));
        assert_eq!((next - first).num_hours(), 24);
    }

    #[test]
    fn time_jump_past_target_recomputes_to_tomorrow() {
        let target = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        let jumped = local(2026, 3, 5, 12, 0, 0);
        assert_eq!(next_daily_fire(jumped, target), local(2026, 3, 6, 11, 0, 0));
    }

    #[test]
    fn sunrise_offset_without_a_time_server_result_is_none() {
        let now = local(2026, 3, 5, 6, 0, 0);
        assert!(next_scene_fire(now, SceneTime::SunriseOffsetMinutes(-15), None, None).is_none());
    }

    #[test]
    fn sunrise_offset_resolves_against_reported_minutes() {
        let now = local(2026, 3, 5, 5, 0, 0);
        // sunrise at 6:30 (390 minutes), offset -15 -> 6:15
        let fire = next_scene_fire(now, SceneTime::SunriseOffsetMinutes(-15), Some(390), None).unwrap();
        assert_eq!(fire.time(), NaiveTime::from_hms_opt(6, 15, 0).unwrap());
    }
}
