//! Wall-clock glue: the midnight self-re-arming tick, the randomized
//! once-daily host reset, and the randomized weekly battery sweep (design
//! §4.3, §4.4).

use chrono::{DateTime, Datelike, Local, NaiveTime, Weekday};
use rand::Rng;

use crate::scheduler::entry::Callback;
use crate::scheduler::{ScheduleToken, Scheduler};

/// Per-hub jitter applied to the daily reset and weekly battery sweep, so
/// every hub on the fleet doesn't hit the cloud or the RF network at the
/// same instant (design §4.3's battery-sweep jitter, reused here since the
/// daily-reset offset is specified only as "randomized").
const MAX_MINUTE_JITTER: u32 = 60;
const MAX_SECOND_JITTER: u32 = 60;

const BATTERY_SWEEP_WEEKDAY: Weekday = Weekday::Sun;
const BATTERY_SWEEP_HOUR: u32 = 4;

fn jittered_seconds(rng: &mut impl Rng) -> u32 {
    rng.gen_range(0..MAX_MINUTE_JITTER) * 60 + rng.gen_range(0..MAX_SECOND_JITTER)
}

/// Arm the self-re-scheduling midnight entry (design §4.4): fires at local
/// 00:00:00 and, being a `Daily` entry, automatically re-arms for the
/// following midnight once `Scheduler::tick` advances it.
pub fn arm_midnight_refresh(scheduler: &mut Scheduler, now: DateTime<Local>) -> ScheduleToken {
    let midnight = NaiveTime::from_hms_opt(0, 0, 0).expect("valid time");
    scheduler.insert_daily(midnight, Callback::MidnightSceneRefresh, now)
}

/// Arm the once-daily host reset at a randomized offset past midnight
/// (design §4.4's "Daily reset"). Re-arms itself every day like any other
/// `Daily` entry.
pub fn arm_daily_reset(scheduler: &mut Scheduler, now: DateTime<Local>, rng: &mut impl Rng) -> ScheduleToken {
    let offset = jittered_seconds(rng);
    let time = NaiveTime::from_num_seconds_from_midnight_opt(offset, 0).expect("offset is within a day");
    scheduler.insert_daily(time, Callback::DailyReset, now)
}

/// Next Sunday at `BATTERY_SWEEP_HOUR` local, jittered by up to
/// [`MAX_MINUTE_JITTER`] minutes and [`MAX_SECOND_JITTER`] seconds (design
/// §4.3). If today is already Sunday past that hour, advances a full week.
fn next_sweep_instant(now: DateTime<Local>, rng: &mut impl Rng) -> DateTime<Local> {
    let days_until_sunday = (7 + BATTERY_SWEEP_WEEKDAY.num_days_from_monday() as i64
        - now.weekday().num_days_from_monday() as i64)
        % 7;
    let base_date = now.date_naive() + chrono::Duration::days(days_until_sunday);
    let base = base_date
        .and_hms_opt(BATTERY_SWEEP_HOUR, 0, 0)
        .expect("valid time")
        .and_local_timezone(Local)
        .earliest()
        .unwrap_or(now);
    let candidate = base + chrono::Duration::seconds(jittered_seconds(rng) as i64);
    if candidate > now {
        candidate
    } else {
        candidate + chrono::Duration::weeks(1)
    }
}

/// Arm a one-shot countdown to the next weekly battery sweep. Unlike
/// `Daily`/`Scene` entries, this does not self-re-arm — the caller
/// handling `Callback::BatterySweep` calls this again afterward to
/// schedule the following week's sweep.
pub fn arm_weekly_battery_sweep(scheduler: &mut Scheduler, now: DateTime<Local>, rng: &mut impl Rng) -> ScheduleToken {
    let fire_at = next_sweep_instant(now, rng);
    let seconds = (fire_at - now).num_seconds().max(0) as u32;
    scheduler.insert_countdown(seconds, Callback::BatterySweep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::mock::StepRng;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
    }

    #[test]
    fn next_sweep_lands_on_a_sunday() {
        let mut rng = StepRng::new(0, 1);
        // 2026-03-05 is a Thursday.
        let now = local(2026, 3, 5, 10, 0, 0);
        let fire = next_sweep_instant(now, &mut rng);
        assert_eq!(fire.weekday(), Weekday::Sun);
        assert!(fire > now);
    }

    #[test]
    fn next_sweep_after_this_weeks_window_rolls_to_next_week() {
        let mut rng = StepRng::new(0, 1);
        // 2026-03-08 is a Sunday; request from well after the sweep hour.
        let now = local(2026, 3, 8, 23, 0, 0);
        let fire = next_sweep_instant(now, &mut rng);
        assert_eq!(fire.weekday(), Weekday::Sun);
        assert!((fire.date_naive() - now.date_naive()).num_days() >= 7);
    }

    #[test]
    fn midnight_entry_fires_daily() {
        let mut scheduler = Scheduler::new();
        let token = arm_midnight_refresh(&mut scheduler, local(2026, 3, 5, 23, 59, 0));
        let fired = scheduler.tick(local(2026, 3, 6, 0, 0, 0));
        assert_eq!(fired, vec![Callback::MidnightSceneRefresh]);
        assert_eq!(scheduler.seconds_until(token, local(2026, 3, 6, 0, 0, 0)), Some(24 * 3600));
    }
}
