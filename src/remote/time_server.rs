//! TimeServer cloud exchange: parse the reported UTC time, DST/raw
//! offsets, and sunrise/sunset instants (design §4.5).

use chrono::{DateTime, Local, Utc};
use serde::Deserialize;

use crate::error::RemoteServerStatus;

#[derive(Debug, Clone, Deserialize)]
pub struct TimeServerResponse {
    pub utc: String,
    pub raw_offset_seconds: i32,
    pub dst_offset_seconds: i32,
    pub sunrise_utc: String,
    pub sunset_utc: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTime {
    pub utc: DateTime<Utc>,
    pub utc_offset_seconds: i32,
    pub sunrise_minutes: Option<u32>,
    pub sunset_minutes: Option<u32>,
}

pub fn parse(response: &TimeServerResponse) -> Result<ParsedTime, RemoteServerStatus> {
    let utc = DateTime::parse_from_rfc3339(&response.utc)
        .map_err(|_| RemoteServerStatus::CannotParseResponse)?
        .with_timezone(&Utc);
    let utc_offset_seconds = response.raw_offset_seconds + response.dst_offset_seconds;
    Ok(ParsedTime {
        utc,
        utc_offset_seconds,
        sunrise_minutes: minutes_past_local_midnight(&response.sunrise_utc, utc_offset_seconds),
        sunset_minutes: minutes_past_local_midnight(&response.sunset_utc, utc_offset_seconds),
    })
}

fn minutes_past_local_midnight(iso_utc: &str, utc_offset_seconds: i32) -> Option<u32> {
    let utc = DateTime::parse_from_rfc3339(iso_utc).ok()?.with_timezone(&Utc);
    let local_seconds_of_day = (utc.timestamp() + utc_offset_seconds as i64).rem_euclid(86_400);
    Some((local_seconds_of_day / 60) as u32)
}

/// The size of the real-time-clock jump this exchange implies, relative
/// to the host's own wall clock at the moment the response arrived (design
/// §4.4's time-change handling, fed to `Scheduler::on_time_change`).
pub fn jump_seconds(host_now: DateTime<Local>, reported: &ParsedTime) -> i64 {
    let expected_utc = host_now.with_timezone(&Utc);
    (reported.utc - expected_utc).num_seconds()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> TimeServerResponse {
        TimeServerResponse {
            utc: "2026-03-05T17:00:00Z".to_string(),
            raw_offset_seconds: -7 * 3600,
            dst_offset_seconds: 0,
            sunrise_utc: "2026-03-05T13:30:00Z".to_string(),
            sunset_utc: "2026-03-06T01:15:00Z".to_string(),
        }
    }

    #[test]
    fn parses_utc_and_combined_offset() {
        let parsed = parse(&response()).unwrap();
        assert_eq!(parsed.utc_offset_seconds, -7 * 3600);
    }

    #[test]
    fn sunrise_minutes_reflect_the_combined_offset() {
        let parsed = parse(&response()).unwrap();
        // 13:30 UTC - 7h = 06:30 local = 390 minutes past midnight.
        assert_eq!(parsed.sunrise_minutes, Some(390));
    }

    #[test]
    fn malformed_timestamp_is_rejected() {
        let mut bad = response();
        bad.utc = "not-a-timestamp".to_string();
        assert!(parse(&bad).is_err());
    }
}
