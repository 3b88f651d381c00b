//! User timezones and zone lookup

use crate::db::{now_ts, Database};
use crate::error::{BotError, BotResult};
use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::{Tz, TZ_VARIANTS};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;

pub const SEARCH_LIMIT: usize = 10;

/// City names people type, mapped onto IANA zones
const CITY_ZONES: &[(&str, &str)] = &[
    ("new york", "America/New_York"),
    ("los angeles", "America/Los_Angeles"),
    ("london", "Europe/London"),
    ("paris", "Europe/Paris"),
    ("tokyo", "Asia/Tokyo"),
    ("sydney", "Australia/Sydney"),
    ("moscow", "Europe/Moscow"),
    ("dubai", "Asia/Dubai"),
    ("singapore", "Asia/Singapore"),
    ("berlin", "Europe/Berlin"),
    ("mumbai", "Asia/Kolkata"),
    ("beijing", "Asia/Shanghai"),
    ("cairo", "Africa/Cairo"),
    ("mexico city", "America/Mexico_City"),
    ("chicago", "America/Chicago"),
    ("denver", "America/Denver"),
    ("phoenix", "America/Phoenix"),
    ("toronto", "America/Toronto"),
    ("vancouver", "America/Vancouver"),
    ("sao paulo", "America/Sao_Paulo"),
    ("buenos aires", "America/Argentina/Buenos_Aires"),
    ("lima", "America/Lima"),
    ("bogota", "America/Bogota"),
    ("helsinki", "Europe/Helsinki"),
    ("stockholm", "Europe/Stockholm"),
    ("oslo", "Europe/Oslo"),
    ("copenhagen", "Europe/Copenhagen"),
    ("amsterdam", "Europe/Amsterdam"),
    ("zurich", "Europe/Zurich"),
    ("rome", "Europe/Rome"),
    ("madrid", "Europe/Madrid"),
    ("lisbon", "Europe/Lisbon"),
    ("athens", "Europe/Athens"),
    ("istanbul", "Europe/Istanbul"),
    ("tel aviv", "Asia/Jerusalem"),
    ("riyadh", "Asia/Riyadh"),
    ("tehran", "Asia/Tehran"),
    ("karachi", "Asia/Karachi"),
    ("dhaka", "Asia/Dhaka"),
    ("bangkok", "Asia/Bangkok"),
    ("jakarta", "Asia/Jakarta"),
    ("manila", "Asia/Manila"),
    ("seoul", "Asia/Seoul"),
    ("hong kong", "Asia/Hong_Kong"),
    ("taipei", "Asia/Taipei"),
    ("perth", "Australia/Perth"),
    ("melbourne", "Australia/Melbourne"),
    ("brisbane", "Australia/Brisbane"),
    ("auckland", "Pacific/Auckland"),
    ("honolulu", "Pacific/Honolulu"),
    ("anchorage", "America/Anchorage"),
];

#[derive(Debug, Clone, Serialize)]
pub struct TimezoneInfo {
    pub timezone: String,
    pub local_time: String,
    /// e.g. `+05:30`
    pub utc_offset: String,
    pub offset_hours: f64,
    pub abbreviation: String,
    pub observes_dst: bool,
}

/// Parse an IANA name, also accepting city aliases
pub fn parse_tz(name: &str) -> Option<Tz> {
    let trimmed = name.trim();
    if let Ok(tz) = trimmed.parse::<Tz>() {
        return Some(tz);
    }
    let lower = trimmed.to_lowercase();
    if let Some((_, zone)) = CITY_ZONES.iter().find(|(city, _)| *city == lower) {
        return zone.parse().ok();
    }
    // Case-insensitive exact match, e.g. "europe/london"
    TZ_VARIANTS
        .iter()
        .find(|tz| tz.name().eq_ignore_ascii_case(trimmed))
        .copied()
}

fn offset_seconds(tz: Tz, at: DateTime<Utc>) -> i32 {
    tz.offset_from_utc_datetime(&at.naive_utc()).fix().local_minus_utc()
}

fn format_offset(seconds: i32) -> String {
    let sign = if seconds < 0 { '-' } else { '+' };
    let abs = seconds.abs();
    format!("{}{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60)
}

/// Details about `tz` at `now`. DST is observed when January and July offsets differ.
pub fn timezone_info(tz: Tz, now: DateTime<Utc>) -> TimezoneInfo {
    let local = now.with_timezone(&tz);
    let offset = offset_seconds(tz, now);
    let year = now.year();
    let sample = |month: u32| {
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .map(|dt| offset_seconds(tz, dt.and_utc()))
    };
    let observes_dst = matches!((sample(1), sample(7)), (Some(jan), Some(jul)) if jan != jul);

    TimezoneInfo {
        timezone: tz.name().to_string(),
        local_time: local.format("%Y-%m-%d %H:%M:%S").to_string(),
        utc_offset: format_offset(offset),
        offset_hours: offset as f64 / 3600.0,
        abbreviation: local.format("%Z").to_string(),
        observes_dst,
    }
}

/// City aliases first, then a substring scan of all zone names
pub fn search(query: &str) -> Vec<Tz> {
    let query = query.trim().to_lowercase().replace(' ', "_");
    if query.is_empty() {
        return Vec::new();
    }
    let spaced = query.replace('_', " ");

    let mut results: Vec<Tz> = Vec::new();
    for (city, zone) in CITY_ZONES {
        if city.contains(&spaced) || zone.to_lowercase().contains(&query) {
            if let Ok(tz) = zone.parse::<Tz>() {
                if !results.contains(&tz) {
                    results.push(tz);
                }
            }
        }
        if results.len() >= SEARCH_LIMIT {
            return results;
        }
    }
    for tz in TZ_VARIANTS.iter() {
        if results.len() >= SEARCH_LIMIT {
            break;
        }
        if tz.name().to_lowercase().contains(&query) && !results.contains(tz) {
            results.push(*tz);
        }
    }
    results
}

/// Local wall-clock time in `tz` to UTC. Ambiguous times take the earlier
/// instant; times skipped by a DST jump are rejected.
pub fn to_utc(local: NaiveDateTime, tz: Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

pub fn from_utc(utc: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    utc.with_timezone(&tz)
}

pub struct TimezoneStore {
    db: Arc<Database>,
}

impl TimezoneStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn set_timezone(&self, user_id: i64, name: &str) -> BotResult<Tz> {
        let tz = parse_tz(name).ok_or_else(|| {
            BotError::validation(format!(
                "Unknown timezone '{}'. Try /timezone search <city>.",
                name.trim()
            ))
        })?;
        self.db.conn().execute(
            "INSERT INTO user_timezones (user_id, timezone, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET timezone = excluded.timezone,
                                                updated_at = excluded.updated_at",
            params![user_id, tz.name(), now_ts()],
        )?;
        Ok(tz)
    }

    /// Stored zone, UTC when unset
    pub fn get_timezone(&self, user_id: i64) -> BotResult<Tz> {
        let name: Option<String> = self
            .db
            .conn()
            .query_row(
                "SELECT timezone FROM user_timezones WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name.and_then(|n| n.parse().ok()).unwrap_or(Tz::UTC))
    }
}

pub fn format_info(info: &TimezoneInfo) -> String {
    format!(
        "🌍 <b>{}</b>\n\n\
         🕐 Local time: <b>{}</b>\n\
         ⏱️ UTC offset: <b>{}</b> ({})\n\
         ☀️ Daylight saving: <b>{}</b>",
        info.timezone,
        info.local_time,
        info.utc_offset,
        info.abbreviation,
        if info.observes_dst { "observed" } else { "not observed" }
    )
}

pub fn format_search(query: &str, zones: &[Tz], now: DateTime<Utc>) -> String {
    if zones.is_empty() {
        return format!(
            "🔍 No timezones found for '{}'.",
            crate::users::html_escape(query)
        );
    }
    let mut out = format!(
        "🔍 <b>Timezones matching '{}'</b>\n\n",
        crate::users::html_escape(query)
    );
    for tz in zones {
        let info = timezone_info(*tz, now);
        out.push_str(&format!(
            "• <code>{}</code> (UTC{}) {}\n",
            info.timezone,
            info.utc_offset,
            &info.local_time[11..16]
        ));
    }
    out.push_str("\nSet yours with <code>/timezone set &lt;zone&gt;</code>");
    out
}

pub fn usage() -> &'static str {
    "🌍 <b>Timezones</b>\n\n\
     • <code>/timezone</code> - show your timezone\n\
     • <code>/timezone set &lt;zone or city&gt;</code> - set it\n\
     • <code>/timezone search &lt;query&gt;</code> - find zones\n\
     • <code>/time [zone]</code> - current time"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_tz_variants() {
        assert_eq!(parse_tz("Europe/London"), Some(Tz::Europe__London));
        assert_eq!(parse_tz("europe/london"), Some(Tz::Europe__London));
        assert_eq!(parse_tz("New York"), Some(Tz::America__New_York));
        assert_eq!(parse_tz("Mars/Olympus"), None);
    }

    #[test]
    fn test_info_dst() {
        let summer = at(2024, 7, 1, 12);
        let ny = timezone_info(Tz::America__New_York, summer);
        assert!(ny.observes_dst);
        assert_eq!(ny.utc_offset, "-04:00");
        assert_eq!(ny.local_time, "2024-07-01 08:00:00");

        let tokyo = timezone_info(Tz::Asia__Tokyo, summer);
        assert!(!tokyo.observes_dst);
        assert_eq!(tokyo.utc_offset, "+09:00");

        let kolkata = timezone_info(Tz::Asia__Kolkata, summer);
        assert_eq!(kolkata.utc_offset, "+05:30");
        assert!((kolkata.offset_hours - 5.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_search() {
        let results = search("tokyo");
        assert_eq!(results.first(), Some(&Tz::Asia__Tokyo));
        let results = search("america");
        assert_eq!(results.len(), SEARCH_LIMIT);
        assert!(search("").is_empty());
        assert!(search("zzzz").is_empty());
        assert!(search("new york").contains(&Tz::America__New_York));
    }

    #[test]
    fn test_conversions() {
        let local = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(9, 0, 0).unwrap();
        let utc = to_utc(local, Tz::Europe__Berlin).unwrap();
        assert_eq!(utc, at(2024, 1, 15, 8));
        assert_eq!(from_utc(utc, Tz::Europe__Berlin).naive_local(), local);

        // Skipped by the spring-forward jump
        let gap = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap().and_hms_opt(2, 30, 0).unwrap();
        assert!(to_utc(gap, Tz::Europe__Berlin).is_none());
    }

    #[test]
    fn test_store_defaults_and_updates() {
        let store = TimezoneStore::new(Arc::new(Database::open_in_memory().unwrap()));
        assert_eq!(store.get_timezone(1).unwrap(), Tz::UTC);
        store.set_timezone(1, "tokyo").unwrap();
        assert_eq!(store.get_timezone(1).unwrap(), Tz::Asia__Tokyo);
        store.set_timezone(1, "Europe/Paris").unwrap();
        assert_eq!(store.get_timezone(1).unwrap(), Tz::Europe__Paris);
        assert!(store.set_timezone(1, "nowhere").is_err());
    }
}
