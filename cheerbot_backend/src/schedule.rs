//! Wall-clock gates for time-based content, evaluated in the fixed UTC+9 zone.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};

const ZONE_OFFSET_SECONDS: i32 = 9 * 3600;

/// Zone-local hour at or after which the daily summary may post.
pub const DAILY_SUMMARY_HOUR: u32 = 23;
/// Zone-local hour in which filler content may post.
pub const FILLER_CONTENT_HOUR: u32 = 10;
/// The previous period counts as low-activity at or below this many primary posts.
pub const LOW_ACTIVITY_THRESHOLD: u64 = 3;

pub fn zone() -> FixedOffset {
    FixedOffset::east_opt(ZONE_OFFSET_SECONDS).expect("UTC+9 is within the valid offset range")
}

pub fn zone_local(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    now.with_timezone(&zone())
}

/// `YYYY-MM-DD` in zone-local time.
pub fn local_date_string(now: DateTime<Utc>) -> String {
    zone_local(now).format("%Y-%m-%d").to_string()
}

/// `YYYY-MM` in zone-local time.
pub fn local_month_string(now: DateTime<Utc>) -> String {
    zone_local(now).format("%Y-%m").to_string()
}

pub fn should_post_daily_summary(last_report_date: Option<&str>, now: DateTime<Utc>) -> bool {
    if zone_local(now).hour() < DAILY_SUMMARY_HOUR {
        return false;
    }
    last_report_date != Some(local_date_string(now).as_str())
}

pub fn should_post_filler_content(prev_period_primary_count: u64, now: DateTime<Utc>) -> bool {
    zone_local(now).hour() == FILLER_CONTENT_HOUR
        && prev_period_primary_count <= LOW_ACTIVITY_THRESHOLD
}

pub fn should_post_weekly_extra(now: DateTime<Utc>) -> bool {
    zone_local(now).weekday() == Weekday::Sun
}

/// The profile-level display may change at most once per zone-local month.
pub fn should_update_progression(last_update_month: Option<&str>, now: DateTime<Utc>) -> bool {
    last_update_month != Some(local_month_string(now).as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        zone()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("valid local time")
            .with_timezone(&Utc)
    }

    #[test]
    fn daily_summary_opens_at_23_local() {
        let yesterday = Some("2026-03-09");
        assert!(should_post_daily_summary(yesterday, local(2026, 3, 10, 23, 5)));
        assert!(!should_post_daily_summary(yesterday, local(2026, 3, 10, 22, 59)));
    }

    #[test]
    fn daily_summary_posts_once_per_local_day() {
        let now = local(2026, 3, 10, 23, 30);
        assert!(!should_post_daily_summary(Some("2026-03-10"), now));
        assert!(should_post_daily_summary(None, now));
    }

    #[test]
    fn local_date_uses_utc_plus_nine() {
        // 15:30 UTC is 00:30 the next day in zone-local time
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 15, 30, 0).single().expect("utc");
        assert_eq!(local_date_string(now), "2026-03-11");
        assert_eq!(local_month_string(now), "2026-03");
    }

    #[test]
    fn filler_content_needs_low_activity_at_ten() {
        assert!(should_post_filler_content(2, local(2026, 3, 10, 10, 15)));
        assert!(should_post_filler_content(3, local(2026, 3, 10, 10, 59)));
        assert!(!should_post_filler_content(4, local(2026, 3, 10, 10, 15)));
        assert!(!should_post_filler_content(0, local(2026, 3, 10, 11, 0)));
    }

    #[test]
    fn weekly_extra_is_sunday_local() {
        // 2026-03-15 is a Sunday
        assert!(should_post_weekly_extra(local(2026, 3, 15, 10, 0)));
        assert!(!should_post_weekly_extra(local(2026, 3, 14, 10, 0)));
        // Saturday 16:00 UTC is already Sunday locally
        let saturday_utc = Utc.with_ymd_and_hms(2026, 3, 14, 16, 0, 0).single().expect("utc");
        assert!(should_post_weekly_extra(saturday_utc));
    }

    #[test]
    fn progression_update_is_monthly() {
        let now = local(2026, 4, 1, 0, 10);
        assert!(should_update_progression(Some("2026-03"), now));
        assert!(!should_update_progression(Some("2026-04"), now));
        assert!(should_update_progression(None, now));
    }
}
