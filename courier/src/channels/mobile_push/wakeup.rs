//! Silent wakeup timing for iOS devices.

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{MobileDeviceType, MobilePushToken, User};

/// When silent wakeups are scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeupPolicy {
    /// Delay between a push and the wakeup that follows it.
    pub delay_secs: u64,
    /// Minimum time between two wakeups of the same device.
    pub min_interval_secs: u64,
}

impl Default for WakeupPolicy {
    fn default() -> Self {
        Self {
            delay_secs: 300,
            min_interval_secs: 3600,
        }
    }
}

impl WakeupPolicy {
    fn delay(&self) -> Duration {
        seconds(self.delay_secs)
    }

    fn min_interval(&self) -> Duration {
        seconds(self.min_interval_secs)
    }
}

fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Next time the device may be woken up, if any.
///
/// Only iOS devices are woken up. A device whose last wakeup is more recent
/// than the minimum interval (or still pending) is left alone. Otherwise the
/// wakeup follows after the configured delay, moved to the end of the
/// user's quiet hours when it would fall inside them.
pub fn next_wakeup_time(
    token: &MobilePushToken,
    user: &User,
    now: DateTime<Utc>,
    policy: &WakeupPolicy,
) -> Option<DateTime<Utc>> {
    if token.device_type != MobileDeviceType::IOs {
        return None;
    }

    if let Some(last_wakeup) = token.last_wakeup
        && now
            .checked_sub_signed(policy.min_interval())
            .is_none_or(|threshold| last_wakeup > threshold)
    {
        return None;
    }

    let candidate = now.checked_add_signed(policy.delay())?;
    Some(after_quiet_hours(candidate, user))
}

/// Move `at` to the end of the user's quiet hours if it falls inside them.
fn after_quiet_hours(at: DateTime<Utc>, user: &User) -> DateTime<Utc> {
    let Some(quiet_hours) = user.quiet_hours else {
        return at;
    };

    let tz = user
        .time_zone
        .as_deref()
        .and_then(|name| name.parse::<Tz>().ok())
        .unwrap_or(chrono_tz::UTC);

    let local = at.with_timezone(&tz);
    if !quiet_hours.contains(local.time()) {
        return at;
    }

    // The window ends today unless we are already past today's end time,
    // which only happens for windows spanning midnight.
    let mut end = local.date_naive().and_time(quiet_hours.end);
    if local.time() >= quiet_hours.end {
        end += Duration::days(1);
    }

    let shifted = tz
        .from_local_datetime(&end)
        .earliest()
        // End time inside a DST gap
        .or_else(|| tz.from_local_datetime(&(end + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(at);

    debug!(user_id = %user.id, from = %at, to = %shifted, "Wakeup moved out of quiet hours");
    shifted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QuietHours;
    use chrono::NaiveTime;
    use rstest::rstest;

    fn ios_token() -> MobilePushToken {
        MobilePushToken::new("token", MobileDeviceType::IOs)
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn user_with_quiet_hours(time_zone: &str, start: (u32, u32), end: (u32, u32)) -> User {
        let mut user = User::new("app", "user");
        user.time_zone = Some(time_zone.to_string());
        user.quiet_hours = Some(QuietHours {
            start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        });
        user
    }

    #[test]
    fn test_only_ios_devices_wake_up() {
        let user = User::new("app", "user");
        let now = at("2026-03-02T12:00:00Z");
        let policy = WakeupPolicy::default();

        let android = MobilePushToken::new("token", MobileDeviceType::Android);
        assert_eq!(next_wakeup_time(&android, &user, now, &policy), None);

        assert_eq!(
            next_wakeup_time(&ios_token(), &user, now, &policy),
            Some(now + Duration::seconds(300))
        );
    }

    #[test]
    fn test_recent_or_pending_wakeup_suppresses_another() {
        let user = User::new("app", "user");
        let now = at("2026-03-02T12:00:00Z");
        let policy = WakeupPolicy::default();

        let mut token = ios_token();
        token.last_wakeup = Some(now - Duration::minutes(30));
        assert_eq!(next_wakeup_time(&token, &user, now, &policy), None);

        token.last_wakeup = Some(now + Duration::minutes(5));
        assert_eq!(next_wakeup_time(&token, &user, now, &policy), None);

        token.last_wakeup = Some(now - Duration::hours(2));
        assert!(next_wakeup_time(&token, &user, now, &policy).is_some());
    }

    #[rstest]
    // Inside an overnight window before midnight: moved to the next morning.
    #[case("2026-03-02T22:30:00Z", "UTC", (22, 0), (7, 0), "2026-03-03T07:00:00Z")]
    // Inside an overnight window after midnight: moved to the same morning.
    #[case("2026-03-03T03:00:00Z", "UTC", (22, 0), (7, 0), "2026-03-03T07:00:00Z")]
    // Outside the window: unchanged.
    #[case("2026-03-02T12:00:00Z", "UTC", (22, 0), (7, 0), "2026-03-02T12:00:00Z")]
    // Window evaluated in the user's zone: 21:00 UTC is 22:00 in Berlin (CET).
    #[case("2026-03-02T21:00:00Z", "Europe/Berlin", (22, 0), (7, 0), "2026-03-03T06:00:00Z")]
    // Unknown zone falls back to UTC.
    #[case("2026-03-02T23:00:00Z", "Mars/Olympus", (22, 0), (7, 0), "2026-03-03T07:00:00Z")]
    // Daytime window.
    #[case("2026-03-02T12:30:00Z", "UTC", (12, 0), (14, 0), "2026-03-02T14:00:00Z")]
    fn test_after_quiet_hours(
        #[case] candidate: &str,
        #[case] time_zone: &str,
        #[case] start: (u32, u32),
        #[case] end: (u32, u32),
        #[case] expected: &str,
    ) {
        let user = user_with_quiet_hours(time_zone, start, end);
        assert_eq!(after_quiet_hours(at(candidate), &user), at(expected));
    }

    #[test]
    fn test_wakeup_delay_lands_in_quiet_hours() {
        let user = user_with_quiet_hours("UTC", (22, 0), (7, 0));
        let policy = WakeupPolicy {
            delay_secs: 3600,
            min_interval_secs: 3600,
        };

        let next = next_wakeup_time(&ios_token(), &user, at("2026-03-02T21:30:00Z"), &policy);
        assert_eq!(next, Some(at("2026-03-03T07:00:00Z")));
    }
}
