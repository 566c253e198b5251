//! Session lifecycle resets: periodically drop a session's accumulated state
//! (history, active run) so a new day — or a long-idle user — starts clean.
//! Policy and mechanism split the way the teacher's session lifecycle does:
//! a pure `should_reset` decision here, the actual state-clearing is the
//! caller's job (bootstrap's background sweep).

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use ov_domain::config::LifecycleConfig;
use ov_domain::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    DailyReset { hour: u8 },
    IdleTimeout { idle_minutes: u32 },
}

impl std::fmt::Display for ResetReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResetReason::DailyReset { hour } => write!(f, "daily reset at {hour:02}:00"),
            ResetReason::IdleTimeout { idle_minutes } => write!(f, "idle for {idle_minutes} minutes"),
        }
    }
}

pub struct LifecycleManager {
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }

    /// Daily boundary takes precedence over idle timeout when both are
    /// configured and both would trigger.
    pub fn should_reset(&self, session: &Session, now: DateTime<Utc>) -> Option<ResetReason> {
        if let Some(hour) = self.config.daily_reset_hour {
            if crossed_daily_boundary(session.last_active_at, now, hour) {
                return Some(ResetReason::DailyReset { hour });
            }
        }

        if let Some(idle_minutes) = self.config.idle_timeout_minutes {
            let idle = now.signed_duration_since(session.last_active_at);
            if idle.num_minutes() >= idle_minutes as i64 {
                return Some(ResetReason::IdleTimeout { idle_minutes });
            }
        }

        None
    }
}

/// True when the most recent `hour:00` boundary strictly before `now` falls
/// after `last_active`. Guards against a spurious trigger on activity that
/// happened less than a minute before the boundary itself.
fn crossed_daily_boundary(last_active: DateTime<Utc>, now: DateTime<Utc>, hour: u8) -> bool {
    let today_boundary = match Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), hour as u32, 0, 0) {
        chrono::LocalResult::Single(t) => t,
        _ => return false,
    };
    let boundary = if now.hour() as u8 >= hour { today_boundary } else { today_boundary - chrono::Duration::days(1) };

    if now.signed_duration_since(boundary).num_seconds() < 60 {
        return false;
    }

    last_active < boundary && now >= boundary
}
