//! Focus statistics calculation
//!
//! Aggregates stored sessions into the numbers the report shows:
//! - Focus time today, all time, and per weekday for the last week
//! - Focus time per category
//! - Distraction and completion counts
//!
//! Days are UTC calendar days.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::session::{normalize_category, Session};

/// Weekday labels matching `last_seven_days`, Monday first
pub const WEEKDAY_LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Aggregated focus statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusStats {
    /// Seconds focused today
    pub total_today: u64,
    /// Seconds focused over all sessions
    pub total_all_time: u64,
    /// Distractions over all sessions
    pub total_distractions: u64,
    /// Seconds per category
    pub category_totals: BTreeMap<String, u64>,
    /// Seconds per weekday over the last seven days, index 0 = Monday
    pub last_seven_days: [u64; 7],
    /// Number of sessions
    pub total_sessions: u32,
    /// Sessions whose countdown ran out
    pub finished_sessions: u32,
    /// Finished share as percentage (0-100)
    pub completion_rate: u32,
}

impl FocusStats {
    pub fn from_sessions(sessions: &[Session]) -> Self {
        Self::from_sessions_at(sessions, Utc::now())
    }

    /// Calculate statistics relative to `now`
    pub fn from_sessions_at(sessions: &[Session], now: DateTime<Utc>) -> Self {
        if sessions.is_empty() {
            return Self::default();
        }

        let today = now.date_naive();
        let mut stats = Self::default();

        for session in sessions {
            let duration = u64::from(session.duration);
            stats.total_all_time += duration;
            stats.total_distractions += u64::from(session.distractions);
            stats.total_sessions += 1;
            if session.is_finished {
                stats.finished_sessions += 1;
            }

            let category = normalize_category(Some(&session.category));
            *stats.category_totals.entry(category).or_insert(0) += duration;

            let day = session.date.date_naive();
            if day == today {
                stats.total_today += duration;
            }

            let days_ago = (today - day).num_days();
            if (0..7).contains(&days_ago) {
                let index = day.weekday().num_days_from_monday() as usize;
                stats.last_seven_days[index] += duration;
            }
        }

        stats.completion_rate = (stats.finished_sessions * 100) / stats.total_sessions;
        stats
    }

    /// Categories sorted by time spent, largest first
    pub fn categories_by_time(&self) -> Vec<(&str, u64)> {
        let mut entries: Vec<(&str, u64)> = self
            .category_totals
            .iter()
            .filter(|(_, secs)| **secs > 0)
            .map(|(name, secs)| (name.as_str(), *secs))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        entries
    }

    /// Share of all focus time spent in a category, as a percentage
    pub fn category_share(&self, category: &str) -> u32 {
        if self.total_all_time == 0 {
            return 0;
        }
        let secs = self.category_totals.get(category).copied().unwrap_or(0);
        ((secs * 100) / self.total_all_time) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn make_session(date: DateTime<Utc>, duration: u32, category: &str, finished: bool) -> Session {
        let mut session = Session::new(date, duration, category, 0, finished);
        session.category = category.to_string();
        session
    }

    #[test]
    fn test_empty_stats() {
        let stats = FocusStats::from_sessions(&[]);
        assert_eq!(stats.total_sessions, 0);
        assert_eq!(stats.total_all_time, 0);
        assert_eq!(stats.completion_rate, 0);
        assert_eq!(stats.last_seven_days, [0; 7]);
    }

    #[test]
    fn test_stats_calculation() {
        // Wednesday
        let now = at(2024, 5, 15, 18);
        let mut distracted = make_session(at(2024, 5, 15, 9), 1500, "Coding", true);
        distracted.distractions = 3;
        let sessions = vec![
            distracted,
            make_session(at(2024, 5, 15, 11), 600, "Study", false),
            make_session(at(2024, 5, 13, 10), 1500, "Coding", true),
            make_session(at(2024, 5, 1, 10), 1500, "Reading", true),
        ];

        let stats = FocusStats::from_sessions_at(&sessions, now);
        assert_eq!(stats.total_sessions, 4);
        assert_eq!(stats.finished_sessions, 3);
        assert_eq!(stats.completion_rate, 75);
        assert_eq!(stats.total_today, 2100);
        assert_eq!(stats.total_all_time, 5100);
        assert_eq!(stats.total_distractions, 3);
        assert_eq!(stats.category_totals["Coding"], 3000);
        assert_eq!(stats.category_totals["Reading"], 1500);
        // Monday and Wednesday only; May 1st is out of range
        assert_eq!(stats.last_seven_days, [1500, 0, 2100, 0, 0, 0, 0]);
    }

    #[test]
    fn test_week_window_excludes_same_weekday_last_week() {
        let now = at(2024, 5, 15, 12);
        let sessions = vec![
            make_session(now - Duration::days(7), 100, "Work", true),
            make_session(now - Duration::days(6), 50, "Work", true),
        ];
        let stats = FocusStats::from_sessions_at(&sessions, now);
        // six days before Wednesday is Thursday
        assert_eq!(stats.last_seven_days, [0, 0, 0, 50, 0, 0, 0]);
        assert_eq!(stats.total_all_time, 150);
    }

    #[test]
    fn test_future_dates_are_not_bucketed() {
        let now = at(2024, 5, 15, 12);
        let sessions = vec![make_session(now + Duration::days(2), 100, "Work", true)];
        let stats = FocusStats::from_sessions_at(&sessions, now);
        assert_eq!(stats.last_seven_days, [0; 7]);
        assert_eq!(stats.total_today, 0);
    }

    #[test]
    fn test_blank_category_counts_as_placeholder() {
        let now = at(2024, 5, 15, 12);
        let sessions = vec![make_session(now, 60, "", false)];
        let stats = FocusStats::from_sessions_at(&sessions, now);
        assert_eq!(stats.category_totals.get("General"), Some(&60));
    }

    #[test]
    fn test_categories_by_time() {
        let now = at(2024, 5, 15, 12);
        let sessions = vec![
            make_session(now, 60, "Study", false),
            make_session(now, 600, "Coding", true),
            make_session(now, 60, "Reading", false),
        ];
        let stats = FocusStats::from_sessions_at(&sessions, now);
        assert_eq!(
            stats.categories_by_time(),
            vec![("Coding", 600), ("Reading", 60), ("Study", 60)]
        );
        assert_eq!(stats.category_share("Coding"), 83);
        assert_eq!(stats.category_share("Missing"), 0);
    }
}
