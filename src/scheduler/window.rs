//! Daily publish window.

use chrono::{DateTime, Duration, NaiveTime, Utc};

/// Allowed time-of-day range for releases, in UTC.
///
/// `start` is inclusive, `end` exclusive. A window with `start > end`
/// wraps past midnight (e.g. `22:00-02:00`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DailyWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse `HH:MM-HH:MM`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("expected HH:MM-HH:MM, got '{s}'"))?;
        let parse_time = |t: &str| {
            NaiveTime::parse_from_str(t.trim(), "%H:%M")
                .map_err(|e| format!("invalid time '{}': {e}", t.trim()))
        };
        let window = Self::new(parse_time(start)?, parse_time(end)?);
        if window.start == window.end {
            return Err("window start and end must differ".into());
        }
        Ok(window)
    }

    /// Whether `at` falls inside the window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let t = at.time();
        if self.start < self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }

    /// `at` if inside the window, otherwise the next time the window opens.
    pub fn align(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        if self.contains(at) {
            return at;
        }
        let today_open = at.date_naive().and_time(self.start).and_utc();
        if today_open > at {
            today_open
        } else {
            // At the end of the calendar there is no next opening.
            today_open
                .checked_add_signed(Duration::days(1))
                .unwrap_or(at)
        }
    }
}

impl std::fmt::Display for DailyWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, h, m, 0).unwrap()
    }

    #[test]
    fn parse_and_display() {
        let w = DailyWindow::parse("08:00-22:30").unwrap();
        assert_eq!(w.to_string(), "08:00-22:30");
        assert!(DailyWindow::parse("08:00").is_err());
        assert!(DailyWindow::parse("25:00-01:00").is_err());
        assert!(DailyWindow::parse("08:00-08:00").is_err());
    }

    #[test]
    fn plain_window() {
        let w = DailyWindow::parse("08:00-22:00").unwrap();
        assert!(w.contains(at(8, 0)));
        assert!(w.contains(at(21, 59)));
        assert!(!w.contains(at(22, 0)));
        assert!(!w.contains(at(3, 0)));

        assert_eq!(w.align(at(12, 0)), at(12, 0));
        assert_eq!(w.align(at(3, 0)), at(8, 0));
        assert_eq!(w.align(at(23, 0)), at(8, 0) + Duration::days(1));
    }

    #[test]
    fn wrapping_window() {
        let w = DailyWindow::parse("22:00-02:00").unwrap();
        assert!(w.contains(at(23, 0)));
        assert!(w.contains(at(1, 30)));
        assert!(!w.contains(at(2, 0)));
        assert!(!w.contains(at(12, 0)));

        assert_eq!(w.align(at(12, 0)), at(22, 0));
        assert_eq!(w.align(at(1, 0)), at(1, 0));
    }
}
