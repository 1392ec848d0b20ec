use serde::{Deserialize, Serialize};

/// Daily staffing window, half-open over local hours: `[opens, closes)`.
///
/// Windows may wrap past midnight (for example 22 to 6). Equal bounds mean
/// the desk is staffed around the clock and the off-hours notice never shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffedHours {
    #[serde(default = "default_opens_at_hour")]
    pub opens_at_hour: u8,
    #[serde(default = "default_closes_at_hour")]
    pub closes_at_hour: u8,
}

fn default_opens_at_hour() -> u8 {
    8
}

fn default_closes_at_hour() -> u8 {
    23
}

impl Default for StaffedHours {
    fn default() -> Self {
        Self {
            opens_at_hour: default_opens_at_hour(),
            closes_at_hour: default_closes_at_hour(),
        }
    }
}

impl StaffedHours {
    /// Returns true when the given local hour falls inside the staffed window.
    pub fn covers(&self, hour: u8) -> bool {
        let hour = hour % 24;
        if self.opens_at_hour == self.closes_at_hour {
            return true;
        }
        if self.opens_at_hour < self.closes_at_hour {
            hour >= self.opens_at_hour && hour < self.closes_at_hour
        } else {
            hour >= self.opens_at_hour || hour < self.closes_at_hour
        }
    }
}

/// Local hour of day derived from unix seconds and a fixed UTC offset.
///
/// Pure epoch arithmetic; daylight-saving shifts are the embedding shell's
/// problem and arrive here as a changed offset.
pub fn local_hour(unix_seconds: u64, utc_offset_minutes: i32) -> u8 {
    let offset_seconds = i64::from(utc_offset_minutes) * 60;
    let seconds_into_day = (unix_seconds as i64 + offset_seconds).rem_euclid(86_400);
    (seconds_into_day / 3_600) as u8
}

/// Once-per-period latch for the out-of-hours notice.
///
/// The notice is evaluated only on widget-open events. Opening during the
/// staffed window clears the latch, so each distinct unstaffed period shows
/// the notice exactly once no matter how often the widget is reopened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffHoursGate {
    notice_shown: bool,
}

impl OffHoursGate {
    /// Creates a gate that has not shown the notice yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one widget-open event.
    ///
    /// Returns true when this open must append the out-of-hours notice.
    pub fn note_widget_opened(&mut self, hours: &StaffedHours, local_hour: u8) -> bool {
        if hours.covers(local_hour) {
            self.notice_shown = false;
            return false;
        }
        if self.notice_shown {
            return false;
        }
        self.notice_shown = true;
        true
    }

    /// Returns true when the notice was already shown this unstaffed period.
    pub fn notice_shown(&self) -> bool {
        self.notice_shown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_is_half_open() {
        let hours = StaffedHours::default();
        assert!(hours.covers(8));
        assert!(hours.covers(12));
        assert!(hours.covers(22));
        assert!(!hours.covers(23));
        assert!(!hours.covers(7));
        assert!(!hours.covers(3));
        assert!(!hours.covers(0));
    }

    #[test]
    fn window_may_wrap_past_midnight() {
        let hours = StaffedHours {
            opens_at_hour: 22,
            closes_at_hour: 6,
        };
        assert!(hours.covers(22));
        assert!(hours.covers(23));
        assert!(hours.covers(0));
        assert!(hours.covers(5));
        assert!(!hours.covers(6));
        assert!(!hours.covers(12));
        assert!(!hours.covers(21));
    }

    #[test]
    fn equal_bounds_mean_around_the_clock_staffing() {
        let hours = StaffedHours {
            opens_at_hour: 9,
            closes_at_hour: 9,
        };
        for hour in 0..24 {
            assert!(hours.covers(hour));
        }
    }

    #[test]
    fn local_hour_applies_positive_and_negative_offsets() {
        // Midnight UTC at the epoch.
        assert_eq!(local_hour(0, 0), 0);
        // UTC+5:30.
        assert_eq!(local_hour(0, 330), 5);
        // UTC-5 wraps to the previous day.
        assert_eq!(local_hour(0, -300), 19);
        // 10:00 UTC plus two hours.
        assert_eq!(local_hour(10 * 3_600, 120), 12);
    }

    #[test]
    fn gate_shows_notice_once_per_unstaffed_period() {
        let hours = StaffedHours::default();
        let mut gate = OffHoursGate::new();

        assert!(gate.note_widget_opened(&hours, 3));
        assert!(!gate.note_widget_opened(&hours, 4));
        assert!(!gate.note_widget_opened(&hours, 6));
        assert!(gate.notice_shown());
    }

    #[test]
    fn staffed_open_rearms_the_gate() {
        let hours = StaffedHours::default();
        let mut gate = OffHoursGate::new();

        assert!(gate.note_widget_opened(&hours, 23));
        assert!(!gate.note_widget_opened(&hours, 2));

        // An open during the staffed window clears the latch.
        assert!(!gate.note_widget_opened(&hours, 10));
        assert!(!gate.notice_shown());

        // The next unstaffed period notices again.
        assert!(gate.note_widget_opened(&hours, 23));
    }
}
