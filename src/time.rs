/// Days per month, 1-indexed. February is corrected for leap years at use.
const DAYS_IN_MONTH: [u8; 13] = [0, 31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Wall-clock timestamp carried through a sample stream. `valid` is false
/// when the stream never supplied a time fix; all arithmetic is then a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timestamp {
    pub valid: bool,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Timestamp {
    pub const fn invalid() -> Self {
        Self {
            valid: false,
            year: 0,
            month: 0,
            day: 0,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }

    pub const fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            valid: true,
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    /// Advances the timestamp by one sampling period.
    ///
    /// Leap years are `year % 4 == 0` with no century correction; that is
    /// the rule the on-flash streams were written against, kept rather than
    /// fixed so old and new data decode the same way.
    pub fn advance(&mut self, period_seconds: u32) {
        if !self.valid {
            return;
        }
        let mut period = period_seconds;

        let i = (period % 60) as u8;
        period /= 60;
        self.second += i;
        if self.second >= 60 {
            self.second -= 60;
            period += 1;
        } else if period == 0 {
            return;
        }

        let i = (period % 60) as u8;
        period /= 60;
        self.minute += i;
        if self.minute >= 60 {
            self.minute -= 60;
            period += 1;
        } else if period == 0 {
            return;
        }

        let i = (period % 24) as u8;
        period /= 24;
        self.hour += i;
        if self.hour >= 24 {
            self.hour -= 24;
            period += 1;
        } else if period == 0 {
            return;
        }

        // out-of-range months can arrive from a corrupt stream; treat them
        // as 31-day months instead of panicking
        let mut days_in_month = DAYS_IN_MONTH
            .get(self.month as usize)
            .copied()
            .unwrap_or(31) as u32;
        if self.month == 2 && self.year % 4 == 0 {
            days_in_month += 1;
        }
        let days = period + self.day as u32;
        if days > days_in_month {
            self.day = (days - days_in_month + 1) as u8;
            self.month += 1;
            if self.month > 12 {
                self.month = 1;
                self.year += 1;
            }
        } else {
            self.day = days as u8;
        }
    }
}
