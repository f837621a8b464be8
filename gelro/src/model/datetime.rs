//! Duration-like domain values.
//!
//! Absolute timestamps reuse the [`time`] crate types directly
//! ([`time::UtcDateTime`], [`time::PrimitiveDateTime`], [`time::Date`],
//! [`time::Time`]), only the duration family needs its own representation
//! because the protocol distinguishes absolute spans from calendar spans.
use std::fmt;

use crate::common::unit_error;

unit_error! {
    /// An error constructing a [`Duration`] with mixed component signs.
    pub struct MixedSigns("duration components must have a uniform sign");
}

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;

/// A span of time with separate calendar and absolute components.
///
/// The wire format for `std::duration` only carries the absolute part,
/// so a value with non-zero calendar components (years, months, weeks,
/// days) is rejected by the absolute duration codec and must go through
/// [`RelativeDuration`] instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Duration {
    years: i32,
    months: i32,
    weeks: i32,
    days: i32,
    hours: i64,
    minutes: i64,
    seconds: i64,
    microseconds: i64,
}

impl Duration {
    /// Create a duration from individual components.
    ///
    /// All components must share one sign.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        years: i32,
        months: i32,
        weeks: i32,
        days: i32,
        hours: i64,
        minutes: i64,
        seconds: i64,
        microseconds: i64,
    ) -> Result<Self, MixedSigns> {
        let any_pos = years > 0 || months > 0 || weeks > 0 || days > 0
            || hours > 0 || minutes > 0 || seconds > 0 || microseconds > 0;
        let any_neg = years < 0 || months < 0 || weeks < 0 || days < 0
            || hours < 0 || minutes < 0 || seconds < 0 || microseconds < 0;
        if any_pos && any_neg {
            return Err(MixedSigns);
        }
        Ok(Self { years, months, weeks, days, hours, minutes, seconds, microseconds })
    }

    /// An absolute duration from a microsecond count.
    pub fn from_micros(micros: i64) -> Self {
        let hours = micros / MICROS_PER_HOUR;
        let rem = micros % MICROS_PER_HOUR;
        let minutes = rem / MICROS_PER_MINUTE;
        let rem = rem % MICROS_PER_MINUTE;
        let seconds = rem / MICROS_PER_SECOND;
        let microseconds = rem % MICROS_PER_SECOND;
        Self {
            years: 0, months: 0, weeks: 0, days: 0,
            hours, minutes, seconds, microseconds,
        }
    }

    pub fn years(&self) -> i32 { self.years }
    pub fn months(&self) -> i32 { self.months }
    pub fn weeks(&self) -> i32 { self.weeks }
    pub fn days(&self) -> i32 { self.days }
    pub fn hours(&self) -> i64 { self.hours }
    pub fn minutes(&self) -> i64 { self.minutes }
    pub fn seconds(&self) -> i64 { self.seconds }
    pub fn microseconds(&self) -> i64 { self.microseconds }

    /// `-1`, `0` or `1`.
    pub fn sign(&self) -> i32 {
        let fields = [
            self.years as i64, self.months as i64, self.weeks as i64,
            self.days as i64, self.hours, self.minutes, self.seconds,
            self.microseconds,
        ];
        fields.iter().find(|v| **v != 0).map_or(0, |v| v.signum() as i32)
    }

    /// First non-zero calendar component name, if any.
    pub(crate) fn calendar_component(&self) -> Option<&'static str> {
        if self.years != 0 {
            Some("years")
        } else if self.months != 0 {
            Some("months")
        } else if self.weeks != 0 {
            Some("weeks")
        } else if self.days != 0 {
            Some("days")
        } else {
            None
        }
    }

    /// Absolute part collapsed to microseconds.
    ///
    /// Calendar components are not included, encode rejects them first.
    pub(crate) fn absolute_micros(&self) -> i64 {
        self.hours * MICROS_PER_HOUR
            + self.minutes * MICROS_PER_MINUTE
            + self.seconds * MICROS_PER_SECOND
            + self.microseconds
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sign() < 0 {
            f.write_str("-")?;
        }
        f.write_str("P")?;
        let mut date = false;
        for (value, unit) in [
            (self.years.unsigned_abs() as u64, "Y"),
            (self.months.unsigned_abs() as u64, "M"),
            (self.weeks.unsigned_abs() as u64, "W"),
            (self.days.unsigned_abs() as u64, "D"),
        ] {
            if value != 0 {
                write!(f, "{value}{unit}")?;
                date = true;
            }
        }
        let time = write_time_part(
            f,
            self.hours.unsigned_abs(),
            self.minutes.unsigned_abs(),
            self.seconds.unsigned_abs(),
            self.microseconds.unsigned_abs(),
        )?;
        if !date && !time {
            f.write_str("T0S")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({self})")
    }
}

fn write_time_part(
    f: &mut fmt::Formatter<'_>,
    hours: u64,
    minutes: u64,
    seconds: u64,
    micros: u64,
) -> Result<bool, fmt::Error> {
    if hours == 0 && minutes == 0 && seconds == 0 && micros == 0 {
        return Ok(false);
    }
    f.write_str("T")?;
    if hours != 0 {
        write!(f, "{hours}H")?;
    }
    if minutes != 0 {
        write!(f, "{minutes}M")?;
    }
    if micros != 0 {
        let mut frac = format!("{micros:06}");
        frac.truncate(frac.trim_end_matches('0').len());
        write!(f, "{seconds}.{frac}S")?;
    } else if seconds != 0 {
        write!(f, "{seconds}S")?;
    }
    Ok(true)
}

/// A calendar-relative span: absolute microseconds plus separate day and
/// month counts, matching the wire layout of `cal::relative_duration`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelativeDuration {
    micros: i64,
    days: i32,
    months: i32,
}

impl RelativeDuration {
    /// Create from the wire components.
    pub fn new(micros: i64, days: i32, months: i32) -> Self {
        Self { micros, days, months }
    }

    /// Create from calendar components, collapsing years into months and
    /// weeks into days.
    #[allow(clippy::too_many_arguments)]
    pub fn from_components(
        years: i32,
        months: i32,
        weeks: i32,
        days: i32,
        hours: i64,
        minutes: i64,
        seconds: i64,
        microseconds: i64,
    ) -> Self {
        Self {
            micros: hours * MICROS_PER_HOUR
                + minutes * MICROS_PER_MINUTE
                + seconds * MICROS_PER_SECOND
                + microseconds,
            days: days + 7 * weeks,
            months: months + 12 * years,
        }
    }

    pub fn micros(&self) -> i64 { self.micros }
    pub fn days(&self) -> i32 { self.days }
    pub fn months(&self) -> i32 { self.months }

    pub fn years(&self) -> i32 { self.months / 12 }
    pub fn hours(&self) -> i64 { self.micros / MICROS_PER_HOUR }
}

impl fmt::Display for RelativeDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.micros == 0 && self.days == 0 && self.months == 0 {
            return f.write_str("PT0S");
        }
        f.write_str("P")?;
        for (value, unit) in [
            ((self.months / 12) as i64, "Y"),
            ((self.months % 12) as i64, "M"),
            ((self.days / 7) as i64, "W"),
            ((self.days % 7) as i64, "D"),
        ] {
            if value != 0 {
                write!(f, "{value}{unit}")?;
            }
        }
        let sign = if self.micros < 0 { "-" } else { "" };
        let micros = self.micros.unsigned_abs();
        let hours = micros / MICROS_PER_HOUR as u64;
        let minutes = micros % MICROS_PER_HOUR as u64 / MICROS_PER_MINUTE as u64;
        let seconds = micros % MICROS_PER_MINUTE as u64 / MICROS_PER_SECOND as u64;
        let frac = micros % MICROS_PER_SECOND as u64;
        if hours != 0 || minutes != 0 || seconds != 0 || frac != 0 {
            f.write_str("T")?;
            if hours != 0 {
                write!(f, "{sign}{hours}H")?;
            }
            if minutes != 0 {
                write!(f, "{sign}{minutes}M")?;
            }
            if frac != 0 {
                let mut frac = format!("{frac:06}");
                frac.truncate(frac.trim_end_matches('0').len());
                write!(f, "{sign}{seconds}.{frac}S")?;
            } else if seconds != 0 {
                write!(f, "{sign}{seconds}S")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RelativeDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelativeDuration({self})")
    }
}

/// A whole-day calendar span, the wire layout of `cal::date_duration`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateDuration {
    days: i32,
    months: i32,
}

impl DateDuration {
    pub fn new(days: i32, months: i32) -> Self {
        Self { days, months }
    }

    pub fn from_components(years: i32, months: i32, weeks: i32, days: i32) -> Self {
        Self {
            days: days + 7 * weeks,
            months: months + 12 * years,
        }
    }

    pub fn days(&self) -> i32 { self.days }
    pub fn months(&self) -> i32 { self.months }
}

impl fmt::Display for DateDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.days == 0 && self.months == 0 {
            return f.write_str("PT0S");
        }
        f.write_str("P")?;
        for (value, unit) in [
            (self.months / 12, "Y"),
            (self.months % 12, "M"),
            (self.days, "D"),
        ] {
            if value != 0 {
                write!(f, "{value}{unit}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DateDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DateDuration({self})")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn duration_sign_validation() {
        assert!(Duration::new(1, 0, 0, 0, -2, 0, 0, 0).is_err());
        assert!(Duration::new(0, 0, 0, 0, 2, 30, 0, 0).is_ok());
        assert!(Duration::new(-1, -2, 0, 0, 0, 0, 0, 0).is_ok());
    }

    #[test]
    fn duration_display() {
        let d = Duration::new(0, 0, 0, 0, 1, 2, 3, 4).unwrap();
        assert_eq!(d.to_string(), "PT1H2M3.000004S");
        assert_eq!(Duration::from_micros(0).to_string(), "PT0S");
        let d = Duration::new(1, 2, 0, 3, 0, 0, 0, 0).unwrap();
        assert_eq!(d.to_string(), "P1Y2M3D");
    }

    #[test]
    fn duration_from_micros() {
        let d = Duration::from_micros(3_723_000_004);
        assert_eq!(d.hours(), 1);
        assert_eq!(d.minutes(), 2);
        assert_eq!(d.seconds(), 3);
        assert_eq!(d.microseconds(), 4);
        assert_eq!(d.calendar_component(), None);
        assert_eq!(d.absolute_micros(), 3_723_000_004);
    }

    #[test]
    fn relative_duration_components() {
        let d = RelativeDuration::from_components(1, 1, 1, 1, 0, 0, 0, 0);
        assert_eq!(d.months(), 13);
        assert_eq!(d.days(), 8);
        assert_eq!(d.to_string(), "P1Y1M1W1D");
    }

    #[test]
    fn date_duration_display() {
        assert_eq!(DateDuration::new(0, 0).to_string(), "PT0S");
        assert_eq!(DateDuration::from_components(2, 1, 0, 4).to_string(), "P2Y1M4D");
    }
}
