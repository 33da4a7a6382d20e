use std::fmt;
use std::str::FromStr;

use jiff::civil::Date;
use jiff::ToSpan;
use thiserror::Error;

/// How far apart two consecutive requested days are.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid frequency '{0}', must be one of: daily, weekly, monthly")]
pub struct InvalidFrequency(pub String);

impl FromStr for Frequency {
    type Err = InvalidFrequency;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => Err(InvalidFrequency(s.to_string())),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
        }
    }
}

/// Return the days between `start` and `end`, both inclusive.
///
/// With a monthly frequency the day of the month is kept.  If the next month
/// doesn't have that day (e.g. stepping from Jan 31), the series continues
/// on the 1st of the month after it, so 2024-01-31 is followed by 2024-03-01.
pub fn date_range(start: Date, end: Date, frequency: Frequency) -> Vec<Date> {
    match frequency {
        Frequency::Daily => start.series(1.day()).take_while(|e| *e <= end).collect(),
        Frequency::Weekly => start.series(7.days()).take_while(|e| *e <= end).collect(),
        Frequency::Monthly => {
            let mut out: Vec<Date> = Vec::new();
            let mut current = Some(start);
            while let Some(day) = current {
                if day > end {
                    break;
                }
                out.push(day);
                current = same_day_next_month(day);
            }
            out
        }
    }
}

/// `None` only when running off the end of the calendar.
fn same_day_next_month(day: Date) -> Option<Date> {
    let (year, month) = next_month(day.year(), day.month());
    match Date::new(year, month, day.day()) {
        Ok(next) => Some(next),
        Err(_) => {
            let (year, month) = next_month(year, month);
            Date::new(year, month, 1).ok()
        }
    }
}

fn next_month(year: i16, month: i8) -> (i16, i8) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}
