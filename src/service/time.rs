use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Months, Utc};

use crate::ExpiresIn;

pub fn current_time() -> DateTime<Utc> {
    Utc::now()
}

impl ExpiresIn {
    pub const ALL: [ExpiresIn; 9] = [
        ExpiresIn::Never,
        ExpiresIn::OneHour,
        ExpiresIn::TwoHours,
        ExpiresIn::TenHours,
        ExpiresIn::OneDay,
        ExpiresIn::TwoDays,
        ExpiresIn::OneWeek,
        ExpiresIn::OneMonth,
        ExpiresIn::OneYear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiresIn::Never => "never",
            ExpiresIn::OneHour => "1h",
            ExpiresIn::TwoHours => "2h",
            ExpiresIn::TenHours => "10h",
            ExpiresIn::OneDay => "1d",
            ExpiresIn::TwoDays => "2d",
            ExpiresIn::OneWeek => "1w",
            ExpiresIn::OneMonth => "1m",
            ExpiresIn::OneYear => "1y",
        }
    }

    /// `None` for [`ExpiresIn::Never`]. Months and years follow the calendar.
    pub fn deletes_at(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ExpiresIn::Never => None,
            ExpiresIn::OneHour => Some(start + Duration::hours(1)),
            ExpiresIn::TwoHours => Some(start + Duration::hours(2)),
            ExpiresIn::TenHours => Some(start + Duration::hours(10)),
            ExpiresIn::OneDay => Some(start + Duration::days(1)),
            ExpiresIn::TwoDays => Some(start + Duration::days(2)),
            ExpiresIn::OneWeek => Some(start + Duration::days(7)),
            ExpiresIn::OneMonth => start.checked_add_months(Months::new(1)),
            ExpiresIn::OneYear => start.checked_add_months(Months::new(12)),
        }
    }
}

impl fmt::Display for ExpiresIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpiresIn {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ExpiresIn::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown expiry `{value}`"))
    }
}
