//! Business date selection for report runs.
//!
//! Reports always cover the previous business day. Sunday is not a business
//! day, so a Monday run reports on Saturday.

use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::error::TableError;
use crate::value::DATE_FORMAT;

/// The day a report run on `today` should cover.
pub fn effective_day(today: NaiveDate) -> NaiveDate {
    let back = if today.weekday() == Weekday::Mon { 2 } else { 1 };
    today - Days::new(back)
}

/// [`effective_day`] formatted as `DD.MM.YYYY`, the form the ERP expects.
pub fn effective_date(today: NaiveDate) -> String {
    format_date(effective_day(today))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse an explicit `DD.MM.YYYY` override.
pub fn parse_effective_date(input: &str) -> Result<NaiveDate, TableError> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT)
        .map_err(|_| TableError::InvalidDate(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn monday_reports_saturday() {
        assert_eq!(effective_date(ymd(2025, 9, 29)), "27.09.2025");
    }

    #[test]
    fn tuesday_reports_monday() {
        assert_eq!(effective_date(ymd(2025, 9, 30)), "29.09.2025");
    }

    #[test]
    fn every_weekday_of_a_week() {
        // 2025-09-29 is a Monday
        let expected = [
            "27.09.2025", // Mon
            "29.09.2025", // Tue
            "30.09.2025", // Wed
            "01.10.2025", // Thu
            "02.10.2025", // Fri
            "03.10.2025", // Sat
            "04.10.2025", // Sun
        ];
        for (offset, want) in expected.iter().enumerate() {
            let today = ymd(2025, 9, 29) + Days::new(offset as u64);
            assert_eq!(effective_date(today), *want, "today = {today}");
        }
    }

    #[test]
    fn crosses_year_boundary() {
        // 2024-01-01 is a Monday
        assert_eq!(effective_date(ymd(2024, 1, 1)), "30.12.2023");
        assert_eq!(effective_date(ymd(2025, 1, 1)), "31.12.2024");
    }

    #[test]
    fn parse_override() {
        assert_eq!(parse_effective_date("27.09.2025").unwrap(), ymd(2025, 9, 27));
        assert!(parse_effective_date("2025-09-27").is_err());
    }

    proptest! {
        #[test]
        fn one_day_back_except_monday(days in 0u64..40_000) {
            let today = ymd(1990, 1, 1) + Days::new(days);
            let got = effective_day(today);
            let gap = (today - got).num_days();
            if today.weekday() == Weekday::Mon {
                prop_assert_eq!(gap, 2);
                prop_assert_eq!(got.weekday(), Weekday::Sat);
            } else {
                prop_assert_eq!(gap, 1);
            }
        }
    }
}
