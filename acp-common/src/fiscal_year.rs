//! Fiscal year arithmetic
//!
//! A fiscal year is identified by the calendar year in which it starts. With a
//! start month of 4, fiscal year 2022 runs from 2022-04-01 to 2023-03-31.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FiscalYear {
    year: i32,
    start_month: u32,
}

impl FiscalYear {
    /// Build a fiscal year from its starting calendar year
    pub fn new(year: i32, start_month: u32) -> Result<Self> {
        if !(1..=12).contains(&start_month) {
            return Err(Error::Config(format!(
                "fiscal_year_start_month must be within 1..=12, got {}",
                start_month
            )));
        }
        Ok(Self { year, start_month })
    }

    /// Fiscal year containing `date`
    pub fn for_date(date: NaiveDate, start_month: u32) -> Result<Self> {
        let year = if date.month() >= start_month {
            date.year()
        } else {
            date.year() - 1
        };
        Self::new(year, start_month)
    }

    /// Fiscal year containing `today`
    pub fn current(today: NaiveDate, start_month: u32) -> Result<Self> {
        Self::for_date(today, start_month)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn start_month(&self) -> u32 {
        self.start_month
    }

    /// First day of the fiscal year
    pub fn beginning(&self) -> NaiveDate {
        // start_month is validated in new(), day 1 always exists
        NaiveDate::from_ymd_opt(self.year, self.start_month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last day of the fiscal year (inclusive)
    pub fn end(&self) -> NaiveDate {
        self.beginning()
            .checked_add_months(Months::new(12))
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.beginning() && date <= self.end()
    }

    pub fn next(&self) -> Self {
        Self {
            year: self.year + 1,
            start_month: self.start_month,
        }
    }

    /// Every fiscal year intersecting the inclusive range `[from, to]`
    pub fn covering(from: NaiveDate, to: NaiveDate, start_month: u32) -> Result<Vec<Self>> {
        if to < from {
            return Ok(Vec::new());
        }
        let first = Self::for_date(from, start_month)?;
        let last = Self::for_date(to, start_month)?;
        Ok((first.year..=last.year)
            .map(|year| Self { year, start_month })
            .collect())
    }
}

impl fmt::Display for FiscalYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_month == 1 {
            write!(f, "{}", self.year)
        } else {
            write!(f, "{}-{}", self.year, self.year + 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_calendar_aligned_fiscal_year() {
        let fy = FiscalYear::for_date(date(2022, 6, 15), 1).unwrap();
        assert_eq!(fy.year(), 2022);
        assert_eq!(fy.beginning(), date(2022, 1, 1));
        assert_eq!(fy.end(), date(2022, 12, 31));
        assert_eq!(fy.to_string(), "2022");
    }

    #[test]
    fn test_shifted_fiscal_year() {
        let fy = FiscalYear::for_date(date(2023, 2, 10), 4).unwrap();
        assert_eq!(fy.year(), 2022);
        assert_eq!(fy.beginning(), date(2022, 4, 1));
        assert_eq!(fy.end(), date(2023, 3, 31));
        assert_eq!(fy.to_string(), "2022-2023");
        assert!(fy.contains(date(2022, 4, 1)));
        assert!(!fy.contains(date(2023, 4, 1)));
    }

    #[test]
    fn test_invalid_start_month_rejected() {
        assert!(FiscalYear::new(2022, 0).is_err());
        assert!(FiscalYear::new(2022, 13).is_err());
    }

    #[test]
    fn test_covering_spans_boundaries() {
        let years = FiscalYear::covering(date(2022, 3, 1), date(2023, 5, 1), 4).unwrap();
        let years: Vec<i32> = years.iter().map(|fy| fy.year()).collect();
        assert_eq!(years, vec![2021, 2022, 2023]);

        assert!(FiscalYear::covering(date(2022, 3, 1), date(2022, 2, 1), 1)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_next_keeps_start_month() {
        let fy = FiscalYear::new(2022, 4).unwrap();
        assert_eq!(fy.next().year(), 2023);
        assert_eq!(fy.next().beginning(), date(2023, 4, 1));
    }
}
