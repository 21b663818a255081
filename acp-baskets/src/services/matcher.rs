//! Recurrence matcher
//!
//! Selects the deliveries of a fiscal year that belong to a cycle, in two
//! stages:
//!
//! 1. calendar predicates: weekday, month and ISO week parity;
//! 2. position filter: the 1-based position of each survivor of stage 1
//!    decides whether it is kept (`odd`, `even`, `quarter_N`).
//!
//! Stage 2 looks at positions only. Narrowing the weekdays of an `odd` cycle
//! therefore changes which absolute dates survive even when those dates did
//! not move; this is the intended behavior.

use acp_common::db::TenantSettings;
use acp_common::{FiscalYear, Result};
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::HashSet;

use crate::db;
use crate::models::{Delivery, DeliveryCycle};

/// Apply both stages to `deliveries`
///
/// The input is ordered by date then id and deduplicated by id first, so the
/// result does not depend on how the caller sorted it.
pub fn match_deliveries(cycle: &DeliveryCycle, deliveries: &[Delivery]) -> Vec<Delivery> {
    let mut ordered = deliveries.to_vec();
    ordered.sort_by_key(|d| (d.date, d.id));
    let mut seen = HashSet::new();
    ordered.retain(|d| seen.insert(d.id));

    ordered
        .into_iter()
        .filter(|d| cycle.matches_date(d.date))
        .enumerate()
        .filter(|(index, _)| cycle.result_filter.keeps(index + 1))
        .map(|(_, delivery)| delivery)
        .collect()
}

/// Matcher reading deliveries from the calendar tables
#[derive(Clone)]
pub struct Matcher {
    pool: SqlitePool,
}

impl Matcher {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Deliveries of `fiscal_year` belonging to the cycle, ascending by date
    pub async fn deliveries(
        &self,
        cycle: &DeliveryCycle,
        fiscal_year: FiscalYear,
    ) -> Result<Vec<Delivery>> {
        let deliveries = db::deliveries::list_deliveries(&self.pool, fiscal_year).await?;
        Ok(match_deliveries(cycle, &deliveries))
    }

    /// Matched deliveries of every fiscal year intersecting `[from, to]`,
    /// restricted to that range
    ///
    /// Positions are computed over each whole fiscal year before the range
    /// restriction, so a membership starting mid-year sees the same dates
    /// as one covering the full year.
    pub async fn deliveries_between(
        &self,
        cycle: &DeliveryCycle,
        from: NaiveDate,
        to: NaiveDate,
        start_month: u32,
    ) -> Result<Vec<Delivery>> {
        let mut matched = Vec::new();
        for fiscal_year in FiscalYear::covering(from, to, start_month)? {
            matched.extend(
                self.deliveries(cycle, fiscal_year)
                    .await?
                    .into_iter()
                    .filter(|d| d.date >= from && d.date <= to),
            );
        }
        Ok(matched)
    }

    /// Matched deliveries of the fiscal year of `from`, restricted to `[from, to]`
    pub async fn deliveries_in(
        &self,
        cycle: &DeliveryCycle,
        from: NaiveDate,
        to: NaiveDate,
        start_month: u32,
    ) -> Result<Vec<Delivery>> {
        let fiscal_year = FiscalYear::for_date(from, start_month)?;
        Ok(self
            .deliveries(cycle, fiscal_year)
            .await?
            .into_iter()
            .filter(|d| d.date >= from && d.date <= to)
            .collect())
    }

    pub async fn includes_delivery(
        &self,
        cycle: &DeliveryCycle,
        delivery: &Delivery,
        start_month: u32,
    ) -> Result<bool> {
        let fiscal_year = FiscalYear::for_date(delivery.date, start_month)?;
        Ok(self
            .deliveries(cycle, fiscal_year)
            .await?
            .iter()
            .any(|d| d.id == delivery.id))
    }

    /// Every cycle whose match includes the delivery, in cycle order
    pub async fn cycles_for_delivery(
        &self,
        delivery: &Delivery,
        settings: &TenantSettings,
    ) -> Result<Vec<DeliveryCycle>> {
        let fiscal_year = settings.fiscal_year_for(delivery.date)?;
        let year_deliveries = db::deliveries::list_deliveries(&self.pool, fiscal_year).await?;

        let cycles = db::cycles::list_cycles(&self.pool, &settings.languages).await?;
        Ok(cycles
            .into_iter()
            .filter(|cycle| {
                match_deliveries(cycle, &year_deliveries)
                    .iter()
                    .any(|d| d.id == delivery.id)
            })
            .collect())
    }

    /// Current and next fiscal year matches, deduplicated by id
    pub async fn current_and_future_deliveries(
        &self,
        cycle: &DeliveryCycle,
        settings: &TenantSettings,
        today: NaiveDate,
    ) -> Result<Vec<Delivery>> {
        let current = settings.current_fiscal_year(today)?;
        let mut deliveries = self.deliveries(cycle, current).await?;
        deliveries.extend(self.deliveries(cycle, current.next()).await?);

        let mut seen = HashSet::new();
        deliveries.retain(|d| seen.insert(d.id));
        Ok(deliveries)
    }

    pub async fn current_and_future_delivery_ids(
        &self,
        cycle: &DeliveryCycle,
        settings: &TenantSettings,
        today: NaiveDate,
    ) -> Result<Vec<i64>> {
        Ok(self
            .current_and_future_deliveries(cycle, settings, today)
            .await?
            .into_iter()
            .map(|d| d.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultFilter, WeekParity};
    use chrono::Duration;
    use std::collections::BTreeMap;

    fn cycle() -> DeliveryCycle {
        let mut names = BTreeMap::new();
        names.insert("fr".to_string(), "Test".to_string());
        DeliveryCycle::new(names)
    }

    /// Every day of 2022, ids in date order
    fn year_2022() -> Vec<Delivery> {
        let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        (0..365)
            .map(|i| Delivery {
                id: i + 1,
                date: start + Duration::days(i),
            })
            .collect()
    }

    /// Wednesdays and Thursdays of January 2022 weeks 1-3
    fn january_deliveries() -> Vec<Delivery> {
        ["2022-01-05", "2022-01-06", "2022-01-12", "2022-01-13", "2022-01-19", "2022-01-20"]
            .iter()
            .enumerate()
            .map(|(i, date)| Delivery {
                id: i as i64 + 1,
                date: date.parse().unwrap(),
            })
            .collect()
    }

    fn dates(deliveries: &[Delivery]) -> Vec<String> {
        deliveries.iter().map(|d| d.date.to_string()).collect()
    }

    #[test]
    fn test_empty_weekdays_or_months_match_nothing() {
        let deliveries = year_2022();
        assert!(match_deliveries(&cycle().with_weekdays(Vec::<i64>::new()), &deliveries).is_empty());
        assert!(match_deliveries(&cycle().with_months(Vec::<i64>::new()), &deliveries).is_empty());
    }

    #[test]
    fn test_empty_calendar_matches_nothing() {
        assert!(match_deliveries(&cycle(), &[]).is_empty());
    }

    #[test]
    fn test_weekday_filter() {
        let matched = match_deliveries(&cycle().with_weekdays([3]), &january_deliveries());
        assert_eq!(dates(&matched), vec!["2022-01-05", "2022-01-12", "2022-01-19"]);
    }

    #[test]
    fn test_week_parity_uses_iso_weeks() {
        // 2022-01-05 is ISO week 1, 2022-01-12 week 2, 2022-01-19 week 3
        let mut odd = cycle().with_weekdays([3]);
        odd.week_parity = WeekParity::Odd;
        assert_eq!(
            dates(&match_deliveries(&odd, &january_deliveries())),
            vec!["2022-01-05", "2022-01-19"]
        );

        let mut even = cycle().with_weekdays([3]);
        even.week_parity = WeekParity::Even;
        assert_eq!(dates(&match_deliveries(&even, &january_deliveries())), vec!["2022-01-12"]);
    }

    #[test]
    fn test_position_filter_follows_stage_one_order() {
        let mut odd = cycle().with_weekdays([3, 4]);
        odd.result_filter = ResultFilter::Odd;
        assert_eq!(
            dates(&match_deliveries(&odd, &january_deliveries())),
            vec!["2022-01-05", "2022-01-12", "2022-01-19"]
        );

        // Narrowing to Thursdays renumbers the survivors
        odd.set_weekdays([4]);
        assert_eq!(
            dates(&match_deliveries(&odd, &january_deliveries())),
            vec!["2022-01-06", "2022-01-20"]
        );
    }

    #[test]
    fn test_odd_count_is_half_rounded_up() {
        let deliveries = year_2022();
        for weekdays in [vec![1], vec![2, 5], vec![0, 1, 2, 3, 4, 5, 6]] {
            let all = cycle().with_weekdays(weekdays.clone());
            let mut odd = all.clone();
            odd.result_filter = ResultFilter::Odd;

            let all_count = match_deliveries(&all, &deliveries).len();
            let odd_count = match_deliveries(&odd, &deliveries).len();
            assert_eq!(odd_count, all_count.div_ceil(2));
        }
    }

    #[test]
    fn test_quarters_partition_all() {
        let deliveries = year_2022();
        let all = cycle().with_weekdays([2, 5]).with_months([3, 4, 5, 10]);
        let all_matched = match_deliveries(&all, &deliveries);

        let mut seen: Vec<i64> = Vec::new();
        for quarter in ResultFilter::QUARTERS {
            let mut quartered = all.clone();
            quartered.result_filter = quarter;
            seen.extend(match_deliveries(&quartered, &deliveries).iter().map(|d| d.id));
        }
        seen.sort_unstable();

        let expected: Vec<i64> = all_matched.iter().map(|d| d.id).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_unsorted_and_duplicated_input_is_normalized() {
        let mut deliveries = january_deliveries();
        deliveries.reverse();
        deliveries.push(deliveries[0]);

        let mut even = cycle().with_weekdays([3, 4]);
        even.result_filter = ResultFilter::Even;
        let first = match_deliveries(&even, &deliveries);
        let second = match_deliveries(&even, &deliveries);

        assert_eq!(first, second);
        assert_eq!(dates(&first), vec!["2022-01-06", "2022-01-13", "2022-01-20"]);
    }
}
