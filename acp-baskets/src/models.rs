//! Domain models for deliveries, cycles, memberships and baskets

use acp_common::{Error, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Full weekday domain, 0 = Sunday
pub const ALL_WEEKDAYS: [u32; 7] = [0, 1, 2, 3, 4, 5, 6];

/// Full month domain
pub const ALL_MONTHS: [u32; 12] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];

/// ISO week number parity a delivery must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekParity {
    #[default]
    All,
    Odd,
    Even,
}

impl WeekParity {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeekParity::All => "all",
            WeekParity::Odd => "odd",
            WeekParity::Even => "even",
        }
    }

    /// Whether an ISO week number satisfies the parity
    pub fn accepts(&self, iso_week: u32) -> bool {
        match self {
            WeekParity::All => true,
            WeekParity::Odd => iso_week % 2 == 1,
            WeekParity::Even => iso_week % 2 == 0,
        }
    }
}

impl FromStr for WeekParity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(WeekParity::All),
            "odd" => Ok(WeekParity::Odd),
            "even" => Ok(WeekParity::Even),
            other => Err(Error::InvalidInput(format!("unknown week parity '{}'", other))),
        }
    }
}

/// Position-based sub-selection applied after the calendar predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFilter {
    #[default]
    All,
    Odd,
    Even,
    Quarter1,
    Quarter2,
    Quarter3,
    Quarter4,
}

impl ResultFilter {
    pub const QUARTERS: [ResultFilter; 4] = [
        ResultFilter::Quarter1,
        ResultFilter::Quarter2,
        ResultFilter::Quarter3,
        ResultFilter::Quarter4,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultFilter::All => "all",
            ResultFilter::Odd => "odd",
            ResultFilter::Even => "even",
            ResultFilter::Quarter1 => "quarter_1",
            ResultFilter::Quarter2 => "quarter_2",
            ResultFilter::Quarter3 => "quarter_3",
            ResultFilter::Quarter4 => "quarter_4",
        }
    }

    /// Whether the element at 1-based `position` of the predicate-filtered
    /// sequence is kept
    pub fn keeps(&self, position: usize) -> bool {
        match self {
            ResultFilter::All => true,
            ResultFilter::Odd => position % 2 == 1,
            ResultFilter::Even => position % 2 == 0,
            ResultFilter::Quarter1 => (position - 1) % 4 == 0,
            ResultFilter::Quarter2 => (position - 1) % 4 == 1,
            ResultFilter::Quarter3 => (position - 1) % 4 == 2,
            ResultFilter::Quarter4 => (position - 1) % 4 == 3,
        }
    }
}

impl FromStr for ResultFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(ResultFilter::All),
            "odd" => Ok(ResultFilter::Odd),
            "even" => Ok(ResultFilter::Even),
            "quarter_1" => Ok(ResultFilter::Quarter1),
            "quarter_2" => Ok(ResultFilter::Quarter2),
            "quarter_3" => Ok(ResultFilter::Quarter3),
            "quarter_4" => Ok(ResultFilter::Quarter4),
            other => Err(Error::InvalidInput(format!("unknown result filter '{}'", other))),
        }
    }
}

/// Recurrence rule selecting which calendar deliveries a membership receives
///
/// `weekdays` and `months` can only be written through their setters, which
/// drop out-of-domain values, so a stored cycle never holds invalid members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryCycle {
    pub id: i64,
    /// Language code → name
    pub names: BTreeMap<String, String>,
    /// Language code → name shown to members, falls back to `names`
    pub public_names: BTreeMap<String, String>,
    weekdays: Vec<u32>,
    months: Vec<u32>,
    pub week_parity: WeekParity,
    pub result_filter: ResultFilter,
}

impl DeliveryCycle {
    /// Unsaved cycle covering every weekday and month
    pub fn new(names: BTreeMap<String, String>) -> Self {
        Self {
            id: 0,
            names,
            public_names: BTreeMap::new(),
            weekdays: ALL_WEEKDAYS.to_vec(),
            months: ALL_MONTHS.to_vec(),
            week_parity: WeekParity::All,
            result_filter: ResultFilter::All,
        }
    }

    pub fn weekdays(&self) -> &[u32] {
        &self.weekdays
    }

    pub fn months(&self) -> &[u32] {
        &self.months
    }

    /// Replace the weekdays; values outside 0..=6 are dropped
    pub fn set_weekdays<I: IntoIterator<Item = i64>>(&mut self, weekdays: I) {
        self.weekdays = sanitize(weekdays, 0, 6);
    }

    /// Replace the months; values outside 1..=12 are dropped
    pub fn set_months<I: IntoIterator<Item = i64>>(&mut self, months: I) {
        self.months = sanitize(months, 1, 12);
    }

    pub fn with_weekdays<I: IntoIterator<Item = i64>>(mut self, weekdays: I) -> Self {
        self.set_weekdays(weekdays);
        self
    }

    pub fn with_months<I: IntoIterator<Item = i64>>(mut self, months: I) -> Self {
        self.set_months(months);
        self
    }

    /// Calendar predicate: weekday, month and ISO week parity
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        self.weekdays.contains(&date.weekday().num_days_from_sunday())
            && self.months.contains(&date.month())
            && self.week_parity.accepts(date.iso_week().week())
    }

    /// Name in `language`, else the first non-empty name following the
    /// tenant language order, else any name
    pub fn name(&self, language: &str, languages: &[String]) -> String {
        non_empty(&self.names, language)
            .or_else(|| languages.iter().find_map(|l| non_empty(&self.names, l)))
            .or_else(|| self.names.values().find(|n| !n.trim().is_empty()))
            .cloned()
            .unwrap_or_default()
    }

    /// Public name in `language`, falling back to [`DeliveryCycle::name`]
    pub fn public_name(&self, language: &str, languages: &[String]) -> String {
        non_empty(&self.public_names, language)
            .cloned()
            .unwrap_or_else(|| self.name(language, languages))
    }

    /// Key used to order cycles: first non-empty name, case-insensitive, then id
    pub fn ordering_key(&self, languages: &[String]) -> (String, i64) {
        let first_language = languages.first().map(String::as_str).unwrap_or("");
        (self.name(first_language, languages).to_lowercase(), self.id)
    }

    pub fn has_name(&self) -> bool {
        self.names.values().any(|n| !n.trim().is_empty())
    }
}

fn non_empty<'a>(map: &'a BTreeMap<String, String>, language: &str) -> Option<&'a String> {
    map.get(language).filter(|n| !n.trim().is_empty())
}

fn sanitize<I: IntoIterator<Item = i64>>(values: I, min: i64, max: i64) -> Vec<u32> {
    let mut kept: Vec<u32> = values
        .into_iter()
        .filter(|v| (min..=max).contains(v))
        .map(|v| v as u32)
        .collect();
    kept.sort_unstable();
    kept.dedup();
    kept
}

/// A concrete delivery date of the tenant calendar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delivery {
    pub id: i64,
    pub date: NaiveDate,
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delivery {} ({})", self.id, self.date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Depot {
    pub id: i64,
    pub name: String,
}

/// Complement subscribed by a membership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipComplement {
    pub basket_complement_id: i64,
    pub quantity: u32,
    /// Overrides the complement price when set
    pub price: Option<f64>,
    /// Restricts the complement to the deliveries of this cycle when set
    pub deliveries_cycle_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: i64,
    pub member_name: String,
    pub depot_id: i64,
    pub deliveries_cycle_id: i64,
    pub basket_size_id: i64,
    /// Overrides the basket size price when set
    pub basket_price: Option<f64>,
    /// Added to every basket price
    pub basket_price_extra: f64,
    pub basket_quantity: u32,
    pub started_on: NaiveDate,
    pub ended_on: NaiveDate,
    /// Aggregate of all basket prices, maintained by the reconciler
    pub price: f64,
    pub complements: Vec<MembershipComplement>,
}

impl Membership {
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.started_on && date <= self.ended_on
    }
}

/// Attributes of a membership to create
#[derive(Debug, Clone, PartialEq)]
pub struct NewMembership {
    pub member_name: String,
    pub depot_id: i64,
    pub deliveries_cycle_id: i64,
    pub basket_size_id: i64,
    pub basket_price: Option<f64>,
    pub basket_price_extra: f64,
    pub basket_quantity: u32,
    pub started_on: NaiveDate,
    pub ended_on: NaiveDate,
    pub complements: Vec<MembershipComplement>,
}

/// Complement line attached to a basket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketComplementLine {
    pub basket_complement_id: i64,
    pub quantity: u32,
    pub price: f64,
}

impl BasketComplementLine {
    pub fn total_price(&self) -> f64 {
        self.quantity as f64 * self.price
    }
}

/// One delivery's worth of a membership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basket {
    pub id: i64,
    pub membership_id: i64,
    pub delivery_id: i64,
    pub delivery_date: NaiveDate,
    pub basket_size_id: i64,
    pub basket_price: f64,
    pub quantity: u32,
    pub complements: Vec<BasketComplementLine>,
}

impl Basket {
    pub fn total_price(&self) -> f64 {
        self.basket_price * self.quantity as f64
            + self
                .complements
                .iter()
                .map(BasketComplementLine::total_price)
                .sum::<f64>()
    }
}

/// Basket to insert, priced before the write transaction opens
#[derive(Debug, Clone, PartialEq)]
pub struct NewBasket {
    pub delivery: Delivery,
    pub basket_size_id: i64,
    pub basket_price: f64,
    pub quantity: u32,
    pub complements: Vec<BasketComplementLine>,
}

impl NewBasket {
    pub fn total_price(&self) -> f64 {
        self.basket_price * self.quantity as f64
            + self
                .complements
                .iter()
                .map(BasketComplementLine::total_price)
                .sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn languages() -> Vec<String> {
        vec!["fr".to_string(), "de".to_string()]
    }

    #[test]
    fn test_invalid_weekdays_and_months_dropped() {
        let cycle = DeliveryCycle::new(names(&[("fr", "Mercredi")]))
            .with_weekdays([3, 7, -1, 3, 0])
            .with_months([0, 12, 13, 1]);

        assert_eq!(cycle.weekdays(), &[0, 3]);
        assert_eq!(cycle.months(), &[1, 12]);
    }

    #[test]
    fn test_matches_date_checks_weekday_month_and_parity() {
        let mut cycle = DeliveryCycle::new(names(&[("fr", "Mercredi")])).with_weekdays([3]);
        // 2022-01-05 is a Wednesday of ISO week 1
        let wednesday = NaiveDate::from_ymd_opt(2022, 1, 5).unwrap();
        let thursday = NaiveDate::from_ymd_opt(2022, 1, 6).unwrap();
        assert!(cycle.matches_date(wednesday));
        assert!(!cycle.matches_date(thursday));

        cycle.week_parity = WeekParity::Even;
        assert!(!cycle.matches_date(wednesday));
        cycle.week_parity = WeekParity::Odd;
        assert!(cycle.matches_date(wednesday));

        cycle.set_months([2]);
        assert!(!cycle.matches_date(wednesday));
    }

    #[test]
    fn test_result_filter_positions() {
        let kept: Vec<usize> = (1..=8).filter(|i| ResultFilter::Odd.keeps(*i)).collect();
        assert_eq!(kept, vec![1, 3, 5, 7]);
        let kept: Vec<usize> = (1..=8).filter(|i| ResultFilter::Even.keeps(*i)).collect();
        assert_eq!(kept, vec![2, 4, 6, 8]);
        let kept: Vec<usize> = (1..=8).filter(|i| ResultFilter::Quarter3.keeps(*i)).collect();
        assert_eq!(kept, vec![3, 7]);
    }

    #[test]
    fn test_enum_string_round_trip() {
        for filter in [
            ResultFilter::All,
            ResultFilter::Odd,
            ResultFilter::Even,
            ResultFilter::Quarter1,
            ResultFilter::Quarter4,
        ] {
            assert_eq!(filter.as_str().parse::<ResultFilter>().unwrap(), filter);
        }
        assert_eq!("even".parse::<WeekParity>().unwrap(), WeekParity::Even);
        assert!("weekly".parse::<WeekParity>().is_err());
    }

    #[test]
    fn test_names_fall_back() {
        let mut cycle = DeliveryCycle::new(names(&[("fr", "Mensuel"), ("de", "")]));
        assert_eq!(cycle.name("de", &languages()), "Mensuel");
        assert_eq!(cycle.public_name("fr", &languages()), "Mensuel");

        cycle.public_names = names(&[("fr", "Une fois par mois")]);
        assert_eq!(cycle.public_name("fr", &languages()), "Une fois par mois");
        assert_eq!(cycle.public_name("de", &languages()), "Mensuel");
    }

    #[test]
    fn test_basket_total_price() {
        let basket = Basket {
            id: 1,
            membership_id: 1,
            delivery_id: 1,
            delivery_date: NaiveDate::from_ymd_opt(2022, 1, 5).unwrap(),
            basket_size_id: 1,
            basket_price: 30.0,
            quantity: 2,
            complements: vec![BasketComplementLine {
                basket_complement_id: 1,
                quantity: 3,
                price: 4.5,
            }],
        };
        assert_eq!(basket.total_price(), 73.5);
    }
}
