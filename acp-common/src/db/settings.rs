//! Tenant settings
//!
//! Read/write tenant configuration from the settings table (key-value store).
//! Everything here is tenant-wide; one database holds one tenant.

use crate::{Error, FiscalYear, Result};
use chrono::NaiveDate;
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

pub const FISCAL_YEAR_START_MONTH: &str = "fiscal_year_start_month";
pub const LANGUAGES: &str = "languages";

/// Languages a tenant may enable, in display order
pub const SUPPORTED_LANGUAGES: [&str; 3] = ["fr", "de", "it"];

/// Tenant-wide settings needed by the basket engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSettings {
    pub fiscal_year_start_month: u32,
    pub languages: Vec<String>,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            fiscal_year_start_month: 1,
            languages: SUPPORTED_LANGUAGES.iter().map(|l| l.to_string()).collect(),
        }
    }
}

impl TenantSettings {
    pub fn fiscal_year_for(&self, date: NaiveDate) -> Result<FiscalYear> {
        FiscalYear::for_date(date, self.fiscal_year_start_month)
    }

    pub fn fiscal_year(&self, year: i32) -> Result<FiscalYear> {
        FiscalYear::new(year, self.fiscal_year_start_month)
    }

    pub fn current_fiscal_year(&self, today: NaiveDate) -> Result<FiscalYear> {
        FiscalYear::current(today, self.fiscal_year_start_month)
    }

    pub fn next_fiscal_year(&self, today: NaiveDate) -> Result<FiscalYear> {
        Ok(self.current_fiscal_year(today)?.next())
    }
}

/// Load tenant settings, falling back to defaults for missing keys
pub async fn load_tenant_settings(db: &Pool<Sqlite>) -> Result<TenantSettings> {
    let defaults = TenantSettings::default();

    let start_month = get_setting::<u32>(db, FISCAL_YEAR_START_MONTH)
        .await?
        .unwrap_or(defaults.fiscal_year_start_month);
    if !(1..=12).contains(&start_month) {
        return Err(Error::Config(format!(
            "{} must be within 1..=12, got {}",
            FISCAL_YEAR_START_MONTH, start_month
        )));
    }

    let languages = match get_setting::<String>(db, LANGUAGES).await? {
        Some(raw) => parse_languages(&raw),
        None => defaults.languages,
    };

    Ok(TenantSettings {
        fiscal_year_start_month: start_month,
        languages,
    })
}

/// Set the fiscal year start month (1..=12)
pub async fn set_fiscal_year_start_month(db: &Pool<Sqlite>, month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(Error::InvalidInput(format!(
            "fiscal year start month must be within 1..=12, got {}",
            month
        )));
    }
    set_setting(db, FISCAL_YEAR_START_MONTH, month).await
}

/// Set the tenant languages, unsupported ones are dropped
pub async fn set_languages(db: &Pool<Sqlite>, languages: &[&str]) -> Result<()> {
    let kept: Vec<&str> = languages
        .iter()
        .copied()
        .filter(|l| SUPPORTED_LANGUAGES.contains(l))
        .collect();
    set_setting(db, LANGUAGES, kept.join(",")).await
}

fn parse_languages(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|l| SUPPORTED_LANGUAGES.contains(l))
        .map(str::to_string)
        .collect()
}

/// Initialize missing default settings
pub(crate) async fn init_default_settings(db: &Pool<Sqlite>) -> Result<()> {
    ensure_setting(db, FISCAL_YEAR_START_MONTH, "1").await?;
    ensure_setting(db, LANGUAGES, &SUPPORTED_LANGUAGES.join(",")).await?;
    Ok(())
}

/// Insert a setting unless present, resetting NULL values to the default
async fn ensure_setting(db: &Pool<Sqlite>, key: &str, default_value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value WHERE settings.value IS NULL
        "#,
    )
    .bind(key)
    .bind(default_value)
    .execute(db)
    .await?;

    Ok(())
}

/// Generic setting getter
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await?;

    match value.flatten() {
        Some(s) => match s.parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_languages_drops_unknown() {
        assert_eq!(parse_languages("fr, en,it"), vec!["fr", "it"]);
        assert!(parse_languages("").is_empty());
    }

    #[test]
    fn test_tenant_fiscal_years() {
        let settings = TenantSettings {
            fiscal_year_start_month: 4,
            languages: vec!["fr".to_string()],
        };
        let today = NaiveDate::from_ymd_opt(2022, 2, 1).unwrap();
        assert_eq!(settings.current_fiscal_year(today).unwrap().year(), 2021);
        assert_eq!(settings.next_fiscal_year(today).unwrap().year(), 2022);
    }
}
