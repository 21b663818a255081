//! # ACP Common Library
//!
//! Shared code for the ACP basket services including:
//! - Error type and result alias
//! - Engine configuration loading
//! - Clock abstraction and fiscal-year arithmetic
//! - Database initialization, schema and tenant settings
//! - Event types (AcpEvent enum) and the EventBus

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod fiscal_year;
pub mod time;

pub use error::{Error, Result};
pub use fiscal_year::FiscalYear;
