//! Database access for the basket engine
//!
//! Plain async functions over `SqlitePool`, one module per aggregate. Reads
//! take the pool; multi-statement writes open their own transaction so a
//! reader never observes a half-applied change.

pub mod baskets;
pub mod cycles;
pub mod deliveries;
pub mod depots;
pub mod memberships;
pub mod pricing;

use acp_common::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};

pub(crate) fn to_json<T: Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", what, e)))
}

pub(crate) fn from_json<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", what, e)))
}

pub(crate) fn to_u32(value: i64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Internal(format!("{} out of range: {}", what, value)))
}
