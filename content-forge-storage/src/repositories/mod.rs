//! Repository implementations for the pipeline entities

pub mod task;
pub mod training;

#[cfg(test)]
mod training_tests;

pub use task::SqliteTaskStore;
pub use training::SqliteTrainingStore;

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Fixed-width RFC 3339 so that text ordering matches time ordering
pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::Internal(anyhow::anyhow!("invalid timestamp '{}': {}", raw, e)))
}
