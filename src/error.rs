//! Error taxonomy for the aggregation pipeline.
//!
//! None of these are fatal to a running dashboard: fetch failures degrade to a
//! zero-state series and malformed rows are dropped individually.

use thiserror::Error;

/// Shared `Result` alias for library code.
pub type Result<T> = std::result::Result<T, DashboardError>;

#[derive(Debug, Error)]
pub enum DashboardError {
    /// Historical or downtime request rejected, unreachable, or undecodable.
    #[error("{endpoint} fetch failed: {details}")]
    FetchFailure {
        endpoint: &'static str,
        details: String,
    },

    /// A wire record missing a required field or carrying an unknown value.
    #[error("malformed event: {field}: {details}")]
    MalformedEvent {
        field: &'static str,
        details: String,
    },

    #[error("live subscription failed: {details}")]
    Subscription { details: String },

    #[error("invalid configuration: {details}")]
    InvalidConfig { details: String },
}

impl DashboardError {
    pub(crate) fn fetch(endpoint: &'static str, err: impl std::fmt::Display) -> Self {
        Self::FetchFailure {
            endpoint,
            details: err.to_string(),
        }
    }

    pub(crate) fn malformed(field: &'static str, details: impl Into<String>) -> Self {
        Self::MalformedEvent {
            field,
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_endpoint() {
        let err = DashboardError::fetch("counts", "connection refused");
        assert_eq!(err.to_string(), "counts fetch failed: connection refused");
    }
}
