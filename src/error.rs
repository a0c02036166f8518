//! Error handling for fundbook
//!
//! Domain failures are modelled as [`FundbookError`] so callers can tell a
//! missing record from a malformed input; everything else travels as an
//! `anyhow::Error` with context attached.

use thiserror::Error;

/// Domain error kinds surfaced by ingestion, valuation and reporting
#[derive(Error, Debug)]
pub enum FundbookError {
    #[error("unrecognized date format: '{0}'")]
    InvalidDate(String),

    #[error("invalid number: '{0}'")]
    InvalidNumber(String),

    #[error("missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("{0}")]
    BusinessRule(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("invalid date range: {start} is after {end}")]
    InvalidRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("unsupported file: {0}")]
    UnsupportedFile(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FundbookError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        FundbookError::NotFound {
            entity,
            key: key.into(),
        }
    }
}

/// True when the error chain bottoms out in a [`FundbookError::NotFound`].
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<FundbookError>(),
            Some(FundbookError::NotFound { .. })
        )
    })
}

/// Domain errors are safe to show to the user verbatim; anything else is not.
pub fn user_facing_message(err: &anyhow::Error) -> Option<String> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<FundbookError>())
        .map(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_missing_columns_lists_every_label() {
        let err = FundbookError::MissingColumns(vec!["集团号".into(), "存量时间".into()]);
        assert_eq!(err.to_string(), "missing required column(s): 集团号, 存量时间");
    }

    #[test]
    fn test_not_found_survives_context_chain() {
        let result: anyhow::Result<()> = Err(FundbookError::not_found("client", "000123456").into());
        let err = result.context("loading portfolio").unwrap_err();
        assert!(is_not_found(&err));
        assert_eq!(
            user_facing_message(&err).as_deref(),
            Some("client not found: 000123456")
        );
    }

    #[test]
    fn test_generic_errors_are_not_user_facing() {
        let err = anyhow::anyhow!("disk on fire");
        assert!(!is_not_found(&err));
        assert!(user_facing_message(&err).is_none());
    }
}
