// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for recording, persisting and delivering events.

use std::fmt;

use thiserror::Error;

use crate::constants::{
    EVENT_VERSION, MAX_ATTRIBUTES_AND_METRICS, MAX_ATTRIBUTE_VALUE_LENGTH, MAX_NAME_LENGTH,
    MIN_NAME_LENGTH,
};

/// Reasons an event is refused before it reaches the queue.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unsupported event version '{0}', expected '{}'", EVENT_VERSION)]
    Version(String),
    #[error("metric '{0}' is not a finite number")]
    MetricValue(String),
    #[error(
        "event has {0} attributes and metrics combined, at most {} are allowed",
        MAX_ATTRIBUTES_AND_METRICS
    )]
    TooManyEntries(usize),
    #[error(
        "attribute name '{0}' must be between {} and {} characters",
        MIN_NAME_LENGTH,
        MAX_NAME_LENGTH
    )]
    AttributeName(String),
    #[error(
        "metric name '{0}' must be between {} and {} characters",
        MIN_NAME_LENGTH,
        MAX_NAME_LENGTH
    )]
    MetricName(String),
    #[error(
        "value of attribute '{name}' is {length} characters, at most {} are allowed",
        MAX_ATTRIBUTE_VALUE_LENGTH
    )]
    AttributeValue { name: String, length: usize },
}

/// Errors raised by the persistence port.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Poisoned,
}

/// Machine-readable failure class reported by the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    Serialization,
    Validation,
    Throttling,
    /// The request never produced a response (connection, timeout, ...).
    Network,
    Other(String),
}

impl ErrorCode {
    /// Parses the error type sent by the endpoint. Namespace prefixes
    /// (`namespace#Code`), trailing `:detail` and the `Exception` suffix are
    /// ignored.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let without_detail = trimmed.split(':').next().unwrap_or(trimmed);
        let name = without_detail.rsplit('#').next().unwrap_or(without_detail);
        let name = name.strip_suffix("Exception").unwrap_or(name);
        match name {
            "BadRequest" => Self::BadRequest,
            "Serialization" => Self::Serialization,
            "Validation" => Self::Validation,
            "Throttling" => Self::Throttling,
            other => Self::Other(other.to_string()),
        }
    }

    /// Requests rejected with these codes can never succeed on retry.
    #[must_use]
    pub fn is_non_retryable(&self) -> bool {
        matches!(self, Self::BadRequest | Self::Serialization | Self::Validation)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest => write!(f, "BadRequestException"),
            Self::Serialization => write!(f, "SerializationException"),
            Self::Validation => write!(f, "ValidationException"),
            Self::Throttling => write!(f, "ThrottlingException"),
            Self::Network => write!(f, "NetworkError"),
            Self::Other(code) => write!(f, "{code}"),
        }
    }
}

/// A failed batch submission.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{code} (status {status:?}): {message}")]
pub struct SubmitError {
    pub status: Option<u16>,
    pub code: ErrorCode,
    pub message: String,
}

impl SubmitError {
    pub fn new(status: Option<u16>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(None, ErrorCode::Network, message)
    }
}

/// Errors surfaced by the engine handle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("engine is not running: {0}")]
    ChannelClosed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_parse_known_codes() {
        assert_eq!(ErrorCode::parse("BadRequestException"), ErrorCode::BadRequest);
        assert_eq!(
            ErrorCode::parse("SerializationException"),
            ErrorCode::Serialization
        );
        assert_eq!(ErrorCode::parse("ValidationException"), ErrorCode::Validation);
        assert_eq!(ErrorCode::parse("ThrottlingException"), ErrorCode::Throttling);
        assert_eq!(ErrorCode::parse("Throttling"), ErrorCode::Throttling);
    }

    #[test]
    fn test_error_code_parse_strips_service_prefix() {
        assert_eq!(
            ErrorCode::parse("com.amazon.coral.service#ThrottlingException"),
            ErrorCode::Throttling
        );
        assert_eq!(
            ErrorCode::parse("ValidationException:http://internal.example.com/doc"),
            ErrorCode::Validation
        );
    }

    #[test]
    fn test_error_code_parse_unknown() {
        assert_eq!(
            ErrorCode::parse("InternalFailure"),
            ErrorCode::Other("InternalFailure".to_string())
        );
    }

    #[test]
    fn test_non_retryable_set() {
        assert!(ErrorCode::BadRequest.is_non_retryable());
        assert!(ErrorCode::Serialization.is_non_retryable());
        assert!(ErrorCode::Validation.is_non_retryable());
        assert!(!ErrorCode::Throttling.is_non_retryable());
        assert!(!ErrorCode::Network.is_non_retryable());
        assert!(!ErrorCode::Other("InternalFailure".into()).is_non_retryable());
    }

    #[test]
    fn test_validation_error_messages() {
        assert_eq!(
            ValidationError::TooManyEntries(41).to_string(),
            "event has 41 attributes and metrics combined, at most 40 are allowed"
        );
        assert_eq!(
            ValidationError::Version("v1.0".into()).to_string(),
            "unsupported event version 'v1.0', expected 'v2.0'"
        );
    }
}
