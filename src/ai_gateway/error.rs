use std::fmt;

use serde::{Deserialize, Serialize};

use crate::directive::ExtractError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    InvalidRequest,
    Authentication,
    Authorization,
    RateLimited,
    Timeout,
    BackendTransient,
    ProtocolViolation,
    /// Endpoint terminated with its content-safety finish reason.
    SafetyRejected,
    /// Endpoint terminated without usable content for a non-safety reason.
    EmptyResponse,
    ExtractionFailed,
    Internal,
}

/// Coarse failure classes the retry policy and the HTTP surface dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Upstream,
    EmptyResponseSafety,
    EmptyResponseOther,
    Extraction,
}

impl GatewayErrorKind {
    pub fn class(self) -> ErrorClass {
        match self {
            GatewayErrorKind::SafetyRejected => ErrorClass::EmptyResponseSafety,
            GatewayErrorKind::EmptyResponse => ErrorClass::EmptyResponseOther,
            GatewayErrorKind::ExtractionFailed => ErrorClass::Extraction,
            GatewayErrorKind::InvalidRequest
            | GatewayErrorKind::Authentication
            | GatewayErrorKind::Authorization
            | GatewayErrorKind::RateLimited
            | GatewayErrorKind::Timeout
            | GatewayErrorKind::BackendTransient
            | GatewayErrorKind::ProtocolViolation
            | GatewayErrorKind::Internal => ErrorClass::Upstream,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
    pub endpoint: Option<String>,
    pub provider_code: Option<String>,
    pub provider_http_status: Option<u16>,
    /// Raw upstream text kept for diagnosing extraction failures.
    pub raw_text: Option<String>,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            endpoint: None,
            provider_code: None,
            provider_http_status: None,
            raw_text: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_provider_code(mut self, provider_code: impl Into<String>) -> Self {
        self.provider_code = Some(provider_code.into());
        self
    }

    pub fn with_provider_http_status(mut self, status: u16) -> Self {
        self.provider_http_status = Some(status);
        self
    }

    pub fn with_raw_text(mut self, raw_text: impl Into<String>) -> Self {
        self.raw_text = Some(raw_text.into());
        self
    }

    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    pub fn is_safety_rejection(&self) -> bool {
        self.class() == ErrorClass::EmptyResponseSafety
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.endpoint, &self.provider_code) {
            (Some(endpoint), Some(provider_code)) => {
                write!(
                    f,
                    "{} (endpoint={}, provider_code={})",
                    self.message, endpoint, provider_code
                )
            }
            (Some(endpoint), None) => write!(f, "{} (endpoint={})", self.message, endpoint),
            (None, Some(provider_code)) => {
                write!(f, "{} (provider_code={})", self.message, provider_code)
            }
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<ExtractError> for GatewayError {
    fn from(err: ExtractError) -> Self {
        let converted = GatewayError::new(
            GatewayErrorKind::ExtractionFailed,
            format!("failed to extract structured output: {}", err),
        );
        match err.raw() {
            Some(raw) => converted.with_raw_text(raw),
            None => converted,
        }
    }
}

pub fn invalid_request(message: impl Into<String>) -> GatewayError {
    GatewayError::new(GatewayErrorKind::InvalidRequest, message)
}

pub fn protocol_violation(message: impl Into<String>) -> GatewayError {
    GatewayError::new(GatewayErrorKind::ProtocolViolation, message)
}

pub fn safety_rejected(message: impl Into<String>) -> GatewayError {
    GatewayError::new(GatewayErrorKind::SafetyRejected, message)
}

pub fn empty_response(message: impl Into<String>) -> GatewayError {
    GatewayError::new(GatewayErrorKind::EmptyResponse, message)
}

pub fn internal_error(message: impl Into<String>) -> GatewayError {
    GatewayError::new(GatewayErrorKind::Internal, message)
}
