//! Checkout Failure Classification
//!
//! Every failure on the checkout path (store rejections, provider error
//! payloads, our own timeout) is mapped onto a closed set of kinds before it
//! reaches a view.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::store::StoreError;

/// User-facing checkout error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutErrorKind {
    /// Deployment defect (placeholder price id); never reaches the provider
    Misconfigured,
    PermissionDenied,
    PriceNotFound,
    ProviderError,
    Timeout,
    Unknown,
}

impl CheckoutErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Misconfigured => "CHECKOUT_MISCONFIGURED",
            Self::PermissionDenied => "CHECKOUT_PERMISSION_DENIED",
            Self::PriceNotFound => "CHECKOUT_PRICE_NOT_FOUND",
            Self::ProviderError => "CHECKOUT_PROVIDER_ERROR",
            Self::Timeout => "CHECKOUT_TIMEOUT",
            Self::Unknown => "CHECKOUT_UNKNOWN",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Misconfigured => "Checkout is not configured correctly. Please contact support.",
            Self::PermissionDenied => "You are not allowed to start a checkout for this account.",
            Self::PriceNotFound => "This plan is currently unavailable. Please contact support.",
            Self::ProviderError => "The payment provider rejected the request.",
            Self::Timeout => "The payment provider took too long to respond. Please try again.",
            Self::Unknown => "Checkout failed. Please try again.",
        }
    }

    /// Whether the end user can reasonably retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderError | Self::Timeout | Self::Unknown)
    }
}

impl std::fmt::Display for CheckoutErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Error payload written back by the provider integration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderErrorPayload {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl ProviderErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Default::default() }
    }

    fn names_missing_price(&self) -> bool {
        self.message.to_lowercase().contains("no such price")
            || (self.code.as_deref() == Some("resource_missing") && self.param.as_deref() == Some("price"))
    }
}

/// Failure signal as it was raised, before classification
#[derive(Debug, Clone, PartialEq)]
pub enum RawFailure {
    Misconfigured(String),
    /// No authenticated user behind the request
    Unauthenticated,
    Store(StoreError),
    Provider(ProviderErrorPayload),
    Timeout(Duration),
    /// The subscription ended without the provider writing a result
    SubscriptionClosed,
    Other(String),
}

impl RawFailure {
    /// Decode the provider's `error` field, whatever shape it arrived in
    pub fn from_provider_value(value: &Value) -> Self {
        match value {
            Value::String(message) => Self::Provider(ProviderErrorPayload::new(message.clone())),
            Value::Object(_) => serde_json::from_value::<ProviderErrorPayload>(value.clone())
                .map(Self::Provider)
                .unwrap_or_else(|e| Self::Other(format!("Unreadable provider error payload: {}", e))),
            other => Self::Other(format!("Unrecognised provider error payload: {}", other)),
        }
    }
}

impl From<StoreError> for RawFailure {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

/// Map a raw failure onto its user-facing kind. Total; never panics.
pub fn classify(raw: &RawFailure) -> CheckoutErrorKind {
    match raw {
        RawFailure::Misconfigured(_) => CheckoutErrorKind::Misconfigured,
        RawFailure::Unauthenticated => CheckoutErrorKind::PermissionDenied,
        RawFailure::Store(StoreError::PermissionDenied(_)) => CheckoutErrorKind::PermissionDenied,
        RawFailure::Provider(payload) if payload.names_missing_price() => CheckoutErrorKind::PriceNotFound,
        RawFailure::Provider(_) => CheckoutErrorKind::ProviderError,
        RawFailure::Timeout(_) => CheckoutErrorKind::Timeout,
        RawFailure::Store(_) | RawFailure::SubscriptionClosed | RawFailure::Other(_) => CheckoutErrorKind::Unknown,
    }
}

/// Classified checkout failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CheckoutError {
    pub kind: CheckoutErrorKind,
    pub message: String,
}

impl CheckoutError {
    pub fn from_failure(raw: RawFailure) -> Self {
        let kind = classify(&raw);
        let message = match raw {
            RawFailure::Misconfigured(detail) => detail,
            RawFailure::Provider(payload) if kind == CheckoutErrorKind::ProviderError && !payload.message.is_empty() => {
                payload.message
            }
            RawFailure::Timeout(after) => {
                format!("No response from the payment provider after {}s", after.as_secs())
            }
            _ => kind.user_message().to_string(),
        };
        Self { kind, message }
    }

    pub fn kind(&self) -> CheckoutErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<RawFailure> for CheckoutError {
    fn from(raw: RawFailure) -> Self {
        Self::from_failure(raw)
    }
}
