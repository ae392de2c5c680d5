//! Canonical error taxonomy and venue error-string classification.
//!
//! Every venue-specific failure is reduced to one of eleven [`ErrorType`]s.
//! Only transient transport faults are retryable:
//!
//! | Retryable | Terminal |
//! |-----------|----------|
//! | `network` | `api_error`, `insufficient_funds`, `invalid_price` |
//! | `timeout` | `invalid_order`, `too_many_orders`, `authentication` |
//! | `rate_limited` | `permission`, `unknown` |
//!
//! Venue messages follow a `Category:Description[:detail...]` shape
//! (`EOrder:Insufficient funds`). Classification tries an exact match first
//! and then progressively shorter colon-delimited prefixes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Canonical error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Connection failure, DNS, reset.
    Network,
    /// Call exceeded its deadline.
    Timeout,
    /// Generic venue-side failure.
    ApiError,
    /// Not enough balance or margin.
    InsufficientFunds,
    /// Price outside the venue's accepted bounds.
    InvalidPrice,
    /// Malformed or unsupported order.
    InvalidOrder,
    /// Open-order limit reached on the venue.
    TooManyOrders,
    /// Request rate limit hit.
    RateLimited,
    /// Bad key, signature or nonce.
    Authentication,
    /// Key lacks the permission for the call.
    Permission,
    /// Anything unmapped.
    Unknown,
}

impl ErrorType {
    /// All error types in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Network,
        Self::Timeout,
        Self::ApiError,
        Self::InsufficientFunds,
        Self::InvalidPrice,
        Self::InvalidOrder,
        Self::TooManyOrders,
        Self::RateLimited,
        Self::Authentication,
        Self::Permission,
        Self::Unknown,
    ];

    /// Whether a failure of this type may succeed on a later attempt.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::RateLimited)
    }

    /// Stable snake_case name (matches the serde representation).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::ApiError => "api_error",
            Self::InsufficientFunds => "insufficient_funds",
            Self::InvalidPrice => "invalid_price",
            Self::InvalidOrder => "invalid_order",
            Self::TooManyOrders => "too_many_orders",
            Self::RateLimited => "rate_limited",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
            Self::Unknown => "unknown",
        }
    }

    /// Operator-facing recovery hint.
    #[must_use]
    pub const fn recovery_hint(self) -> &'static str {
        match self {
            Self::Network => "Check venue connectivity; the call will be retried with backoff",
            Self::Timeout => "Venue is slow to respond; the call will be retried with backoff",
            Self::ApiError => "Inspect the venue error payload; do not resubmit unchanged",
            Self::InsufficientFunds => {
                "Insufficient funds: reduce order size or deposit additional balance"
            }
            Self::InvalidPrice => "Adjust the price to the venue's tick size and price bands",
            Self::InvalidOrder => "Fix order parameters (size, type, symbol) before resubmitting",
            Self::TooManyOrders => "Cancel stale open orders before placing new ones",
            Self::RateLimited => "Back off; honour the venue's retry-after if provided",
            Self::Authentication => "Verify API key, signature and nonce configuration",
            Self::Permission => "Grant the API key the required trading permission",
            Self::Unknown => "Unrecognised error; escalate to an operator",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a venue error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorClassification {
    /// Canonical type.
    pub error_type: ErrorType,
    /// Whether the caller should retry.
    pub retryable: bool,
    /// Suggested recovery action.
    pub recovery_hint: String,
    /// The message that produced the match, if any.
    pub matched_message: Option<String>,
}

impl ApiErrorClassification {
    fn from_type(error_type: ErrorType, matched_message: Option<String>) -> Self {
        Self {
            error_type,
            retryable: error_type.is_retryable(),
            recovery_hint: error_type.recovery_hint().to_string(),
            matched_message,
        }
    }
}

/// Maps venue-specific error strings onto [`ErrorType`].
#[derive(Debug, Clone)]
pub struct ApiErrorMapper {
    mappings: HashMap<String, ErrorType>,
}

impl Default for ApiErrorMapper {
    fn default() -> Self {
        let defaults = [
            ("EOrder:Insufficient funds", ErrorType::InsufficientFunds),
            ("EOrder:Insufficient margin", ErrorType::InsufficientFunds),
            ("EFunding:Insufficient funds", ErrorType::InsufficientFunds),
            ("EOrder:Invalid price", ErrorType::InvalidPrice),
            ("EOrder:Price out of bounds", ErrorType::InvalidPrice),
            ("EOrder:Invalid order", ErrorType::InvalidOrder),
            ("EOrder:Order minimum not met", ErrorType::InvalidOrder),
            ("EOrder:Unknown order", ErrorType::InvalidOrder),
            ("EGeneral:Invalid arguments", ErrorType::InvalidOrder),
            ("EOrder:Orders limit exceeded", ErrorType::TooManyOrders),
            ("EOrder:Positions limit exceeded", ErrorType::TooManyOrders),
            ("EOrder:Rate limit exceeded", ErrorType::RateLimited),
            ("EAPI:Rate limit exceeded", ErrorType::RateLimited),
            ("EGeneral:Too many requests", ErrorType::RateLimited),
            ("EAPI:Invalid key", ErrorType::Authentication),
            ("EAPI:Invalid signature", ErrorType::Authentication),
            ("EAPI:Invalid nonce", ErrorType::Authentication),
            ("EGeneral:Permission denied", ErrorType::Permission),
            ("EAPI:Feature disabled", ErrorType::Permission),
            ("EService:Unavailable", ErrorType::Network),
            ("EService:Market in cancel_only mode", ErrorType::ApiError),
            ("EService:Market in post_only mode", ErrorType::ApiError),
            ("EService:Busy", ErrorType::RateLimited),
            ("EService:Timeout", ErrorType::Timeout),
            ("EGeneral:Internal error", ErrorType::ApiError),
        ];

        Self {
            mappings: defaults
                .into_iter()
                .map(|(message, kind)| (message.to_string(), kind))
                .collect(),
        }
    }
}

impl ApiErrorMapper {
    /// Mapper with no entries; everything classifies as unknown.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            mappings: HashMap::new(),
        }
    }

    /// Add or replace a mapping.
    #[must_use]
    pub fn with_mapping(mut self, message: impl Into<String>, error_type: ErrorType) -> Self {
        self.mappings.insert(message.into(), error_type);
        self
    }

    /// Number of registered mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the mapper has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Look up a single message: exact match, then colon-delimited prefixes
    /// from longest to shortest.
    #[must_use]
    pub fn lookup(&self, message: &str) -> Option<ErrorType> {
        let message = message.trim();
        if let Some(kind) = self.mappings.get(message) {
            return Some(*kind);
        }

        let segments: Vec<&str> = message.split(':').collect();
        (1..segments.len())
            .rev()
            .find_map(|n| self.mappings.get(&segments[..n].join(":")).copied())
    }

    /// Classify a list of venue messages. The first recognised message wins;
    /// an empty or fully unrecognised list classifies as unknown.
    #[must_use]
    pub fn classify<S: AsRef<str>>(&self, messages: &[S]) -> ApiErrorClassification {
        messages
            .iter()
            .find_map(|m| {
                self.lookup(m.as_ref())
                    .map(|kind| ApiErrorClassification::from_type(kind, Some(m.as_ref().to_string())))
            })
            .unwrap_or_else(|| ApiErrorClassification::from_type(ErrorType::Unknown, None))
    }
}
