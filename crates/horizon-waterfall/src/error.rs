//! Error types for the waterfall layout engine.
//!
//! Item load failures are not errors in this sense: they are recorded on the
//! item's [`ItemRecord`](crate::ItemRecord) and surfaced through
//! [`ErrorInfo`](crate::ErrorInfo). The variants here cover misuse of the API
//! and a context whose driver has stopped.

use crate::item::ItemId;

/// Result type alias for waterfall operations.
pub type Result<T> = std::result::Result<T, WaterfallError>;

/// Errors returned by the waterfall API.
#[derive(Debug, thiserror::Error)]
pub enum WaterfallError {
    /// A configuration value is out of range.
    #[error("Invalid value for '{field}': {message}")]
    InvalidConfig {
        field: &'static str,
        message: String,
    },

    /// The configuration document could not be parsed.
    #[error("Failed to parse waterfall configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The item is not (or no longer) registered with the context.
    #[error("Item {0:?} is not registered")]
    UnknownItem(ItemId),

    /// The layout driver has stopped; the context was shut down.
    #[error("The waterfall context has been shut down")]
    Closed,

    /// The context was created outside a Tokio runtime.
    #[error("A waterfall context must be created inside a Tokio runtime")]
    NoRuntime,
}

impl WaterfallError {
    /// Create a configuration range error.
    pub fn invalid_config(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            message: message.into(),
        }
    }
}

/// Error reported by an [`ItemHooks`](crate::ItemHooks) implementation.
///
/// Hook failures never abort a reflow pass; they are logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    /// Create a hook error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
