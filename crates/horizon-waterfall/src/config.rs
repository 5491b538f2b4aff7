//! Grid and per-item configuration.
//!
//! [`WaterfallConfig`] holds the grid-wide settings; every field is optional
//! when loading from TOML and falls back to the values of
//! [`WaterfallConfig::default`]. [`ItemConfig`] carries the per-item overrides,
//! which are resolved against the grid settings once, when the item registers.
//!
//! # Example
//!
//! ```
//! use horizon_waterfall::{FailureMode, WaterfallConfig};
//! use std::time::Duration;
//!
//! let config = WaterfallConfig::new()
//!     .with_columns(3)
//!     .with_gaps(8.0, 12.0)
//!     .with_max_retries(2)
//!     .with_retry_delay(Duration::from_millis(250))
//!     .with_failure_mode(FailureMode::Hide);
//!
//! assert!(config.validate().is_ok());
//!
//! let parsed = WaterfallConfig::from_toml_str(r#"
//!     columns = 4
//!     failure_mode = "retry-tip"
//!     max_wait_ms = 3000
//! "#).unwrap();
//! assert_eq!(parsed.columns, 4);
//! assert_eq!(parsed.max_wait(), Some(Duration::from_secs(3)));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::allocator;
use crate::error::{Result, WaterfallError};

/// How a failed item is presented once its load has given up.
///
/// Only [`FailureMode::Hide`] changes the layout: hidden items stay
/// registered but take no space. The other modes reserve the fallback height
/// and leave the visuals to the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Show a placeholder in the reserved space.
    #[default]
    Placeholder,
    /// Show the configured error image.
    ErrorImage,
    /// Show a tip that lets the user retry the load.
    RetryTip,
    /// Remove the item from the visible flow.
    Hide,
}

/// Delay growth between automatic retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryBackoff {
    /// Every retry waits `retry_delay`.
    #[default]
    Fixed,
    /// Retry `n` waits `retry_delay * 2^(n - 1)`.
    Exponential,
}

/// Which items have their `before_reflow` hook awaited during a full reflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BeforeReflowScope {
    /// Every registered item, including ones that already loaded.
    #[default]
    All,
    /// Only items that have not loaded successfully yet.
    Unsettled,
}

/// Grid-wide layout and loading configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaterfallConfig {
    /// Number of columns.
    pub columns: usize,
    /// Horizontal gap between columns, in pixels.
    pub column_gap: f32,
    /// Vertical gap between items in a column, in pixels.
    pub row_gap: f32,
    /// Width of the container the columns are laid out in.
    pub container_width: f32,
    /// Automatic retries before falling back.
    pub max_retries: u32,
    /// Base delay before an automatic retry, in milliseconds.
    pub retry_delay_ms: u64,
    /// Delay growth between retries.
    pub retry_backoff: RetryBackoff,
    /// Height reserved for items that failed or timed out.
    pub fallback_height: f32,
    /// Maximum time an item may stay unresolved, in milliseconds.
    pub max_wait_ms: Option<u64>,
    /// Default failure presentation.
    pub failure_mode: FailureMode,
    /// Default tier-2 image source.
    pub error_image_src: Option<String>,
    /// Scale measured heights to the column width using the natural aspect ratio.
    pub preserve_aspect_ratio: bool,
    /// Which items re-measure before a full reflow.
    pub before_reflow_scope: BeforeReflowScope,
    /// Upper bound on a single `before_reflow` hook, in milliseconds.
    pub hook_timeout_ms: u64,
}

impl Default for WaterfallConfig {
    fn default() -> Self {
        Self {
            columns: 2,
            column_gap: 10.0,
            row_gap: 10.0,
            container_width: 375.0,
            max_retries: 3,
            retry_delay_ms: 1000,
            retry_backoff: RetryBackoff::Fixed,
            fallback_height: 200.0,
            max_wait_ms: None,
            failure_mode: FailureMode::Placeholder,
            error_image_src: None,
            preserve_aspect_ratio: true,
            before_reflow_scope: BeforeReflowScope::All,
            hook_timeout_ms: 5000,
        }
    }
}

impl WaterfallConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from a TOML document and validate it.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the number of columns.
    pub fn with_columns(mut self, columns: usize) -> Self {
        self.columns = columns;
        self
    }

    /// Set the column and row gaps.
    pub fn with_gaps(mut self, column_gap: f32, row_gap: f32) -> Self {
        self.column_gap = column_gap;
        self.row_gap = row_gap;
        self
    }

    /// Set the container width.
    pub fn with_container_width(mut self, width: f32) -> Self {
        self.container_width = width;
        self
    }

    /// Set the number of automatic retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the retry delay growth.
    pub fn with_retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the height reserved for failed items.
    pub fn with_fallback_height(mut self, height: f32) -> Self {
        self.fallback_height = height;
        self
    }

    /// Set the maximum wait before an item is marked as timed out.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait_ms = Some(max_wait.as_millis() as u64);
        self
    }

    /// Set the default failure mode.
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Set the default tier-2 image source.
    pub fn with_error_image_src(mut self, src: impl Into<String>) -> Self {
        self.error_image_src = Some(src.into());
        self
    }

    /// Enable or disable aspect-ratio scaling of measured heights.
    pub fn with_preserve_aspect_ratio(mut self, preserve: bool) -> Self {
        self.preserve_aspect_ratio = preserve;
        self
    }

    /// Set which items re-measure before a full reflow.
    pub fn with_before_reflow_scope(mut self, scope: BeforeReflowScope) -> Self {
        self.before_reflow_scope = scope;
        self
    }

    /// Set the upper bound on a single `before_reflow` hook.
    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Base retry delay.
    #[inline]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Maximum wait before timing out, if any.
    #[inline]
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }

    /// Upper bound on a single `before_reflow` hook.
    #[inline]
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }

    /// Width of a single column for the current container and gaps.
    pub fn column_width(&self) -> f32 {
        allocator::column_width(self.container_width, self.columns, self.column_gap)
    }

    /// Check that every value is in range.
    pub fn validate(&self) -> Result<()> {
        if self.columns == 0 {
            return Err(WaterfallError::invalid_config(
                "columns",
                "must be at least 1",
            ));
        }
        check_length("column_gap", self.column_gap)?;
        check_length("row_gap", self.row_gap)?;
        check_length("container_width", self.container_width)?;
        check_length("fallback_height", self.fallback_height)?;
        Ok(())
    }
}

pub(crate) fn check_length(field: &'static str, value: f32) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(WaterfallError::invalid_config(
            field,
            format!("must be a finite, non-negative number (got {value})"),
        ))
    }
}

/// Per-item overrides, supplied when the item registers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemConfig {
    /// Explicit ordering key; items without one are appended.
    pub index: Option<usize>,
    /// Failure presentation for this item.
    pub failure_mode: Option<FailureMode>,
    /// Height reserved for this item when it fails.
    pub fallback_height: Option<f32>,
    /// Tier-2 image source for this item.
    pub error_image_src: Option<String>,
}

impl ItemConfig {
    /// Create an item configuration that inherits everything from the grid.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ordering key.
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Override the failure mode.
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = Some(mode);
        self
    }

    /// Override the reserved fallback height.
    pub fn with_fallback_height(mut self, height: f32) -> Self {
        self.fallback_height = Some(height);
        self
    }

    /// Override the tier-2 image source.
    pub fn with_error_image_src(mut self, src: impl Into<String>) -> Self {
        self.error_image_src = Some(src.into());
        self
    }

    /// Resolve the overrides against the grid configuration.
    pub fn resolve(&self, grid: &WaterfallConfig) -> Result<ResolvedItemConfig> {
        let fallback_height = self.fallback_height.unwrap_or(grid.fallback_height);
        check_length("fallback_height", fallback_height)?;
        Ok(ResolvedItemConfig {
            index: self.index,
            failure_mode: self.failure_mode.unwrap_or(grid.failure_mode),
            fallback_height,
            error_image_src: self
                .error_image_src
                .clone()
                .or_else(|| grid.error_image_src.clone()),
        })
    }
}

/// Per-item settings after merging with the grid configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedItemConfig {
    /// Explicit ordering key.
    pub index: Option<usize>,
    /// Failure presentation.
    pub failure_mode: FailureMode,
    /// Height reserved on failure.
    pub fallback_height: f32,
    /// Tier-2 image source, if any.
    pub error_image_src: Option<String>,
}
