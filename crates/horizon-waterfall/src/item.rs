//! Grid item data: identity, geometry, load and error state.

use futures_util::future::BoxFuture;
use slotmap::new_key_type;

use crate::config::{FailureMode, ResolvedItemConfig};
use crate::error::HookError;

new_key_type! {
    /// Identity of an item registered with a [`WaterfallContext`](crate::WaterfallContext).
    ///
    /// Ids are generational: once an item is removed, its id never refers to
    /// another item, so late notifications for it are dropped.
    pub struct ItemId;
}

/// Natural size of a loaded resource, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Dimensions {
    pub width: f32,
    pub height: f32,
}

impl Dimensions {
    /// Create dimensions from a width and height.
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Replace negative or non-finite components with zero.
    pub(crate) fn sanitized(self) -> Self {
        let clean = |v: f32| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        Self {
            width: clean(self.width),
            height: clean(self.height),
        }
    }

    /// Height once the item is drawn `column_width` pixels wide.
    ///
    /// With `preserve_aspect_ratio` off, or when the width is unknown, the
    /// measured height is used as is.
    pub fn scaled_height(&self, column_width: f32, preserve_aspect_ratio: bool) -> f32 {
        if preserve_aspect_ratio && self.width > 0.0 {
            self.height * column_width / self.width
        } else {
            self.height
        }
    }
}

/// Why an item is in an error state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ErrorType {
    #[default]
    None,
    /// The primary resource failed to load.
    OriginalFailed,
    /// The tier-2 fallback resource failed as well.
    FallbackFailed,
    /// Nothing resolved within the configured maximum wait.
    Timeout,
}

impl ErrorType {
    /// Kebab-case name, as used in configuration and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::OriginalFailed => "original-failed",
            Self::FallbackFailed => "fallback-failed",
            Self::Timeout => "timeout",
        }
    }

    /// Whether automatic or manual retries may follow this error.
    #[inline]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::OriginalFailed | Self::Timeout)
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometry and load state of one grid item.
///
/// `top`, `left` and `column` are only meaningful once the item has been
/// placed by a reflow pass (`column.is_some()`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemRecord {
    /// Explicit ordering key, if any.
    pub index: Option<usize>,
    /// Measured natural width.
    pub width: f32,
    /// Measured natural height.
    pub height: f32,
    pub top: f32,
    pub left: f32,
    /// Column the item was last placed in.
    pub column: Option<usize>,
    /// Height the item occupies in its column.
    pub layout_height: f32,
    /// The load process finished, successfully or not.
    pub loaded: bool,
    /// The primary resource loaded.
    pub load_success: bool,
    pub visible: bool,
    pub retry_count: u32,
    pub error_type: ErrorType,
    pub error_message: String,
    /// The tier-2 fallback image is shown.
    pub show_fallback: bool,
    /// The tier-3 static fallback is shown.
    pub show_final_fallback: bool,
}

impl ItemRecord {
    /// Create a fresh, unloaded record.
    pub fn new(index: Option<usize>) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    /// Whether the item has been placed by a reflow pass.
    #[inline]
    pub fn is_placed(&self) -> bool {
        self.column.is_some()
    }

    /// Whether any error is recorded.
    #[inline]
    pub fn has_error(&self) -> bool {
        self.error_type != ErrorType::None
    }

    /// Reset the error fields after a successful load.
    pub(crate) fn clear_error(&mut self) {
        self.error_type = ErrorType::None;
        self.error_message.clear();
        self.show_fallback = false;
        self.show_final_fallback = false;
    }

    /// Forget the current placement.
    pub(crate) fn unplace(&mut self) {
        self.column = None;
        self.layout_height = 0.0;
        self.visible = false;
    }

    /// Build the read-only error view handed to item content.
    pub fn error_info(&self, config: &ResolvedItemConfig) -> ErrorInfo {
        ErrorInfo {
            has_error: self.has_error(),
            show_final_fallback: self.show_final_fallback,
            error_type: self.error_type,
            error_message: self.error_message.clone(),
            fallback_image_src: config.error_image_src.clone().unwrap_or_default(),
            failure_mode: config.failure_mode,
        }
    }
}

/// Read-only error state exposed to an item's content.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    pub has_error: bool,
    pub show_final_fallback: bool,
    pub error_type: ErrorType,
    pub error_message: String,
    /// Tier-2 image source, empty when none is configured.
    pub fallback_image_src: String,
    pub failure_mode: FailureMode,
}

/// Future returned by [`ItemHooks`] methods.
pub type HookFuture = BoxFuture<'static, std::result::Result<(), HookError>>;

/// Caller-supplied behaviour attached to an item at registration.
///
/// Both hooks default to doing nothing.
pub trait ItemHooks: Send + Sync + 'static {
    /// Called (and awaited) before a full reflow, so the item can re-measure
    /// and report fresh dimensions through its [`ItemHandle`](crate::ItemHandle).
    fn before_reflow(&self) -> HookFuture {
        Box::pin(async { Ok(()) })
    }

    /// Re-trigger the load of the primary resource.
    fn refresh_image(&self, force: bool) -> HookFuture {
        let _ = force;
        Box::pin(async { Ok(()) })
    }
}

/// Hooks that do nothing; for items whose content needs no re-measurement.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl ItemHooks for NoopHooks {}

impl<T: ItemHooks> ItemHooks for std::sync::Arc<T> {
    fn before_reflow(&self) -> HookFuture {
        (**self).before_reflow()
    }

    fn refresh_image(&self, force: bool) -> HookFuture {
        (**self).refresh_image(force)
    }
}
