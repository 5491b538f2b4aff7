//! Per-item load state machine.
//!
//! ```text
//!            on_load                       on_error (retries left)
//! Pending ───────────► Success     Pending ──────────────────────► Retrying
//!    │                                ▲                               │
//!    │ on_error (exhausted)           └──────── retry delay ──────────┘
//!    ▼
//! AwaitingFallback ──on_fallback_load──► FallbackShown
//!    │
//!    └──on_fallback_error──► FinalFallback
//!
//! Pending | Retrying | AwaitingFallback ──max_wait──► TimedOut
//! TimedOut (tier-2 still loading) ──on_fallback_*──► FallbackShown | FinalFallback
//! ```
//!
//! The machine only updates the [`ItemRecord`] it is given and reports what
//! should happen next as a [`LoadEffect`]. Timers, hooks and placement are
//! the caller's business.

use std::time::Duration;

use crate::config::{FailureMode, ResolvedItemConfig, RetryBackoff, WaterfallConfig};
use crate::item::{Dimensions, ErrorType, ItemRecord};
use crate::logging::targets;

/// Upper bound for a single exponential retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Where an item is in its load sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LoadPhase {
    /// The primary resource is loading.
    #[default]
    Pending,
    /// The primary resource failed; a retry is scheduled.
    Retrying,
    /// Retries are exhausted; the tier-2 image is loading.
    AwaitingFallback,
    /// The primary resource loaded.
    Success,
    /// The tier-2 image is shown.
    FallbackShown,
    /// The tier-2 image failed too; the static fallback is shown.
    FinalFallback,
    /// Nothing resolved within the maximum wait.
    TimedOut,
}

impl LoadPhase {
    /// Whether the item has reached a state that needs no further events.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::FallbackShown | Self::FinalFallback | Self::TimedOut
        )
    }
}

/// What the caller should do after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEffect {
    /// The event did not apply to the current phase.
    Ignored,
    /// The item can be placed (or its placement re-checked).
    Ready,
    /// Schedule `refresh_image(true)` after `delay`.
    RetryScheduled { attempt: u32, delay: Duration },
    /// Call `refresh_image(true)` now.
    Refresh,
    /// Start loading the tier-2 image.
    FallbackRequested { src: String },
    /// The maximum wait elapsed; the item is ready with reserved space.
    TimedOut,
}

/// How much column space an item takes in its current phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Occupancy {
    /// Not ready to be placed.
    Unready,
    /// Loaded; takes its measured size.
    Measured(Dimensions),
    /// Failed or timed out; takes the reserved fallback height.
    Reserved(f32),
    /// Failed under [`FailureMode::Hide`]; takes no space.
    Hidden,
}

/// Retry bounds and delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: RetryBackoff,
}

impl RetryPolicy {
    /// Build the policy from the grid configuration.
    pub fn from_config(config: &WaterfallConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay(),
            backoff: config.retry_backoff,
        }
    }

    /// Whether another retry may follow an error of `error_type`.
    #[inline]
    pub fn allows(&self, retry_count: u32, error_type: ErrorType) -> bool {
        retry_count < self.max_retries && error_type.is_retryable()
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.delay,
            RetryBackoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(factor).min(MAX_RETRY_DELAY)
            }
        }
    }
}

/// Drives one item through the load sequence.
#[derive(Debug, Clone)]
pub struct LoadStateMachine {
    phase: LoadPhase,
    policy: RetryPolicy,
    fallback_src: Option<String>,
}

impl LoadStateMachine {
    /// Create a machine in the [`LoadPhase::Pending`] phase.
    pub fn new(policy: RetryPolicy, fallback_src: Option<String>) -> Self {
        Self {
            phase: LoadPhase::Pending,
            policy,
            fallback_src,
        }
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    /// Retry policy in effect.
    #[inline]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The primary resource loaded with the given natural size.
    ///
    /// Accepted while loading, retrying or after a timeout. Once the item
    /// succeeded, a call with different dimensions is a re-measurement; it is
    /// ignored after the item settled on a fallback.
    pub fn on_load(&mut self, record: &mut ItemRecord, dimensions: Dimensions) -> LoadEffect {
        let dimensions = dimensions.sanitized();
        match self.phase {
            LoadPhase::Pending | LoadPhase::Retrying | LoadPhase::TimedOut => {}
            LoadPhase::Success => {
                if record.width == dimensions.width && record.height == dimensions.height {
                    return LoadEffect::Ignored;
                }
                record.width = dimensions.width;
                record.height = dimensions.height;
                return LoadEffect::Ready;
            }
            LoadPhase::AwaitingFallback | LoadPhase::FallbackShown | LoadPhase::FinalFallback => {
                return LoadEffect::Ignored;
            }
        }

        record.width = dimensions.width;
        record.height = dimensions.height;
        record.loaded = true;
        record.load_success = true;
        record.clear_error();
        self.phase = LoadPhase::Success;
        LoadEffect::Ready
    }

    /// The primary resource failed.
    ///
    /// Schedules a retry while the policy allows one, otherwise escalates to
    /// the tier-2 image, or straight to the static fallback when no tier-2
    /// source is configured.
    pub fn on_error(&mut self, record: &mut ItemRecord, message: impl Into<String>) -> LoadEffect {
        if !matches!(
            self.phase,
            LoadPhase::Pending | LoadPhase::Retrying | LoadPhase::TimedOut
        ) {
            return LoadEffect::Ignored;
        }

        record.error_type = ErrorType::OriginalFailed;
        record.error_message = message.into();
        record.loaded = false;
        record.load_success = false;

        if self.policy.allows(record.retry_count, record.error_type) {
            record.retry_count += 1;
            self.phase = LoadPhase::Retrying;
            let attempt = record.retry_count;
            return LoadEffect::RetryScheduled {
                attempt,
                delay: self.policy.delay_for(attempt),
            };
        }

        record.show_fallback = true;
        match self.fallback_src.clone() {
            Some(src) => {
                tracing::debug!(target: targets::LOAD, %src, "retries exhausted, loading fallback");
                self.phase = LoadPhase::AwaitingFallback;
                LoadEffect::FallbackRequested { src }
            }
            None => {
                tracing::debug!(target: targets::LOAD, "retries exhausted, no fallback source");
                self.settle_final(record);
                LoadEffect::Ready
            }
        }
    }

    /// The retry delay elapsed.
    pub fn on_retry_due(&mut self) -> LoadEffect {
        if self.phase != LoadPhase::Retrying {
            return LoadEffect::Ignored;
        }
        self.phase = LoadPhase::Pending;
        LoadEffect::Refresh
    }

    /// The user asked to retry a timed-out item (for instance from a retry tip).
    ///
    /// Bounded by the same policy as automatic retries.
    pub fn on_manual_retry(&mut self, record: &mut ItemRecord) -> LoadEffect {
        if self.phase != LoadPhase::TimedOut
            || !self.policy.allows(record.retry_count, record.error_type)
        {
            return LoadEffect::Ignored;
        }

        record.retry_count += 1;
        record.loaded = false;
        record.load_success = false;
        self.phase = LoadPhase::Pending;
        LoadEffect::Refresh
    }

    /// Whether a tier-2 result would be accepted now.
    ///
    /// True while the tier-2 image loads, and after a timeout that hit while
    /// it was loading.
    fn awaits_fallback(&self, record: &ItemRecord) -> bool {
        match self.phase {
            LoadPhase::AwaitingFallback => true,
            LoadPhase::TimedOut => record.show_fallback && !record.show_final_fallback,
            _ => false,
        }
    }

    /// The tier-2 image loaded.
    pub fn on_fallback_load(&mut self, record: &mut ItemRecord) -> LoadEffect {
        if !self.awaits_fallback(record) {
            return LoadEffect::Ignored;
        }
        record.loaded = true;
        record.load_success = false;
        self.phase = LoadPhase::FallbackShown;
        LoadEffect::Ready
    }

    /// The tier-2 image failed; settle on the static fallback.
    pub fn on_fallback_error(&mut self, record: &mut ItemRecord) -> LoadEffect {
        if !self.awaits_fallback(record) {
            return LoadEffect::Ignored;
        }
        self.settle_final(record);
        LoadEffect::Ready
    }

    /// The maximum wait elapsed without a terminal event.
    pub fn on_timeout(&mut self, record: &mut ItemRecord, max_wait: Duration) -> LoadEffect {
        if self.phase.is_terminal() {
            return LoadEffect::Ignored;
        }
        record.error_type = ErrorType::Timeout;
        record.error_message = format!("load did not resolve within {}ms", max_wait.as_millis());
        record.loaded = true;
        record.load_success = false;
        self.phase = LoadPhase::TimedOut;
        LoadEffect::TimedOut
    }

    /// Column space the item needs in its current phase.
    pub fn occupancy(&self, record: &ItemRecord, config: &ResolvedItemConfig) -> Occupancy {
        match self.phase {
            LoadPhase::Success => Occupancy::Measured(Dimensions::new(record.width, record.height)),
            LoadPhase::FallbackShown | LoadPhase::FinalFallback | LoadPhase::TimedOut => {
                if config.failure_mode == FailureMode::Hide {
                    Occupancy::Hidden
                } else {
                    Occupancy::Reserved(config.fallback_height)
                }
            }
            LoadPhase::Pending | LoadPhase::Retrying | LoadPhase::AwaitingFallback => {
                Occupancy::Unready
            }
        }
    }

    fn settle_final(&mut self, record: &mut ItemRecord) {
        record.show_fallback = true;
        record.show_final_fallback = true;
        record.error_type = ErrorType::FallbackFailed;
        record.loaded = true;
        record.load_success = false;
        self.phase = LoadPhase::FinalFallback;
    }
}
