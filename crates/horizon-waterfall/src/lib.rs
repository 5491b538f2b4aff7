//! Masonry ("waterfall") layout for grids of asynchronously-loading media.
//!
//! This crate provides the layout engine behind a waterfall gallery:
//!
//! - **Column allocation**: each item goes to the bottom of the shortest column
//! - **Load state machine**: bounded retries, a tier-2 fallback image, a static
//!   final fallback and a maximum wait per item
//! - **Reflow scheduling**: coalesced incremental passes for items that just
//!   became ready, full passes after geometry changes or re-measurement
//! - **Context**: a single driver task that owns all layout state, with
//!   cheap capability handles for item content
//! - **Signals**: `load_started`, `loaded`, `retrying`, `overtime`, `reflowed`
//!
//! Rendering is left to the caller: read positions from
//! [`ItemRecord`]s and fallback state from [`ErrorInfo`].
//!
//! # Column Allocation Example
//!
//! ```
//! use horizon_waterfall::ColumnAllocator;
//!
//! let mut columns = ColumnAllocator::new(2, 150.0, 10.0, 10.0);
//! let first = columns.place(120.0);
//! let second = columns.place(80.0);
//! let third = columns.place(40.0);
//!
//! assert_eq!((first.column, second.column, third.column), (0, 1, 1));
//! assert_eq!(third.top, 90.0);
//! assert_eq!(third.left, 160.0);
//! ```
//!
//! # Configuration Example
//!
//! ```
//! use horizon_waterfall::{FailureMode, WaterfallConfig};
//!
//! let config = WaterfallConfig::from_toml_str(
//!     r#"
//!     columns = 3
//!     container_width = 960.0
//!     max_retries = 2
//!     failure_mode = "retry-tip"
//!     "#,
//! )?;
//! assert_eq!(config.failure_mode, FailureMode::RetryTip);
//! # Ok::<(), horizon_waterfall::WaterfallError>(())
//! ```
//!
//! # Context Example
//!
//! ```no_run
//! use horizon_waterfall::{Dimensions, ItemConfig, NoopHooks, WaterfallConfig, WaterfallContext};
//!
//! #[tokio::main]
//! async fn main() -> horizon_waterfall::Result<()> {
//!     let grid = WaterfallContext::new(WaterfallConfig::new().with_container_width(640.0))?;
//!     grid.signals().overtime.connect(|id| println!("{id:?} is taking too long"));
//!
//!     let photo = grid.add_item(ItemConfig::new(), NoopHooks).await?;
//!     let broken = grid.add_item(ItemConfig::new(), NoopHooks).await?;
//!
//!     photo.on_load(Dimensions::new(1200.0, 800.0));
//!     broken.on_error("404 Not Found");
//!
//!     grid.sync().await?;
//!     for (id, record) in grid.items() {
//!         println!("{id:?}: col {:?} top {}", record.column, record.top);
//!     }
//!     grid.shutdown().await
//! }
//! ```

mod allocator;
mod config;
mod context;
mod error;
mod item;
pub mod logging;
mod scheduler;
pub mod signal;
mod state;

pub use allocator::{ColumnAllocator, Placement, column_width, shortest_column};
pub use config::{
    BeforeReflowScope, FailureMode, ItemConfig, ResolvedItemConfig, RetryBackoff, WaterfallConfig,
};
pub use context::{ItemHandle, RetryEvent, WaterfallContext, WaterfallSignals};
pub use error::{HookError, Result, WaterfallError};
pub use item::{
    Dimensions, ErrorInfo, ErrorType, HookFuture, ItemHooks, ItemId, ItemRecord, NoopHooks,
};
pub use logging::{LayoutDebug, PerfSpan};
pub use scheduler::{ReflowKind, ReflowReport, ReflowScheduler, ReflowTarget};
pub use signal::{ConnectionId, Signal};
pub use state::{LoadEffect, LoadPhase, LoadStateMachine, Occupancy, RetryPolicy};
