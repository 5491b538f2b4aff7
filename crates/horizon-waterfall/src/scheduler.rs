//! Reflow scheduling.
//!
//! The scheduler owns the column heights and decides which items a pass
//! touches:
//!
//! - An **incremental** pass places the items that became ready since the
//!   previous pass, in registry order, below what is already placed. Ready
//!   notifications that arrive before the pass runs are coalesced.
//! - A **full** pass resets every column and replays all registered items in
//!   registry order.
//!
//! Passes are guarded by the `reflowing` flag; a pass never suspends while it
//! mutates the columns. Awaiting `before_reflow` hooks happens between
//! [`ReflowScheduler::begin_pass`] and [`ReflowScheduler::finish_full`], in the
//! context driver.

use std::collections::{HashMap, HashSet};

use crate::allocator::ColumnAllocator;
use crate::config::WaterfallConfig;
use crate::item::{ItemId, ItemRecord};
use crate::logging::{PerfSpan, targets};
use crate::state::Occupancy;

/// Height differences below this do not move an item.
const HEIGHT_EPSILON: f32 = 0.5;

/// Access to the items a pass lays out.
///
/// Implemented by the context registry; tests can implement it over a plain
/// vector.
pub trait ReflowTarget {
    /// Item ids in layout order.
    fn layout_order(&self) -> Vec<ItemId>;

    /// Column space the item needs, or `None` if it is not registered.
    fn occupancy(&self, id: ItemId) -> Option<Occupancy>;

    /// Mutable access to the item's record.
    fn record_mut(&mut self, id: ItemId) -> Option<&mut ItemRecord>;
}

/// Kind of reflow pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReflowKind {
    Incremental,
    Full,
}

/// Summary of a finished pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflowReport {
    pub kind: ReflowKind,
    /// Items that received a position in this pass.
    pub placed: usize,
    /// Height of the tallest column after the pass.
    pub content_height: f32,
}

/// Batches ready items into passes over the column allocator.
#[derive(Debug)]
pub struct ReflowScheduler {
    columns: ColumnAllocator,
    preserve_aspect_ratio: bool,
    ready: Vec<ItemId>,
    queued: HashSet<ItemId>,
    full_requested: bool,
    reflowing: bool,
}

impl ReflowScheduler {
    /// Create a scheduler for the given grid configuration.
    pub fn new(config: &WaterfallConfig) -> Self {
        Self {
            columns: ColumnAllocator::new(
                config.columns,
                config.column_width(),
                config.column_gap,
                config.row_gap,
            ),
            preserve_aspect_ratio: config.preserve_aspect_ratio,
            ready: Vec::new(),
            queued: HashSet::new(),
            full_requested: false,
            reflowing: false,
        }
    }

    /// Apply a new grid geometry and request a full reflow.
    pub fn reconfigure(&mut self, config: &WaterfallConfig) {
        self.columns.reconfigure(
            config.columns,
            config.column_width(),
            config.column_gap,
            config.row_gap,
        );
        self.preserve_aspect_ratio = config.preserve_aspect_ratio;
        self.full_requested = true;
    }

    /// Queue an item for the next incremental pass.
    ///
    /// Returns `false` if it was already queued.
    pub fn enqueue(&mut self, id: ItemId) -> bool {
        if self.queued.insert(id) {
            self.ready.push(id);
            true
        } else {
            false
        }
    }

    /// Drop a removed item from the queue.
    pub fn forget(&mut self, id: ItemId) {
        if self.queued.remove(&id) {
            self.ready.retain(|queued| *queued != id);
        }
    }

    /// Ask for a full reflow before the next incremental pass.
    pub fn request_full(&mut self) {
        self.full_requested = true;
    }

    /// Whether a full reflow has been requested.
    #[inline]
    pub fn full_requested(&self) -> bool {
        self.full_requested
    }

    /// Number of items waiting for an incremental pass.
    #[inline]
    pub fn pending(&self) -> usize {
        self.ready.len()
    }

    /// Whether a pass is in progress.
    #[inline]
    pub fn is_reflowing(&self) -> bool {
        self.reflowing
    }

    /// Current column state.
    #[inline]
    pub fn columns(&self) -> &ColumnAllocator {
        &self.columns
    }

    /// Mark a pass as started. Returns `false` if one is already running.
    pub fn begin_pass(&mut self) -> bool {
        if self.reflowing {
            tracing::debug!(target: targets::LAYOUT, "reflow already in progress");
            return false;
        }
        self.reflowing = true;
        true
    }

    fn end_pass(&mut self) {
        self.reflowing = false;
    }

    /// Place every queued item below the existing layout.
    ///
    /// Items already placed are left where they are; if one of them now needs
    /// a different height, a full reflow is requested instead. Returns `None`
    /// when nothing was queued.
    pub fn run_incremental<T: ReflowTarget>(&mut self, target: &mut T) -> Option<ReflowReport> {
        if self.ready.is_empty() || !self.begin_pass() {
            return None;
        }
        let _span = PerfSpan::new("incremental_reflow");

        let order = target.layout_order();
        let position: HashMap<ItemId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut batch: Vec<ItemId> = std::mem::take(&mut self.ready)
            .into_iter()
            .filter(|id| position.contains_key(id))
            .collect();
        self.queued.clear();
        batch.sort_by_key(|id| position[id]);

        let mut placed = 0;
        for id in batch {
            if self.place_new(target, id) {
                placed += 1;
            }
        }

        self.end_pass();
        let report = ReflowReport {
            kind: ReflowKind::Incremental,
            placed,
            content_height: self.columns.content_height(),
        };
        tracing::debug!(
            target: targets::LAYOUT,
            placed,
            content_height = report.content_height,
            full_requested = self.full_requested,
            "incremental reflow finished"
        );
        Some(report)
    }

    /// Reset the columns and replay every registered item in order.
    ///
    /// Must follow a successful [`begin_pass`](Self::begin_pass). Items that
    /// are not ready yet stay unplaced and are picked up by a later
    /// incremental pass once they are.
    pub fn finish_full<T: ReflowTarget>(&mut self, target: &mut T) -> ReflowReport {
        let _span = PerfSpan::new("full_reflow");

        self.columns.reset();
        self.ready.clear();
        self.queued.clear();
        self.full_requested = false;

        let mut placed = 0;
        for id in target.layout_order() {
            let Some(height) = self.height_of(target, id) else {
                if let Some(record) = target.record_mut(id) {
                    record.unplace();
                }
                continue;
            };
            let placement = self.columns.place(height);
            if let Some(record) = target.record_mut(id) {
                apply(record, placement.column, placement.top, placement.left, height);
                placed += 1;
            }
        }

        self.end_pass();
        let report = ReflowReport {
            kind: ReflowKind::Full,
            placed,
            content_height: self.columns.content_height(),
        };
        tracing::debug!(
            target: targets::LAYOUT,
            placed,
            content_height = report.content_height,
            "full reflow finished"
        );
        report
    }

    /// Height an item takes, or `None` if it should not be in the flow.
    fn height_of<T: ReflowTarget>(&self, target: &T, id: ItemId) -> Option<f32> {
        match target.occupancy(id)? {
            Occupancy::Measured(dims) => Some(
                dims.scaled_height(self.columns.column_width(), self.preserve_aspect_ratio),
            ),
            Occupancy::Reserved(height) => Some(height),
            Occupancy::Unready | Occupancy::Hidden => None,
        }
    }

    fn place_new<T: ReflowTarget>(&mut self, target: &mut T, id: ItemId) -> bool {
        let occupancy = target.occupancy(id);
        let height = self.height_of(target, id);
        let Some(record) = target.record_mut(id) else {
            return false;
        };

        match (occupancy, height) {
            (Some(Occupancy::Hidden), _) => {
                if record.is_placed() {
                    self.full_requested = true;
                }
                record.unplace();
                false
            }
            (_, None) => false,
            (_, Some(height)) if record.is_placed() => {
                if (record.layout_height - height).abs() > HEIGHT_EPSILON {
                    tracing::trace!(target: targets::LAYOUT, ?id, "placed item changed height");
                    self.full_requested = true;
                }
                false
            }
            (_, Some(height)) => {
                let placement = self.columns.place(height);
                apply(record, placement.column, placement.top, placement.left, height);
                true
            }
        }
    }
}

fn apply(record: &mut ItemRecord, column: usize, top: f32, left: f32, height: f32) {
    record.column = Some(column);
    record.top = top;
    record.left = left;
    record.layout_height = height;
    record.visible = true;
}
