//! The coordination hub between loading items and the layout.
//!
//! A [`WaterfallContext`] owns the item registry, the column state and the
//! reflow scheduler. All of that state is written by a single driver task:
//! the context and every [`ItemHandle`] only enqueue messages, and the driver
//! applies them in arrival order. Completions that arrive while a pass is
//! being prepared are applied to their records but are only placed by the
//! pass that follows, never interleaved into the one running.
//!
//! # Example
//!
//! ```no_run
//! use horizon_waterfall::{Dimensions, ItemConfig, NoopHooks, WaterfallConfig, WaterfallContext};
//!
//! # async fn demo() -> horizon_waterfall::Result<()> {
//! let grid = WaterfallContext::new(WaterfallConfig::new().with_columns(3))?;
//! grid.signals().loaded.connect(|_| println!("grid settled"));
//!
//! let item = grid.add_item(ItemConfig::new(), NoopHooks).await?;
//! item.on_load(Dimensions::new(640.0, 480.0));
//!
//! grid.sync().await?;
//! println!("{}", grid.layout_debug());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use slotmap::SlotMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};

use crate::config::{
    BeforeReflowScope, ItemConfig, ResolvedItemConfig, WaterfallConfig, check_length,
};
use crate::error::{Result, WaterfallError};
use crate::item::{Dimensions, ErrorInfo, ErrorType, ItemHooks, ItemId, ItemRecord};
use crate::logging::{LayoutDebug, targets};
use crate::scheduler::{ReflowReport, ReflowScheduler, ReflowTarget};
use crate::signal::Signal;
use crate::state::{LoadEffect, LoadPhase, LoadStateMachine, Occupancy, RetryPolicy};

type LoadHandler = Box<dyn FnOnce() + Send + 'static>;

/// Payload of the [`WaterfallSignals::retrying`] signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryEvent {
    pub item: ItemId,
    /// 1-based retry number.
    pub attempt: u32,
}

/// Events surfaced to the container.
///
/// Slots run on the layout driver task.
#[derive(Debug, Default)]
pub struct WaterfallSignals {
    /// An item started loading while the grid was settled or empty.
    pub load_started: Signal<()>,
    /// Every registered item reached a terminal state.
    pub loaded: Signal<()>,
    /// An item scheduled an automatic retry.
    pub retrying: Signal<RetryEvent>,
    /// An item exceeded the maximum wait.
    pub overtime: Signal<ItemId>,
    /// A reflow pass finished.
    pub reflowed: Signal<ReflowReport>,
}

impl WaterfallSignals {
    fn disconnect_all(&self) {
        self.load_started.disconnect_all();
        self.loaded.disconnect_all();
        self.retrying.disconnect_all();
        self.overtime.disconnect_all();
        self.reflowed.disconnect_all();
    }
}

#[derive(Debug, Clone, Copy)]
enum GeometryChange {
    ContainerWidth(f32),
    Columns(usize),
    Gaps { column: f32, row: f32 },
}

enum LayoutMessage {
    Add {
        config: ResolvedItemConfig,
        hooks: Arc<dyn ItemHooks>,
        reply: oneshot::Sender<ItemId>,
    },
    Remove(ItemId),
    Loaded(ItemId, Dimensions),
    Failed(ItemId, String),
    FallbackLoaded(ItemId),
    FallbackFailed(ItemId),
    Retry(ItemId),
    RetryDue(ItemId),
    WaitElapsed(ItemId),
    Reflow,
    FullReflow,
    Reconfigure(GeometryChange),
    OnLoad(LoadHandler),
    Sync(oneshot::Sender<()>),
    Shutdown,
}

struct ItemEntry {
    record: ItemRecord,
    machine: LoadStateMachine,
    config: ResolvedItemConfig,
    hooks: Arc<dyn ItemHooks>,
    seq: u64,
    retry_timer: Option<AbortHandle>,
    wait_timer: Option<AbortHandle>,
}

impl ItemEntry {
    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    fn cancel_timers(&mut self) {
        self.cancel_retry();
        if let Some(timer) = self.wait_timer.take() {
            timer.abort();
        }
    }

    /// Items with an explicit index come first, by index; the rest keep
    /// insertion order.
    fn order_key(&self) -> (usize, u64) {
        (self.record.index.unwrap_or(usize::MAX), self.seq)
    }
}

#[derive(Default)]
struct Registry {
    entries: SlotMap<ItemId, ItemEntry>,
    order: Vec<ItemId>,
    next_seq: u64,
}

impl Registry {
    fn insert(&mut self, mut entry: ItemEntry) -> ItemId {
        entry.seq = self.next_seq;
        self.next_seq += 1;
        let key = entry.order_key();
        let id = self.entries.insert(entry);

        let entries = &self.entries;
        let position = self
            .order
            .partition_point(|other| entries[*other].order_key() <= key);
        self.order.insert(position, id);
        id
    }

    fn remove(&mut self, id: ItemId) -> Option<ItemEntry> {
        let entry = self.entries.remove(id)?;
        self.order.retain(|other| *other != id);
        Some(entry)
    }

    fn all_terminal(&self) -> bool {
        self.entries
            .values()
            .all(|entry| entry.machine.phase().is_terminal())
    }

    fn snapshot(&self) -> Vec<(ItemId, ItemRecord)> {
        self.order
            .iter()
            .map(|id| (*id, self.entries[*id].record.clone()))
            .collect()
    }
}

impl ReflowTarget for Registry {
    fn layout_order(&self) -> Vec<ItemId> {
        self.order.clone()
    }

    fn occupancy(&self, id: ItemId) -> Option<Occupancy> {
        self.entries
            .get(id)
            .map(|entry| entry.machine.occupancy(&entry.record, &entry.config))
    }

    fn record_mut(&mut self, id: ItemId) -> Option<&mut ItemRecord> {
        self.entries.get_mut(id).map(|entry| &mut entry.record)
    }
}

struct LayoutState {
    config: WaterfallConfig,
    policy: RetryPolicy,
    registry: Registry,
    scheduler: ReflowScheduler,
    loading: bool,
    load_handlers: Vec<LoadHandler>,
}

impl LayoutState {
    fn new(config: WaterfallConfig) -> Self {
        Self {
            policy: RetryPolicy::from_config(&config),
            scheduler: ReflowScheduler::new(&config),
            registry: Registry::default(),
            loading: false,
            load_handlers: Vec::new(),
            config,
        }
    }
}

struct Shared {
    state: Mutex<LayoutState>,
    signals: WaterfallSignals,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn error_info(&self, id: ItemId) -> Option<ErrorInfo> {
        let state = self.state.lock();
        let entry = state.registry.entries.get(id)?;
        Some(entry.record.error_info(&entry.config))
    }

    fn record(&self, id: ItemId) -> Option<ItemRecord> {
        let state = self.state.lock();
        state.registry.entries.get(id).map(|entry| entry.record.clone())
    }

    fn column_width(&self) -> f32 {
        self.state.lock().scheduler.columns().column_width()
    }
}

/// Handle to a waterfall grid.
///
/// Cheap to clone; all clones talk to the same layout driver. Must be created
/// inside a Tokio runtime.
#[derive(Clone)]
pub struct WaterfallContext {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<LayoutMessage>,
}

impl WaterfallContext {
    /// Validate the configuration and start the layout driver.
    pub fn new(config: WaterfallConfig) -> Result<Self> {
        config.validate()?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| WaterfallError::NoRuntime)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(LayoutState::new(config)),
            signals: WaterfallSignals::default(),
            driver: Mutex::new(None),
        });

        let driver = LayoutDriver {
            shared: shared.clone(),
            rx,
            timers: tx.downgrade(),
            acks: Vec::new(),
            closed: false,
            stopping: false,
        };
        *shared.driver.lock() = Some(runtime.spawn(driver.run()));

        Ok(Self { shared, tx })
    }

    fn send(&self, message: LayoutMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| WaterfallError::Closed)
    }

    /// Container events.
    pub fn signals(&self) -> &WaterfallSignals {
        &self.shared.signals
    }

    /// Register a new item and return its capability handle.
    ///
    /// The item starts in the pending phase; its maximum-wait timer, if one
    /// is configured, starts now.
    pub async fn add_item(&self, config: ItemConfig, hooks: impl ItemHooks) -> Result<ItemHandle> {
        let config = config.resolve(&self.shared.state.lock().config)?;
        let (reply, registered) = oneshot::channel();
        self.send(LayoutMessage::Add {
            config,
            hooks: Arc::new(hooks),
            reply,
        })?;
        let id = registered.await.map_err(|_| WaterfallError::Closed)?;

        Ok(ItemHandle {
            id,
            shared: self.shared.clone(),
            tx: self.tx.clone(),
        })
    }

    /// Handle for an item registered earlier.
    pub fn item_handle(&self, id: ItemId) -> Result<ItemHandle> {
        if !self.shared.state.lock().registry.entries.contains_key(id) {
            return Err(WaterfallError::UnknownItem(id));
        }
        Ok(ItemHandle {
            id,
            shared: self.shared.clone(),
            tx: self.tx.clone(),
        })
    }

    /// Unregister an item.
    ///
    /// Its timers are cancelled and it is excluded from any pass in progress.
    /// If it was placed, a full reflow follows to close the gap; a pass
    /// already running is not disturbed.
    pub fn remove_item(&self, id: ItemId) -> Result<()> {
        self.send(LayoutMessage::Remove(id))
    }

    /// Report that an item's primary resource loaded.
    pub fn on_item_load(&self, id: ItemId, dimensions: Dimensions) -> Result<()> {
        self.send(LayoutMessage::Loaded(id, dimensions))
    }

    /// Run an incremental pass over the items that became ready.
    pub fn reflow(&self) -> Result<()> {
        self.send(LayoutMessage::Reflow)
    }

    /// Reset the columns and lay out every item again.
    pub fn full_reflow(&self) -> Result<()> {
        self.send(LayoutMessage::FullReflow)
    }

    /// Run `handler` once, the next time every registered item is terminal.
    ///
    /// If the grid is non-empty and already settled, the handler runs after
    /// the driver processes this request.
    pub fn on_load<F>(&self, handler: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(LayoutMessage::OnLoad(Box::new(handler)))
    }

    /// Change the container width; forces a full reflow.
    pub fn set_container_width(&self, width: f32) -> Result<()> {
        check_length("container_width", width)?;
        self.send(LayoutMessage::Reconfigure(GeometryChange::ContainerWidth(width)))
    }

    /// Change the column count; forces a full reflow.
    pub fn set_columns(&self, columns: usize) -> Result<()> {
        if columns == 0 {
            return Err(WaterfallError::invalid_config("columns", "must be at least 1"));
        }
        self.send(LayoutMessage::Reconfigure(GeometryChange::Columns(columns)))
    }

    /// Change the column and row gaps; forces a full reflow.
    pub fn set_gaps(&self, column_gap: f32, row_gap: f32) -> Result<()> {
        check_length("column_gap", column_gap)?;
        check_length("row_gap", row_gap)?;
        self.send(LayoutMessage::Reconfigure(GeometryChange::Gaps {
            column: column_gap,
            row: row_gap,
        }))
    }

    /// Wait until every message sent before this call, and the passes they
    /// trigger, have been processed.
    pub async fn sync(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(LayoutMessage::Sync(ack))?;
        done.await.map_err(|_| WaterfallError::Closed)
    }

    /// Stop the layout driver, cancel every pending timer and disconnect all
    /// signal listeners.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(LayoutMessage::Shutdown)?;
        let driver = self.shared.driver.lock().take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }
        Ok(())
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> WaterfallConfig {
        self.shared.state.lock().config.clone()
    }

    /// Width of one column.
    pub fn column_width(&self) -> f32 {
        self.shared.column_width()
    }

    /// Current column heights.
    pub fn column_heights(&self) -> Vec<f32> {
        self.shared.state.lock().scheduler.columns().heights().to_vec()
    }

    /// Height of the tallest column.
    pub fn content_height(&self) -> f32 {
        self.shared.state.lock().scheduler.columns().content_height()
    }

    /// Whether a reflow pass is in progress.
    pub fn is_reflowing(&self) -> bool {
        self.shared.state.lock().scheduler.is_reflowing()
    }

    /// Number of registered items.
    pub fn item_count(&self) -> usize {
        self.shared.state.lock().registry.entries.len()
    }

    /// Snapshot of one item's record.
    pub fn item(&self, id: ItemId) -> Option<ItemRecord> {
        self.shared.record(id)
    }

    /// Snapshot of every record, in layout order.
    pub fn items(&self) -> Vec<(ItemId, ItemRecord)> {
        self.shared.state.lock().registry.snapshot()
    }

    /// Current load phase of an item.
    pub fn phase(&self, id: ItemId) -> Option<LoadPhase> {
        let state = self.shared.state.lock();
        state.registry.entries.get(id).map(|entry| entry.machine.phase())
    }

    /// Error view of an item.
    pub fn error_info(&self, id: ItemId) -> Option<ErrorInfo> {
        self.shared.error_info(id)
    }

    /// Text dump of the current layout.
    pub fn layout_debug(&self) -> LayoutDebug {
        let state = self.shared.state.lock();
        let columns = state.scheduler.columns();
        LayoutDebug::new(
            state.registry.snapshot(),
            columns.heights().to_vec(),
            columns.column_width(),
        )
    }
}

impl std::fmt::Debug for WaterfallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaterfallContext")
            .field("items", &self.item_count())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Capability handed to one item's content.
///
/// The load callbacks only enqueue notifications; the layout driver applies
/// them. Notifications for an item that was removed are dropped.
#[derive(Clone)]
pub struct ItemHandle {
    id: ItemId,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<LayoutMessage>,
}

impl ItemHandle {
    /// Identity of the item.
    #[inline]
    pub fn id(&self) -> ItemId {
        self.id
    }

    fn notify(&self, message: LayoutMessage) {
        if self.tx.send(message).is_err() {
            tracing::debug!(target: targets::CONTEXT, id = ?self.id, "context closed, dropping item notification");
        }
    }

    /// The primary resource loaded with the given natural size.
    pub fn on_load(&self, dimensions: Dimensions) {
        self.notify(LayoutMessage::Loaded(self.id, dimensions));
    }

    /// The primary resource failed to load.
    pub fn on_error(&self, message: impl Into<String>) {
        self.notify(LayoutMessage::Failed(self.id, message.into()));
    }

    /// The tier-2 image loaded.
    pub fn on_fallback_load(&self) {
        self.notify(LayoutMessage::FallbackLoaded(self.id));
    }

    /// The tier-2 image failed to load.
    pub fn on_fallback_error(&self) {
        self.notify(LayoutMessage::FallbackFailed(self.id));
    }

    /// Retry a timed-out load, within the retry budget.
    pub fn retry(&self) {
        self.notify(LayoutMessage::Retry(self.id));
    }

    /// Unregister the item.
    pub fn remove(&self) {
        self.notify(LayoutMessage::Remove(self.id));
    }

    /// Current error view, or `None` once the item is removed.
    pub fn error_info(&self) -> Option<ErrorInfo> {
        self.shared.error_info(self.id)
    }

    /// Snapshot of the record, or `None` once the item is removed.
    pub fn record(&self) -> Option<ItemRecord> {
        self.shared.record(self.id)
    }

    /// Current load phase, or `None` once the item is removed.
    pub fn phase(&self) -> Option<LoadPhase> {
        let state = self.shared.state.lock();
        state.registry.entries.get(self.id).map(|entry| entry.machine.phase())
    }

    /// Whether the item exceeded the maximum wait.
    pub fn is_overtime(&self) -> bool {
        self.record()
            .is_some_and(|record| record.error_type == ErrorType::Timeout)
    }

    /// Width the item is laid out at.
    pub fn column_width(&self) -> f32 {
        self.shared.column_width()
    }
}

impl std::fmt::Debug for ItemHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemHandle").field("id", &self.id).finish()
    }
}

enum Notice {
    Retrying(RetryEvent),
    Overtime(ItemId),
}

/// The single writer of the layout state.
struct LayoutDriver {
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<LayoutMessage>,
    timers: mpsc::WeakUnboundedSender<LayoutMessage>,
    acks: Vec<oneshot::Sender<()>>,
    closed: bool,
    stopping: bool,
}

impl LayoutDriver {
    async fn run(mut self) {
        tracing::debug!(target: targets::CONTEXT, "layout driver started");

        while let Some(message) = self.rx.recv().await {
            self.dispatch(message);
            while !self.stopping {
                match self.rx.try_recv() {
                    Ok(message) => self.dispatch(message),
                    Err(_) => break,
                }
            }
            if self.stopping {
                break;
            }

            self.run_passes().await;
            self.settle();
            for ack in self.acks.drain(..) {
                let _ = ack.send(());
            }
            if self.stopping {
                break;
            }
        }

        self.teardown();
    }

    fn dispatch(&mut self, message: LayoutMessage) {
        match message {
            LayoutMessage::Add {
                config,
                hooks,
                reply,
            } => {
                let id = self.add(config, hooks);
                let _ = reply.send(id);
            }
            LayoutMessage::Remove(id) => self.remove(id),
            LayoutMessage::Loaded(id, dimensions) => {
                self.transition(id, |machine, record, _| machine.on_load(record, dimensions));
            }
            LayoutMessage::Failed(id, message) => {
                self.transition(id, |machine, record, _| machine.on_error(record, message));
            }
            LayoutMessage::FallbackLoaded(id) => {
                self.transition(id, |machine, record, _| machine.on_fallback_load(record));
            }
            LayoutMessage::FallbackFailed(id) => {
                self.transition(id, |machine, record, _| machine.on_fallback_error(record));
            }
            LayoutMessage::Retry(id) => {
                self.transition(id, |machine, record, _| machine.on_manual_retry(record));
            }
            LayoutMessage::RetryDue(id) => {
                self.transition(id, |machine, _, _| machine.on_retry_due());
            }
            LayoutMessage::WaitElapsed(id) => {
                self.transition(id, |machine, record, config| {
                    machine.on_timeout(record, config.max_wait().unwrap_or_default())
                });
            }
            // Ready items are placed at the end of every cycle; this only
            // wakes the driver.
            LayoutMessage::Reflow => {}
            LayoutMessage::FullReflow => self.shared.state.lock().scheduler.request_full(),
            LayoutMessage::Reconfigure(change) => self.reconfigure(change),
            LayoutMessage::OnLoad(handler) => self.shared.state.lock().load_handlers.push(handler),
            LayoutMessage::Sync(ack) => self.acks.push(ack),
            LayoutMessage::Shutdown => self.stopping = true,
        }
    }

    fn spawn_timer(&self, delay: Duration, message: LayoutMessage) -> AbortHandle {
        let sender = self.timers.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(sender) = sender.upgrade() {
                let _ = sender.send(message);
            }
        })
        .abort_handle()
    }

    fn add(&mut self, config: ResolvedItemConfig, hooks: Arc<dyn ItemHooks>) -> ItemId {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        let entry = ItemEntry {
            record: ItemRecord::new(config.index),
            machine: LoadStateMachine::new(state.policy, config.error_image_src.clone()),
            config,
            hooks,
            seq: 0,
            retry_timer: None,
            wait_timer: None,
        };
        let id = state.registry.insert(entry);
        if let Some(max_wait) = state.config.max_wait() {
            let timer = self.spawn_timer(max_wait, LayoutMessage::WaitElapsed(id));
            state.registry.entries[id].wait_timer = Some(timer);
        }

        tracing::debug!(target: targets::CONTEXT, ?id, items = state.registry.entries.len(), "item registered");
        id
    }

    fn remove(&mut self, id: ItemId) {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if let Some(mut entry) = state.registry.remove(id) {
            entry.cancel_timers();
            state.scheduler.forget(id);
            if entry.record.is_placed() {
                state.scheduler.request_full();
            }
            tracing::debug!(target: targets::CONTEXT, ?id, placed = entry.record.is_placed(), "item removed");
        }
    }

    fn reconfigure(&mut self, change: GeometryChange) {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        match change {
            GeometryChange::ContainerWidth(width) => state.config.container_width = width,
            GeometryChange::Columns(columns) => state.config.columns = columns,
            GeometryChange::Gaps { column, row } => {
                state.config.column_gap = column;
                state.config.row_gap = row;
            }
        }
        state.scheduler.reconfigure(&state.config);
        tracing::debug!(
            target: targets::LAYOUT,
            ?change,
            column_width = state.config.column_width(),
            "grid geometry changed"
        );
    }

    /// Feed one event to an item's state machine and act on the effect.
    fn transition<F>(&mut self, id: ItemId, event: F)
    where
        F: FnOnce(&mut LoadStateMachine, &mut ItemRecord, &WaterfallConfig) -> LoadEffect,
    {
        let mut refresh = None;
        let mut notice = None;
        {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let Some(entry) = state.registry.entries.get_mut(id) else {
                tracing::trace!(target: targets::LOAD, ?id, "dropping event for removed item");
                return;
            };

            let effect = event(&mut entry.machine, &mut entry.record, &state.config);
            tracing::trace!(
                target: targets::LOAD,
                ?id,
                phase = ?entry.machine.phase(),
                ?effect,
                "load transition"
            );

            match effect {
                LoadEffect::Ignored => {}
                LoadEffect::Ready => {
                    if entry.machine.phase().is_terminal() {
                        entry.cancel_timers();
                    }
                    state.scheduler.enqueue(id);
                }
                LoadEffect::TimedOut => {
                    entry.wait_timer = None;
                    entry.cancel_retry();
                    state.scheduler.enqueue(id);
                    notice = Some(Notice::Overtime(id));
                }
                LoadEffect::RetryScheduled { attempt, delay } => {
                    let timer = self.spawn_timer(delay, LayoutMessage::RetryDue(id));
                    if let Some(previous) = entry.retry_timer.replace(timer) {
                        previous.abort();
                    }
                    tracing::debug!(target: targets::LOAD, ?id, attempt, ?delay, "retry scheduled");
                    notice = Some(Notice::Retrying(RetryEvent { item: id, attempt }));
                }
                LoadEffect::Refresh => {
                    entry.retry_timer = None;
                    if entry.wait_timer.is_none()
                        && let Some(max_wait) = state.config.max_wait()
                    {
                        entry.wait_timer =
                            Some(self.spawn_timer(max_wait, LayoutMessage::WaitElapsed(id)));
                    }
                    refresh = Some(entry.hooks.clone());
                }
                LoadEffect::FallbackRequested { src } => {
                    tracing::debug!(target: targets::LOAD, ?id, %src, "waiting for fallback image");
                }
            }
        }

        if let Some(hooks) = refresh {
            let refresh = hooks.refresh_image(true);
            tokio::spawn(async move {
                if let Err(err) = refresh.await {
                    tracing::warn!(target: targets::LOAD, ?id, %err, "refresh_image hook failed");
                }
            });
        }
        match notice {
            Some(Notice::Retrying(event)) => self.shared.signals.retrying.emit(event),
            Some(Notice::Overtime(id)) => self.shared.signals.overtime.emit(id),
            None => {}
        }
    }

    async fn run_passes(&mut self) {
        loop {
            let full = self.shared.state.lock().scheduler.full_requested();
            if full && !self.full_reflow().await {
                break;
            }

            let report = {
                let mut guard = self.shared.state.lock();
                let state = &mut *guard;
                state.scheduler.run_incremental(&mut state.registry)
            };
            if let Some(report) = report {
                self.shared.signals.reflowed.emit(report);
            }

            let again = self.shared.state.lock().scheduler.full_requested();
            if self.stopping || !again {
                break;
            }
        }
    }

    /// Await the `before_reflow` hooks, then replay every item.
    ///
    /// Messages arriving while the hooks run are applied to the registry, so
    /// removals take effect and re-measurements are seen by this pass.
    async fn full_reflow(&mut self) -> bool {
        let (hooks, timeout) = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            if !state.scheduler.begin_pass() {
                return false;
            }
            let scope = state.config.before_reflow_scope;
            let hooks: Vec<(ItemId, Arc<dyn ItemHooks>)> = state
                .registry
                .order
                .iter()
                .filter_map(|id| {
                    let entry = &state.registry.entries[*id];
                    let include = match scope {
                        BeforeReflowScope::All => true,
                        BeforeReflowScope::Unsettled => {
                            entry.machine.phase() != LoadPhase::Success
                        }
                    };
                    include.then(|| (*id, entry.hooks.clone()))
                })
                .collect();
            (hooks, state.config.hook_timeout())
        };

        tracing::debug!(target: targets::LAYOUT, hooks = hooks.len(), "full reflow: awaiting before_reflow hooks");
        let pending = join_all(hooks.into_iter().map(|(id, hooks)| {
            let hook = hooks.before_reflow();
            async move {
                match tokio::time::timeout(timeout, hook).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::warn!(target: targets::LAYOUT, ?id, %err, "before_reflow hook failed");
                    }
                    Err(_) => {
                        tracing::warn!(target: targets::LAYOUT, ?id, ?timeout, "before_reflow hook timed out");
                    }
                }
            }
        }));
        tokio::pin!(pending);

        loop {
            tokio::select! {
                biased;
                _ = &mut pending => break,
                message = self.rx.recv(), if !self.closed => match message {
                    Some(message) => self.dispatch(message),
                    None => self.closed = true,
                },
            }
        }
        while let Ok(message) = self.rx.try_recv() {
            self.dispatch(message);
        }

        let report = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            state.scheduler.finish_full(&mut state.registry)
        };
        self.shared.signals.reflowed.emit(report);
        true
    }

    /// Emit `load_started` / `loaded` on loading-state changes and run the
    /// one-shot load handlers once the grid settles.
    fn settle(&mut self) {
        let mut started = false;
        let mut finished = false;
        let mut handlers = Vec::new();
        {
            let mut state = self.shared.state.lock();
            let count = state.registry.entries.len();
            if !state.registry.all_terminal() {
                if !state.loading {
                    state.loading = true;
                    started = true;
                }
            } else {
                finished = std::mem::replace(&mut state.loading, false);
                if count > 0 {
                    handlers = std::mem::take(&mut state.load_handlers);
                }
            }
        }

        if started {
            tracing::debug!(target: targets::CONTEXT, "grid started loading");
            self.shared.signals.load_started.emit(());
        }
        if finished {
            tracing::debug!(target: targets::CONTEXT, "grid settled");
            self.shared.signals.loaded.emit(());
        }
        for handler in handlers {
            handler();
        }
    }

    fn teardown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            for entry in state.registry.entries.values_mut() {
                entry.cancel_timers();
            }
            state.load_handlers.clear();
        }
        // Listeners often hold context clones; release them with the driver.
        self.shared.signals.disconnect_all();
        tracing::debug!(target: targets::CONTEXT, "layout driver stopped");
    }
}
