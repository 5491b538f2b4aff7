//! End-to-end tests for the waterfall context.
//!
//! Every test runs on a paused clock, so retry delays and maximum waits
//! elapse as soon as the runtime is idle.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;

use horizon_waterfall::{
    Dimensions, ErrorType, FailureMode, HookError, HookFuture, ItemConfig, ItemHandle, ItemHooks,
    LoadPhase, NoopHooks, ReflowKind, ReflowReport, RetryEvent, Signal, WaterfallConfig,
    WaterfallContext, WaterfallError,
};

/// Three 100px columns, no gaps, natural heights.
fn grid_config() -> WaterfallConfig {
    WaterfallConfig::new()
        .with_columns(3)
        .with_gaps(0.0, 0.0)
        .with_container_width(300.0)
        .with_preserve_aspect_ratio(false)
}

fn count<T: 'static>(signal: &Signal<T>) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let slot_counter = counter.clone();
    signal.connect(move |_| {
        slot_counter.fetch_add(1, Ordering::SeqCst);
    });
    counter
}

fn record<T: Clone + Send + 'static>(signal: &Signal<T>) -> Arc<Mutex<Vec<T>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let slot_events = events.clone();
    signal.connect(move |event: &T| {
        slot_events.lock().push(event.clone());
    });
    events
}

fn dims(height: f32) -> Dimensions {
    Dimensions::new(100.0, height)
}

#[derive(Default)]
struct CountingHooks {
    refreshes: AtomicUsize,
}

impl ItemHooks for CountingHooks {
    fn refresh_image(&self, _force: bool) -> HookFuture {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Reports a fresh height through its handle whenever a full reflow asks.
#[derive(Default)]
struct Remeasure {
    handle: OnceLock<ItemHandle>,
    height: AtomicU32,
}

impl ItemHooks for Remeasure {
    fn before_reflow(&self) -> HookFuture {
        if let Some(handle) = self.handle.get() {
            let height = self.height.load(Ordering::SeqCst) as f32;
            handle.on_load(dims(height));
        }
        Box::pin(async { Ok(()) })
    }
}

struct SlowHooks;

impl ItemHooks for SlowHooks {
    fn before_reflow(&self) -> HookFuture {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
    }
}

struct FailingHooks;

impl ItemHooks for FailingHooks {
    fn before_reflow(&self) -> HookFuture {
        Box::pin(async { Err(HookError::new("measurement failed")) })
    }
}

#[tokio::test(start_paused = true)]
async fn test_shortest_column_placement() {
    let grid = WaterfallContext::new(grid_config()).unwrap();
    let a = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    let b = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    let c = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    let d = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();

    a.on_load(dims(100.0));
    b.on_load(dims(50.0));
    c.on_load(dims(80.0));
    d.on_load(dims(30.0));
    grid.sync().await.unwrap();

    let placed = |handle: &ItemHandle| {
        let record = handle.record().unwrap();
        (record.column, record.top, record.left)
    };
    assert_eq!(placed(&a), (Some(0), 0.0, 0.0));
    assert_eq!(placed(&b), (Some(1), 0.0, 100.0));
    assert_eq!(placed(&c), (Some(2), 0.0, 200.0));
    assert_eq!(placed(&d), (Some(1), 50.0, 100.0));
    assert_eq!(grid.column_heights(), vec![100.0, 80.0, 80.0]);
    assert_eq!(grid.content_height(), 100.0);
    assert_eq!(grid.column_width(), 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_full_reflow_ignores_arrival_order() {
    let grid = WaterfallContext::new(grid_config()).unwrap();
    let mut items = Vec::new();
    for _ in 0..4 {
        items.push(grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap());
    }

    // Completions trickle in backwards, one pass each.
    let heights = [100.0, 50.0, 80.0, 30.0];
    for i in (0..4).rev() {
        items[i].on_load(dims(heights[i]));
        grid.sync().await.unwrap();
    }
    assert_eq!(items[3].record().unwrap().column, Some(0));

    let reports = record(&grid.signals().reflowed);
    grid.full_reflow().unwrap();
    grid.sync().await.unwrap();

    let columns: Vec<_> = items
        .iter()
        .map(|item| item.record().unwrap().column)
        .collect();
    assert_eq!(columns, vec![Some(0), Some(1), Some(2), Some(1)]);
    assert_eq!(items[3].record().unwrap().top, 50.0);

    let reports = reports.lock();
    assert_eq!(
        reports.as_slice(),
        &[ReflowReport {
            kind: ReflowKind::Full,
            placed: 4,
            content_height: 100.0,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_retries_then_final_fallback() {
    let config = grid_config()
        .with_max_retries(2)
        .with_retry_delay(Duration::from_millis(1000))
        .with_error_image_src("fallback.png");
    let grid = WaterfallContext::new(config).unwrap();
    let retries = record(&grid.signals().retrying);

    let hooks = Arc::new(CountingHooks::default());
    let item = grid.add_item(ItemConfig::new(), hooks.clone()).await.unwrap();

    // Initial load plus two retries: three attempts in total.
    for attempt in 1..=2u32 {
        item.on_error("404 Not Found");
        grid.sync().await.unwrap();
        assert_eq!(grid.phase(item.id()), Some(LoadPhase::Retrying));
        assert_eq!(item.record().unwrap().retry_count, attempt);
        assert!(!item.record().unwrap().show_fallback);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(hooks.refreshes.load(Ordering::SeqCst), attempt as usize);
        assert_eq!(grid.phase(item.id()), Some(LoadPhase::Pending));
    }

    item.on_error("404 Not Found");
    grid.sync().await.unwrap();
    assert_eq!(grid.phase(item.id()), Some(LoadPhase::AwaitingFallback));
    let info = item.error_info().unwrap();
    assert!(info.has_error);
    assert!(!info.show_final_fallback);
    assert_eq!(info.fallback_image_src, "fallback.png");
    assert!(!item.record().unwrap().is_placed());

    item.on_fallback_error();
    grid.sync().await.unwrap();

    let record = item.record().unwrap();
    assert_eq!(grid.phase(item.id()), Some(LoadPhase::FinalFallback));
    assert_eq!(record.retry_count, 2);
    assert_eq!(record.error_type, ErrorType::FallbackFailed);
    assert!(record.show_fallback && record.show_final_fallback);
    assert!(record.loaded && !record.load_success);
    assert_eq!(record.layout_height, 200.0);
    assert_eq!(hooks.refreshes.load(Ordering::SeqCst), 2);

    let attempts: Vec<u32> = retries.lock().iter().map(|e| e.attempt).collect();
    assert_eq!(attempts, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_image_loads() {
    let config = grid_config().with_max_retries(0);
    let grid = WaterfallContext::new(config).unwrap();
    let item = grid
        .add_item(ItemConfig::new().with_error_image_src("alt.png"), NoopHooks)
        .await
        .unwrap();

    item.on_error("connection reset");
    item.on_fallback_load();
    grid.sync().await.unwrap();

    let record = item.record().unwrap();
    assert_eq!(grid.phase(item.id()), Some(LoadPhase::FallbackShown));
    assert!(record.show_fallback && !record.show_final_fallback);
    assert_eq!(record.error_type, ErrorType::OriginalFailed);
    assert_eq!(record.column, Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_max_wait_fires_overtime_once() {
    let config = grid_config().with_max_wait(Duration::from_millis(500));
    let grid = WaterfallContext::new(config).unwrap();
    let overtime = count(&grid.signals().overtime);
    let item = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(overtime.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    grid.sync().await.unwrap();
    assert_eq!(overtime.load(Ordering::SeqCst), 1);
    assert!(item.is_overtime());

    let record = item.record().unwrap();
    assert_eq!(record.error_type, ErrorType::Timeout);
    assert!(record.loaded && !record.load_success);
    assert_eq!(record.layout_height, 200.0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(overtime.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_load_after_timeout_moves_item() {
    let config = grid_config().with_max_wait(Duration::from_millis(500));
    let grid = WaterfallContext::new(config).unwrap();
    let item = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    grid.sync().await.unwrap();
    assert_eq!(item.record().unwrap().layout_height, 200.0);

    let reports = record(&grid.signals().reflowed);
    item.on_load(dims(50.0));
    grid.sync().await.unwrap();

    let record = item.record().unwrap();
    assert_eq!(grid.phase(item.id()), Some(LoadPhase::Success));
    assert_eq!(record.error_type, ErrorType::None);
    assert_eq!(record.layout_height, 50.0);
    assert_eq!(grid.content_height(), 50.0);
    assert!(
        reports
            .lock()
            .iter()
            .any(|report| report.kind == ReflowKind::Full)
    );
}

#[tokio::test(start_paused = true)]
async fn test_manual_retry_after_timeout() {
    let config = grid_config()
        .with_max_retries(1)
        .with_max_wait(Duration::from_millis(500));
    let grid = WaterfallContext::new(config).unwrap();
    let overtime = count(&grid.signals().overtime);
    let hooks = Arc::new(CountingHooks::default());
    let item = grid.add_item(ItemConfig::new(), hooks.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    item.retry();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(grid.phase(item.id()), Some(LoadPhase::Pending));
    assert_eq!(item.record().unwrap().retry_count, 1);
    assert_eq!(hooks.refreshes.load(Ordering::SeqCst), 1);

    // The retried load gets a fresh wait.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(overtime.load(Ordering::SeqCst), 2);

    // Budget spent.
    item.retry();
    grid.sync().await.unwrap();
    assert_eq!(grid.phase(item.id()), Some(LoadPhase::TimedOut));
    assert_eq!(hooks.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_remove_cancels_pending_retry() {
    let config = grid_config().with_retry_delay(Duration::from_millis(1000));
    let grid = WaterfallContext::new(config).unwrap();
    let hooks = Arc::new(CountingHooks::default());
    let item = grid.add_item(ItemConfig::new(), hooks.clone()).await.unwrap();

    item.on_error("timeout");
    grid.sync().await.unwrap();
    assert_eq!(grid.phase(item.id()), Some(LoadPhase::Retrying));

    item.remove();
    grid.sync().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(hooks.refreshes.load(Ordering::SeqCst), 0);
    assert_eq!(grid.item_count(), 0);
    assert!(item.record().is_none());
    assert!(matches!(
        grid.item_handle(item.id()),
        Err(WaterfallError::UnknownItem(_))
    ));

    // Late notifications for the removed item are dropped.
    item.on_load(dims(10.0));
    grid.sync().await.unwrap();
    assert_eq!(grid.content_height(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_removal_closes_gap() {
    let grid = WaterfallContext::new(grid_config().with_columns(1)).unwrap();
    let a = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    let b = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    let pending = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    a.on_load(dims(40.0));
    b.on_load(dims(60.0));
    grid.sync().await.unwrap();
    assert_eq!(b.record().unwrap().top, 40.0);

    let reports = record(&grid.signals().reflowed);
    a.remove();
    grid.sync().await.unwrap();

    assert_eq!(b.record().unwrap().top, 0.0);
    assert_eq!(grid.content_height(), 60.0);
    assert_eq!(grid.column_heights(), vec![60.0]);
    assert_eq!(
        reports.lock().as_slice(),
        &[ReflowReport {
            kind: ReflowKind::Full,
            placed: 1,
            content_height: 60.0,
        }]
    );

    // An unplaced item leaves nothing to close.
    reports.lock().clear();
    grid.remove_item(pending.id()).unwrap();
    grid.sync().await.unwrap();
    assert!(reports.lock().is_empty());
    assert_eq!(b.record().unwrap().top, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_removal_while_hooks_pending() {
    let config = grid_config()
        .with_columns(1)
        .with_hook_timeout(Duration::from_millis(1000));
    let grid = WaterfallContext::new(config).unwrap();
    let slow = grid.add_item(ItemConfig::new(), SlowHooks).await.unwrap();
    let doomed = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    let last = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    slow.on_load(dims(30.0));
    doomed.on_load(dims(50.0));
    last.on_load(dims(20.0));
    grid.sync().await.unwrap();
    assert_eq!(last.record().unwrap().top, 80.0);

    let reports = record(&grid.signals().reflowed);
    grid.full_reflow().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(grid.is_reflowing());

    doomed.remove();
    grid.sync().await.unwrap();

    assert!(!grid.is_reflowing());
    assert!(doomed.record().is_none());
    assert_eq!(grid.item_count(), 2);

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, ReflowKind::Full);
    assert_eq!(reports[0].placed, 2);
    assert_eq!(reports[0].content_height, 50.0);

    assert_eq!(slow.record().unwrap().top, 0.0);
    assert_eq!(last.record().unwrap().top, 30.0);
    assert_eq!(grid.column_heights(), vec![50.0]);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_result_after_timeout() {
    let config = grid_config()
        .with_max_retries(0)
        .with_error_image_src("alt.png")
        .with_max_wait(Duration::from_millis(500));
    let grid = WaterfallContext::new(config).unwrap();
    let item = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();

    item.on_error("502 Bad Gateway");
    grid.sync().await.unwrap();
    assert_eq!(item.phase(), Some(LoadPhase::AwaitingFallback));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(item.phase(), Some(LoadPhase::TimedOut));
    assert!(item.record().unwrap().show_fallback);

    item.on_fallback_error();
    grid.sync().await.unwrap();

    let record = item.record().unwrap();
    assert_eq!(item.phase(), Some(LoadPhase::FinalFallback));
    assert_eq!(record.error_type, ErrorType::FallbackFailed);
    assert!(record.show_fallback && record.show_final_fallback);
    assert!(item.error_info().unwrap().show_final_fallback);
    assert_eq!(record.layout_height, 200.0);
}

#[tokio::test(start_paused = true)]
async fn test_hidden_failures_take_no_space() {
    let config = grid_config()
        .with_max_retries(0)
        .with_failure_mode(FailureMode::Hide);
    let grid = WaterfallContext::new(config).unwrap();
    let broken = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    let photo = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();

    broken.on_error("gone");
    photo.on_load(dims(70.0));
    grid.sync().await.unwrap();

    let hidden = broken.record().unwrap();
    assert!(!hidden.is_placed());
    assert!(!hidden.visible);
    assert!(hidden.show_final_fallback);
    assert_eq!(broken.error_info().unwrap().failure_mode, FailureMode::Hide);

    let shown = photo.record().unwrap();
    assert_eq!((shown.column, shown.top), (Some(0), 0.0));
    assert_eq!(grid.column_heights(), vec![70.0, 0.0, 0.0]);
}

#[tokio::test(start_paused = true)]
async fn test_load_signals_and_handlers() {
    let grid = WaterfallContext::new(grid_config().with_max_retries(0)).unwrap();
    let started = count(&grid.signals().load_started);
    let loaded = count(&grid.signals().loaded);

    // Nothing registered: the handler waits for a non-empty grid.
    let early = Arc::new(AtomicUsize::new(0));
    let early_counter = early.clone();
    grid.on_load(move || {
        early_counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    grid.sync().await.unwrap();
    assert_eq!(early.load(Ordering::SeqCst), 0);

    let a = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    let b = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    grid.sync().await.unwrap();
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(loaded.load(Ordering::SeqCst), 0);

    a.on_load(dims(20.0));
    grid.sync().await.unwrap();
    assert_eq!(loaded.load(Ordering::SeqCst), 0);

    b.on_error("404");
    grid.sync().await.unwrap();
    assert_eq!(loaded.load(Ordering::SeqCst), 1);
    assert_eq!(early.load(Ordering::SeqCst), 1);

    // Already settled: runs right away, once.
    let late = Arc::new(AtomicUsize::new(0));
    let late_counter = late.clone();
    grid.on_load(move || {
        late_counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    grid.sync().await.unwrap();
    grid.sync().await.unwrap();
    assert_eq!(late.load(Ordering::SeqCst), 1);

    grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    grid.sync().await.unwrap();
    assert_eq!(started.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_index_orders_items() {
    let grid = WaterfallContext::new(grid_config()).unwrap();
    let x = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    let y = grid
        .add_item(ItemConfig::new().with_index(2), NoopHooks)
        .await
        .unwrap();
    let z = grid
        .add_item(ItemConfig::new().with_index(1), NoopHooks)
        .await
        .unwrap();

    for item in [&x, &y, &z] {
        item.on_load(dims(10.0));
    }
    grid.sync().await.unwrap();

    let order: Vec<_> = grid.items().into_iter().map(|(id, _)| id).collect();
    assert_eq!(order, vec![z.id(), y.id(), x.id()]);
    assert_eq!(z.record().unwrap().column, Some(0));
    assert_eq!(y.record().unwrap().column, Some(1));
    assert_eq!(x.record().unwrap().column, Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_geometry_change_reflows_everything() {
    let grid = WaterfallContext::new(grid_config().with_gaps(0.0, 5.0)).unwrap();
    let a = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    let b = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();
    a.on_load(dims(40.0));
    b.on_load(dims(60.0));
    grid.sync().await.unwrap();
    assert_eq!(b.record().unwrap().column, Some(1));

    let reports = record(&grid.signals().reflowed);
    grid.set_columns(1).unwrap();
    grid.sync().await.unwrap();

    let b_record = b.record().unwrap();
    assert_eq!((b_record.column, b_record.top), (Some(0), 45.0));
    assert_eq!(grid.column_width(), 300.0);
    assert_eq!(reports.lock()[0].kind, ReflowKind::Full);

    grid.set_container_width(600.0).unwrap();
    grid.sync().await.unwrap();
    assert_eq!(grid.column_width(), 600.0);
    assert_eq!(grid.config().container_width, 600.0);
}

#[tokio::test(start_paused = true)]
async fn test_aspect_ratio_follows_column_width() {
    let grid = WaterfallContext::new(WaterfallConfig::default()).unwrap();
    let item = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();

    // (375 - 10) / 2 = 182.5 wide columns.
    item.on_load(Dimensions::new(365.0, 730.0));
    grid.sync().await.unwrap();
    assert_eq!(item.column_width(), 182.5);
    assert_eq!(item.record().unwrap().layout_height, 365.0);
}

#[tokio::test(start_paused = true)]
async fn test_before_reflow_remeasures() {
    let grid = WaterfallContext::new(grid_config()).unwrap();
    let hooks = Arc::new(Remeasure::default());
    let item = grid.add_item(ItemConfig::new(), hooks.clone()).await.unwrap();
    let _ = hooks.handle.set(item.clone());

    item.on_load(dims(40.0));
    grid.sync().await.unwrap();
    assert_eq!(item.record().unwrap().layout_height, 40.0);

    hooks.height.store(90, Ordering::SeqCst);
    grid.full_reflow().unwrap();
    grid.sync().await.unwrap();

    assert_eq!(item.record().unwrap().layout_height, 90.0);
    assert_eq!(grid.content_height(), 90.0);
    assert!(!grid.is_reflowing());
}

#[tokio::test(start_paused = true)]
async fn test_misbehaving_hooks_do_not_block_reflow() {
    let config = grid_config().with_hook_timeout(Duration::from_millis(100));
    let grid = WaterfallContext::new(config).unwrap();
    let slow = grid.add_item(ItemConfig::new(), SlowHooks).await.unwrap();
    let failing = grid.add_item(ItemConfig::new(), FailingHooks).await.unwrap();
    slow.on_load(dims(30.0));
    failing.on_load(dims(30.0));
    grid.sync().await.unwrap();

    let reports = record(&grid.signals().reflowed);
    grid.full_reflow().unwrap();
    grid.sync().await.unwrap();

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].placed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_settings_are_rejected() {
    assert!(matches!(
        WaterfallContext::new(grid_config().with_gaps(f32::NAN, 0.0)),
        Err(WaterfallError::InvalidConfig { field: "column_gap", .. })
    ));

    let grid = WaterfallContext::new(grid_config()).unwrap();
    assert!(grid.set_columns(0).is_err());
    assert!(grid.set_container_width(-1.0).is_err());
    assert!(grid.set_gaps(0.0, f32::INFINITY).is_err());
    assert!(
        grid.add_item(ItemConfig::new().with_fallback_height(-5.0), NoopHooks)
            .await
            .is_err()
    );
    assert_eq!(grid.item_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_context() {
    let grid = WaterfallContext::new(grid_config().with_max_wait(Duration::from_secs(1))).unwrap();
    let overtime = count(&grid.signals().overtime);
    let item = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();

    grid.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(overtime.load(Ordering::SeqCst), 0);
    assert_eq!(grid.signals().overtime.connection_count(), 0);

    assert!(matches!(grid.sync().await, Err(WaterfallError::Closed)));
    assert!(matches!(
        grid.add_item(ItemConfig::new(), NoopHooks).await,
        Err(WaterfallError::Closed)
    ));
    // Handles outlive the driver without panicking.
    item.on_load(dims(10.0));
    assert!(grid.full_reflow().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_retry_event_payload() {
    let grid = WaterfallContext::new(grid_config().with_max_retries(1)).unwrap();
    let retries = record(&grid.signals().retrying);
    let item = grid.add_item(ItemConfig::new(), NoopHooks).await.unwrap();

    item.on_error("503");
    grid.sync().await.unwrap();

    assert_eq!(
        retries.lock().as_slice(),
        &[RetryEvent {
            item: item.id(),
            attempt: 1
        }]
    );
}
