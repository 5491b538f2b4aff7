//! Simulated photo gallery driving a waterfall grid.
//!
//! Images "load" after a random delay and fail at random; failures are
//! retried and then fall back to a placeholder image.
//!
//! Run with: RUST_LOG=horizon_waterfall=debug cargo run -p horizon-waterfall --example gallery

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use horizon_waterfall::{
    Dimensions, HookFuture, ItemConfig, ItemHandle, ItemHooks, LoadPhase, WaterfallConfig,
    WaterfallContext,
};
use rand::Rng;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

struct ImageSource {
    handle: OnceLock<ItemHandle>,
    size: Dimensions,
    failure_rate: f64,
}

#[derive(Clone)]
struct SimulatedImage(Arc<ImageSource>);

impl SimulatedImage {
    fn new(size: Dimensions, failure_rate: f64) -> Self {
        Self(Arc::new(ImageSource {
            handle: OnceLock::new(),
            size,
            failure_rate,
        }))
    }

    fn attach(&self, handle: ItemHandle) {
        let _ = self.0.handle.set(handle);
    }

    /// Start one download attempt.
    fn start(&self) {
        let source = self.0.clone();
        tokio::spawn(async move {
            let Some(handle) = source.handle.get() else {
                return;
            };
            let (delay, fails) = {
                let mut rng = rand::thread_rng();
                (rng.gen_range(50..800), rng.gen_bool(source.failure_rate))
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;

            if !fails {
                handle.on_load(source.size);
                return;
            }
            handle.on_error("simulated network error");

            // Give the grid a moment to decide between retrying and falling back.
            tokio::time::sleep(Duration::from_millis(20)).await;
            if handle.phase() == Some(LoadPhase::AwaitingFallback) {
                if rand::thread_rng().gen_bool(0.8) {
                    handle.on_fallback_load();
                } else {
                    handle.on_fallback_error();
                }
            }
        });
    }
}

impl ItemHooks for SimulatedImage {
    fn refresh_image(&self, _force: bool) -> HookFuture {
        self.start();
        Box::pin(async { Ok(()) })
    }
}

#[tokio::main]
async fn main() -> horizon_waterfall::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("horizon_waterfall=info")),
        )
        .init();

    let config = WaterfallConfig::new()
        .with_columns(3)
        .with_container_width(960.0)
        .with_max_retries(2)
        .with_retry_delay(Duration::from_millis(300))
        .with_max_wait(Duration::from_secs(3))
        .with_error_image_src("placeholder/broken.png");
    let grid = WaterfallContext::new(config)?;

    grid.signals().retrying.connect(|event| {
        tracing::info!(item = ?event.item, attempt = event.attempt, "retrying image");
    });
    grid.signals().overtime.connect(|id| {
        tracing::warn!(item = ?id, "image is taking too long");
    });
    grid.signals().reflowed.connect(|report| {
        tracing::info!(
            kind = ?report.kind,
            placed = report.placed,
            height = report.content_height,
            "reflowed"
        );
    });

    let (done, settled) = oneshot::channel();
    grid.on_load(move || {
        let _ = done.send(());
    })?;

    for index in 0..24 {
        let size = {
            let mut rng = rand::thread_rng();
            Dimensions::new(rng.gen_range(400.0..1600.0), rng.gen_range(300.0..1800.0))
        };
        let image = SimulatedImage::new(size, 0.25);
        let handle = grid
            .add_item(ItemConfig::new().with_index(index), image.clone())
            .await?;
        image.attach(handle);
        image.start();
    }

    let _ = settled.await;
    println!("{}", grid.layout_debug());

    // Narrow the window: everything is laid out again in two columns.
    grid.set_columns(2)?;
    grid.set_container_width(640.0)?;
    grid.sync().await?;
    println!("{}", grid.layout_debug());

    grid.shutdown().await
}
