//! Observer used for grid events.
//!
//! The context emits its signals from the layout driver task, so connected
//! closures run there: keep them short, and never await the context from one.
//!
//! # Example
//!
//! ```
//! use horizon_waterfall::Signal;
//!
//! let settled = Signal::<usize>::new();
//! let id = settled.connect(|count| println!("{count} items settled"));
//! settled.emit(12);
//! assert!(settled.disconnect(id));
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::logging::targets;

new_key_type! {
    /// Identifies one closure connected to a [`Signal`].
    pub struct ConnectionId;
}

type Listener<Args> = Arc<dyn Fn(&Args) + Send + Sync>;

/// A list of listeners invoked in connection order on every emission.
pub struct Signal<Args> {
    listeners: Mutex<SlotMap<ConnectionId, Listener<Args>>>,
}

impl<Args: 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: 'static> Signal<Args> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(SlotMap::with_key()),
        }
    }

    /// Register a listener. Keep the id to remove it again.
    pub fn connect<F>(&self, listener: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.listeners.lock().insert(Arc::new(listener))
    }

    /// Remove a listener; `false` if it was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.listeners.lock().remove(id).is_some()
    }

    /// Remove every listener.
    pub fn disconnect_all(&self) {
        self.listeners.lock().clear();
    }

    pub fn connection_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Invoke every listener with `args`.
    ///
    /// The listener list is copied out before any listener runs, so a
    /// listener may connect or disconnect on the same signal.
    pub fn emit(&self, args: Args) {
        let listeners: Vec<Listener<Args>> = self.listeners.lock().values().cloned().collect();
        tracing::trace!(target: targets::SIGNAL, listeners = listeners.len(), "emit");
        for listener in &listeners {
            listener(&args);
        }
    }
}

impl<Args> std::fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}
