//! # Signal
//!
//! A typed event registry. Each stateful object in the crate owns one [`Signal`] per event it
//! emits (`request`, `upgrade`, `message`, `close`, ...) and listeners subscribe to the one they
//! care about.
//!
//! Events are delivered by value to the listeners in registration order. A listener either
//! consumes the event and returns [`Dispatch::Handled`], which stops delivery, or hands it back
//! with [`Dispatch::Unhandled`] so the next listener gets a chance. When nobody handles an event
//! it is returned to the emitter, which decides what an unhandled event means (for an HTTP
//! request: close the connection).
//!
//! ```rust
//! use yaws::{Dispatch, Signal};
//!
//! let signal = Signal::<u32>::new();
//! signal.on(|n| if n % 2 == 0 { Dispatch::Handled } else { Dispatch::Unhandled(n) });
//!
//! assert!(signal.emit(4).is_handled());
//! assert_eq!(signal.emit(3).into_unhandled(), Some(3));
//! ```
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

/// Outcome of delivering an event to a listener or to a whole [`Signal`].
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch<T> {
    /// The event was consumed; no other listener sees it.
    Handled,
    /// The event was not consumed and is handed back.
    Unhandled(T),
}

impl<T> Dispatch<T> {
    /// Returns `true` if a listener consumed the event.
    #[inline]
    pub fn is_handled(&self) -> bool {
        matches!(self, Dispatch::Handled)
    }

    /// Returns the event if nobody consumed it.
    #[inline]
    pub fn into_unhandled(self) -> Option<T> {
        match self {
            Dispatch::Handled => None,
            Dispatch::Unhandled(event) => Some(event),
        }
    }
}

/// Identifies a registered listener so it can be removed with [`Signal::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<T> = Arc<dyn Fn(T) -> Dispatch<T> + Send + Sync>;

/// A list of listeners for one event type.
pub struct Signal<T> {
    handlers: Mutex<Vec<(HandlerId, Handler<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.len())
            .finish()
    }
}

impl<T> Signal<T> {
    /// Creates a signal without listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` as the last listener and returns its id.
    pub fn on<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(T) -> Dispatch<T> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(handler)));
        id
    }

    /// Removes a listener. Returns `false` if `id` was not registered.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Delivers `event` to the listeners in registration order, stopping at the first one that
    /// handles it.
    ///
    /// Listeners run without the registry lock held, so they may register or remove listeners
    /// (including themselves) while being called. Such changes apply to the next emit.
    pub fn emit(&self, event: T) -> Dispatch<T> {
        let handlers: Vec<Handler<T>> = self
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        let mut event = event;
        for handler in handlers {
            match handler(event) {
                Dispatch::Handled => return Dispatch::Handled,
                Dispatch::Unhandled(unhandled) => event = unhandled,
            }
        }

        Dispatch::Unhandled(event)
    }

    /// Removes every listener.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(HandlerId, Handler<T>)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
