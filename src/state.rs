//! Connection state shared by local and remote proxies.
//!
//! A proxy starts connected and may become disconnected exactly once. The
//! transition is a single compare-and-set, so whichever caller wins (an
//! explicit `disconnect()` or the transport failure path) is the only one
//! that notifies listeners.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::panic_message;
use crate::identifier::ProxyIdentifier;

/// Receives a callback when a proxy becomes disconnected.
///
/// Called at most once per proxy, on whichever thread performed the
/// disconnection.
pub trait DisconnectionListener: Send + Sync {
    fn disconnected(&self, proxy: &ProxyIdentifier);
}

impl<F> DisconnectionListener for F
where
    F: Fn(&ProxyIdentifier) + Send + Sync,
{
    fn disconnected(&self, proxy: &ProxyIdentifier) {
        self(proxy)
    }
}

/// Connected flag plus the disconnection listener registry.
pub struct ConnectionState {
    id: ProxyIdentifier,
    connected: AtomicBool,
    listeners: Mutex<Vec<Arc<dyn DisconnectionListener>>>,
}

impl ConnectionState {
    pub fn new(id: ProxyIdentifier) -> Self {
        Self {
            id,
            connected: AtomicBool::new(true),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn identifier(&self) -> ProxyIdentifier {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Flip to disconnected and notify listeners.
    ///
    /// Returns `true` only for the caller that performed the transition.
    /// Every other caller, concurrent or later, gets `false`.
    pub fn disconnect(&self) -> bool {
        if self
            .connected
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        tracing::info!("Proxy {} disconnected", self.id);

        // Drain under the lock, notify outside it so listeners may call back
        // into the proxy without deadlocking.
        let listeners = std::mem::take(&mut *self.lock_listeners());
        self.notify(&listeners);
        true
    }

    /// Register a listener. Registering the same instance twice is a no-op.
    ///
    /// A listener added after disconnection is dropped without being called.
    pub fn add_listener(&self, listener: Arc<dyn DisconnectionListener>) {
        let mut listeners = self.lock_listeners();
        // Checked under the lock: disconnect() drains under the same lock, so
        // a listener either lands before the drain or is refused here.
        if !self.is_connected() {
            tracing::debug!("Ignoring listener added to disconnected proxy {}", self.id);
            return;
        }
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn DisconnectionListener>) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        listeners.len() != before
    }

    fn notify(&self, listeners: &[Arc<dyn DisconnectionListener>]) {
        for listener in listeners {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener.disconnected(&self.id)));
            if let Err(panic_info) = result {
                tracing::error!(
                    "Disconnection listener for {} panicked: {}",
                    self.id,
                    panic_message(panic_info.as_ref())
                );
            }
        }
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<Arc<dyn DisconnectionListener>>> {
        // A poisoned registry is still a valid Vec; keep going.
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Listener identity is the allocation, not the vtable.
fn same_listener(a: &Arc<dyn DisconnectionListener>, b: &Arc<dyn DisconnectionListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    fn counting_listener() -> (Arc<AtomicUsize>, Arc<dyn DisconnectionListener>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let listener: Arc<dyn DisconnectionListener> = Arc::new(move |_: &ProxyIdentifier| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, listener)
    }

    #[test]
    fn test_starts_connected() {
        let state = ConnectionState::new(ProxyIdentifier::new());
        assert!(state.is_connected());
    }

    #[test]
    fn test_disconnect_is_one_way() {
        let state = ConnectionState::new(ProxyIdentifier::new());
        assert!(state.disconnect());
        assert!(!state.is_connected());
        assert!(!state.disconnect());
        assert!(!state.is_connected());
    }

    #[test]
    fn test_listener_receives_identifier() {
        let id = ProxyIdentifier::new();
        let state = ConnectionState::new(id);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        state.add_listener(Arc::new(move |proxy: &ProxyIdentifier| {
            s.lock().unwrap().push(*proxy);
        }));

        state.disconnect();
        assert_eq!(*seen.lock().unwrap(), vec![id]);
    }

    #[test]
    fn test_listeners_notified_in_registration_order() {
        let state = ConnectionState::new(ProxyIdentifier::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let o = Arc::clone(&order);
            state.add_listener(Arc::new(move |_: &ProxyIdentifier| {
                o.lock().unwrap().push(i);
            }));
        }

        state.disconnect();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_duplicate_registration_notifies_once() {
        let state = ConnectionState::new(ProxyIdentifier::new());
        let (count, listener) = counting_listener();
        state.add_listener(Arc::clone(&listener));
        state.add_listener(Arc::clone(&listener));

        state.disconnect();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removed_listener_not_notified() {
        let state = ConnectionState::new(ProxyIdentifier::new());
        let (count, listener) = counting_listener();
        state.add_listener(Arc::clone(&listener));
        assert!(state.remove_listener(&listener));
        assert!(!state.remove_listener(&listener));

        state.disconnect();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_added_after_disconnect_is_ignored() {
        let state = ConnectionState::new(ProxyIdentifier::new());
        state.disconnect();

        let (count, listener) = counting_listener();
        state.add_listener(listener);
        state.disconnect();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let state = ConnectionState::new(ProxyIdentifier::new());
        let (before, first) = counting_listener();
        let (after, last) = counting_listener();
        state.add_listener(first);
        state.add_listener(Arc::new(|_: &ProxyIdentifier| panic!("listener failure")));
        state.add_listener(last);

        assert!(state.disconnect());
        assert!(!state.is_connected());
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_disconnect_single_winner() {
        const THREADS: usize = 16;
        let state = Arc::new(ConnectionState::new(ProxyIdentifier::new()));
        let (count, listener) = counting_listener();
        state.add_listener(listener);

        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let state = Arc::clone(&state);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    state.disconnect()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_query_state_during_notification() {
        let state = Arc::new(ConnectionState::new(ProxyIdentifier::new()));
        let observed = Arc::new(Mutex::new(None));
        let (s, o) = (Arc::downgrade(&state), Arc::clone(&observed));
        state.add_listener(Arc::new(move |_: &ProxyIdentifier| {
            if let Some(state) = s.upgrade() {
                *o.lock().unwrap() = Some(state.is_connected());
            }
        }));

        state.disconnect();
        assert_eq!(*observed.lock().unwrap(), Some(false));
    }
}
