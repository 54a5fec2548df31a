//! Keyed publish/subscribe with a per-key cooldown
//!
//! [`Observer`] invokes callbacks on the notifying thread; [`AsyncObserver`]
//! hands each invocation to a [`WorkerPool`] so the notifier only pays for an
//! enqueue. Both drop (never queue or merge) notifications that arrive while a
//! key is cooling down.

use crate::isolate::isolate;
use crate::pool::WorkerPool;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Callback registered for a key
pub type ObserverCallback<K, P> = Arc<dyn Fn(&K, &P) + Send + Sync>;

struct ObservedEntry<K, P> {
    callbacks: Vec<ObserverCallback<K, P>>,
    last_fired: Option<Instant>,
}

/// Debounced keyed observer
pub struct Observer<K, P> {
    cooldown: Duration,
    observed: Mutex<HashMap<K, ObservedEntry<K, P>>>,
}

impl<K, P> Observer<K, P>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Create an observer that never suppresses notifications
    pub fn new() -> Self {
        Self::with_cooldown(Duration::ZERO)
    }

    /// Create an observer enforcing `cooldown` between notifications of a key
    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            cooldown,
            observed: Mutex::new(HashMap::new()),
        }
    }

    /// Minimum interval between two notifications of the same key
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Register `callback` for `key`. Callbacks fire in registration order.
    pub fn observe<F>(&self, key: K, callback: F)
    where
        F: Fn(&K, &P) + Send + Sync + 'static,
    {
        let mut observed = self.observed.lock();
        observed
            .entry(key)
            .or_insert_with(|| ObservedEntry {
                callbacks: Vec::new(),
                last_fired: None,
            })
            .callbacks
            .push(Arc::new(callback));
    }

    /// Notify every callback registered for `key`.
    ///
    /// Returns `false` if nothing is registered for the key or the key is still
    /// cooling down from its previous notification.
    pub fn notify(&self, key: &K, payload: &P) -> bool {
        let callbacks = {
            let mut observed = self.observed.lock();
            let Some(entry) = observed.get_mut(key) else {
                return false;
            };
            let now = Instant::now();
            if let Some(last_fired) = entry.last_fired {
                if now.duration_since(last_fired) < self.cooldown {
                    return false;
                }
            }
            entry.last_fired = Some(now);
            entry.callbacks.clone()
        };

        for callback in &callbacks {
            if let Err(panic) = isolate(|| callback(key, payload)) {
                error!("Observer callback for {:?} panicked: {}", key, panic);
            }
        }
        true
    }

    /// Whether any callback is registered for `key`
    pub fn is_observed(&self, key: &K) -> bool {
        self.observed.lock().contains_key(key)
    }

    /// Number of keys with at least one callback
    pub fn observed_count(&self) -> usize {
        self.observed.lock().len()
    }
}

impl<K, P> Default for Observer<K, P>
where
    K: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Debounced observer that runs callbacks on a worker pool
///
/// When the pool's queue is at its ceiling the invocation is dropped.
pub struct AsyncObserver<K, P> {
    observer: Observer<K, P>,
    pool: Arc<WorkerPool>,
}

impl<K, P> AsyncObserver<K, P>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    /// Create an observer dispatching onto `pool`
    pub fn new(pool: Arc<WorkerPool>, cooldown: Duration) -> Self {
        Self {
            observer: Observer::with_cooldown(cooldown),
            pool,
        }
    }

    /// Register `callback` for `key`
    pub fn observe<F>(&self, key: K, callback: F)
    where
        F: Fn(&K, &P) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let pool = self.pool.clone();
        self.observer.observe(key, move |key: &K, payload: &P| {
            let callback = callback.clone();
            let task_key = key.clone();
            let payload = payload.clone();
            if !pool.submit(move || callback(&task_key, &payload)) {
                debug!("Dropping notification for {:?}: notification queue full", key);
            }
        });
    }

    /// Notify the callbacks registered for `key`; see [`Observer::notify`]
    pub fn notify(&self, key: &K, payload: &P) -> bool {
        self.observer.notify(key, payload)
    }

    /// Whether any callback is registered for `key`
    pub fn is_observed(&self, key: &K) -> bool {
        self.observer.is_observed(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_notify_invokes_all_callbacks_in_order() {
        let observer: Observer<String, u64> = Observer::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            observer.observe("orders".to_string(), move |key: &String, offset: &u64| {
                seen.lock().push(format!("{}:{}:{}", tag, key, offset));
            });
        }

        assert!(observer.notify(&"orders".to_string(), &12));
        assert!(!observer.notify(&"unknown".to_string(), &12));
        assert_eq!(
            *seen.lock(),
            vec!["first:orders:12".to_string(), "second:orders:12".to_string()]
        );
    }

    #[test]
    fn test_cooldown_drops_notifications() {
        let observer: Observer<u8, ()> = Observer::with_cooldown(Duration::from_millis(100));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        observer.observe(7, move |_: &u8, _: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(observer.notify(&7, &()));
        assert!(!observer.notify(&7, &()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        thread::sleep(Duration::from_millis(150));
        assert!(observer.notify(&7, &()));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cooldown_is_per_key() {
        let observer: Observer<u32, ()> = Observer::with_cooldown(Duration::from_secs(60));
        observer.observe(1, |_: &u32, _: &()| {});
        observer.observe(2, |_: &u32, _: &()| {});

        assert!(observer.notify(&1, &()));
        assert!(observer.notify(&2, &()));
        assert!(!observer.notify(&1, &()));
    }

    #[test]
    fn test_concurrent_notify_respects_cooldown() {
        let cooldown = Duration::from_millis(50);
        let observer: Arc<Observer<u8, ()>> = Arc::new(Observer::with_cooldown(cooldown));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        observer.observe(0, move |_: &u8, _: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let run_for = Duration::from_millis(300);
        let started = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let observer = observer.clone();
                thread::spawn(move || {
                    while started.elapsed() < run_for {
                        observer.notify(&0, &());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let elapsed = started.elapsed();
        let max_fires = (elapsed.as_millis() / cooldown.as_millis()) as usize + 1;
        let fires = fired.load(Ordering::SeqCst);
        assert!(fires >= 1);
        assert!(fires <= max_fires, "{} fires in {:?}", fires, elapsed);
    }

    #[test]
    fn test_panicking_callback_does_not_block_others() {
        let observer: Observer<u8, ()> = Observer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        observer.observe(3, |_: &u8, _: &()| panic!("plugin failure"));
        let counter = fired.clone();
        observer.observe(3, move |_: &u8, _: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(observer.notify(&3, &()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_async_observer_runs_on_pool() {
        let pool = Arc::new(WorkerPool::new("notify-test", 1, None).unwrap());
        let observer: AsyncObserver<String, u64> = AsyncObserver::new(pool.clone(), Duration::ZERO);
        let notifier = thread::current().id();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        observer.observe("t/0".to_string(), move |key: &String, offset: &u64| {
            sink.lock()
                .push((key.clone(), *offset, thread::current().id() != notifier));
        });

        assert!(observer.notify(&"t/0".to_string(), &9));
        pool.wait_idle();
        assert_eq!(*seen.lock(), vec![("t/0".to_string(), 9, true)]);
    }

    #[test]
    fn test_async_observer_drops_when_queue_full() {
        let pool = Arc::new(WorkerPool::new("notify-full", 1, Some(1)).unwrap());
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
        assert!(pool.submit(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        }));
        started_rx.recv().unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let observer: AsyncObserver<u8, ()> = AsyncObserver::new(pool.clone(), Duration::ZERO);
        observer.observe(1, move |_: &u8, _: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // first fills the single queue slot, second is dropped
        assert!(observer.notify(&1, &()));
        assert!(observer.notify(&1, &()));
        release_tx.send(()).unwrap();
        pool.wait_idle();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
