//! Observable values with lazy upstream subscription.
//!
//! A [`LazySignal`] holds an optional current value and a set of observers.
//! It is lazy: the user-supplied upstream subscriber runs exactly when the
//! first observer attaches, and the teardown it returns runs exactly when the
//! last observer detaches. Re-subscribing after a teardown opens a fresh
//! upstream session; a previously retained value is replayed to new
//! observers immediately.
//!
//! The writable variant ([`OwlSignal`]) and the write façade
//! ([`SignalSetter`]) live in the submodules.

mod setter;
mod writable;

pub use setter::SignalSetter;
pub use writable::OwlSignal;
pub(crate) use writable::{OwlShared, UpstreamWriter};

use crate::error::PortError;
use crate::wire::WriteTag;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

type ValueObserver<T> = Arc<dyn Fn(&T, &[WriteTag]) + Send + Sync>;
type ErrorObserver = Arc<dyn Fn(&PortError) + Send + Sync>;

/// Upstream session teardown, invoked when the last observer detaches.
pub type Teardown = Box<dyn FnOnce() + Send>;

struct ObserverEntry<T> {
    on_value: ValueObserver<T>,
    on_error: ErrorObserver,
}

struct SignalState<T> {
    value: Option<T>,
    observers: HashMap<u64, ObserverEntry<T>>,
    next_observer_id: u64,
    teardown: Option<Teardown>,
    /// Bumped each time a new upstream session starts, so a session that
    /// lost the race to a newer one can detect it and tear itself down.
    session_generation: u64,
}

struct SignalCore<T> {
    state: Mutex<SignalState<T>>,
    upstream: Box<dyn Fn(SignalListener<T>) -> Teardown + Send + Sync>,
    equals: Box<dyn Fn(&T, &T) -> bool + Send + Sync>,
}

impl<T> SignalCore<T> {
    fn lock(&self) -> std::sync::MutexGuard<'_, SignalState<T>> {
        self.state.lock().expect("signal state lock poisoned")
    }

    /// Remove an observer; returns the teardown to run if it was the last.
    fn detach(&self, observer_id: u64) -> Option<Teardown> {
        let mut state = self.lock();
        if state.observers.remove(&observer_id).is_none() {
            return None;
        }
        if state.observers.is_empty() {
            state.teardown.take()
        } else {
            None
        }
    }
}

/// An observable value fed by an upstream session.
pub struct LazySignal<T> {
    core: Arc<SignalCore<T>>,
}

impl<T> Clone for LazySignal<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> LazySignal<T> {
    /// Create a signal with an explicit change predicate.
    ///
    /// `upstream` is invoked with a [`SignalListener`] when the first
    /// observer attaches and must return the session teardown. `equals`
    /// decides whether a pushed value is a change; equal values are not
    /// re-emitted.
    pub fn new(
        upstream: impl Fn(SignalListener<T>) -> Teardown + Send + Sync + 'static,
        equals: impl Fn(&T, &T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            core: Arc::new(SignalCore {
                state: Mutex::new(SignalState {
                    value: None,
                    observers: HashMap::new(),
                    next_observer_id: 0,
                    teardown: None,
                    session_generation: 0,
                }),
                upstream: Box::new(upstream),
                equals: Box::new(equals),
            }),
        }
    }

    /// Create a signal that compares values with `PartialEq`.
    pub fn with_default_equality(
        upstream: impl Fn(SignalListener<T>) -> Teardown + Send + Sync + 'static,
    ) -> Self
    where
        T: PartialEq,
    {
        Self::new(upstream, |a, b| a == b)
    }

    /// Current value, or `None` while not available.
    pub fn get(&self) -> Option<T> {
        self.core.lock().value.clone()
    }

    /// Attach an observer. The returned guard detaches on drop.
    ///
    /// A retained value is delivered to the new observer immediately. The
    /// first observer starts the upstream session.
    pub fn subscribe(
        &self,
        on_value: impl Fn(&T, &[WriteTag]) + Send + Sync + 'static,
        on_error: impl Fn(&PortError) + Send + Sync + 'static,
    ) -> SignalSubscription<T> {
        let on_value: ValueObserver<T> = Arc::new(on_value);
        let on_error: ErrorObserver = Arc::new(on_error);

        let (observer_id, replay, start_generation) = {
            let mut state = self.core.lock();
            let observer_id = state.next_observer_id;
            state.next_observer_id += 1;
            state.observers.insert(
                observer_id,
                ObserverEntry {
                    on_value: on_value.clone(),
                    on_error,
                },
            );
            let replay = state.value.clone();
            let start_generation = if state.observers.len() == 1 && state.teardown.is_none() {
                state.session_generation += 1;
                Some(state.session_generation)
            } else {
                None
            };
            (observer_id, replay, start_generation)
        };

        if let Some(value) = replay {
            on_value(&value, &[]);
        }

        if let Some(generation) = start_generation {
            // The upstream subscriber runs outside the state lock; it is
            // allowed to push values and attach further machinery.
            let teardown = (self.core.upstream)(SignalListener {
                core: Arc::downgrade(&self.core),
            });
            let stale = {
                let mut state = self.core.lock();
                let still_wanted = state.session_generation == generation
                    && !state.observers.is_empty()
                    && state.teardown.is_none();
                if still_wanted {
                    state.teardown = Some(teardown);
                    None
                } else {
                    Some(teardown)
                }
            };
            // Everyone detached (or a newer session won) while the upstream
            // subscriber ran.
            if let Some(teardown) = stale {
                teardown();
            }
        }

        SignalSubscription {
            core: Arc::downgrade(&self.core),
            observer_id,
        }
    }
}

/// Handle handed to the upstream subscriber for feeding the signal.
pub struct SignalListener<T> {
    core: Weak<SignalCore<T>>,
}

impl<T> Clone for SignalListener<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> SignalListener<T> {
    /// Deliver a new value to all observers, unless it equals the current
    /// one.
    pub fn push(&self, value: T, tags: Vec<WriteTag>) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let observers: Vec<ValueObserver<T>> = {
            let mut state = core.lock();
            let changed = match &state.value {
                Some(old) => !(core.equals)(old, &value),
                None => true,
            };
            if !changed {
                return;
            }
            state.value = Some(value.clone());
            state.observers.values().map(|o| o.on_value.clone()).collect()
        };
        for observer in observers {
            observer(&value, &tags);
        }
    }

    /// Deliver an error to all observers. The current value is untouched.
    pub fn error(&self, error: &PortError) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let observers: Vec<ErrorObserver> = {
            let state = core.lock();
            state.observers.values().map(|o| o.on_error.clone()).collect()
        };
        for observer in observers {
            observer(error);
        }
    }

    /// The value observers currently see.
    pub fn current(&self) -> Option<T> {
        self.core.upgrade().and_then(|core| core.lock().value.clone())
    }
}

/// Observer guard; detaches (and tears the session down if last) on drop.
pub struct SignalSubscription<T> {
    core: Weak<SignalCore<T>>,
    observer_id: u64,
}

impl<T> SignalSubscription<T> {
    /// Detach now instead of at drop.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for SignalSubscription<T> {
    fn drop(&mut self) {
        if let Some(core) = self.core.upgrade() {
            if let Some(teardown) = core.detach(self.observer_id) {
                teardown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Upstream {
        subscribes: AtomicUsize,
        teardowns: AtomicUsize,
        listener: Mutex<Option<SignalListener<i64>>>,
    }

    impl Upstream {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                subscribes: AtomicUsize::new(0),
                teardowns: AtomicUsize::new(0),
                listener: Mutex::new(None),
            })
        }

        fn signal(self: &Arc<Self>) -> LazySignal<i64> {
            let upstream = self.clone();
            LazySignal::with_default_equality(move |listener| {
                upstream.subscribes.fetch_add(1, Ordering::SeqCst);
                *upstream.listener.lock().unwrap() = Some(listener);
                let upstream = upstream.clone();
                Box::new(move || {
                    upstream.teardowns.fetch_add(1, Ordering::SeqCst);
                    *upstream.listener.lock().unwrap() = None;
                })
            })
        }

        fn push(&self, value: i64) {
            let listener = self.listener.lock().unwrap();
            listener.as_ref().expect("no upstream session").push(value, Vec::new());
        }
    }

    fn recording_observer(
    ) -> (Arc<Mutex<Vec<i64>>>, impl Fn(&i64, &[WriteTag]) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |value: &i64, _tags: &[WriteTag]| {
            sink.lock().unwrap().push(*value)
        })
    }

    #[test]
    fn test_upstream_starts_on_first_observer_only() {
        let upstream = Upstream::new();
        let signal = upstream.signal();
        assert_eq!(upstream.subscribes.load(Ordering::SeqCst), 0);
        assert_eq!(signal.get(), None);

        let (_, on_value) = recording_observer();
        let first = signal.subscribe(on_value, |_| {});
        assert_eq!(upstream.subscribes.load(Ordering::SeqCst), 1);

        let (_, on_value) = recording_observer();
        let second = signal.subscribe(on_value, |_| {});
        assert_eq!(upstream.subscribes.load(Ordering::SeqCst), 1);

        drop(first);
        assert_eq!(upstream.teardowns.load(Ordering::SeqCst), 0);
        drop(second);
        assert_eq!(upstream.teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_values_flow_and_equal_values_are_suppressed() {
        let upstream = Upstream::new();
        let signal = upstream.signal();
        let (seen, on_value) = recording_observer();
        let _sub = signal.subscribe(on_value, |_| {});

        upstream.push(1);
        upstream.push(1);
        upstream.push(2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(signal.get(), Some(2));
    }

    #[test]
    fn test_retained_value_replays_to_new_observers() {
        let upstream = Upstream::new();
        let signal = upstream.signal();
        let (_, on_value) = recording_observer();
        let sub = signal.subscribe(on_value, |_| {});
        upstream.push(7);
        drop(sub);
        assert_eq!(upstream.teardowns.load(Ordering::SeqCst), 1);

        // Fresh session, but the old value is delivered immediately.
        let (seen, on_value) = recording_observer();
        let _sub = signal.subscribe(on_value, |_| {});
        assert_eq!(upstream.subscribes.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn test_errors_reach_observers() {
        let upstream = Upstream::new();
        let signal = upstream.signal();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let _sub = signal.subscribe(
            |_, _| {},
            move |error| sink.lock().unwrap().push(error.to_string()),
        );

        let listener = upstream.listener.lock().unwrap().clone().unwrap();
        listener.error(&PortError::NotSubscribed);
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_listener_outliving_signal_is_harmless() {
        let upstream = Upstream::new();
        let listener = {
            let signal = upstream.signal();
            let (_, on_value) = recording_observer();
            let _sub = signal.subscribe(on_value, |_| {});
            upstream.listener.lock().unwrap().clone().unwrap()
        };
        listener.push(1, Vec::new());
        assert_eq!(listener.current(), None);
    }
}
