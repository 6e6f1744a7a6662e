//! Events and callbacks.
//!
//! An [`Event`] publishes to any number of listeners, a [`Callback`] to at most one bound
//! function (binding another one replaces it). The async variants ([`AsyncEvent`],
//! [`AsyncCallback`]) take listeners returning futures; emitting an async event runs all the
//! listeners concurrently and waits until every one of them has finished. The order in which
//! they finish is not defined.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use appframe::events::Event;
//!
//! let started = Event::<String>::new();
//! let count = Arc::new(AtomicUsize::new(0));
//! let count_cp = Arc::clone(&count);
//! started.listen(move |name| {
//!     println!("{} started", name);
//!     count_cp.fetch_add(1, Ordering::Relaxed);
//! });
//! started.emit(&"worker".to_owned());
//! assert_eq!(1, count.load(Ordering::Relaxed));
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{join_all, FutureExt, LocalBoxFuture};
use log::trace;
use parking_lot::RwLock;

/// Identifies a listener, for removing it again.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct ListenerId(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn next_id() -> ListenerId {
    ListenerId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

struct Listeners<L> {
    list: RwLock<Vec<(ListenerId, L)>>,
}

impl<L: Clone> Listeners<L> {
    fn new() -> Self {
        Listeners {
            list: RwLock::new(Vec::new()),
        }
    }

    fn add(&self, listener: L) -> ListenerId {
        let id = next_id();
        self.list.write().push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut list = self.list.write();
        let before = list.len();
        list.retain(|(listener, _)| *listener != id);
        list.len() != before
    }

    // Listeners are called without the lock held, so they may (un)subscribe.
    fn snapshot(&self) -> Vec<L> {
        self.list.read().iter().map(|(_, l)| l.clone()).collect()
    }

    fn len(&self) -> usize {
        self.list.read().len()
    }
}

/// A temporary listener, removed when the guard is dropped.
///
/// Returned by [`Event::tap`] and [`AsyncEvent::tap`]. Mostly useful in tests.
#[must_use = "The listener is removed when the guard is dropped"]
pub struct Tap<'a> {
    remove: Box<dyn Fn() + 'a>,
}

impl Drop for Tap<'_> {
    fn drop(&mut self) {
        (self.remove)();
    }
}

type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// A synchronous event with any number of listeners.
pub struct Event<A> {
    listeners: Listeners<Listener<A>>,
}

impl<A> Event<A> {
    /// An event nobody listens to yet.
    pub fn new() -> Self {
        Event {
            listeners: Listeners::new(),
        }
    }

    /// Adds a listener.
    pub fn listen<F: Fn(&A) + Send + Sync + 'static>(&self, listener: F) -> ListenerId {
        self.listeners.add(Arc::new(listener))
    }

    /// Removes a listener, returning if it was present.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Adds a listener for the lifetime of the returned guard.
    pub fn tap<F: Fn(&A) + Send + Sync + 'static>(&self, listener: F) -> Tap<'_> {
        let id = self.listen(listener);
        Tap {
            remove: Box::new(move || {
                self.remove(id);
            }),
        }
    }

    /// Subscribes all the listeners of another event to this one too.
    pub fn extend_from(&self, other: &Event<A>) {
        for listener in other.listeners.snapshot() {
            self.listeners.add(listener);
        }
    }

    /// Calls all the listeners, in the order of subscription.
    pub fn emit(&self, args: &A) {
        let listeners = self.listeners.snapshot();
        trace!("Emitting event to {} listeners", listeners.len());
        for listener in listeners {
            listener(args);
        }
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Does anyone listen?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Debug for Event<A> {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Event({} listeners)", self.len())
    }
}

type AsyncListener<A> = Arc<dyn Fn(A) -> LocalBoxFuture<'static, ()> + Send + Sync>;

/// An event with asynchronous listeners.
pub struct AsyncEvent<A> {
    listeners: Listeners<AsyncListener<A>>,
}

impl<A: Clone> AsyncEvent<A> {
    /// An event nobody listens to yet.
    pub fn new() -> Self {
        AsyncEvent {
            listeners: Listeners::new(),
        }
    }

    fn wrap<F, R>(listener: F) -> AsyncListener<A>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
        R: Future<Output = ()> + 'static,
    {
        Arc::new(move |args: A| listener(args).boxed_local())
    }

    /// Adds a listener.
    pub fn listen<F, R>(&self, listener: F) -> ListenerId
    where
        F: Fn(A) -> R + Send + Sync + 'static,
        R: Future<Output = ()> + 'static,
    {
        self.listeners.add(Self::wrap(listener))
    }

    /// Removes a listener, returning if it was present.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Adds a listener for the lifetime of the returned guard.
    pub fn tap<F, R>(&self, listener: F) -> Tap<'_>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
        R: Future<Output = ()> + 'static,
    {
        let id = self.listen(listener);
        Tap {
            remove: Box::new(move || {
                self.remove(id);
            }),
        }
    }

    /// Subscribes all the listeners of another event to this one too.
    pub fn extend_from(&self, other: &AsyncEvent<A>) {
        for listener in other.listeners.snapshot() {
            self.listeners.add(listener);
        }
    }

    /// Runs all the listeners concurrently and waits for all of them to finish.
    pub async fn emit(&self, args: A) {
        let pending = self
            .listeners
            .snapshot()
            .into_iter()
            .map(|listener| listener(args.clone()))
            .collect::<Vec<_>>();
        trace!("Emitting async event to {} listeners", pending.len());
        join_all(pending).await;
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Does anyone listen?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: Clone> Default for AsyncEvent<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Debug for AsyncEvent<A> {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "AsyncEvent({} listeners)", self.listeners.len())
    }
}

/// A single bound function.
pub struct Callback<A, R = ()> {
    bound: RwLock<Option<Arc<dyn Fn(&A) -> R + Send + Sync>>>,
}

impl<A, R> Callback<A, R> {
    /// An unbound callback.
    pub fn new() -> Self {
        Callback {
            bound: RwLock::new(None),
        }
    }

    /// Binds the function, replacing the previous one.
    pub fn bind<F: Fn(&A) -> R + Send + Sync + 'static>(&self, callback: F) {
        if self.bound.write().replace(Arc::new(callback)).is_some() {
            trace!("Replaced bound callback");
        }
    }

    /// Removes the binding.
    pub fn unbind(&self) {
        self.bound.write().take();
    }

    /// Is there anything bound?
    pub fn is_bound(&self) -> bool {
        self.bound.read().is_some()
    }

    /// Calls the bound function, if any.
    pub fn call(&self, args: &A) -> Option<R> {
        let bound = self.bound.read().clone();
        bound.map(|callback| callback(args))
    }
}

impl<A, R> Default for Callback<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, R> Debug for Callback<A, R> {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Callback(bound: {})", self.is_bound())
    }
}

/// A single bound asynchronous function.
pub struct AsyncCallback<A, R = ()> {
    bound: RwLock<Option<Arc<dyn Fn(A) -> LocalBoxFuture<'static, R> + Send + Sync>>>,
}

impl<A, R: 'static> AsyncCallback<A, R> {
    /// An unbound callback.
    pub fn new() -> Self {
        AsyncCallback {
            bound: RwLock::new(None),
        }
    }

    /// Binds the function, replacing the previous one.
    pub fn bind<F, Fut>(&self, callback: F)
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + 'static,
    {
        let callback = Arc::new(move |args: A| callback(args).boxed_local());
        if self.bound.write().replace(callback).is_some() {
            trace!("Replaced bound async callback");
        }
    }

    /// Removes the binding.
    pub fn unbind(&self) {
        self.bound.write().take();
    }

    /// Is there anything bound?
    pub fn is_bound(&self) -> bool {
        self.bound.read().is_some()
    }

    /// Calls the bound function and waits for its result.
    pub async fn call(&self, args: A) -> Option<R> {
        let bound = self.bound.read().clone();
        match bound {
            Some(callback) => Some(callback(args).await),
            None => None,
        }
    }
}

impl<A, R: 'static> Default for AsyncCallback<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, R> Debug for AsyncCallback<A, R> {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "AsyncCallback(bound: {})", self.bound.read().is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    fn block_on<F: Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn emit_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let event = Event::<&'static str>::new();
        let first = Arc::clone(&seen);
        event.listen(move |v| first.lock().push(format!("first {}", v)));
        let second = Arc::clone(&seen);
        event.listen(move |v| second.lock().push(format!("second {}", v)));
        event.emit(&"foo");
        event.emit(&"bar");
        assert_eq!(
            vec!["first foo", "second foo", "first bar", "second bar"],
            *seen.lock()
        );
    }

    #[test]
    fn remove_and_tap() {
        let event = Event::<()>::new();
        let id = event.listen(|_| ());
        {
            let _tap = event.tap(|_| ());
            assert_eq!(2, event.len());
        }
        assert_eq!(1, event.len());
        assert!(event.remove(id));
        assert!(!event.remove(id));
        assert!(event.is_empty());
    }

    #[test]
    fn extend() {
        let event = Event::<()>::new();
        let other = Event::<()>::new();
        other.listen(|_| ());
        other.listen(|_| ());
        event.listen(|_| ());
        event.extend_from(&other);
        assert_eq!(3, event.len());
    }

    #[test]
    fn async_all_complete() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let event = AsyncEvent::<u64>::new();
        for delay in &[30, 10, 20] {
            let delay = *delay;
            let seen = Arc::clone(&seen);
            event.listen(move |value| {
                let seen = Arc::clone(&seen);
                async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    seen.lock().push(value + delay);
                }
            });
        }
        block_on(event.emit(1));
        assert_eq!(vec![11, 21, 31], *seen.lock());
    }

    #[test]
    fn async_no_listeners() {
        block_on(AsyncEvent::<()>::new().emit(()));
    }

    #[test]
    fn callback_single_binding() {
        let callback = Callback::<i32, i32>::new();
        assert_eq!(None, callback.call(&1));
        callback.bind(|v| v + 1);
        callback.bind(|v| v * 10);
        assert_eq!(Some(20), callback.call(&2));
        callback.unbind();
        assert!(!callback.is_bound());
        assert_eq!(None, callback.call(&2));
    }

    #[test]
    fn async_callback() {
        let callback = AsyncCallback::<String, usize>::new();
        assert_eq!(None, block_on(callback.call("foo".to_owned())));
        callback.bind(|s: String| async move { s.len() });
        assert_eq!(Some(3), block_on(callback.call("foo".to_owned())));
    }
}
