//! Single-assignment deferred results for single-threaded code.
//!
//! A [`Promise`] is the producing side of a deferred result and a [`Future`] the consuming side.
//! The producer settles the promise exactly once, either resolving it with a value or rejecting
//! it with an [`Error`]. The consumer either attaches a continuation (`then` and friends), which
//! runs as soon as the outcome is known, or awaits the future like any other
//! [`std::future::Future`].
//!
//! # Example
//!
//! ```rust
//! use lw_event::Promise;
//!
//! let promise = Promise::<u32>::new();
//! let doubled = promise.future().then(|value| value * 2);
//!
//! promise.resolve(21);
//!
//! assert_eq!(futures::executor::block_on(doubled), Ok(42));
//! ```

use std::any::type_name;
use std::cell::RefCell;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{self, Poll, Waker};
use std::{fmt, future, mem};

use crate::Error;

type Continuation<T> = Box<dyn FnOnce(Result<T, Error>)>;

enum Slot<T> {
    Pending {
        continuation: Option<Continuation<T>>,
        waker: Option<Waker>,
    },
    Settled(Result<T, Error>),

    // The outcome was handed to a continuation or to an awaiter.
    Consumed,
}

impl<T> Slot<T> {
    fn pending() -> Self {
        Self::Pending {
            continuation: None,
            waker: None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Settled(Ok(_)) => "resolved",
            Self::Settled(Err(_)) => "rejected",
            Self::Consumed => "consumed",
        }
    }
}

/// State shared between a promise and the futures obtained from it.
///
/// No borrow of `slot` is ever held while user code (a continuation or a waker) runs, so that
/// user code may freely go back to the component that owns the promise.
struct Shared<T> {
    slot: RefCell<Slot<T>>,
}

impl<T> Shared<T> {
    fn new(slot: Slot<T>) -> Rc<Self> {
        Rc::new(Self {
            slot: RefCell::new(slot),
        })
    }

    fn is_pending(&self) -> bool {
        matches!(*self.slot.borrow(), Slot::Pending { .. })
    }

    fn is_settled(&self) -> bool {
        matches!(*self.slot.borrow(), Slot::Settled(_))
    }

    fn settle(&self, outcome: Result<T, Error>) {
        let previous = mem::replace(&mut *self.slot.borrow_mut(), Slot::Consumed);

        match previous {
            Slot::Pending {
                continuation: Some(continuation),
                ..
            } => continuation(outcome),
            Slot::Pending {
                continuation: None,
                waker,
            } => {
                *self.slot.borrow_mut() = Slot::Settled(outcome);

                if let Some(waker) = waker {
                    waker.wake();
                }
            }
            already => {
                let state = already.name();
                *self.slot.borrow_mut() = already;
                panic!("promise settled twice: it was already {state}");
            }
        }
    }

    fn subscribe(&self, continuation: Continuation<T>) {
        let previous = mem::replace(&mut *self.slot.borrow_mut(), Slot::Consumed);

        match previous {
            Slot::Pending {
                continuation: None,
                waker: None,
            } => {
                *self.slot.borrow_mut() = Slot::Pending {
                    continuation: Some(continuation),
                    waker: None,
                };
            }
            Slot::Settled(outcome) => continuation(outcome),
            Slot::Consumed => panic!("the outcome of this promise was already consumed"),
            awaited @ Slot::Pending {
                continuation: None, ..
            } => {
                *self.slot.borrow_mut() = awaited;
                panic!("the outcome of this promise is already awaited by another consumer");
            }
            attached @ Slot::Pending { .. } => {
                *self.slot.borrow_mut() = attached;
                panic!("a continuation is already attached to this promise");
            }
        }
    }

    fn poll(&self, waker: &Waker) -> Poll<Result<T, Error>> {
        let mut slot = self.slot.borrow_mut();

        match &mut *slot {
            Slot::Pending {
                continuation: None,
                waker: stored,
            } => {
                match stored {
                    Some(stored) if stored.will_wake(waker) => {}
                    _ => *stored = Some(waker.clone()),
                }

                Poll::Pending
            }
            Slot::Pending { .. } => panic!("a continuation is already attached to this promise"),
            Slot::Settled(_) => match mem::replace(&mut *slot, Slot::Consumed) {
                Slot::Settled(outcome) => Poll::Ready(outcome),
                _ => unreachable!("slot was settled a moment ago"),
            },
            Slot::Consumed => panic!("the outcome of this promise was already consumed"),
        }
    }
}

/// The producing side of a deferred result.
///
/// Settle it exactly once with [`resolve()`][Self::resolve] or [`reject()`][Self::reject].
/// Settling twice is a programming error and panics, leaving the first outcome in place.
///
/// Dropping a promise that was never settled rejects its futures with [`Error::Broken`].
pub struct Promise<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Promise<T> {
    /// Creates a pending promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Shared::new(Slot::pending()),
        }
    }

    /// Returns a future that settles together with this promise.
    ///
    /// All futures obtained from the same promise view the same outcome, which only one of them
    /// can consume.
    #[must_use]
    pub fn future(&self) -> Future<T> {
        Future {
            shared: Rc::clone(&self.shared),
        }
    }

    /// Whether the promise has been neither resolved nor rejected yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.is_pending()
    }

    /// Resolves the promise with `value`, running an attached continuation right away.
    ///
    /// # Panics
    ///
    /// Panics if the promise was already resolved or rejected.
    pub fn resolve(&self, value: T) {
        self.shared.settle(Ok(value));
    }

    /// Rejects the promise with `error`, running an attached continuation right away.
    ///
    /// # Panics
    ///
    /// Panics if the promise was already resolved or rejected.
    pub fn reject(&self, error: impl Into<Error>) {
        self.shared.settle(Err(error.into()));
    }

    /// Settles the promise with either outcome.
    ///
    /// # Panics
    ///
    /// Panics if the promise was already resolved or rejected.
    pub fn settle(&self, outcome: Result<T, Error>) {
        self.shared.settle(outcome);
    }

    /// Returns the promise to the pending state so it can be reused for another result.
    ///
    /// Futures obtained before the reset keep observing the previous outcome. If the promise was
    /// still pending, those futures are rejected with [`Error::Broken`].
    pub fn reset(&mut self) {
        let previous = mem::replace(&mut self.shared, Shared::new(Slot::pending()));
        abandon(&previous);
    }
}

fn abandon<T>(shared: &Shared<T>) {
    if shared.is_pending() {
        shared.settle(Err(Error::Broken));
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        abandon(&self.shared);
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("state", &self.shared.slot.borrow().name())
            .finish()
    }
}

/// The consuming side of a deferred result.
///
/// Attaching a continuation consumes the future and returns a new one representing the result
/// of the continuation, so chains read top to bottom. A continuation attached to an already
/// settled future runs immediately on the caller's stack; otherwise it runs from whatever code
/// settles the promise.
///
/// Futures can also be awaited, resolving to `Result<T, Error>`.
pub struct Future<T> {
    shared: Rc<Shared<T>>,
}

impl<T: 'static> Future<T> {
    /// Creates a future that is already resolved with `value`.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self {
            shared: Shared::new(Slot::Settled(Ok(value))),
        }
    }

    /// Creates a future that is already rejected with `error`.
    #[must_use]
    pub fn rejected(error: impl Into<Error>) -> Self {
        Self {
            shared: Shared::new(Slot::Settled(Err(error.into()))),
        }
    }

    /// Whether the outcome is available and has not been consumed yet.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.is_settled()
    }

    /// Transforms the resolved value. A rejection skips `f` and is passed along unchanged.
    ///
    /// # Panics
    ///
    /// Panics if another consumer of the same promise already attached a continuation or took
    /// the outcome.
    pub fn then<U, F>(self, f: F) -> Future<U>
    where
        U: 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.then_result(|outcome| outcome.map(f))
    }

    /// Continues with another asynchronous step. The returned future settles with the outcome
    /// of the future that `f` returns. A rejection skips `f` and is passed along unchanged.
    ///
    /// # Panics
    ///
    /// Panics if another consumer of the same promise already attached a continuation or took
    /// the outcome.
    pub fn then_future<U, F>(self, f: F) -> Future<U>
    where
        U: 'static,
        F: FnOnce(T) -> Future<U> + 'static,
    {
        let promise = Promise::new();
        let future = promise.future();

        self.shared.subscribe(Box::new(move |outcome| match outcome {
            Ok(value) => f(value)
                .shared
                .subscribe(Box::new(move |inner| promise.settle(inner))),
            Err(error) => promise.settle(Err(error)),
        }));

        future
    }

    /// Continues with both outcomes, allowing the continuation to recover from a rejection or
    /// to turn a value into one.
    ///
    /// # Panics
    ///
    /// Panics if another consumer of the same promise already attached a continuation or took
    /// the outcome.
    pub fn then_result<U, F>(self, f: F) -> Future<U>
    where
        U: 'static,
        F: FnOnce(Result<T, Error>) -> Result<U, Error> + 'static,
    {
        let promise = Promise::new();
        let future = promise.future();

        self.shared
            .subscribe(Box::new(move |outcome| promise.settle(f(outcome))));

        future
    }
}

impl<T> future::Future for Future<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        self.shared.poll(cx.waker())
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("state", &self.shared.slot.borrow().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::future::Future as _;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::pin::pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::executor::block_on;
    use futures::task::{ArcWake, noop_waker_ref, waker};
    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::StreamError;

    assert_not_impl_any!(Promise<u32>: Send, Sync);
    assert_not_impl_any!(Future<u32>: Send, Sync);

    #[test]
    fn continuation_runs_immediately_when_already_resolved() {
        let promise = Promise::new();
        promise.resolve(5_u32);

        let seen = Rc::new(Cell::new(None));
        let seen_clone = Rc::clone(&seen);
        let _chained = promise.future().then(move |value| seen_clone.set(Some(value)));

        assert_eq!(seen.get(), Some(5));
    }

    #[test]
    fn continuation_runs_when_resolved_later() {
        let promise = Promise::new();

        let seen = Rc::new(Cell::new(None));
        let seen_clone = Rc::clone(&seen);
        let _chained = promise.future().then(move |value| seen_clone.set(Some(value)));
        assert_eq!(seen.get(), None);

        promise.resolve(7_u32);
        assert_eq!(seen.get(), Some(7));
    }

    #[test]
    fn chain_transforms_values() {
        let promise = Promise::new();
        let chained = promise
            .future()
            .then(|value: u32| value + 1)
            .then(|value| value.to_string());

        promise.resolve(41);

        assert_eq!(block_on(chained), Ok("42".to_string()));
    }

    #[test]
    fn rejection_skips_then() {
        let promise = Promise::<u32>::new();
        let called = Rc::new(Cell::new(false));
        let called_clone = Rc::clone(&called);
        let chained = promise.future().then(move |value| {
            called_clone.set(true);
            value
        });

        promise.reject(StreamError::new(-libc::EPIPE));

        assert!(!called.get());
        assert_eq!(
            block_on(chained),
            Err(Error::Stream(StreamError::new(-libc::EPIPE)))
        );
    }

    #[test]
    fn then_result_recovers() {
        let promise = Promise::<u32>::new();
        let recovered = promise
            .future()
            .then_result(|outcome| Ok(outcome.unwrap_or(0)));

        promise.reject(StreamError::new(-libc::EIO));

        assert_eq!(block_on(recovered), Ok(0));
    }

    #[test]
    fn then_future_flattens() {
        let outer = Promise::<u32>::new();
        let inner = Rc::new(Promise::<u32>::new());

        let inner_clone = Rc::clone(&inner);
        let chained = outer
            .future()
            .then_future(move |value| inner_clone.future().then(move |other| value + other));

        outer.resolve(1);
        assert!(!chained.is_ready());

        inner.resolve(2);
        assert!(chained.is_ready());
        assert_eq!(block_on(chained), Ok(3));
    }

    #[test]
    fn then_future_passes_rejection_along() {
        let outer = Promise::<u32>::new();
        let chained = outer.future().then_future(Future::ready);

        outer.reject(Error::Broken);

        assert_eq!(block_on(chained), Err(Error::Broken));
    }

    #[test]
    #[should_panic]
    fn double_resolve_panics() {
        let promise = Promise::new();
        promise.resolve(1_u32);
        promise.resolve(2);
    }

    #[test]
    #[should_panic]
    fn reject_after_resolve_panics() {
        let promise = Promise::new();
        promise.resolve(1_u32);
        promise.reject(Error::Broken);
    }

    #[test]
    fn second_settlement_does_not_alter_outcome() {
        let promise = Promise::new();
        let future = promise.future();
        promise.resolve(1_u32);

        let second = catch_unwind(AssertUnwindSafe(|| promise.resolve(2)));
        assert!(second.is_err());

        assert_eq!(block_on(future), Ok(1));
    }

    #[test]
    fn second_settlement_after_consumption_panics_too() {
        let promise = Promise::new();
        let seen = Rc::new(Cell::new(0));
        let seen_clone = Rc::clone(&seen);
        let _chained = promise.future().then(move |value| seen_clone.set(value));
        promise.resolve(1_u32);

        let second = catch_unwind(AssertUnwindSafe(|| promise.resolve(2)));
        assert!(second.is_err());
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn dropped_promise_breaks_future() {
        let promise = Promise::<u32>::new();
        let future = promise.future();

        drop(promise);

        assert_eq!(block_on(future), Err(Error::Broken));
    }

    #[test]
    fn dropped_settled_promise_keeps_outcome() {
        let promise = Promise::new();
        let future = promise.future();
        promise.resolve(3_u32);

        drop(promise);

        assert_eq!(block_on(future), Ok(3));
    }

    #[test]
    fn reset_starts_fresh_cycle() {
        let mut promise = Promise::new();
        let first = promise.future();
        promise.resolve(1_u32);

        promise.reset();
        assert!(promise.is_pending());

        let second = promise.future();
        assert!(!second.is_ready());
        promise.resolve(2);

        assert_eq!(block_on(first), Ok(1));
        assert_eq!(block_on(second), Ok(2));
    }

    #[test]
    fn reset_of_pending_promise_breaks_old_futures() {
        let mut promise = Promise::<u32>::new();
        let old = promise.future();

        promise.reset();

        assert_eq!(block_on(old), Err(Error::Broken));
        assert!(promise.is_pending());
    }

    #[test]
    fn ready_and_rejected_constructors() {
        assert!(Future::ready(1_u8).is_ready());
        assert_eq!(block_on(Future::ready(1_u8)), Ok(1));
        assert_eq!(
            block_on(Future::<u8>::rejected(Error::Broken)),
            Err(Error::Broken)
        );
    }

    #[test]
    #[should_panic]
    fn second_continuation_panics() {
        let promise = Promise::<u32>::new();
        let _first = promise.future().then(|value| value);
        let _second = promise.future().then(|value| value);
    }

    #[test]
    fn continuation_may_settle_same_component_again() {
        // A continuation that resets and re-arms the producer it came from must not trip over
        // internal borrows.
        let holder = Rc::new(RefCell::new(Promise::<u32>::new()));

        let holder_clone = Rc::clone(&holder);
        let _chained = holder.borrow().future().then(move |_| {
            let mut promise = holder_clone.borrow_mut();
            promise.reset();
            promise.resolve(10);
        });

        let finished = {
            let mut promise = holder.borrow_mut();
            mem::take(&mut *promise)
        };
        finished.resolve(1);

        assert!(!holder.borrow().is_pending());
    }

    #[derive(Default)]
    struct CountingWaker {
        wakes: AtomicUsize,
    }

    impl ArcWake for CountingWaker {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.wakes.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn awaiting_registers_waker() {
        let promise = Promise::new();
        let mut future = pin!(promise.future());

        let counter = Arc::new(CountingWaker::default());
        let waker = waker(Arc::clone(&counter));
        let mut cx = task::Context::from_waker(&waker);

        assert!(future.as_mut().poll(&mut cx).is_pending());
        assert_eq!(counter.wakes.load(Ordering::Relaxed), 0);

        promise.resolve(9_u32);
        assert_eq!(counter.wakes.load(Ordering::Relaxed), 1);

        assert_eq!(future.as_mut().poll(&mut cx), Poll::Ready(Ok(9)));
    }

    #[test]
    fn continuation_on_awaited_promise_panics_and_keeps_awaiter() {
        let promise = Promise::new();
        let mut awaited = pin!(promise.future());

        let counter = Arc::new(CountingWaker::default());
        let waker = waker(Arc::clone(&counter));
        let mut cx = task::Context::from_waker(&waker);

        assert!(awaited.as_mut().poll(&mut cx).is_pending());

        let second = catch_unwind(AssertUnwindSafe(|| {
            let _chained = promise.future().then(|value: u32| value);
        }));
        assert!(second.is_err());

        promise.resolve(4);
        assert_eq!(counter.wakes.load(Ordering::Relaxed), 1);
        assert_eq!(awaited.as_mut().poll(&mut cx), Poll::Ready(Ok(4)));
    }

    #[test]
    #[should_panic]
    fn polling_after_completion_panics() {
        let mut future = pin!(Future::ready(1_u32));
        let mut cx = task::Context::from_waker(noop_waker_ref());

        _ = future.as_mut().poll(&mut cx);
        _ = future.as_mut().poll(&mut cx);
    }
}
