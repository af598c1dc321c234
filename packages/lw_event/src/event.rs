use std::any::type_name;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

type SharedListener<A> = Rc<RefCell<dyn FnMut(A)>>;

/// Identifies one registration of a listener, for removing it later.
///
/// Identifiers are unique within the process, so an identifier never matches a registration on
/// a different event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);

        // Relaxed is enough, we only need every value to be handed out once.
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct Entry<A> {
    id: ListenerId,
    listener: SharedListener<A>,
}

/// An ordered list of listeners for one notification channel, all called with arguments of
/// type `A` (typically a tuple of the channel's argument types).
///
/// Emission calls every listener that was registered when the emission started, in registration
/// order. The list is snapshotted first, so listeners may add or remove listeners while being
/// called; such changes apply from the next emission onwards.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// use lw_event::Event;
///
/// let event = Event::<(u32, &'static str)>::new();
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let log_clone = Rc::clone(&log);
/// event.on(move |(code, reason)| log_clone.borrow_mut().push(format!("{code}: {reason}")));
///
/// event.emit((404, "not found"));
///
/// assert_eq!(*log.borrow(), ["404: not found"]);
/// ```
pub struct Event<A> {
    listeners: RefCell<Vec<Entry<A>>>,
}

impl<A: Clone + 'static> Event<A> {
    /// Creates an event without listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
        }
    }

    /// Adds a listener to the back of the list.
    pub fn on<L>(&self, listener: L) -> ListenerId
    where
        L: FnMut(A) + 'static,
    {
        let id = ListenerId::next();

        self.listeners.borrow_mut().push(Entry {
            id,
            listener: Rc::new(RefCell::new(listener)),
        });

        id
    }

    /// Removes the listener registered under `id`, returning whether it was found.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();

        let Some(index) = listeners.iter().position(|entry| entry.id == id) else {
            return false;
        };

        // Removed outside the borrow, as dropping a listener may drop things that touch us.
        let removed = listeners.remove(index);
        drop(listeners);
        drop(removed);

        true
    }

    /// Removes every listener whose identifier matches `predicate`, returning how many were
    /// removed.
    ///
    /// The predicate sees the listeners registered when the call started and may itself use the
    /// event.
    pub fn remove_if<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(ListenerId) -> bool,
    {
        let ids: Vec<ListenerId> = self
            .listeners
            .borrow()
            .iter()
            .map(|entry| entry.id)
            .collect();

        ids.into_iter()
            .filter(|id| predicate(*id))
            .filter(|id| self.remove(*id))
            .count()
    }

    /// Removes all listeners.
    pub fn clear(&self) {
        let removed = self.listeners.take();
        drop(removed);
    }

    /// The number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Whether no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }

    /// Calls every registered listener in registration order, each with its own copy of `args`.
    ///
    /// A panic in a listener propagates to the caller and the remaining listeners are not called.
    ///
    /// # Panics
    ///
    /// Panics if a listener is reached again while it is still running, i.e. when a listener
    /// directly or indirectly emits the event it is listening to and thereby calls itself.
    pub fn emit(&self, args: A) {
        let snapshot: Vec<SharedListener<A>> = self
            .listeners
            .borrow()
            .iter()
            .map(|entry| Rc::clone(&entry.listener))
            .collect();

        trace!(
            event = type_name::<A>(),
            listeners = snapshot.len(),
            "emitting"
        );

        let Some((last, rest)) = snapshot.split_last() else {
            return;
        };

        for listener in rest {
            call(listener, args.clone());
        }

        call(last, args);
    }
}

fn call<A>(listener: &SharedListener<A>, args: A) {
    let mut listener = listener
        .try_borrow_mut()
        .expect("listener was re-entered while it was still running");

    (*listener)(args);
}

impl<A: Clone + 'static> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}
