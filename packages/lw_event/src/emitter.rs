//! Emitters: fixed sets of named event channels.
//!
//! An emitter is a struct with one [`Event`] per event identifier. Identifiers are zero-sized
//! marker types declared with [`declare_events!`][crate::declare_events], and the emitter itself
//! is declared with [`emitter!`][crate::emitter], which fixes the argument types of every channel.
//! All routing from an identifier to its channel is resolved at compile time: registering a
//! listener whose signature does not match the channel, or using an identifier the emitter does
//! not declare, does not compile.
//!
//! # Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use lw_event::{Emitter, declare_events, emitter};
//!
//! declare_events!(Connected, Received);
//!
//! emitter! {
//!     struct ConnectionEvents {
//!         Connected(),
//!         Received(Vec<u8>, usize),
//!     }
//! }
//!
//! let events = ConnectionEvents::new();
//! let total = Rc::new(Cell::new(0));
//!
//! let total_clone = Rc::clone(&total);
//! events.on(Received, move |(_bytes, len)| total_clone.set(total_clone.get() + len));
//!
//! events.emit(Received, (vec![1, 2, 3], 3));
//! events.emit(Connected, ());
//!
//! assert_eq!(total.get(), 3);
//! assert_eq!(events.total_len(), 1);
//! ```
//!
//! A listener with the wrong argument types is rejected:
//!
//! ```rust,compile_fail
//! use lw_event::{Emitter, declare_events, emitter};
//!
//! declare_events!(Tick);
//!
//! emitter! {
//!     struct Clock {
//!         Tick(u64),
//!     }
//! }
//!
//! let clock = Clock::new();
//! clock.on(Tick, |(name,): (String,)| println!("{name}"));
//! ```
//!
//! So is an identifier the emitter does not declare:
//!
//! ```rust,compile_fail
//! use lw_event::{Emitter, declare_events, emitter};
//!
//! declare_events!(Tick, Tock);
//!
//! emitter! {
//!     struct Clock {
//!         Tick(u64),
//!     }
//! }
//!
//! let clock = Clock::new();
//! clock.emit(Tock, (1,));
//! ```

use crate::{Event, ListenerId};

/// Implemented by an emitter for every event identifier `I` it declares, mapping the identifier
/// to its channel and argument types.
///
/// Implementations are generated by [`emitter!`][crate::emitter].
pub trait Emits<I> {
    /// The arguments passed to the listeners of the channel, as a tuple.
    type Args: Clone + 'static;

    /// The channel of event `I`.
    fn event(&self) -> &Event<Self::Args>;
}

/// Type-erased view of one channel, for operations that span all channels of an emitter.
pub trait Channel {
    /// The number of listeners on the channel.
    fn len(&self) -> usize;

    /// Whether the channel has no listeners.
    fn is_empty(&self) -> bool;

    /// Removes all listeners from the channel.
    fn clear(&self);
}

impl<A: Clone + 'static> Channel for Event<A> {
    fn len(&self) -> usize {
        Self::len(self)
    }

    fn is_empty(&self) -> bool {
        Self::is_empty(self)
    }

    fn clear(&self) {
        Self::clear(self);
    }
}

/// Operations on a set of named event channels, routed by event identifier.
///
/// Implemented by emitters declared with [`emitter!`][crate::emitter]. The identifier arguments
/// are only used to select the channel; their values carry no data.
pub trait Emitter {
    /// Calls `f` with every channel of the emitter, in declaration order.
    fn for_each_channel(&self, f: &mut dyn FnMut(&dyn Channel));

    /// Adds a listener to the back of the listeners of `event`.
    fn on<I, L>(&self, _event: I, listener: L) -> ListenerId
    where
        Self: Emits<I>,
        L: FnMut(<Self as Emits<I>>::Args) + 'static,
    {
        <Self as Emits<I>>::event(self).on(listener)
    }

    /// Calls every listener of `event` in registration order, each with its own copy of `args`.
    ///
    /// See [`Event::emit()`] for the behavior of panicking and re-entered listeners.
    fn emit<I>(&self, _event: I, args: <Self as Emits<I>>::Args)
    where
        Self: Emits<I>,
    {
        <Self as Emits<I>>::event(self).emit(args);
    }

    /// Removes the listener of `event` registered under `id`, returning whether it was found.
    fn remove<I>(&self, _event: I, id: ListenerId) -> bool
    where
        Self: Emits<I>,
    {
        <Self as Emits<I>>::event(self).remove(id)
    }

    /// Removes every listener of `event` whose identifier matches `predicate`, returning how many
    /// were removed.
    fn remove_if<I, P>(&self, _event: I, predicate: P) -> usize
    where
        Self: Emits<I>,
        P: FnMut(ListenerId) -> bool,
    {
        <Self as Emits<I>>::event(self).remove_if(predicate)
    }

    /// Removes all listeners of `event`.
    fn clear<I>(&self, _event: I)
    where
        Self: Emits<I>,
    {
        <Self as Emits<I>>::event(self).clear();
    }

    /// Removes all listeners of all events.
    fn clear_all(&self) {
        self.for_each_channel(&mut |channel: &dyn Channel| channel.clear());
    }

    /// The number of listeners of `event`.
    fn len<I>(&self, _event: I) -> usize
    where
        Self: Emits<I>,
    {
        <Self as Emits<I>>::event(self).len()
    }

    /// The number of listeners of all events together.
    fn total_len(&self) -> usize {
        let mut total: usize = 0;
        self.for_each_channel(&mut |channel: &dyn Channel| {
            total = total.saturating_add(channel.len());
        });
        total
    }

    /// Whether `event` has no listeners.
    fn is_empty<I>(&self, _event: I) -> bool
    where
        Self: Emits<I>,
    {
        <Self as Emits<I>>::event(self).is_empty()
    }

    /// Whether no event has any listeners.
    fn is_all_empty(&self) -> bool {
        let mut empty = true;
        self.for_each_channel(&mut |channel: &dyn Channel| empty = empty && channel.is_empty());
        empty
    }
}

/// Declares zero-sized event identifier types for use with [`emitter!`][crate::emitter].
///
/// The same identifier may be used by several emitters, with different argument types in each.
///
/// ```rust
/// lw_event::declare_events!(
///     /// The connection is established.
///     pub Connected,
///     Closed,
/// );
///
/// let _id = Connected;
/// ```
#[macro_export]
macro_rules! declare_events {
    ($( $(#[$meta:meta])* $vis:vis $name:ident ),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
            $vis struct $name;
        )*
    };
}

/// Declares an emitter struct with one channel per listed event identifier.
///
/// Each entry names an identifier type (see [`declare_events!`][crate::declare_events]) and the
/// argument types of its channel. Listeners of the channel receive the arguments as one tuple.
/// Argument types must be `Clone + 'static`, as every listener receives its own copy.
///
/// The generated struct has a `new()` constructor and implements [`Default`], [`Debug`],
/// [`Emitter`] and [`Emits<I>`] for each identifier.
///
/// ```rust
/// use lw_event::{Emitter, declare_events, emitter};
///
/// declare_events!(Opened, Failed);
///
/// emitter! {
///     /// Events of a file watcher.
///     pub struct WatcherEvents {
///         Opened(String),
///         Failed(i32, String),
///     }
/// }
///
/// let events = WatcherEvents::default();
/// events.on(Failed, |(code, message)| eprintln!("{code}: {message}"));
/// assert_eq!(events.len(Failed), 1);
/// assert!(events.is_empty(Opened));
/// ```
#[macro_export]
macro_rules! emitter {
    (
        $(#[$meta:meta])*
        $vis:vis struct $emitter:ident {
            $( $event:ident ( $($arg:ty),* $(,)? ) ),* $(,)?
        }
    ) => {
        $crate::__private::paste! {
            $(#[$meta])*
            $vis struct $emitter {
                $( [<$event:snake>]: $crate::Event<( $($arg,)* )>, )*
            }

            impl $emitter {
                /// Creates the emitter with no listeners on any event.
                #[must_use]
                $vis fn new() -> Self {
                    Self {
                        $( [<$event:snake>]: $crate::Event::new(), )*
                    }
                }
            }

            impl ::core::default::Default for $emitter {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl ::core::fmt::Debug for $emitter {
                fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                    f.debug_struct(::core::stringify!($emitter))
                        $( .field(::core::stringify!($event), &self.[<$event:snake>]) )*
                        .finish()
                }
            }

            impl $crate::Emitter for $emitter {
                fn for_each_channel(&self, f: &mut dyn FnMut(&dyn $crate::Channel)) {
                    $( f(&self.[<$event:snake>]); )*
                }
            }

            $(
                impl $crate::Emits<$event> for $emitter {
                    type Args = ( $($arg,)* );

                    fn event(&self) -> &$crate::Event<Self::Args> {
                        &self.[<$event:snake>]
                    }
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};
    use testing::Recorder;

    use super::*;

    declare_events!(Connected, DataReceived, Closed);

    emitter! {
        struct ConnectionEvents {
            Connected(),
            DataReceived(Vec<u8>),
            Closed(u32, String),
        }
    }

    emitter! {
        struct ShutdownEvents {
            Closed(),
        }
    }

    assert_impl_all!(ConnectionEvents: Emitter, Emits<Connected>, Emits<DataReceived>, Emits<Closed>, Default);
    assert_not_impl_any!(ConnectionEvents: Send, Sync);

    #[test]
    fn routes_to_matching_channel() {
        let events = ConnectionEvents::new();
        let recorder = Recorder::new();

        let recorder_clone = recorder.clone();
        events.on(Closed, move |(code, reason)| {
            recorder_clone.record(format!("closed {code} {reason}"));
        });
        let recorder_clone = recorder.clone();
        events.on(Connected, move |()| recorder_clone.record("connected".to_string()));

        events.emit(Connected, ());
        events.emit(DataReceived, (vec![1, 2],));
        events.emit(Closed, (1000, "bye".to_string()));

        assert_eq!(recorder.take(), ["connected", "closed 1000 bye"]);
    }

    #[test]
    fn emission_order_per_channel() {
        let events = ConnectionEvents::new();
        let recorder = Recorder::new();

        for index in 0..4_usize {
            let recorder = recorder.clone();
            events.on(DataReceived, move |(bytes,)| {
                recorder.record((index, bytes.len()));
            });
        }

        events.emit(DataReceived, (vec![0; 3],));

        assert_eq!(recorder.take(), [(0, 3), (1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn same_identifier_different_signatures() {
        let connection = ConnectionEvents::new();
        let shutdown = ShutdownEvents::new();
        let count = Rc::new(Cell::new(0));

        let count_clone = Rc::clone(&count);
        connection.on(Closed, move |(code, _)| count_clone.set(count_clone.get() + code));
        let count_clone = Rc::clone(&count);
        shutdown.on(Closed, move |()| count_clone.set(count_clone.get() + 1));

        connection.emit(Closed, (10, String::new()));
        shutdown.emit(Closed, ());

        assert_eq!(count.get(), 11);
    }

    #[test]
    fn remove_and_remove_if_are_per_channel() {
        let events = ConnectionEvents::new();

        let connected = events.on(Connected, |()| {});
        events.on(Closed, |_| {});
        events.on(Closed, |_| {});

        // An identifier from another channel does not match anything here.
        assert!(!events.remove(Closed, connected));
        assert!(events.remove(Connected, connected));

        assert_eq!(events.remove_if(Closed, |_| true), 2);
        assert!(events.is_all_empty());
    }

    #[test]
    fn sizes_per_channel_and_total() {
        let events = ConnectionEvents::new();
        assert!(events.is_all_empty());
        assert_eq!(events.total_len(), 0);

        events.on(Connected, |()| {});
        events.on(DataReceived, |_| {});
        events.on(DataReceived, |_| {});

        assert_eq!(events.len(Connected), 1);
        assert_eq!(events.len(DataReceived), 2);
        assert!(events.is_empty(Closed));
        assert!(!events.is_empty(DataReceived));
        assert_eq!(events.total_len(), 3);
        assert!(!events.is_all_empty());
    }

    #[test]
    fn clear_one_and_all() {
        let events = ConnectionEvents::new();
        events.on(Connected, |()| {});
        events.on(Closed, |_| {});

        events.clear(Connected);
        assert!(events.is_empty(Connected));
        assert_eq!(events.len(Closed), 1);

        events.clear_all();
        assert!(events.is_all_empty());
    }

    #[test]
    fn debug_lists_channels() {
        let events = ConnectionEvents::default();
        events.on(DataReceived, |_| {});

        let debug = format!("{events:?}");

        assert!(debug.contains("ConnectionEvents"));
        assert!(debug.contains("DataReceived"));
    }
}
