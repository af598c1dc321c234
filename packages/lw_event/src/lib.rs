#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Typed event emitters, single-threaded promises and a buffered, promise-driven byte stream for
//! callback-driven event loops.
//!
//! The crate is built for programs where one thread drives an event loop and everything else
//! happens in callbacks invoked by that loop. None of its types are thread-safe.
//!
//! # Events and emitters
//!
//! An [`Event<A>`] is an ordered list of listeners that are all called with arguments of type
//! `A` when the event is emitted. An emitter groups several events under identifier types, with
//! every identifier bound to one argument signature at compile time:
//!
//! ```rust
//! use lw_event::{Emitter, declare_events, emitter};
//!
//! declare_events!(Connected, Received);
//!
//! emitter! {
//!     pub struct SocketEvents {
//!         Connected(),
//!         Received(Vec<u8>, usize),
//!     }
//! }
//!
//! let events = SocketEvents::new();
//! events.on(Received, |(data, len)| assert_eq!(data.len(), len));
//!
//! events.emit(Received, (vec![1, 2, 3], 3));
//! ```
//!
//! # Promises
//!
//! A [`Promise<T>`] is the producing side of a single eventual value; its [`Future<T>`] is the
//! consuming side. Continuations attached with [`Future::then()`] run synchronously as soon as
//! the value is available, and futures can also be awaited.
//!
//! ```rust
//! use lw_event::Promise;
//!
//! let promise = Promise::new();
//! let doubled = promise.future().then(|value: u32| value * 2);
//!
//! promise.resolve(21);
//!
//! assert_eq!(futures::executor::block_on(doubled), Ok(42));
//! ```
//!
//! # Streams
//!
//! A [`BasicStream`] wraps one handle of a [`HostLoop`] and reports the outcome of every write
//! and of every read session through futures. Data read from the handle is delivered in
//! [`ReadChunk`]s that borrow pooled buffers.
//!
//! The crate ships with [`PollLoop`], a host loop for Unix file descriptors, and with the
//! scripted [`fake::FakeLoop`] for testing (behind the `test-util` feature).

mod buffer;
mod emitter;
mod error;
mod event;
pub mod host;
#[cfg(unix)]
mod pal;
#[cfg(unix)]
mod poll_loop;
mod promise;
mod stream;

#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod fake;

pub use buffer::*;
pub use emitter::*;
pub use error::*;
pub use event::*;
pub use host::HostLoop;
#[cfg(unix)]
pub use poll_loop::*;
pub use promise::*;
pub use stream::*;

// Used by the exported macros. Not part of the public API.
#[doc(hidden)]
pub mod __private {
    pub use paste::paste;
}
