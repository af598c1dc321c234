//! The contract between streams and the host event loop that drives them.
//!
//! The host loop multiplexes I/O readiness for a set of handles and invokes the callbacks that
//! were registered for them. All callbacks run sequentially on the thread that drives the loop.
//!
//! Status codes follow a single convention throughout: zero or a positive count means success,
//! a negative value is a negated `errno` code, with the exception of [`EOF`] which marks the end
//! of the input of a readable handle.

use std::fmt::Debug;

use crate::Buffer;

/// Status reported to a read callback when the input of a handle has ended.
pub const EOF: i32 = -4095;

/// Status returned when a read is started on a handle that is already being read.
pub const ALREADY: i32 = -libc::EALREADY;

/// Status returned for operations on a handle that the loop does not know or has closed.
pub const BAD_HANDLE: i32 = -libc::EBADF;

/// Status reported to write callbacks whose handle was closed before the write completed.
pub const CANCELED: i32 = -libc::ECANCELED;

/// Called when the loop needs a buffer to read into. Receives the loop's suggested size.
pub type AllocCallback = Box<dyn FnMut(usize) -> Buffer>;

/// Called when a read attempt finished, with the number of bytes read into the buffer or a
/// negative status. The buffer obtained from the allocation callback is always handed back.
pub type ReadCallback = Box<dyn FnMut(isize, Buffer)>;

/// Called exactly once when a submitted write finished, with zero or a negative status.
pub type WriteCallback = Box<dyn FnOnce(i32)>;

/// Called exactly once when the loop has closed a handle and released its resources.
pub type CloseCallback = Box<dyn FnOnce()>;

/// A single-threaded, callback-driven event loop that performs I/O on handles.
///
/// Every registration method returns immediately. Results arrive later through the callbacks,
/// each invoked by the loop from its own execution context, never from within the registration
/// call itself.
pub trait HostLoop: Debug + 'static {
    /// Identifies one I/O handle owned by the loop.
    type Handle: Copy + Debug + 'static;

    /// Queues `buffer` to be written to the handle.
    ///
    /// Returns a negative status if the write could not be queued, in which case `on_complete`
    /// is dropped without being called. Otherwise `on_complete` is called exactly once.
    fn write(&self, handle: Self::Handle, buffer: Buffer, on_complete: WriteCallback) -> i32;

    /// Starts delivering the input of the handle through `on_read`, reading into buffers
    /// obtained from `alloc`.
    ///
    /// Returns a negative status if reading could not be started, in which case both callbacks
    /// are dropped without being called.
    fn read_start(&self, handle: Self::Handle, alloc: AllocCallback, on_read: ReadCallback)
    -> i32;

    /// Stops delivering input for the handle and drops the registered read callbacks.
    ///
    /// Stopping a handle that is not being read is not an error.
    fn read_stop(&self, handle: Self::Handle) -> i32;

    /// Closes the handle. `on_close` is called exactly once, after the loop has released the
    /// resources of the handle.
    fn close(&self, handle: Self::Handle, on_close: CloseCallback);
}
