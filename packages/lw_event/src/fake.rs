//! A scripted host loop for testing code built on streams.
//!
//! [`FakeLoop`] performs no I/O. It records what streams ask of it, and the test decides when
//! and how every operation completes: which bytes arrive, whether a write succeeds, when a
//! handle finishes closing. All callbacks run synchronously from within the driving methods.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::mem;

use crate::Buffer;
use crate::host::{self, AllocCallback, CloseCallback, HostLoop, ReadCallback, WriteCallback};

/// The buffer size the fake loop suggests to allocation callbacks.
pub const SUGGESTED_READ_SIZE: usize = 64 * 1024;

/// Identifies a handle opened on a [`FakeLoop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FakeHandle(usize);

struct Reader {
    alloc: AllocCallback,
    on_read: ReadCallback,
}

struct PendingWrite {
    buffer: Buffer,
    on_complete: WriteCallback,
}

#[derive(Default)]
struct HandleState {
    reading: bool,

    // Incremented by every successful `read_start()`.
    read_generation: u64,

    // Taken out while its callbacks are running.
    reader: Option<Reader>,

    writes: VecDeque<PendingWrite>,
    written: Vec<u8>,

    on_close: Option<CloseCallback>,
    closing: bool,
    closed: bool,
}

#[derive(Default)]
struct Refusals {
    write: Option<i32>,
    read_start: Option<i32>,
    read_stop: Option<i32>,
}

/// A host loop whose every completion is triggered explicitly by the test.
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
///
/// use lw_event::BasicStream;
/// use lw_event::fake::FakeLoop;
///
/// let host = Rc::new(FakeLoop::new());
/// let handle = host.open();
/// let stream = BasicStream::new(Rc::clone(&host), handle);
///
/// let written = stream.write("hello").unwrap();
/// assert!(!written.is_ready());
///
/// host.complete_write(handle, 0);
///
/// assert!(written.is_ready());
/// assert_eq!(host.written(handle), b"hello");
/// ```
#[derive(Default)]
pub struct FakeLoop {
    handles: RefCell<Vec<HandleState>>,
    refusals: RefCell<Refusals>,
}

impl FakeLoop {
    /// Creates a loop without handles.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new handle.
    #[must_use]
    pub fn open(&self) -> FakeHandle {
        let mut handles = self.handles.borrow_mut();
        handles.push(HandleState::default());
        FakeHandle(handles.len().wrapping_sub(1))
    }

    /// Makes the next call to [`HostLoop::write()`] fail with `status`.
    pub fn refuse_next_write(&self, status: i32) {
        self.refusals.borrow_mut().write = Some(status);
    }

    /// Makes the next call to [`HostLoop::read_start()`] fail with `status`.
    pub fn refuse_next_read_start(&self, status: i32) {
        self.refusals.borrow_mut().read_start = Some(status);
    }

    /// Makes the next call to [`HostLoop::read_stop()`] fail with `status`.
    pub fn refuse_next_read_stop(&self, status: i32) {
        self.refusals.borrow_mut().read_stop = Some(status);
    }

    /// Whether the handle is being read.
    #[must_use]
    pub fn is_reading(&self, handle: FakeHandle) -> bool {
        self.with_handle(handle, |state| state.reading)
    }

    /// The number of writes queued on the handle that have not completed yet.
    #[must_use]
    pub fn pending_writes(&self, handle: FakeHandle) -> usize {
        self.with_handle(handle, |state| state.writes.len())
    }

    /// Everything successfully written to the handle so far, in completion order.
    #[must_use]
    pub fn written(&self, handle: FakeHandle) -> Vec<u8> {
        self.with_handle(handle, |state| state.written.clone())
    }

    /// Completes the oldest pending write on the handle with `status`.
    ///
    /// Returns `false` if no write was pending.
    pub fn complete_write(&self, handle: FakeHandle, status: i32) -> bool {
        let write = self.with_handle(handle, |state| {
            let write = state.writes.pop_front()?;

            if status >= 0 {
                state.written.extend_from_slice(write.buffer.as_slice());
            }

            Some(write)
        });

        let Some(write) = write else {
            return false;
        };

        (write.on_complete)(status);
        true
    }

    /// Completes every pending write on the handle successfully, returning how many there were.
    ///
    /// Writes queued by the completion callbacks themselves are completed as well.
    pub fn complete_all_writes(&self, handle: FakeHandle) -> usize {
        let mut completed = 0_usize;

        while self.complete_write(handle, 0) {
            completed = completed.wrapping_add(1);
        }

        completed
    }

    /// Delivers `data` to the read callback of the handle, reading it into one buffer obtained
    /// from the allocation callback.
    ///
    /// Returns the number of bytes delivered, which is less than the length of `data` if the
    /// buffer was smaller, or `None` if the handle is not being read.
    pub fn deliver(&self, handle: FakeHandle, data: &[u8]) -> Option<usize> {
        self.read_with(handle, |buffer| {
            let len = data.len().min(buffer.len());

            if let (Some(target), Some(source)) =
                (buffer.as_mut_slice().get_mut(..len), data.get(..len))
            {
                target.copy_from_slice(source);
            }

            (isize::try_from(len).unwrap_or(isize::MAX), len)
        })
    }

    /// Reports the end of the input to the read callback of the handle.
    ///
    /// Returns `false` if the handle is not being read.
    pub fn deliver_eof(&self, handle: FakeHandle) -> bool {
        self.deliver_status(handle, host::EOF)
    }

    /// Reports `status` to the read callback of the handle without delivering any data. Zero
    /// means that nothing could be read; negative values are read failures.
    ///
    /// Returns `false` if the handle is not being read.
    pub fn deliver_status(&self, handle: FakeHandle, status: i32) -> bool {
        self.read_with(handle, |_| {
            (isize::try_from(status).unwrap_or(isize::MIN), ())
        })
        .is_some()
    }

    /// Whether closing of the handle has been requested.
    #[must_use]
    pub fn is_closing(&self, handle: FakeHandle) -> bool {
        self.with_handle(handle, |state| state.closing)
    }

    /// Whether the handle has finished closing.
    #[must_use]
    pub fn is_closed(&self, handle: FakeHandle) -> bool {
        self.with_handle(handle, |state| state.closed)
    }

    /// Finishes closing the handle. Pending writes complete with [`host::CANCELED`] before the
    /// close callback is called.
    ///
    /// Returns `false` if closing was not requested or has already finished.
    pub fn complete_close(&self, handle: FakeHandle) -> bool {
        let finished = self.with_handle(handle, |state| {
            if !state.closing || state.closed {
                return None;
            }

            state.closed = true;
            Some((mem::take(&mut state.writes), state.on_close.take()))
        });

        let Some((writes, on_close)) = finished else {
            return false;
        };

        for write in writes {
            (write.on_complete)(host::CANCELED);
        }

        if let Some(on_close) = on_close {
            on_close();
        }

        true
    }

    fn read_with<R>(
        &self,
        handle: FakeHandle,
        fill: impl FnOnce(&mut Buffer) -> (isize, R),
    ) -> Option<R> {
        let (generation, mut reader) = self.with_handle(handle, |state| {
            if !state.reading {
                return None;
            }

            Some((state.read_generation, state.reader.take()?))
        })?;

        let mut buffer = (reader.alloc)(SUGGESTED_READ_SIZE);
        let (nread, result) = fill(&mut buffer);
        (reader.on_read)(nread, buffer);

        // The callbacks may have stopped reading or started reading anew.
        let leftover = self.with_handle(handle, |state| {
            if state.reading && state.read_generation == generation && state.reader.is_none() {
                state.reader = Some(reader);
                None
            } else {
                Some(reader)
            }
        });
        drop(leftover);

        Some(result)
    }

    fn with_handle<R>(&self, handle: FakeHandle, f: impl FnOnce(&mut HandleState) -> R) -> R {
        let mut handles = self.handles.borrow_mut();
        let state = handles
            .get_mut(handle.0)
            .expect("handle was not opened on this loop");

        f(state)
    }

    fn try_with_handle<R>(
        &self,
        handle: FakeHandle,
        f: impl FnOnce(&mut HandleState) -> R,
    ) -> Option<R> {
        let mut handles = self.handles.borrow_mut();
        let state = handles.get_mut(handle.0)?;

        if state.closing {
            return None;
        }

        Some(f(state))
    }
}

impl HostLoop for FakeLoop {
    type Handle = FakeHandle;

    fn write(&self, handle: FakeHandle, buffer: Buffer, on_complete: WriteCallback) -> i32 {
        if let Some(status) = self.refusals.borrow_mut().write.take() {
            return status;
        }

        let mut write = Some(PendingWrite {
            buffer,
            on_complete,
        });

        let queued = self.try_with_handle(handle, |state| {
            if let Some(write) = write.take() {
                state.writes.push_back(write);
            }
        });

        // A refused write is dropped outside of the borrow.
        drop(write);

        if queued.is_some() {
            0
        } else {
            host::BAD_HANDLE
        }
    }

    fn read_start(&self, handle: FakeHandle, alloc: AllocCallback, on_read: ReadCallback) -> i32 {
        if let Some(status) = self.refusals.borrow_mut().read_start.take() {
            return status;
        }

        let mut reader = Some(Reader { alloc, on_read });

        let status = self
            .try_with_handle(handle, |state| {
                if state.reading {
                    return host::ALREADY;
                }

                state.reading = true;
                state.read_generation = state.read_generation.wrapping_add(1);
                state.reader = reader.take();
                0
            })
            .unwrap_or(host::BAD_HANDLE);

        drop(reader);
        status
    }

    fn read_stop(&self, handle: FakeHandle) -> i32 {
        if let Some(status) = self.refusals.borrow_mut().read_stop.take() {
            return status;
        }

        let stopped = self.with_handle(handle, |state| {
            state.reading = false;
            state.reader.take()
        });
        drop(stopped);

        0
    }

    fn close(&self, handle: FakeHandle, on_close: CloseCallback) {
        let stopped = self.with_handle(handle, |state| {
            assert!(!state.closing, "handle closed twice");

            state.closing = true;
            state.reading = false;
            state.on_close = Some(on_close);
            state.reader.take()
        });
        drop(stopped);
    }
}

impl fmt::Debug for FakeLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeLoop")
            .field("handles", &self.handles.borrow().len())
            .finish_non_exhaustive()
    }
}
