//! Buffered, promise-driven byte streams on top of a [`HostLoop`].

use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::num::NonZero;
use std::ops::Deref;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::buffer::BufferPool;
use crate::host::{self, HostLoop};
use crate::{Buffer, BufferId, DEFAULT_BUFFER_CAPACITY, Future, Promise, StreamError};

type DataCallback = Box<dyn FnMut(ReadChunk)>;

/// A byte stream over one handle of a host event loop.
///
/// Writes are independent operations, each reported through its own [`Future`]. Reading happens
/// in sessions: [`read()`][Self::read] registers a data callback that receives every chunk of
/// input until the session ends, either through [`stop()`][Self::stop] or because the input
/// ended. The future returned by `read()` resolves with the number of bytes delivered during the
/// session.
///
/// Read buffers come from a pool owned by the stream. Each chunk handed to the data callback
/// borrows one pooled buffer and returns it when dropped, so that it can be read into again.
///
/// `BasicStream` is a cheap handle to shared state. Cloning it yields another handle to the same
/// stream. The handle of the host loop is closed once the last reference to the state is gone,
/// which includes references held by writes that have not completed yet.
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
/// let read = stream.read(|chunk| println!("{} bytes", chunk.len())).unwrap();
/// host.deliver(handle, b"hello");
/// host.deliver_eof(handle);
///
/// assert_eq!(futures::executor::block_on(read), Ok(5));
/// ```
pub struct BasicStream<L: HostLoop> {
    state: Rc<StreamState<L>>,
}

impl<L: HostLoop> BasicStream<L> {
    /// Creates a stream over `handle` with default configuration.
    #[must_use]
    pub fn new(host: Rc<L>, handle: L::Handle) -> Self {
        Self::builder(host, handle).build()
    }

    /// Starts configuring a stream over `handle`.
    pub fn builder(host: Rc<L>, handle: L::Handle) -> StreamBuilder<L> {
        StreamBuilder::new(host, handle)
    }

    /// The host loop handle this stream wraps.
    #[must_use]
    pub fn handle(&self) -> L::Handle {
        self.state.handle
    }

    /// Submits `buffer` for writing.
    ///
    /// The returned future resolves with the number of bytes written once the host loop has
    /// written the whole buffer, or is rejected with the status the loop reported.
    ///
    /// # Errors
    ///
    /// Returns an error if the host loop refuses to queue the write. No future is produced then.
    pub fn write(&self, buffer: impl Into<Buffer>) -> Result<Future<usize>, StreamError> {
        let buffer = buffer.into();
        let request = WriteRequest {
            size: buffer.len(),
            promise: Promise::new(),
        };
        let future = request.promise.future();

        trace!(handle = ?self.state.handle, size = request.size, "submitting write");

        // The state travels with the request so the handle stays open until the write is done.
        let state = Rc::clone(&self.state);
        let status = self.state.host.write(
            self.state.handle,
            buffer,
            Box::new(move |status| {
                request.complete(status);
                drop(state);
            }),
        );

        if status < 0 {
            debug!(handle = ?self.state.handle, status, "host loop refused write");
            return Err(StreamError::new(status));
        }

        Ok(future)
    }

    /// Starts a read session that hands every chunk of input to `on_data`.
    ///
    /// The returned future resolves with the number of bytes delivered during the session when
    /// the session ends through [`stop()`][Self::stop] or the end of the input, or is rejected
    /// if the host loop reports a read failure. The data callback is dropped when the session
    /// ends.
    ///
    /// The data callback may use the stream, for example to write a reply or to stop reading.
    ///
    /// # Errors
    ///
    /// Returns an error with status [`host::ALREADY`] if a session is already active, or the
    /// status of the host loop if it refuses to start reading. No future is produced then.
    pub fn read<F>(&self, on_data: F) -> Result<Future<usize>, StreamError>
    where
        F: FnMut(ReadChunk) + 'static,
    {
        let state = &self.state;

        if state.reading.get() {
            return Err(StreamError::new(host::ALREADY));
        }

        *state.on_data.borrow_mut() = Some(Box::new(on_data));
        state.reading.set(true);
        state.session.set(state.session.get().wrapping_add(1));

        // The loop only gets weak references: a read in progress does not keep a stream alive.
        let alloc_state = Rc::downgrade(state);
        let read_state = Rc::downgrade(state);

        let status = state.host.read_start(
            state.handle,
            Box::new(move |suggested_size| {
                alloc_state.upgrade().map_or_else(
                    || Buffer::new(suggested_size),
                    |state| state.buffers.borrow_mut().acquire(),
                )
            }),
            Box::new(move |nread, buffer| {
                if let Some(state) = read_state.upgrade() {
                    state.on_read(nread, buffer);
                }
            }),
        );

        if status < 0 {
            debug!(handle = ?state.handle, status, "host loop refused to start reading");
            state.reading.set(false);
            let on_data = state.on_data.borrow_mut().take();
            drop(on_data);
            return Err(StreamError::new(status));
        }

        debug!(handle = ?state.handle, session = state.session.get(), "read session started");

        Ok(state.read_promise.borrow().future())
    }

    /// Ends the current read session.
    ///
    /// The future of the session resolves with the number of bytes delivered so far. Calling
    /// this without an active session is allowed and does nothing observable.
    ///
    /// # Errors
    ///
    /// Returns an error if the host loop fails to stop reading. The data callback is dropped
    /// regardless but the session future stays pending.
    pub fn stop(&self) -> Result<(), StreamError> {
        let state = &self.state;

        let status = state.host.read_stop(state.handle);

        let on_data = state.on_data.borrow_mut().take();
        drop(on_data);

        if status < 0 {
            warn!(handle = ?state.handle, status, "host loop failed to stop reading");
            return Err(StreamError::new(status));
        }

        state.finish_session(Ok(()));
        Ok(())
    }

    /// Whether a read session is active.
    #[must_use]
    pub fn is_reading(&self) -> bool {
        self.state.reading.get()
    }

    /// The number of bytes delivered in the current read session.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.state.read_count.get()
    }

    /// The number of pooled read buffers that are ready for reuse.
    #[must_use]
    pub fn idle_buffers(&self) -> usize {
        self.state.buffers.borrow().idle_len()
    }

    /// The number of pooled read buffers currently lent to the host loop or to read chunks.
    #[must_use]
    pub fn active_buffers(&self) -> usize {
        self.state.buffers.borrow().active_len()
    }
}

impl<L: HostLoop> Clone for BasicStream<L> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<L: HostLoop> fmt::Debug for BasicStream<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("state", &self.state)
            .finish()
    }
}

/// Configures and creates a [`BasicStream`].
///
/// ```rust
/// use std::num::NonZero;
/// use std::rc::Rc;
///
/// use lw_event::BasicStream;
/// use lw_event::fake::FakeLoop;
///
/// let host = Rc::new(FakeLoop::new());
/// let handle = host.open();
///
/// let stream = BasicStream::builder(host, handle)
///     .read_buffer_capacity(NonZero::new(16 * 1024).unwrap())
///     .build();
/// ```
#[must_use]
pub struct StreamBuilder<L: HostLoop> {
    host: Rc<L>,
    handle: L::Handle,
    read_buffer_capacity: NonZero<usize>,
}

impl<L: HostLoop> StreamBuilder<L> {
    fn new(host: Rc<L>, handle: L::Handle) -> Self {
        Self {
            host,
            handle,
            read_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    /// Sets the capacity of the buffers the stream reads into.
    ///
    /// Defaults to [`DEFAULT_BUFFER_CAPACITY`].
    pub fn read_buffer_capacity(mut self, capacity: NonZero<usize>) -> Self {
        self.read_buffer_capacity = capacity;
        self
    }

    /// Creates the stream.
    #[must_use]
    pub fn build(self) -> BasicStream<L> {
        BasicStream {
            state: Rc::new(StreamState {
                host: self.host,
                handle: self.handle,
                read_count: Cell::new(0),
                reading: Cell::new(false),
                session: Cell::new(0),
                on_data: RefCell::new(None),
                read_promise: RefCell::new(Promise::new()),
                buffers: Rc::new(RefCell::new(BufferPool::new(self.read_buffer_capacity))),
            }),
        }
    }
}

impl<L: HostLoop> fmt::Debug for StreamBuilder<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("handle", &self.handle)
            .field("read_buffer_capacity", &self.read_buffer_capacity)
            .finish_non_exhaustive()
    }
}

struct StreamState<L: HostLoop> {
    host: Rc<L>,
    handle: L::Handle,

    // Bytes delivered in the current session.
    read_count: Cell<usize>,
    reading: Cell<bool>,

    // Incremented whenever a session starts, to tell sessions apart across re-entrant calls.
    session: Cell<u64>,

    // Taken out while being called.
    on_data: RefCell<Option<DataCallback>>,

    read_promise: RefCell<Promise<usize>>,

    // Shared with the chunks handed out to the data callback.
    buffers: Rc<RefCell<BufferPool>>,
}

impl<L: HostLoop> StreamState<L> {
    fn on_read(&self, nread: isize, buffer: Buffer) {
        match usize::try_from(nread) {
            Ok(0) => {
                self.buffers.borrow_mut().release(buffer);
            }
            Ok(len) => self.deliver(len, buffer),
            Err(_) => {
                self.buffers.borrow_mut().release(buffer);

                let status = i32::try_from(nread).unwrap_or(i32::MIN);

                // The loop must be told before the session future settles, as its continuation
                // may well start the next session right away.
                let stop_status = self.host.read_stop(self.handle);
                if stop_status < 0 {
                    warn!(handle = ?self.handle, stop_status, "host loop failed to stop reading");
                }

                if status == host::EOF {
                    self.finish_session(Ok(()));
                } else {
                    debug!(handle = ?self.handle, status, "read failed");
                    self.finish_session(Err(StreamError::new(status)));
                }
            }
        }
    }

    fn deliver(&self, len: usize, buffer: Buffer) {
        let len = len.min(buffer.len());

        let chunk = ReadChunk {
            buffer,
            len,
            pool: Rc::clone(&self.buffers),
        };

        let session = self.session.get();
        let on_data = self.on_data.borrow_mut().take();

        let Some(mut on_data) = on_data else {
            // Nobody to hand the data to; the chunk goes straight back to the pool uncounted.
            trace!(handle = ?self.handle, len, "discarded data without a receiver");
            return;
        };

        self.read_count
            .set(self.read_count.get().saturating_add(len));

        trace!(handle = ?self.handle, len, total = self.read_count.get(), "received data");

        on_data(chunk);

        // The callback may have ended this session, or even started a new one.
        if self.reading.get() && self.session.get() == session {
            let mut slot = self.on_data.borrow_mut();
            if slot.is_none() {
                *slot = Some(on_data);
            }
        }
    }

    fn finish_session(&self, outcome: Result<(), StreamError>) {
        self.reading.set(false);

        let on_data = self.on_data.borrow_mut().take();
        drop(on_data);

        let count = self.read_count.replace(0);

        // Swapped for a fresh promise before settling, so continuations can start the next
        // session from within.
        let finished = mem::take(&mut *self.read_promise.borrow_mut());

        debug!(handle = ?self.handle, count, "read session finished");

        match outcome {
            Ok(()) => finished.resolve(count),
            Err(error) => finished.reject(error),
        }
    }
}

impl<L: HostLoop> Drop for StreamState<L> {
    fn drop(&mut self) {
        let handle = self.handle;

        debug!(?handle, "closing stream handle");

        self.host.close(
            handle,
            Box::new(move || debug!(?handle, "stream handle closed")),
        );
    }
}

impl<L: HostLoop> fmt::Debug for StreamState<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("handle", &self.handle)
            .field("reading", &self.reading.get())
            .field("read_count", &self.read_count.get())
            .field("buffers", &self.buffers)
            .finish_non_exhaustive()
    }
}

struct WriteRequest {
    size: usize,
    promise: Promise<usize>,
}

impl WriteRequest {
    fn complete(self, status: i32) {
        if status < 0 {
            self.promise.reject(StreamError::new(status));
        } else {
            self.promise.resolve(self.size);
        }
    }
}

/// One chunk of input delivered by a read session.
///
/// Dereferences to the bytes that were read. The underlying buffer belongs to the read buffer
/// pool of the stream and goes back to it when the chunk is dropped.
pub struct ReadChunk {
    buffer: Buffer,
    len: usize,
    pool: Rc<RefCell<BufferPool>>,
}

impl ReadChunk {
    /// The identity of the pooled buffer holding the data.
    #[must_use]
    pub fn buffer_id(&self) -> BufferId {
        self.buffer.id()
    }
}

impl Deref for ReadChunk {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_slice().get(..self.len).unwrap_or_default()
    }
}

impl Drop for ReadChunk {
    fn drop(&mut self) {
        let buffer = mem::take(&mut self.buffer);
        self.pool.borrow_mut().release(buffer);
    }
}

impl fmt::Debug for ReadChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("buffer", &self.buffer)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use static_assertions::assert_not_impl_any;
    use testing::Recorder;

    use super::*;
    use crate::Error;
    use crate::fake::{FakeHandle, FakeLoop};

    assert_not_impl_any!(BasicStream<FakeLoop>: Send, Sync);
    assert_not_impl_any!(ReadChunk: Send, Sync);

    fn stream() -> (Rc<FakeLoop>, FakeHandle, BasicStream<FakeLoop>) {
        let host = Rc::new(FakeLoop::new());
        let handle = host.open();
        let stream = BasicStream::new(Rc::clone(&host), handle);
        (host, handle, stream)
    }

    #[test]
    fn write_resolves_with_size() {
        let (host, handle, stream) = stream();

        let written = stream.write("twelve bytes").unwrap();
        assert!(!written.is_ready());
        assert_eq!(host.pending_writes(handle), 1);

        assert!(host.complete_write(handle, 0));

        assert_eq!(block_on(written), Ok(12));
        assert_eq!(host.written(handle), b"twelve bytes");
    }

    #[test]
    fn write_failure_rejects_with_status() {
        let (host, handle, stream) = stream();

        let written = stream.write(vec![1_u8, 2, 3]).unwrap();
        host.complete_write(handle, -libc::EPIPE);

        assert_eq!(
            block_on(written),
            Err(Error::Stream(StreamError::new(-libc::EPIPE)))
        );
    }

    #[test]
    fn refused_write_fails_immediately() {
        let (host, handle, stream) = stream();
        host.refuse_next_write(-libc::ENOBUFS);

        let error = stream.write("data").unwrap_err();

        assert_eq!(error.status(), -libc::ENOBUFS);
        assert_eq!(host.pending_writes(handle), 0);

        // Only the next write is refused.
        assert!(stream.write("data").is_ok());
    }

    #[test]
    fn writes_complete_in_submission_order() {
        let (host, handle, stream) = stream();
        let recorder = Recorder::new();

        for payload in ["a", "bb", "ccc"] {
            let recorder = recorder.clone();
            let _done = stream
                .write(payload)
                .unwrap()
                .then(move |size| recorder.record(size));
        }

        assert_eq!(host.complete_all_writes(handle), 3);
        assert_eq!(recorder.take(), [1, 2, 3]);
        assert_eq!(host.written(handle), b"abbccc");
    }

    #[test]
    fn pending_write_keeps_handle_open() {
        let (host, handle, stream) = stream();

        let written = stream.write("bye").unwrap();
        drop(stream);
        assert!(!host.is_closing(handle));

        host.complete_write(handle, 0);
        assert!(host.is_closing(handle));
        assert_eq!(block_on(written), Ok(3));
    }

    #[test]
    fn dropping_stream_closes_handle_once() {
        let (host, handle, stream) = stream();
        let clone = stream.clone();

        drop(stream);
        assert!(!host.is_closing(handle));

        drop(clone);
        assert!(host.is_closing(handle));
        assert!(host.complete_close(handle));
        assert!(!host.complete_close(handle));
        assert!(host.is_closed(handle));
    }

    #[test]
    fn read_accumulates_until_end_of_input() {
        let (host, handle, stream) = stream();
        let recorder = Recorder::new();

        let recorder_clone = recorder.clone();
        let read = stream
            .read(move |chunk| recorder_clone.record(chunk.to_vec()))
            .unwrap();
        assert!(stream.is_reading());

        host.deliver(handle, b"abcd");
        host.deliver(handle, b"efghij");
        host.deliver(handle, b"klm");
        assert_eq!(stream.read_count(), 13);
        assert!(!read.is_ready());

        host.deliver_eof(handle);

        assert_eq!(block_on(read), Ok(13));
        assert_eq!(
            recorder.take(),
            [b"abcd".to_vec(), b"efghij".to_vec(), b"klm".to_vec()]
        );
        assert!(!stream.is_reading());
        assert_eq!(stream.read_count(), 0);
        assert!(!host.is_reading(handle));
    }

    #[test]
    fn stop_without_data_resolves_zero() {
        let (host, handle, stream) = stream();

        let read = stream.read(|_| {}).unwrap();
        stream.stop().unwrap();

        assert_eq!(block_on(read), Ok(0));
        assert!(!host.is_reading(handle));
    }

    #[test]
    fn stop_resolves_with_count_so_far() {
        let (host, handle, stream) = stream();

        let read = stream.read(|_| {}).unwrap();
        host.deliver(handle, b"12345");
        stream.stop().unwrap();

        assert_eq!(block_on(read), Ok(5));

        // Nothing is delivered after stopping.
        assert_eq!(host.deliver(handle, b"late"), None);
    }

    #[test]
    fn stop_without_session_is_harmless() {
        let (_host, _handle, stream) = stream();

        stream.stop().unwrap();
        stream.stop().unwrap();

        assert!(!stream.is_reading());
    }

    #[test]
    fn released_chunk_buffer_is_reused() {
        let (host, handle, stream) = stream();
        let ids = Recorder::new();

        let ids_clone = ids.clone();
        let _read = stream
            .read(move |chunk| ids_clone.record(chunk.buffer_id()))
            .unwrap();

        host.deliver(handle, b"one");
        assert_eq!(stream.idle_buffers(), 1);
        assert_eq!(stream.active_buffers(), 0);

        host.deliver(handle, b"two");

        let ids = ids.take();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids.first(), ids.last());
    }

    #[test]
    fn held_chunk_keeps_buffer_active() {
        let (host, handle, stream) = stream();
        let held = Recorder::new();

        let held_clone = held.clone();
        let _read = stream.read(move |chunk| held_clone.record(chunk)).unwrap();

        host.deliver(handle, b"first");
        host.deliver(handle, b"second");

        // Both chunks are still alive, so two distinct buffers are lent out.
        assert_eq!(stream.active_buffers(), 2);
        let chunks = held.take();
        assert_ne!(
            chunks.first().map(ReadChunk::buffer_id),
            chunks.last().map(ReadChunk::buffer_id)
        );

        drop(chunks);
        assert_eq!(stream.active_buffers(), 0);
        assert_eq!(stream.idle_buffers(), 2);
    }

    #[test]
    fn chunk_outliving_stream_is_harmless() {
        let (host, handle, stream) = stream();
        let held = Recorder::new();

        let held_clone = held.clone();
        let _read = stream.read(move |chunk| held_clone.record(chunk)).unwrap();
        host.deliver(handle, b"data");

        drop(stream);
        let chunks = held.take();
        assert_eq!(chunks.first().map(|chunk| chunk.to_vec()), Some(b"data".to_vec()));
    }

    #[test]
    fn new_session_gets_fresh_future_and_counter() {
        let (host, handle, stream) = stream();

        let first = stream.read(|_| {}).unwrap();
        host.deliver(handle, b"abc");
        host.deliver_eof(handle);
        assert_eq!(block_on(first), Ok(3));

        let second = stream.read(|_| {}).unwrap();
        assert!(!second.is_ready());
        assert_eq!(stream.read_count(), 0);

        host.deliver(handle, b"z");
        stream.stop().unwrap();
        assert_eq!(block_on(second), Ok(1));
    }

    #[test]
    fn read_while_reading_is_refused() {
        let (host, handle, stream) = stream();
        let recorder = Recorder::new();

        let recorder_clone = recorder.clone();
        let _read = stream
            .read(move |chunk| recorder_clone.record(chunk.len()))
            .unwrap();

        let error = stream.read(|_| {}).unwrap_err();
        assert_eq!(error.status(), host::ALREADY);

        // The active session is not disturbed.
        host.deliver(handle, b"ok");
        assert_eq!(recorder.take(), [2]);
    }

    #[test]
    fn refused_read_start_clears_callback() {
        let (host, handle, stream) = stream();
        host.refuse_next_read_start(-libc::EBADF);

        let error = stream.read(|_| {}).unwrap_err();

        assert_eq!(error.status(), -libc::EBADF);
        assert!(!stream.is_reading());
        assert!(!host.is_reading(handle));

        // A later attempt works.
        assert!(stream.read(|_| {}).is_ok());
    }

    #[test]
    fn refused_stop_keeps_session_pending() {
        let (host, _handle, stream) = stream();

        let read = stream.read(|_| {}).unwrap();
        host.refuse_next_read_stop(-libc::EIO);

        assert_eq!(stream.stop().unwrap_err().status(), -libc::EIO);
        assert!(!read.is_ready());
    }

    #[test]
    fn data_after_refused_stop_is_not_counted() {
        let (host, handle, stream) = stream();
        let recorder = Recorder::new();

        let recorder_clone = recorder.clone();
        let read = stream
            .read(move |chunk| recorder_clone.record(chunk.len()))
            .unwrap();
        host.deliver(handle, b"ab");

        host.refuse_next_read_stop(-libc::EIO);
        assert!(stream.stop().is_err());

        // The data callback is gone, so these bytes reach nobody.
        host.deliver(handle, b"cdef");
        assert_eq!(stream.read_count(), 2);
        assert_eq!(stream.active_buffers(), 0);

        stream.stop().unwrap();

        assert_eq!(block_on(read), Ok(2));
        assert_eq!(recorder.take(), [2]);
    }

    #[test]
    fn read_error_rejects_session() {
        let (host, handle, stream) = stream();

        let read = stream.read(|_| {}).unwrap();
        host.deliver(handle, b"partial");
        host.deliver_status(handle, -libc::ECONNRESET);

        assert_eq!(
            block_on(read),
            Err(Error::Stream(StreamError::new(-libc::ECONNRESET)))
        );
        assert!(!stream.is_reading());
        assert_eq!(stream.read_count(), 0);
    }

    #[test]
    fn empty_read_returns_buffer_without_callback() {
        let (host, handle, stream) = stream();
        let recorder = Recorder::new();

        let recorder_clone = recorder.clone();
        let _read = stream.read(move |_| recorder_clone.record(())).unwrap();

        host.deliver_status(handle, 0);

        assert!(recorder.is_empty());
        assert_eq!(stream.idle_buffers(), 1);
        assert!(stream.is_reading());
    }

    #[test]
    fn callback_may_stop_the_session() {
        let (host, handle, stream) = stream();

        let stream_clone = stream.clone();
        let read = stream
            .read(move |_| stream_clone.stop().unwrap())
            .unwrap();

        host.deliver(handle, b"only this");

        assert_eq!(block_on(read), Ok(9));
        assert_eq!(host.deliver(handle, b"ignored"), None);
    }

    #[test]
    fn callback_may_write_a_reply() {
        let (host, handle, stream) = stream();

        let stream_clone = stream.clone();
        let _read = stream
            .read(move |chunk| {
                let mut reply = chunk.to_vec();
                reply.reverse();
                _ = stream_clone.write(reply).unwrap();
            })
            .unwrap();

        host.deliver(handle, b"ping");
        host.complete_all_writes(handle);

        assert_eq!(host.written(handle), b"gnip");
    }

    #[test]
    fn continuation_may_start_next_session() {
        let (host, handle, stream) = stream();
        let sessions = Recorder::new();

        let stream_clone = stream.clone();
        let sessions_clone = sessions.clone();
        let _second = stream.read(|_| {}).unwrap().then_future(move |count| {
            sessions_clone.record(count);
            stream_clone.read(|_| {}).unwrap()
        });

        host.deliver(handle, b"abc");
        host.deliver_eof(handle);

        assert_eq!(sessions.take(), [3]);
        assert!(stream.is_reading());
        assert!(host.is_reading(handle));

        host.deliver(handle, b"de");
        assert_eq!(stream.read_count(), 2);
    }

    #[test]
    fn dropping_stream_during_session_breaks_future() {
        let (host, handle, stream) = stream();

        let read = stream.read(|_| {}).unwrap();
        drop(stream);

        assert!(host.is_closing(handle));
        assert_eq!(block_on(read), Err(Error::Broken));
    }

    #[test]
    fn custom_read_buffer_capacity() {
        let host = Rc::new(FakeLoop::new());
        let handle = host.open();
        let stream = BasicStream::builder(Rc::clone(&host), handle)
            .read_buffer_capacity(NonZero::new(4).unwrap())
            .build();
        let recorder = Recorder::new();

        let recorder_clone = recorder.clone();
        let _read = stream
            .read(move |chunk| recorder_clone.record(chunk.to_vec()))
            .unwrap();

        assert_eq!(host.deliver(handle, b"abcdefgh"), Some(4));
        assert_eq!(recorder.take(), [b"abcd".to_vec()]);
    }
}
