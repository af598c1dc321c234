use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::io;
use std::mem;
use std::os::fd::{IntoRawFd, OwnedFd, RawFd};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::Buffer;
use crate::host::{self, AllocCallback, CloseCallback, HostLoop, ReadCallback, WriteCallback};
use crate::pal::{Bindings, BindingsFacade};

/// The buffer size the poll loop suggests to allocation callbacks.
pub const SUGGESTED_READ_SIZE: usize = 64 * 1024;

/// Identifies a file descriptor registered with a [`PollLoop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PollHandle(u64);

struct Reader {
    alloc: AllocCallback,
    on_read: ReadCallback,
}

struct PendingWrite {
    buffer: Buffer,
    written: usize,
    on_complete: WriteCallback,
}

struct Entry {
    fd: RawFd,

    reading: bool,

    // Incremented by every successful `read_start()`.
    read_generation: u64,

    // Taken out while its callbacks are running.
    reader: Option<Reader>,

    writes: VecDeque<PendingWrite>,

    // Present once closing has been requested.
    on_close: Option<CloseCallback>,
}

impl Entry {
    fn is_closing(&self) -> bool {
        self.on_close.is_some()
    }

    fn interest(&self) -> libc::c_short {
        if self.is_closing() {
            return 0;
        }

        let mut events = 0;

        if self.reading {
            events |= libc::POLLIN;
        }

        if !self.writes.is_empty() {
            events |= libc::POLLOUT;
        }

        events
    }
}

/// A host loop that multiplexes non-blocking file descriptors with `poll()`.
///
/// Descriptors are handed over with [`open()`][Self::open] and are owned by the loop from then
/// on; the loop closes each of them when asked to through [`HostLoop::close()`], or when the
/// loop itself is dropped.
///
/// The loop only makes progress while it is being driven with [`run()`][Self::run] or
/// [`run_once()`][Self::run_once]. All callbacks run on the driving thread, from within those
/// calls. Callbacks may freely call back into the loop.
///
/// # Example
///
/// ```rust
/// # #[cfg(unix)]
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use std::io::Write;
/// use std::os::unix::net::UnixStream;
/// use std::rc::Rc;
///
/// use lw_event::{BasicStream, PollLoop};
///
/// let (local, mut remote) = UnixStream::pair()?;
///
/// let host = Rc::new(PollLoop::new());
/// let stream = BasicStream::new(Rc::clone(&host), host.open(local.into())?);
///
/// let read = stream.read(|chunk| println!("received {} bytes", chunk.len()))?;
///
/// remote.write_all(b"hello")?;
/// drop(remote);
///
/// host.run()?;
///
/// assert_eq!(futures::executor::block_on(read)?, 5);
/// # Ok(())
/// # }
/// # #[cfg(not(unix))]
/// # fn main() {}
/// ```
pub struct PollLoop {
    bindings: BindingsFacade,
    entries: RefCell<BTreeMap<u64, Entry>>,
    next_id: Cell<u64>,
}

impl PollLoop {
    /// Creates a loop without registered descriptors.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bindings(BindingsFacade::real())
    }

    pub(crate) fn with_bindings(bindings: BindingsFacade) -> Self {
        Self {
            bindings,
            entries: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(0),
        }
    }

    /// Takes ownership of `fd`, switches it to non-blocking mode and registers it with the loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be switched to non-blocking mode. The descriptor
    /// is closed in that case.
    pub fn open(&self, fd: OwnedFd) -> io::Result<PollHandle> {
        let fd = fd.into_raw_fd();

        if let Err(errno) = self.bindings.set_nonblocking(fd) {
            self.bindings.close(fd);
            return Err(io::Error::from_raw_os_error(errno));
        }

        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));

        self.entries.borrow_mut().insert(
            id,
            Entry {
                fd,
                reading: false,
                read_generation: 0,
                reader: None,
                writes: VecDeque::new(),
                on_close: None,
            },
        );

        debug!(fd, handle = id, "registered file descriptor");

        Ok(PollHandle(id))
    }

    /// Drives the loop until no registered descriptor is being read, has pending writes or is
    /// waiting to be closed.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting for readiness fails.
    pub fn run(&self) -> io::Result<()> {
        while self.run_once(None)? {}

        Ok(())
    }

    /// Waits for readiness at most once, for at most `timeout` (forever if `None`), and runs the
    /// callbacks for whatever became ready. Handles waiting to be closed are closed before and
    /// after waiting.
    ///
    /// Returns whether the loop still has work, i.e. whether calling this again makes sense.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting for readiness fails. An interrupted wait is not an error.
    pub fn run_once(&self, timeout: Option<Duration>) -> io::Result<bool> {
        self.close_pending();

        let (mut fds, ids): (Vec<libc::pollfd>, Vec<u64>) = self
            .entries
            .borrow()
            .iter()
            .filter_map(|(id, entry)| {
                let events = entry.interest();

                (events != 0).then_some((
                    libc::pollfd {
                        fd: entry.fd,
                        events,
                        revents: 0,
                    },
                    *id,
                ))
            })
            .unzip();

        if fds.is_empty() {
            return Ok(self.has_pending_work());
        }

        let timeout_ms = timeout.map_or(-1, |timeout| {
            i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX)
        });

        trace!(descriptors = fds.len(), timeout_ms, "waiting for readiness");

        match self.bindings.poll(&mut fds, timeout_ms) {
            Ok(_) => {}
            Err(libc::EINTR) => return Ok(true),
            Err(errno) => return Err(io::Error::from_raw_os_error(errno)),
        }

        for (pollfd, id) in fds.iter().zip(ids) {
            let ready = pollfd.revents;
            let failed = ready & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;

            if pollfd.events & libc::POLLOUT != 0 && (ready & libc::POLLOUT != 0 || failed) {
                self.on_writable(id);
            }

            if pollfd.events & libc::POLLIN != 0 && (ready & libc::POLLIN != 0 || failed) {
                self.on_readable(id);
            }
        }

        self.close_pending();

        Ok(self.has_pending_work())
    }

    /// Whether any registered descriptor is being read, has pending writes or is waiting to be
    /// closed.
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        self.entries
            .borrow()
            .values()
            .any(|entry| entry.is_closing() || entry.interest() != 0)
    }

    /// The number of registered descriptors, including those waiting to be closed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether no descriptors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn on_writable(&self, id: u64) {
        loop {
            let completed = {
                let mut entries = self.entries.borrow_mut();

                let Some(entry) = entries.get_mut(&id) else {
                    return;
                };

                if entry.is_closing() {
                    return;
                }

                let fd = entry.fd;
                let Some(pending) = entry.writes.front_mut() else {
                    return;
                };

                let remaining = pending
                    .buffer
                    .as_slice()
                    .get(pending.written..)
                    .unwrap_or_default();

                let status = match self.bindings.write(fd, remaining) {
                    Ok(written) => {
                        pending.written = pending.written.saturating_add(written);

                        if pending.written < pending.buffer.len() {
                            // Partial write, wait for the descriptor to be writable again.
                            return;
                        }

                        0
                    }
                    Err(errno) if would_block(errno) => return,
                    Err(errno) => negate(errno),
                };

                entry.writes.pop_front().map(|write| (write, status))
            };

            if let Some((write, status)) = completed {
                trace!(handle = id, size = write.buffer.len(), status, "write completed");
                (write.on_complete)(status);
            }
        }
    }

    fn on_readable(&self, id: u64) {
        let taken = {
            let mut entries = self.entries.borrow_mut();

            entries.get_mut(&id).and_then(|entry| {
                if !entry.reading || entry.is_closing() {
                    return None;
                }

                Some((entry.fd, entry.read_generation, entry.reader.take()?))
            })
        };

        let Some((fd, generation, mut reader)) = taken else {
            return;
        };

        let mut buffer = (reader.alloc)(SUGGESTED_READ_SIZE);

        let status = match self.bindings.read(fd, buffer.as_mut_slice()) {
            Ok(0) if !buffer.is_empty() => host::EOF,
            Ok(read) => {
                let nread = isize::try_from(read).unwrap_or(isize::MAX);
                self.dispatch_read(id, generation, reader, nread, buffer);
                return;
            }
            Err(errno) if would_block(errno) => 0,
            Err(errno) => negate(errno),
        };

        if status < 0 {
            // The end of the input and read failures both end reading, like a `read_stop()`.
            if let Some(entry) = self.entries.borrow_mut().get_mut(&id) {
                entry.reading = false;
            }

            debug!(handle = id, status, "reading ended");
        }

        self.dispatch_read(
            id,
            generation,
            reader,
            isize::try_from(status).unwrap_or(isize::MIN),
            buffer,
        );
    }

    fn dispatch_read(
        &self,
        id: u64,
        generation: u64,
        mut reader: Reader,
        nread: isize,
        buffer: Buffer,
    ) {
        (reader.on_read)(nread, buffer);

        // The callback may have stopped reading or started reading anew.
        let leftover = {
            let mut entries = self.entries.borrow_mut();

            match entries.get_mut(&id) {
                Some(entry)
                    if entry.reading
                        && entry.read_generation == generation
                        && entry.reader.is_none() =>
                {
                    entry.reader = Some(reader);
                    None
                }
                _ => Some(reader),
            }
        };

        drop(leftover);
    }

    fn close_pending(&self) {
        let closing: Vec<(u64, Entry)> = {
            let mut entries = self.entries.borrow_mut();

            let ids: Vec<u64> = entries
                .iter()
                .filter(|(_, entry)| entry.is_closing())
                .map(|(id, _)| *id)
                .collect();

            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (id, entry) in closing {
            self.close_entry(id, entry);
        }
    }

    // Pending writes are canceled before the close callback runs.
    fn close_entry(&self, id: u64, mut entry: Entry) {
        self.bindings.close(entry.fd);

        for write in mem::take(&mut entry.writes) {
            (write.on_complete)(host::CANCELED);
        }

        drop(entry.reader.take());

        debug!(handle = id, fd = entry.fd, "closed file descriptor");

        if let Some(on_close) = entry.on_close.take() {
            on_close();
        }
    }
}

fn would_block(errno: i32) -> bool {
    errno == libc::EAGAIN || errno == libc::EWOULDBLOCK
}

fn negate(errno: i32) -> i32 {
    errno.checked_neg().unwrap_or(i32::MIN)
}

impl Default for PollLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLoop for PollLoop {
    type Handle = PollHandle;

    fn write(&self, handle: PollHandle, buffer: Buffer, on_complete: WriteCallback) -> i32 {
        let refused = {
            let mut entries = self.entries.borrow_mut();

            match entries.get_mut(&handle.0) {
                Some(entry) if !entry.is_closing() => {
                    entry.writes.push_back(PendingWrite {
                        buffer,
                        written: 0,
                        on_complete,
                    });
                    None
                }
                _ => Some(on_complete),
            }
        };

        match refused {
            Some(on_complete) => {
                drop(on_complete);
                host::BAD_HANDLE
            }
            None => 0,
        }
    }

    fn read_start(&self, handle: PollHandle, alloc: AllocCallback, on_read: ReadCallback) -> i32 {
        let mut reader = Some(Reader { alloc, on_read });

        let status = {
            let mut entries = self.entries.borrow_mut();

            match entries.get_mut(&handle.0) {
                Some(entry) if entry.is_closing() => host::BAD_HANDLE,
                Some(entry) if entry.reading => host::ALREADY,
                Some(entry) => {
                    entry.reading = true;
                    entry.read_generation = entry.read_generation.wrapping_add(1);
                    entry.reader = reader.take();
                    0
                }
                None => host::BAD_HANDLE,
            }
        };

        drop(reader);
        status
    }

    fn read_stop(&self, handle: PollHandle) -> i32 {
        let stopped = {
            let mut entries = self.entries.borrow_mut();

            let Some(entry) = entries.get_mut(&handle.0) else {
                return host::BAD_HANDLE;
            };

            entry.reading = false;
            entry.reader.take()
        };

        drop(stopped);
        0
    }

    fn close(&self, handle: PollHandle, on_close: CloseCallback) {
        let stopped = {
            let mut entries = self.entries.borrow_mut();

            match entries.get_mut(&handle.0) {
                Some(entry) if !entry.is_closing() => {
                    entry.reading = false;
                    entry.on_close = Some(on_close);
                    Ok(entry.reader.take())
                }
                _ => Err(on_close),
            }
        };

        match stopped {
            Ok(reader) => drop(reader),
            Err(on_close) => {
                warn!(?handle, "ignoring close of a handle that is not open");
                drop(on_close);
            }
        }
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        let entries = mem::take(self.entries.get_mut());

        for (id, entry) in entries {
            self.close_entry(id, entry);
        }
    }
}

impl fmt::Debug for PollLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollLoop")
            .field("bindings", &self.bindings)
            .field("entries", &self.entries.borrow().len())
            .finish_non_exhaustive()
    }
}
