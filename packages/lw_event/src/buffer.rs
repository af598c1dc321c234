use std::fmt;
use std::num::NonZero;

use tracing::trace;

/// Capacity of the buffers a stream reads into unless configured otherwise.
pub const DEFAULT_BUFFER_CAPACITY: NonZero<usize> = NonZero::new(1024).unwrap();

/// A fixed-capacity block of bytes.
///
/// The storage of a buffer lives on the heap and never moves or resizes, so its address is a
/// stable identity for as long as the buffer exists, no matter where the `Buffer` value itself
/// is moved. Pools use that identity ([`BufferId`]) to match buffers coming back to them.
pub struct Buffer {
    bytes: Box<[u8]>,
}

impl Buffer {
    /// Creates a zero-filled buffer of the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity].into_boxed_slice(),
        }
    }

    /// The identity of the buffer, derived from the address of its storage.
    #[must_use]
    pub fn id(&self) -> BufferId {
        BufferId(self.bytes.as_ptr().addr())
    }

    /// The number of bytes in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer has zero capacity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The contents of the buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// The contents of the buffer, for writing into.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// An empty buffer. All empty buffers share the same identity.
impl Default for Buffer {
    fn default() -> Self {
        Self::new(0)
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(value: Vec<u8>) -> Self {
        Self {
            bytes: value.into_boxed_slice(),
        }
    }
}

impl From<&[u8]> for Buffer {
    fn from(value: &[u8]) -> Self {
        Self {
            bytes: value.into(),
        }
    }
}

impl From<String> for Buffer {
    fn from(value: String) -> Self {
        value.into_bytes().into()
    }
}

impl From<&str> for Buffer {
    fn from(value: &str) -> Self {
        value.as_bytes().into()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id())
            .field("len", &self.len())
            .finish()
    }
}

/// Identity of a [`Buffer`], stable for the lifetime of the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(usize);

/// Recycles fixed-capacity buffers without reallocating them.
///
/// Buffers are either idle (owned by the pool, ready to be handed out) or active (lent out to
/// the host loop or to a consumer of read data). The pool only remembers the identity of active
/// buffers; a buffer comes back into the idle list only if its identity is currently active.
#[derive(Debug)]
pub(crate) struct BufferPool {
    capacity: NonZero<usize>,
    idle: Vec<Buffer>,
    active: Vec<BufferId>,
}

impl BufferPool {
    pub(crate) fn new(capacity: NonZero<usize>) -> Self {
        Self {
            capacity,
            idle: Vec::new(),
            active: Vec::new(),
        }
    }

    /// Lends out an idle buffer, creating a new one if none are idle.
    pub(crate) fn acquire(&mut self) -> Buffer {
        let buffer = self.idle.pop().unwrap_or_else(|| {
            trace!(capacity = self.capacity.get(), "allocating new read buffer");
            Buffer::new(self.capacity.get())
        });

        self.active.push(buffer.id());
        buffer
    }

    /// Takes back a lent-out buffer.
    ///
    /// Returns `false` and drops the buffer if its identity is not active in this pool.
    pub(crate) fn release(&mut self, buffer: Buffer) -> bool {
        let id = buffer.id();

        let Some(index) = self.active.iter().position(|active| *active == id) else {
            trace!(?id, "dropping buffer that is not active in this pool");
            return false;
        };

        self.active.swap_remove(index);
        self.idle.push(buffer);
        true
    }

    pub(crate) fn idle_len(&self) -> usize {
        self.idle.len()
    }

    pub(crate) fn active_len(&self) -> usize {
        self.active.len()
    }
}
