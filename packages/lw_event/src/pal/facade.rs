use std::fmt::{self, Debug};
use std::os::fd::RawFd;
#[cfg(test)]
use std::rc::Rc;

#[cfg(test)]
use crate::pal::MockBindings;
use crate::pal::{Bindings, BuildTargetBindings};

#[derive(Clone)]
pub(crate) enum BindingsFacade {
    Real(&'static BuildTargetBindings),

    #[cfg(test)]
    Mock(Rc<MockBindings>),
}

impl BindingsFacade {
    pub(crate) const fn real() -> Self {
        Self::Real(&BuildTargetBindings)
    }
}

impl Bindings for BindingsFacade {
    fn poll(&self, fds: &mut [libc::pollfd], timeout_ms: i32) -> Result<usize, i32> {
        match self {
            Self::Real(bindings) => bindings.poll(fds, timeout_ms),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.poll(fds, timeout_ms),
        }
    }

    fn read(&self, fd: RawFd, buffer: &mut [u8]) -> Result<usize, i32> {
        match self {
            Self::Real(bindings) => bindings.read(fd, buffer),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.read(fd, buffer),
        }
    }

    fn write(&self, fd: RawFd, data: &[u8]) -> Result<usize, i32> {
        match self {
            Self::Real(bindings) => bindings.write(fd, data),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.write(fd, data),
        }
    }

    fn set_nonblocking(&self, fd: RawFd) -> Result<(), i32> {
        match self {
            Self::Real(bindings) => bindings.set_nonblocking(fd),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.set_nonblocking(fd),
        }
    }

    fn close(&self, fd: RawFd) {
        match self {
            Self::Real(bindings) => bindings.close(fd),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.close(fd),
        }
    }
}

impl From<&'static BuildTargetBindings> for BindingsFacade {
    fn from(bindings: &'static BuildTargetBindings) -> Self {
        Self::Real(bindings)
    }
}

#[cfg(test)]
impl From<MockBindings> for BindingsFacade {
    fn from(bindings: MockBindings) -> Self {
        Self::Mock(Rc::new(bindings))
    }
}

impl Debug for BindingsFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(bindings) => bindings.fmt(f),
            #[cfg(test)]
            Self::Mock(bindings) => bindings.fmt(f),
        }
    }
}
