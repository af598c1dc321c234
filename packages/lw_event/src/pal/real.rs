use std::io;
use std::os::fd::RawFd;

use tracing::warn;

use crate::pal::Bindings;

/// Bindings that call into the operating system the build is targeting.
///
/// You would only use different bindings in unit tests that need to use mock bindings. Even
/// then, whenever possible, tests should use real bindings for maximum realism.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetBindings;

impl Bindings for BuildTargetBindings {
    fn poll(&self, fds: &mut [libc::pollfd], timeout_ms: i32) -> Result<usize, i32> {
        let count = libc::nfds_t::try_from(fds.len())
            .expect("more descriptors than poll() accepts - impossible with real handle counts");

        // SAFETY: The pointer and count describe a slice we exclusively borrow for the call.
        let result = unsafe { libc::poll(fds.as_mut_ptr(), count, timeout_ms) };

        usize::try_from(result).map_err(|_| last_errno())
    }

    fn read(&self, fd: RawFd, buffer: &mut [u8]) -> Result<usize, i32> {
        // SAFETY: The pointer and length describe a slice we exclusively borrow for the call.
        // Any descriptor value is acceptable; an invalid one fails with EBADF.
        let result = unsafe { libc::read(fd, buffer.as_mut_ptr().cast(), buffer.len()) };

        usize::try_from(result).map_err(|_| last_errno())
    }

    fn write(&self, fd: RawFd, data: &[u8]) -> Result<usize, i32> {
        // SAFETY: The pointer and length describe a slice we borrow for the call.
        // Any descriptor value is acceptable; an invalid one fails with EBADF.
        let result = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };

        usize::try_from(result).map_err(|_| last_errno())
    }

    fn set_nonblocking(&self, fd: RawFd) -> Result<(), i32> {
        // SAFETY: F_GETFL takes no further arguments. No other safety requirements.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };

        if flags < 0 {
            return Err(last_errno());
        }

        // SAFETY: F_SETFL takes the new flags as its only argument. No other safety requirements.
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };

        if result < 0 {
            return Err(last_errno());
        }

        Ok(())
    }

    fn close(&self, fd: RawFd) {
        // SAFETY: The caller owns the descriptor and never uses it after this call.
        let result = unsafe { libc::close(fd) };

        if result < 0 {
            // The descriptor is released even if close() reports a failure, nothing to retry.
            warn!(fd, errno = last_errno(), "closing file descriptor failed");
        }
    }
}

fn last_errno() -> i32 {
    io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}
