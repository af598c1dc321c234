use std::fmt::Debug;
use std::os::fd::RawFd;

/// Bindings for the operating system calls made by the poll loop.
///
/// All of these calls must go through this trait, enabling them to be mocked. Failures are
/// reported as the positive `errno` value of the failed call.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Bindings: Debug + 'static {
    /// Waits until one of `fds` is ready or `timeout_ms` passes (negative waits forever).
    /// Returns the number of descriptors with non-zero `revents`.
    fn poll(&self, fds: &mut [libc::pollfd], timeout_ms: i32) -> Result<usize, i32>;

    fn read(&self, fd: RawFd, buffer: &mut [u8]) -> Result<usize, i32>;

    fn write(&self, fd: RawFd, data: &[u8]) -> Result<usize, i32>;

    fn set_nonblocking(&self, fd: RawFd) -> Result<(), i32>;

    fn close(&self, fd: RawFd);
}
