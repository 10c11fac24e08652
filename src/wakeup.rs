//! Kernel-provided counting event used both as a per-ring producer→consumer
//! signal and as a module's control-plane wakeup (§4.2).

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

/// A Linux `eventfd`-backed counting event: `signal(n)` adds `n` to an
/// internal 64-bit counter; `wait_and_reset()` blocks until the counter is
/// positive, then atomically reads and resets it to zero. Both operations are
/// async-signal-safe kernel primitives, not userspace locks.
#[derive(Debug)]
pub struct WakeupHandle {
    fd: RawFd,
    closed: AtomicBool,
}

impl WakeupHandle {
    pub fn new() -> io::Result<Self> {
        // EFD_CLOEXEC avoids leaking the fd across exec; blocking by default
        // since `wait_and_reset` is only called after a selector has already
        // reported readiness (or directly, for the uncontested fast path).
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd, closed: AtomicBool::new(false) })
    }

    #[inline]
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Increments the counter by `n`. Never blocks in practice (the counter
    /// would have to reach `u64::MAX` to block, which cannot happen at any
    /// sustainable enqueue rate).
    pub fn signal(&self, n: u64) -> io::Result<()> {
        let buf = n.to_ne_bytes();
        let rc = unsafe { libc::write(self.fd, buf.as_ptr().cast(), buf.len()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks until the counter is positive, then returns it and resets the
    /// counter to zero. Level-triggered: if the counter is already positive
    /// when called, returns immediately.
    pub fn wait_and_reset(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        loop {
            let rc = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            return Ok(u64::from_ne_bytes(buf));
        }
    }

    /// Non-blocking peek-and-reset, used by the control-plane handle which
    /// must never stall the recv loop (§4.6 step 2a).
    pub fn try_reset(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        let rc = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(u64::from_ne_bytes(buf))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Drop for WakeupHandle {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

// Safety: the fd is only ever accessed through syscalls that are safe to
// invoke concurrently from multiple threads (write/read on an eventfd are
// independently atomic at the kernel level).
unsafe impl Send for WakeupHandle {}
unsafe impl Sync for WakeupHandle {}
