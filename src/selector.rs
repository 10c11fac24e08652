//! Readiness multiplexer backends (§4.2).
//!
//! Two implementations of the same small interface are compiled in
//! unconditionally; [`crate::config::SelectorPolicy`] picks which one a given
//! [`crate::Bus`] instantiates. The `selector-epoll` / `selector-poll` Cargo
//! features only change [`crate::config::SelectorPolicy::default`] — they do
//! not remove the other backend — so tests can force either one without
//! recompiling, mirroring the original's compile-time `_FASTQ_EPOLL` /
//! `_FASTQ_SELECT` split while staying testable.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Mutex;

use crate::config::SelectorPolicy;

/// A set of file descriptors a consumer blocks on, reporting which are
/// readable. Level-triggered: an fd signaled but not drained is reported
/// again on the next `wait`.
pub trait ReadinessSet: Send + Sync {
    fn register(&self, fd: RawFd) -> io::Result<()>;
    fn deregister(&self, fd: RawFd) -> io::Result<()>;
    /// Blocks until at least one registered fd is readable, appending the
    /// ready fds to `ready` (cleared first).
    fn wait(&self, ready: &mut Vec<RawFd>) -> io::Result<()>;
}

pub fn new_selector(policy: SelectorPolicy) -> io::Result<Box<dyn ReadinessSet>> {
    match policy {
        SelectorPolicy::Epoll => Ok(Box::new(EpollSet::new()?)),
        SelectorPolicy::Poll => Ok(Box::new(PollSet::new())),
    }
}

/// Reactor-style backend, O(1) per wake.
pub struct EpollSet {
    epfd: RawFd,
}

impl EpollSet {
    pub fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { epfd })
    }
}

impl ReadinessSet for EpollSet {
    fn register(&self, fd: RawFd) -> io::Result<()> {
        let mut ev = libc::epoll_event { events: libc::EPOLLIN as u32, u64: fd as u64 };
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn wait(&self, ready: &mut Vec<RawFd>) -> io::Result<()> {
        ready.clear();
        let mut events: [libc::epoll_event; 64] = unsafe { std::mem::zeroed() };
        loop {
            let n = unsafe { libc::epoll_wait(self.epfd, events.as_mut_ptr(), events.len() as i32, -1) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            for ev in &events[..n as usize] {
                ready.push(ev.u64 as RawFd);
            }
            return Ok(());
        }
    }
}

impl Drop for EpollSet {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

/// Portable polling-set backend, O(N) in set size per wake.
pub struct PollSet {
    fds: Mutex<Vec<RawFd>>,
}

impl PollSet {
    pub fn new() -> Self {
        Self { fds: Mutex::new(Vec::new()) }
    }
}

impl Default for PollSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessSet for PollSet {
    fn register(&self, fd: RawFd) -> io::Result<()> {
        self.fds.lock().unwrap().push(fd);
        Ok(())
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.fds.lock().unwrap().retain(|&f| f != fd);
        Ok(())
    }

    fn wait(&self, ready: &mut Vec<RawFd>) -> io::Result<()> {
        ready.clear();
        let snapshot = self.fds.lock().unwrap().clone();
        if snapshot.is_empty() {
            // Nothing registered yet; briefly yield to the scheduler rather
            // than spin-waiting on an empty pollfd array (poll(2) with
            // nfds=0 just sleeps for the timeout, which serves the same
            // purpose here since the control-plane handle's registration
            // wakes us via a fresh call).
            std::thread::yield_now();
            return Ok(());
        }
        let mut pollfds: Vec<libc::pollfd> =
            snapshot.iter().map(|&fd| libc::pollfd { fd, events: libc::POLLIN, revents: 0 }).collect();
        loop {
            let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, -1) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            for pfd in &pollfds {
                if pfd.revents & libc::POLLIN != 0 {
                    ready.push(pfd.fd);
                }
            }
            return Ok(());
        }
    }
}
