//! Per-module slot state (§3) and the readiness multiplexer each module
//! owns over its inbound rings plus its control-plane handle (§4.2).

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::RwLock;

use arc_swap::ArcSwapOption;

use crate::maskset::ModSet;
use crate::ring::Ring;
use crate::selector::{new_selector, ReadinessSet};
use crate::wakeup::WakeupHandle;
use crate::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Invalid = 0,
    Registered = 1,
    Modifying = 2,
}

impl Status {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Status::Registered,
            2 => Status::Modifying,
            _ => Status::Invalid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Provenance {
    pub file: &'static str,
    pub function: &'static str,
    pub line: u32,
}

/// A module's readiness multiplexer: the set of wakeup handles its consumer
/// blocks on (one per inbound ring, plus the control-plane handle), kept in
/// sync with the ring table by `add`/`remove`.
///
/// No lock is held across the blocking `wait()` call. The original holds
/// none across `epoll_wait` either (`fastq.c`) and relies on `epoll_ctl`
/// being safe to call concurrently with a thread blocked in `epoll_wait` on
/// the same epoll fd; `EpollSet`/`PollSet` preserve that property
/// (`PollSet` takes its own lock only to snapshot the fd list, never across
/// the `poll()` syscall itself). Wrapping `wait()` in a lock here would
/// starve any `add`/`remove` on a module whose consumer is idle-blocked —
/// exactly the `create`/`add_set`/`delete` vs. a running consumer deadlock
/// this type exists to avoid.
pub struct Multiplexer {
    selector: Box<dyn ReadinessSet>,
}

impl Multiplexer {
    fn new(config: &Config) -> std::io::Result<Self> {
        Ok(Self { selector: new_selector(config.selector)? })
    }

    pub fn add(&self, handle: &WakeupHandle) -> std::io::Result<()> {
        self.selector.register(handle.as_raw_fd())
    }

    pub fn remove(&self, handle: &WakeupHandle) -> std::io::Result<()> {
        self.selector.deregister(handle.as_raw_fd())
    }

    /// Blocks until at least one registered handle is ready.
    pub fn wait(&self, ready: &mut Vec<std::os::unix::io::RawFd>) -> std::io::Result<()> {
        self.selector.wait(ready)
    }
}

/// One module's full state. Index `i` in a `Bus`'s slot table corresponds to
/// module id `i`; id 0 is the reserved "temporary source".
pub struct ModuleSlot {
    pub id: u32,
    status: AtomicU8,
    pub name: RwLock<Option<String>>,
    pub rx_mask: RwLock<ModSet>,
    pub tx_mask: RwLock<ModSet>,
    /// `rings[peer]` is the ring for the edge `(peer -> self.id)`, i.e. this
    /// module's inbound row of the ring-pointer matrix. Reference-counted
    /// and atomically swappable so a producer holding a just-loaded `Arc`
    /// keeps a valid ring even if this module concurrently clears the slot
    /// on delete (§5 teardown-safety conformance option).
    pub rings: Vec<ArcSwapOption<Ring>>,
    pub control_handle: WakeupHandle,
    pub multiplexer: Multiplexer,
    pub provenance: RwLock<Option<Provenance>>,
    /// Written once by `Bus::create` before the `Registered` status is
    /// published; readers always check status first, so the status store's
    /// release ordering makes these visible without their own lock.
    ring_capacity: AtomicUsize,
    msg_size: AtomicUsize,
}

impl ModuleSlot {
    pub fn new_invalid(id: u32, config: &Config) -> std::io::Result<Self> {
        let width = config.module_id_max as usize + 1;
        Ok(Self {
            id,
            status: AtomicU8::new(Status::Invalid as u8),
            name: RwLock::new(None),
            rx_mask: RwLock::new(ModSet::new(config.module_id_max)),
            tx_mask: RwLock::new(ModSet::new(config.module_id_max)),
            rings: (0..width).map(|_| ArcSwapOption::from(None)).collect(),
            control_handle: WakeupHandle::new()?,
            multiplexer: Multiplexer::new(config)?,
            provenance: RwLock::new(None),
            ring_capacity: AtomicUsize::new(config.effective_ring_capacity()),
            msg_size: AtomicUsize::new(config.default_msg_size),
        })
    }

    pub fn ring_capacity(&self) -> usize {
        self.ring_capacity.load(Ordering::Relaxed)
    }

    pub fn msg_size(&self) -> usize {
        self.msg_size.load(Ordering::Relaxed)
    }

    pub fn set_ring_capacity(&self, capacity: usize) {
        self.ring_capacity.store(capacity.next_power_of_two().max(2), Ordering::Relaxed);
    }

    pub fn set_msg_size(&self, msg_size: usize) {
        self.msg_size.store(msg_size, Ordering::Relaxed);
    }

    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_registered(&self) -> bool {
        self.status() != Status::Invalid
    }

    /// Registered -> Invalid never happens in place; `set_status` is used for
    /// Invalid<->Registered<->Modifying transitions.
    pub fn set_status(&self, status: Status) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Compare-and-set from `Registered` to `Modifying`, spinning briefly;
    /// used by `add-set` to serialize against a concurrent `delete`.
    pub fn begin_modifying(&self) -> bool {
        self.status
            .compare_exchange(Status::Registered as u8, Status::Modifying as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn ring_from(&self, peer: u32) -> Option<std::sync::Arc<Ring>> {
        self.rings[peer as usize].load_full()
    }
}
