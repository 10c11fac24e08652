//! The per-edge SPSC ring (§4.1).
//!
//! Single producer, single consumer. Capacity is a power of two; one slot is
//! always left empty so `head == tail` means empty and occupancy never
//! reaches `capacity`. The only cross-thread synchronization on the fast
//! path is the store-release on `tail` paired with the load-acquire on
//! `tail` from the consumer side; `head` is published back to the producer
//! the same way, in the other direction. Everything else — spinning on a
//! full ring, spinning on a transient empty during a signaled drain — is a
//! liveness concern, not a correctness one, and uses relaxed loads.
//!
//! `head`, `tail`, and the enqueue/dequeue counters each live on their own
//! cache line (`crossbeam_utils::CachePadded`) to avoid false sharing
//! between the producer and consumer threads.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::backoff::Backoff;
use crate::error::{BusError, Result};
use crate::invariants::{debug_assert_enqueue_ge_dequeue, debug_assert_monotonic, debug_assert_ring_occupancy};
use crate::wakeup::WakeupHandle;

/// Fixed header carried by every slot ahead of the payload: size, type,
/// code, subcode — four 8-byte words, matching the wire layout in §6.
pub const HEADER_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub size: u64,
    pub msg_type: u64,
    pub code: u64,
    pub subcode: u64,
}

/// A single directed edge's message queue, owned by its destination module
/// and written to by its source module.
pub struct Ring {
    src: u32,
    dst: u32,
    capacity: usize,
    mask: u64,
    msg_size: usize,
    slot_size: usize,
    tail: CachePadded<AtomicU64>,
    head: CachePadded<AtomicU64>,
    enqueue_count: CachePadded<AtomicU64>,
    dequeue_count: CachePadded<AtomicU64>,
    buffer: UnsafeCell<Box<[u8]>>,
    handle: WakeupHandle,
    closed: AtomicBool,
}

// Safety: `buffer` is only accessed through the slot at `tail` from the
// producer and the slot at `head` from the consumer, which never overlap
// because of the one-slot-empty discipline.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    pub fn new(src: u32, dst: u32, capacity: usize, msg_size: usize) -> Result<Self> {
        let capacity = capacity.next_power_of_two().max(2);
        let slot_size = HEADER_LEN + msg_size;
        let buffer = vec![0u8; slot_size * capacity].into_boxed_slice();
        Ok(Self {
            src,
            dst,
            capacity,
            mask: (capacity - 1) as u64,
            msg_size,
            slot_size,
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            enqueue_count: CachePadded::new(AtomicU64::new(0)),
            dequeue_count: CachePadded::new(AtomicU64::new(0)),
            buffer: UnsafeCell::new(buffer),
            handle: WakeupHandle::new()?,
            closed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn src(&self) -> u32 {
        self.src
    }

    #[inline]
    pub fn dst(&self) -> u32 {
        self.dst
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn msg_size(&self) -> usize {
        self.msg_size
    }

    #[inline]
    pub fn handle(&self) -> &WakeupHandle {
        &self.handle
    }

    #[inline]
    pub fn enqueue_counter(&self) -> u64 {
        self.enqueue_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dequeue_counter(&self) -> u64 {
        self.dequeue_count.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.handle.close();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn slot_ptr(&self, index: u64) -> *mut u8 {
        let buf = self.buffer.get();
        let offset = (index & self.mask) as usize * self.slot_size;
        unsafe { (*buf).as_mut_ptr().add(offset) }
    }

    /// Attempts to enqueue one message. Returns `Ok(false)` if the ring is
    /// full (used by the try-send path); the blocking send path spins on
    /// this with a `Backoff`. Signals the ring's wakeup handle by one on
    /// success, folding §4.5 step 3 into this call.
    pub fn try_send(&self, msg_type: u64, code: u64, subcode: u64, payload: &[u8]) -> Result<bool> {
        if payload.len() > self.msg_size {
            return Err(BusError::PayloadTooLarge { size: payload.len(), max: self.msg_size });
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        let occupied = tail.wrapping_sub(head);
        debug_assert_ring_occupancy!(occupied, self.capacity as u64);
        if occupied as usize >= self.capacity - 1 {
            return Ok(false);
        }

        let header = Header { size: payload.len() as u64, msg_type, code, subcode };
        unsafe {
            let slot = self.slot_ptr(tail);
            write_header(slot, &header);
            std::ptr::copy_nonoverlapping(payload.as_ptr(), slot.add(HEADER_LEN), payload.len());
        }

        let new_tail = tail.wrapping_add(1);
        debug_assert_monotonic!("tail", tail, new_tail);
        self.tail.store(new_tail, Ordering::Release);
        self.enqueue_count.fetch_add(1, Ordering::Relaxed);
        self.handle.signal(1)?;
        Ok(true)
    }

    /// Blocking send: spins with adaptive backoff until the ring accepts the
    /// message.
    pub fn send_blocking(&self, msg_type: u64, code: u64, subcode: u64, payload: &[u8]) -> Result<()> {
        let mut backoff = Backoff::new();
        loop {
            if self.try_send(msg_type, code, subcode, payload)? {
                return Ok(());
            }
            backoff.snooze();
        }
    }

    /// Attempts to dequeue one message into `out`, returning the header and
    /// the number of payload bytes copied. Returns `Ok(None)` if the ring is
    /// genuinely empty.
    pub fn try_recv(&self, out: &mut [u8]) -> Result<Option<(Header, usize)>> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return Ok(None);
        }

        let (header, len) = unsafe {
            let slot = self.slot_ptr(head);
            let header = read_header(slot);
            let len = (header.size as usize).min(out.len());
            std::ptr::copy_nonoverlapping(slot.add(HEADER_LEN), out.as_mut_ptr(), len);
            (header, len)
        };

        let new_head = head.wrapping_add(1);
        debug_assert_monotonic!("head", head, new_head);
        self.head.store(new_head, Ordering::Release);
        let dequeue_count = self.dequeue_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug_assert_enqueue_ge_dequeue!(self.enqueue_count.load(Ordering::Relaxed), dequeue_count);
        Ok(Some((header, len)))
    }

    /// Dequeues, spinning briefly if the ring momentarily looks empty. Used
    /// by the recv drain loop (§4.6) which only calls this when the wakeup
    /// handle's count guarantees a message is forthcoming.
    pub fn recv_blocking(&self, out: &mut [u8]) -> Result<(Header, usize)> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(result) = self.try_recv(out)? {
                return Ok(result);
            }
            backoff.snooze();
        }
    }
}

unsafe fn write_header(slot: *mut u8, header: &Header) {
    std::ptr::copy_nonoverlapping(header.size.to_ne_bytes().as_ptr(), slot, 8);
    std::ptr::copy_nonoverlapping(header.msg_type.to_ne_bytes().as_ptr(), slot.add(8), 8);
    std::ptr::copy_nonoverlapping(header.code.to_ne_bytes().as_ptr(), slot.add(16), 8);
    std::ptr::copy_nonoverlapping(header.subcode.to_ne_bytes().as_ptr(), slot.add(24), 8);
}

unsafe fn read_header(slot: *const u8) -> Header {
    let mut buf = [0u8; 8];
    std::ptr::copy_nonoverlapping(slot, buf.as_mut_ptr(), 8);
    let size = u64::from_ne_bytes(buf);
    std::ptr::copy_nonoverlapping(slot.add(8), buf.as_mut_ptr(), 8);
    let msg_type = u64::from_ne_bytes(buf);
    std::ptr::copy_nonoverlapping(slot.add(16), buf.as_mut_ptr(), 8);
    let code = u64::from_ne_bytes(buf);
    std::ptr::copy_nonoverlapping(slot.add(24), buf.as_mut_ptr(), 8);
    let subcode = u64::from_ne_bytes(buf);
    Header { size, msg_type, code, subcode }
}
