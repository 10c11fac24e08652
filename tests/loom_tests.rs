//! Loom-based concurrency tests for the SPSC ring's memory-ordering
//! protocol (§4.1).
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! `crate::ring::Ring` itself isn't loom-instrumented (it uses
//! `std::sync::atomic`, not `loom::sync::atomic`), so this models the same
//! head/tail/store-release/load-acquire protocol in isolation with a
//! smaller capacity to keep loom's exhaustive search tractable.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicU64, Ordering};
use loom::sync::Arc;
use loom::thread;
use std::cell::UnsafeCell;

struct LoomRing {
    tail: AtomicU64,
    head: AtomicU64,
    buffer: UnsafeCell<[u64; 4]>,
    capacity: u64,
}

unsafe impl Send for LoomRing {}
unsafe impl Sync for LoomRing {}

impl LoomRing {
    fn new() -> Self {
        Self { tail: AtomicU64::new(0), head: AtomicU64::new(0), buffer: UnsafeCell::new([0; 4]), capacity: 4 }
    }

    fn try_send(&self, value: u64) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        if tail.wrapping_sub(head) >= self.capacity - 1 {
            return false;
        }
        let idx = (tail % self.capacity) as usize;
        unsafe {
            (*self.buffer.get())[idx] = value;
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    fn try_recv(&self) -> Option<u64> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let idx = (head % self.capacity) as usize;
        let value = unsafe { (*self.buffer.get())[idx] };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

#[test]
fn loom_ring_fifo_order() {
    loom::model(|| {
        let ring = Arc::new(LoomRing::new());
        let producer_ring = Arc::clone(&ring);

        let producer = thread::spawn(move || {
            producer_ring.try_send(42);
            producer_ring.try_send(43);
        });

        let mut received = Vec::new();
        for _ in 0..10 {
            if let Some(v) = ring.try_recv() {
                received.push(v);
            }
            if received.len() == 2 {
                break;
            }
            loom::thread::yield_now();
        }

        producer.join().unwrap();

        if received.len() >= 2 {
            assert_eq!(received[0], 42);
            assert_eq!(received[1], 43);
        }
    });
}

#[test]
fn loom_ring_never_overruns_capacity() {
    loom::model(|| {
        let ring = Arc::new(LoomRing::new());
        assert!(ring.try_send(1));
        assert!(ring.try_send(2));
        assert!(ring.try_send(3));
        assert!(!ring.try_send(4), "ring must reject the 4th send (capacity 4, one slot reserved)");
    });
}
