//! End-to-end scenarios against a live `Bus` with real OS threads,
//! corresponding to the concrete scenarios in `SPEC_FULL.md` §8.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use fastbus_rs::{Bus, Config};

fn small_bus() -> Arc<Bus> {
    Bus::new(Config::default().with_module_id_max(16).with_ring_capacity(1024)).unwrap()
}

#[test]
fn multi_producer_fan_in_delivers_every_message() {
    let bus = small_bus();
    bus.create(1, &[2, 3], &[], None, None, file!(), "consumer", line!()).unwrap();
    bus.create(2, &[], &[1], None, None, file!(), "producer", line!()).unwrap();
    bus.create(3, &[], &[1], None, None, file!(), "producer", line!()).unwrap();

    const N: u64 = 50_000;
    let received = Arc::new(AtomicU64::new(0));
    let last_from_2 = Arc::new(Mutex::new(-1i64));
    let last_from_3 = Arc::new(Mutex::new(-1i64));

    let consumer = {
        let bus = bus.clone();
        let received = received.clone();
        let last_from_2 = last_from_2.clone();
        let last_from_3 = last_from_3.clone();
        thread::spawn(move || {
            let delete_bus = bus.clone();
            bus.recv(1, move |src, _dst, header, _payload| {
                let seq = header.msg_type as i64;
                let last = if src == 2 { &last_from_2 } else { &last_from_3 };
                let mut guard = last.lock().unwrap();
                assert!(seq > *guard, "FIFO violated on edge {src} -> 1");
                *guard = seq;
                if received.fetch_add(1, Ordering::Relaxed) + 1 == 2 * N {
                    delete_bus.delete(1).unwrap();
                }
            })
            .unwrap();
        })
    };

    let producer = |id: u32| {
        let bus = bus.clone();
        thread::spawn(move || {
            for i in 0..N {
                bus.send(id, 1, i, 0, 0, &i.to_ne_bytes()).unwrap();
            }
        })
    };
    let p2 = producer(2);
    let p3 = producer(3);

    p2.join().unwrap();
    p3.join().unwrap();
    consumer.join().unwrap();

    assert_eq!(received.load(Ordering::Relaxed), 2 * N);
}

#[test]
fn self_send_is_lazily_wired() {
    let bus = small_bus();
    bus.create(1, &[], &[], None, None, file!(), "t", line!()).unwrap();
    bus.send(1, 1, 99, 0, 0, b"loopback").unwrap();

    let got = Arc::new(Mutex::new(None));
    {
        let got = got.clone();
        let bus2 = bus.clone();
        bus.recv(1, move |src, dst, header, payload| {
            *got.lock().unwrap() = Some((src, dst, header.msg_type, payload.to_vec()));
            bus2.delete(1).unwrap();
        })
        .unwrap();
    }

    let (src, dst, msg_type, payload) = got.lock().unwrap().take().unwrap();
    assert_eq!((src, dst, msg_type), (1, 1, 99));
    assert_eq!(payload, b"loopback");
}

#[test]
fn try_send_backpressure_leaves_exactly_one_slot_reserved() {
    let bus = small_bus();
    bus.create(1, &[2], &[], Some(8), None, file!(), "t", line!()).unwrap();
    bus.create(2, &[], &[1], Some(8), None, file!(), "t", line!()).unwrap();

    let mut successes = 0;
    for _ in 0..16 {
        if bus.try_send(2, 1, 0, 0, 0, b"x").unwrap() {
            successes += 1;
        } else {
            break;
        }
    }
    assert_eq!(successes, 7);
}

#[test]
fn by_name_send_to_unknown_recipient_fails_cleanly() {
    let bus = small_bus();
    bus.create(1, &[], &[], None, None, file!(), "t", line!()).unwrap();
    let (enqueue_before, _, _) = bus.msg_count(1).unwrap();
    let err = bus.try_send_by_name(1, "nobody", 0, 0, 0, b"x").unwrap_err();
    assert!(matches!(err, fastbus_rs::BusError::NameNotFound { .. }));
    let (enqueue_after, _, _) = bus.msg_count(1).unwrap();
    assert_eq!(enqueue_before, enqueue_after);
}

#[test]
fn dynamic_topology_churn_does_not_panic_the_consumer() {
    let bus = small_bus();
    bus.create(1, &[2, 3, 4], &[], None, None, file!(), "consumer", line!()).unwrap();
    for id in [2u32, 3, 4] {
        bus.create(id, &[], &[1], None, None, file!(), "producer", line!()).unwrap();
    }

    let consumer = {
        let bus = bus.clone();
        thread::spawn(move || {
            let _ = bus.recv(1, |_src, _dst, _h, _p| {});
        })
    };

    for id in [2u32, 3, 4] {
        let _ = bus.try_send(id, 1, 0, 0, 0, b"before-churn");
    }
    for id in [2u32, 3, 4] {
        bus.delete(id).unwrap();
    }
    for id in [2u32, 3, 4] {
        bus.create(id, &[], &[1], None, None, file!(), "producer", line!()).unwrap();
        assert!(bus.try_send(id, 1, 0, 0, 0, b"after-churn").unwrap());
    }

    bus.delete(1).unwrap();
    consumer.join().unwrap();
}

#[test]
fn capacity_rounds_to_next_power_of_two() {
    let bus = small_bus();
    bus.create(1, &[2], &[], Some(5), None, file!(), "t", line!()).unwrap();
    bus.create(2, &[], &[1], Some(5), None, file!(), "t", line!()).unwrap();
    let mut successes = 0;
    while bus.try_send(2, 1, 0, 0, 0, b"x").unwrap() {
        successes += 1;
    }
    assert_eq!(successes, 7);
}
