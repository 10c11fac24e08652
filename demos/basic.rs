//! Minimal two-module demo: a producer module sends tagged counters to a
//! named consumer module, which prints what it receives until told to stop.

use std::thread;

use fastbus_rs::{Bus, Config};
use tracing_subscriber::EnvFilter;

const PRODUCER: u32 = 1;
const CONSUMER: u32 = 2;
const MESSAGE_COUNT: u64 = 20;

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let bus = Bus::new(Config::default()).unwrap();
    bus.create(CONSUMER, &[PRODUCER], &[], None, None, file!(), "main", line!()).unwrap();
    bus.create(PRODUCER, &[], &[CONSUMER], None, None, file!(), "main", line!()).unwrap();
    bus.attach_name(CONSUMER, "consumer").unwrap();

    let producer = {
        let bus = bus.clone();
        thread::spawn(move || {
            for i in 0..MESSAGE_COUNT {
                bus.send(PRODUCER, CONSUMER, i, 0, 0, &i.to_ne_bytes()).unwrap();
            }
        })
    };

    let mut received = 0u64;
    let recv_bus = bus.clone();
    bus.recv_by_name("consumer", move |src, _dst, header, payload| {
        let value = u64::from_ne_bytes(payload.try_into().unwrap());
        println!("from {src}: tag={} value={value}", header.msg_type);
        received += 1;
        if received == MESSAGE_COUNT {
            recv_bus.delete(CONSUMER).unwrap();
        }
    })
    .unwrap();

    producer.join().unwrap();
}
