//! A low-latency intra-process message bus over lock-free SPSC ring buffers.
//!
//! Modules are identified by a dense integer id in `[1, module_id_max]` and
//! optionally by a case-insensitive name. Declaring or discovering an edge
//! between two modules allocates one single-producer/single-consumer ring,
//! owned by the destination, which the source writes to without ever
//! blocking the consumer and the consumer drains by waiting on a readiness
//! multiplexer over all of its inbound rings plus a control-plane wakeup.
//!
//! ```no_run
//! use fastbus_rs::{Bus, Config};
//!
//! let bus = Bus::new(Config::default()).unwrap();
//! bus.create(1, &[], &[], None, None, file!(), "main", line!()).unwrap();
//! bus.create(2, &[1], &[], None, None, file!(), "main", line!()).unwrap();
//! bus.send(2, 1, 0, 0, 0, b"hello").unwrap();
//! ```

mod backoff;
mod config;
mod directory;
mod error;
mod invariants;
mod maskset;
mod module;
mod registry;
mod ring;
mod selector;
mod stats;
mod wakeup;

pub use config::{Config, SelectorPolicy};
pub use error::{BusError, Result};
pub use registry::Bus;
pub use ring::Header;
pub use stats::RingStat;

/// Identifier reserved for producers that send before formally registering
/// (§3: "temporary source"). Using it authorizes exactly the lazily-created
/// edge `(0 -> dst)` on first send.
pub const TEMPORARY_SOURCE: u32 = 0;
