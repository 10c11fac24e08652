//! The module registry: `Bus`, the process-wide (or test-scoped) value that
//! owns every module slot, the name directory, and the global handle→ring
//! lookup table (§3, §4.3). Modeled as an explicit value per the
//! re-architecture guidance in `SPEC_FULL.md` §9 rather than an unsafe
//! global — construct one with `Bus::new` and share it behind an `Arc`
//! across producer/consumer threads.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::{Arc, RwLock};

use crate::directory::NameDirectory;
use crate::error::{BusError, Result};
use crate::invariants::debug_assert_id_in_range;
use crate::maskset::ModSet;
use crate::module::{ModuleSlot, Provenance, Status};
use crate::ring::{Header, Ring};
use crate::stats::RingStat;
use crate::Config;

pub struct Bus {
    config: Config,
    slots: Vec<ModuleSlot>,
    directory: NameDirectory,
    handle_table: RwLock<HashMap<RawFd, Arc<Ring>>>,
}

impl Bus {
    pub fn new(config: Config) -> std::io::Result<Arc<Self>> {
        let width = config.module_id_max as usize + 1;
        let mut slots = Vec::with_capacity(width);
        for id in 0..width as u32 {
            slots.push(ModuleSlot::new_invalid(id, &config)?);
        }
        tracing::info!(module_id_max = config.module_id_max, "bus initialized");
        Ok(Arc::new(Self { config, slots, directory: NameDirectory::new(), handle_table: RwLock::new(HashMap::new()) }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn validate_id(&self, id: u32) -> Result<()> {
        if id == 0 || id > self.config.module_id_max {
            return Err(BusError::IdOutOfRange { id, max: self.config.module_id_max });
        }
        Ok(())
    }

    fn slot(&self, id: u32) -> &ModuleSlot {
        &self.slots[id as usize]
    }

    fn registered_slot(&self, id: u32) -> Result<&ModuleSlot> {
        self.validate_id(id)?;
        let slot = self.slot(id);
        if !slot.is_registered() {
            return Err(BusError::NotRegistered { id });
        }
        Ok(slot)
    }

    fn create_ring(&self, src: u32, dst: u32) -> Result<Arc<Ring>> {
        let dst_slot = self.slot(dst);
        if let Some(existing) = dst_slot.ring_from(src) {
            return Ok(existing);
        }
        let ring = Arc::new(Ring::new(src, dst, dst_slot.ring_capacity(), dst_slot.msg_size())?);
        dst_slot.multiplexer.add(ring.handle())?;
        self.handle_table.write().unwrap().insert(ring.handle().as_raw_fd(), ring.clone());
        dst_slot.rings[src as usize].store(Some(ring.clone()));
        tracing::info!(src, dst, capacity = ring.capacity(), msg_size = ring.msg_size(), "ring created");
        Ok(ring)
    }

    fn destroy_ring(&self, src: u32, dst: u32) {
        let dst_slot = self.slot(dst);
        if let Some(ring) = dst_slot.rings[src as usize].swap(None) {
            ring.close();
            let _ = dst_slot.multiplexer.remove(ring.handle());
            self.handle_table.write().unwrap().remove(&ring.handle().as_raw_fd());
            tracing::info!(src, dst, "ring destroyed");
        }
    }

    /// Registers module `id` with the given receive/transmit peer sets,
    /// wiring rings to every already-registered peer those sets authorize.
    /// A double registration is a programming error and aborts the process
    /// (§7 precondition violation), matching the external contract; the
    /// `Result` this returns covers the conditions §7 calls recoverable in
    /// a hosted test environment — see `DESIGN.md` for that split.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        id: u32,
        rx_peers: &[u32],
        tx_peers: &[u32],
        capacity: Option<usize>,
        msg_size: Option<usize>,
        file: &'static str,
        function: &'static str,
        line: u32,
    ) -> Result<()> {
        self.validate_id(id)?;
        let slot = self.slot(id);
        assert!(!slot.is_registered(), "module {id} is already registered (double create is a programming error)");

        if let Some(cap) = capacity {
            slot.set_ring_capacity(cap);
        }
        if let Some(size) = msg_size {
            slot.set_msg_size(size);
        }
        *slot.provenance.write().unwrap() = Some(Provenance { file, function, line });

        let mut rx_mask = ModSet::new(self.config.module_id_max);
        for &p in rx_peers {
            rx_mask.set(p);
        }
        let mut tx_mask = ModSet::new(self.config.module_id_max);
        for &p in tx_peers {
            tx_mask.set(p);
        }

        // Inbound: peers authorized to send to `id`, either because `id`
        // declared them in rxMask or because they had already declared
        // `id` in their own txMask.
        for peer in 1..=self.config.module_id_max {
            if peer == id {
                continue; // self-edges are created lazily on first send (§4.3)
            }
            let peer_slot = self.slot(peer);
            if !peer_slot.is_registered() {
                continue;
            }
            let peer_wants_to_send = peer_slot.tx_mask.read().unwrap().is_set(id);
            if rx_mask.is_set(peer) || peer_wants_to_send {
                self.create_ring(peer, id)?;
                rx_mask.set(peer);
                peer_slot.tx_mask.write().unwrap().set(id);
            }
        }
        if rx_mask.is_set(0) {
            self.create_ring(0, id)?;
        }

        // Outbound: peers `id` is authorized to send to.
        for peer in 1..=self.config.module_id_max {
            if peer == id {
                continue;
            }
            let peer_slot = self.slot(peer);
            if !peer_slot.is_registered() {
                continue;
            }
            let peer_wants_to_receive = peer_slot.rx_mask.read().unwrap().is_set(id);
            if tx_mask.is_set(peer) || peer_wants_to_receive {
                self.create_ring(id, peer)?;
                tx_mask.set(peer);
                peer_slot.rx_mask.write().unwrap().set(id);
                // A newly appeared inbound edge means peer's multiplexer set
                // changed; wake its consumer so it re-reads the set (§4.3).
                let _ = peer_slot.control_handle.signal(1);
            }
        }

        *slot.rx_mask.write().unwrap() = rx_mask;
        *slot.tx_mask.write().unwrap() = tx_mask;
        slot.multiplexer.add(&slot.control_handle)?;
        slot.set_status(Status::Registered);
        tracing::info!(id, file, function, line, "module registered");
        Ok(())
    }

    pub fn attach_name(&self, id: u32, name: &str) -> Result<()> {
        let slot = self.registered_slot(id)?;
        {
            let existing = slot.name.read().unwrap();
            if existing.is_some() {
                return Err(BusError::AlreadyNamed { id });
            }
        }
        self.directory.register(name, id)?;
        *slot.name.write().unwrap() = Some(name.to_string());
        tracing::debug!(id, name, "name attached");
        Ok(())
    }

    /// Extends `id`'s rx/tx masks with the given peer deltas, creating any
    /// rings the new permissions authorize. A no-op delta creates no rings
    /// and leaves existing counters untouched (§8 idempotence property).
    pub fn add_set(&self, id: u32, rx_delta: &[u32], tx_delta: &[u32]) -> Result<()> {
        let slot = self.registered_slot(id)?;
        let mut backoff = crate::backoff::Backoff::new();
        while !slot.begin_modifying() {
            backoff.snooze();
        }

        let result = (|| -> Result<()> {
            for &peer in rx_delta {
                if peer == id {
                    continue;
                }
                let already = slot.rx_mask.read().unwrap().is_set(peer);
                if already {
                    continue;
                }
                if peer != 0 && !self.slot(peer).is_registered() {
                    slot.rx_mask.write().unwrap().set(peer);
                    continue;
                }
                self.create_ring(peer, id)?;
                slot.rx_mask.write().unwrap().set(peer);
                if peer != 0 {
                    self.slot(peer).tx_mask.write().unwrap().set(id);
                }
            }
            for &peer in tx_delta {
                if peer == id {
                    continue;
                }
                let already = slot.tx_mask.read().unwrap().is_set(peer);
                if already {
                    continue;
                }
                if !self.slot(peer).is_registered() {
                    slot.tx_mask.write().unwrap().set(peer);
                    continue;
                }
                self.create_ring(id, peer)?;
                slot.tx_mask.write().unwrap().set(peer);
                self.slot(peer).rx_mask.write().unwrap().set(id);
                let _ = self.slot(peer).control_handle.signal(1);
            }
            Ok(())
        })();

        slot.set_status(Status::Registered);
        result
    }

    /// Idempotent on an already-absent module: deleting an id that was
    /// never created, or was already deleted, succeeds without effect
    /// (§6 external interface table).
    pub fn delete(&self, id: u32) -> Result<bool> {
        self.validate_id(id)?;
        let slot = self.slot(id);
        if !slot.is_registered() {
            return Ok(true);
        }
        slot.set_status(Status::Modifying);

        for peer in 0..=self.config.module_id_max {
            self.destroy_ring(peer, id);
            if peer != id {
                self.destroy_ring(id, peer);
            }
        }
        slot.rx_mask.write().unwrap().zero();
        slot.tx_mask.write().unwrap().zero();
        if let Some(name) = slot.name.write().unwrap().take() {
            self.directory.unregister(&name);
        }
        *slot.provenance.write().unwrap() = None;
        let _ = slot.multiplexer.remove(&slot.control_handle);
        slot.control_handle.close();
        // Final wakeup so a blocked recv loop observes the close and exits
        // its outer wait rather than blocking forever (§4.6 step 1).
        let _ = slot.control_handle.signal(1);
        slot.set_status(Status::Invalid);
        tracing::info!(id, "module deleted");
        Ok(true)
    }

    fn resolve_target(&self, from: u32, to: u32) -> Result<Arc<Ring>> {
        self.validate_id(from).or_else(|_| if from == 0 { Ok(()) } else { Err(BusError::IdOutOfRange { id: from, max: self.config.module_id_max }) })?;
        let dst_slot = self.registered_slot(to)?;
        if let Some(ring) = dst_slot.ring_from(from) {
            return Ok(ring);
        }
        // Lazy edge creation (§4.5 step 1): covers both the temporary-source
        // (id 0) and self-edge (from == to) cases, and any legitimate edge
        // not declared at create time.
        let ring = self.create_ring(from, to)?;
        if from != 0 && from != to {
            if let Ok(src_slot) = self.registered_slot(from) {
                src_slot.tx_mask.write().unwrap().set(to);
            }
            dst_slot.rx_mask.write().unwrap().set(from);
        }
        let _ = dst_slot.control_handle.signal(1);
        Ok(ring)
    }

    pub fn try_send(&self, from: u32, to: u32, msg_type: u64, code: u64, subcode: u64, payload: &[u8]) -> Result<bool> {
        let ring = self.resolve_target(from, to)?;
        ring.try_send(msg_type, code, subcode, payload)
    }

    pub fn send(&self, from: u32, to: u32, msg_type: u64, code: u64, subcode: u64, payload: &[u8]) -> Result<()> {
        let ring = self.resolve_target(from, to)?;
        ring.send_blocking(msg_type, code, subcode, payload)
    }

    pub fn try_send_by_name(&self, from: u32, to_name: &str, msg_type: u64, code: u64, subcode: u64, payload: &[u8]) -> Result<bool> {
        let to = self.directory.lookup(to_name).ok_or_else(|| BusError::NameNotFound { name: to_name.to_string() })?;
        self.try_send(from, to, msg_type, code, subcode, payload)
    }

    pub fn send_by_name(&self, from: u32, to_name: &str, msg_type: u64, code: u64, subcode: u64, payload: &[u8]) -> Result<()> {
        let to = self.directory.lookup(to_name).ok_or_else(|| BusError::NameNotFound { name: to_name.to_string() })?;
        self.send(from, to, msg_type, code, subcode, payload)
    }

    /// Runs the receive loop for `id` until the module is deleted, invoking
    /// `handler(src, dst, header, payload)` for every message drained
    /// (§4.6). Returns once the module's control-plane handle reports the
    /// module is closed.
    pub fn recv(&self, id: u32, mut handler: impl FnMut(u32, u32, Header, &[u8])) -> Result<()> {
        let slot = self.registered_slot(id)?;
        let control_fd = slot.control_handle.as_raw_fd();
        let mut ready = Vec::new();
        let mut buf = vec![0u8; slot.msg_size()];

        loop {
            if slot.multiplexer.wait(&mut ready).is_err() {
                return Ok(());
            }
            if slot.control_handle.is_closed() {
                return Ok(());
            }
            for &fd in &ready {
                if fd == control_fd {
                    let _ = slot.control_handle.try_reset();
                    continue;
                }
                let ring = {
                    let table = self.handle_table.read().unwrap();
                    table.get(&fd).cloned()
                };
                let Some(ring) = ring else { continue };
                if ring.is_closed() {
                    continue;
                }
                let pending = ring.handle().try_reset().unwrap_or(0);
                for _ in 0..pending {
                    debug_assert_id_in_range!(ring.src(), self.config.module_id_max);
                    debug_assert_id_in_range!(ring.dst(), self.config.module_id_max);
                    if ring.src() > self.config.module_id_max || ring.dst() > self.config.module_id_max {
                        // A delete-module race may have invalidated this
                        // edge between signal and resolution; stop draining
                        // it rather than hand the handler a stale src/dst.
                        break;
                    }
                    let (header, len) = match ring.recv_blocking(&mut buf) {
                        Ok(v) => v,
                        Err(_) => break,
                    };
                    handler(ring.src(), ring.dst(), header, &buf[..len]);
                }
            }
            if slot.control_handle.is_closed() {
                return Ok(());
            }
        }
    }

    pub fn recv_by_name(&self, name: &str, handler: impl FnMut(u32, u32, Header, &[u8])) -> Result<()> {
        let id = self.directory.lookup(name).ok_or_else(|| BusError::NameNotFound { name: name.to_string() })?;
        self.recv(id, handler)
    }

    /// Fills `out` with one `RingStat` per declared edge matching `filter`,
    /// in matrix (dst, src) order. Not a globally consistent snapshot —
    /// counters are read with relaxed ordering per edge (§4.7).
    pub fn stat_snapshot(&self, out: &mut Vec<RingStat>, filter: impl Fn(u32, u32) -> bool) {
        out.clear();
        for dst in 0..=self.config.module_id_max {
            let dst_slot = self.slot(dst);
            for src in 0..=self.config.module_id_max {
                if let Some(ring) = dst_slot.ring_from(src) {
                    if filter(src, dst) {
                        out.push(RingStat { src, dst, enqueue: ring.enqueue_counter(), dequeue: ring.dequeue_counter() });
                    }
                }
            }
        }
    }

    /// Sums enqueue/dequeue counters across `id`'s inbound rings only (every
    /// edge `src -> id`), and the instantaneous occupancy of that inbound
    /// backlog. Excludes the id-0 temporary-source edge, matching the
    /// intentional resolution of the enqueue/dequeue-vs-msg-count
    /// discrepancy recorded in `DESIGN.md`. Rings where `id` is the source
    /// are deliberately excluded: they're backlog on a peer's inbound row,
    /// not `id`'s own.
    pub fn msg_count(&self, id: u32) -> Result<(u64, u64, u64)> {
        self.validate_id(id)?;
        let mut enqueue_total = 0u64;
        let mut dequeue_total = 0u64;
        let dst_slot = self.slot(id);
        for src in 1..=self.config.module_id_max {
            if let Some(ring) = dst_slot.ring_from(src) {
                enqueue_total += ring.enqueue_counter();
                dequeue_total += ring.dequeue_counter();
            }
        }
        Ok((enqueue_total, dequeue_total, enqueue_total.saturating_sub(dequeue_total)))
    }

    /// Human-readable diagnostic dump of one module (or every registered
    /// module when `id` is `None`), in the tabular style of the original
    /// system's dump routine (§10 supplemented feature).
    pub fn dump(&self, out: &mut dyn std::io::Write, id: Option<u32>) -> std::io::Result<()> {
        let ids: Vec<u32> = match id {
            Some(i) => vec![i],
            None => (1..=self.config.module_id_max).filter(|&i| self.slot(i).is_registered()).collect(),
        };
        for i in ids {
            let slot = self.slot(i);
            if !slot.is_registered() {
                writeln!(out, "module {i}: <not registered>")?;
                continue;
            }
            let name = slot.name.read().unwrap().clone().unwrap_or_else(|| "-".to_string());
            writeln!(out, "module {i} ({name}):")?;
            for peer in 0..=self.config.module_id_max {
                if let Some(ring) = slot.ring_from(peer) {
                    writeln!(
                        out,
                        "  {peer:>3} -> {i:<3}  enqueue={:<12} dequeue={:<12} cap={}",
                        ring.enqueue_counter(),
                        ring.dequeue_counter(),
                        ring.capacity()
                    )?;
                }
            }
        }
        Ok(())
    }
}
