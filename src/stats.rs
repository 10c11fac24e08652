//! Statistics snapshot types (§4.7).

/// One edge's cumulative counters at the moment they were read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStat {
    pub src: u32,
    pub dst: u32,
    pub enqueue: u64,
    pub dequeue: u64,
}

impl RingStat {
    /// Instantaneous occupancy implied by the two counters. Not exact under
    /// concurrent traffic (§4.7: not a globally consistent cut), but bounded
    /// and non-negative by construction since dequeue never outruns enqueue.
    pub fn occupancy(&self) -> u64 {
        self.enqueue.saturating_sub(self.dequeue)
    }
}
