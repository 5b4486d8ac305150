//! TX queue abstraction: per-queue bandwidth budget and, when the NIC
//! supports it, hardware rate-limit offload.
//!
//! SPDX-License-Identifier: MPL-2.0

use crate::nic::mbuf::Mbuf;

/// A queue that accepted an mbuf but has no room right now must say so
/// without losing the packet -- spec §4.5.3: "ring full on enqueue -> keep
/// the packet as inflight; retry next tick; does not drop."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    RingFull,
}

pub trait TxQueue: Send {
    fn queue_id(&self) -> u16;

    /// Current bandwidth budget already committed to sessions on this queue.
    fn committed_mbps(&self) -> u32;

    fn capacity_mbps(&self) -> u32;

    fn remaining_mbps(&self) -> u32 {
        self.capacity_mbps().saturating_sub(self.committed_mbps())
    }

    /// Reserve additional bandwidth for a new session. Returns `false` if
    /// the queue does not have enough free budget.
    fn try_reserve_mbps(&mut self, mbps: u32) -> bool;

    fn release_mbps(&mut self, mbps: u32);

    /// Whether the NIC queue can offload rate-limiting itself (spec §4.2
    /// "set_queue_rate"). When `false`, pacing falls back to the TSC-based
    /// gate in the TX session (spec §4.5.1).
    fn supports_rate_offload(&self) -> bool;

    fn set_queue_rate_bps(&mut self, bps: u64);

    /// Non-blocking enqueue. Never drops: a `RingFull` result must be
    /// retried by the caller on its next tick.
    fn enqueue(&mut self, mbuf: Mbuf) -> EnqueueOutcome;

    /// Drains mbufs that have actually left the NIC ring, freeing any
    /// zero-copy references they held. Returns the count reclaimed.
    fn reclaim_sent(&mut self) -> usize;
}

/// A software loopback TX queue used for tests and for hosts without a
/// capable NIC driver. Reclaims mbufs as soon as they're "sent" (no real
/// wire) so the zero-copy refcount path can still be exercised end to end.
pub struct LoopbackTxQueue {
    id: u16,
    capacity_mbps: u32,
    committed_mbps: u32,
    ring_capacity: usize,
    ring: std::collections::VecDeque<Mbuf>,
    rate_offload_bps: Option<u64>,
    pub sent: Vec<Mbuf>,
}

impl LoopbackTxQueue {
    pub fn new(id: u16, capacity_mbps: u32, ring_capacity: usize) -> Self {
        LoopbackTxQueue {
            id,
            capacity_mbps,
            committed_mbps: 0,
            ring_capacity,
            ring: std::collections::VecDeque::new(),
            rate_offload_bps: None,
            sent: Vec::new(),
        }
    }
}

impl TxQueue for LoopbackTxQueue {
    fn queue_id(&self) -> u16 {
        self.id
    }

    fn committed_mbps(&self) -> u32 {
        self.committed_mbps
    }

    fn capacity_mbps(&self) -> u32 {
        self.capacity_mbps
    }

    fn try_reserve_mbps(&mut self, mbps: u32) -> bool {
        if self.remaining_mbps() >= mbps {
            self.committed_mbps += mbps;
            true
        } else {
            false
        }
    }

    fn release_mbps(&mut self, mbps: u32) {
        self.committed_mbps = self.committed_mbps.saturating_sub(mbps);
    }

    fn supports_rate_offload(&self) -> bool {
        true
    }

    fn set_queue_rate_bps(&mut self, bps: u64) {
        self.rate_offload_bps = Some(bps);
    }

    fn enqueue(&mut self, mbuf: Mbuf) -> EnqueueOutcome {
        if self.ring.len() >= self.ring_capacity {
            return EnqueueOutcome::RingFull;
        }
        self.ring.push_back(mbuf);
        EnqueueOutcome::Accepted
    }

    fn reclaim_sent(&mut self) -> usize {
        let n = self.ring.len();
        self.sent.extend(self.ring.drain(..));
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_respects_capacity() {
        let mut q = LoopbackTxQueue::new(0, 1000, 4);
        assert!(q.try_reserve_mbps(600));
        assert!(!q.try_reserve_mbps(500));
        q.release_mbps(600);
        assert!(q.try_reserve_mbps(500));
    }

    #[test]
    fn ring_full_never_drops() {
        let mut q = LoopbackTxQueue::new(0, 1000, 1);
        let payload = crate::nic::mbuf::Payload::Owned(std::sync::Arc::from(vec![1u8, 2]));
        let mbuf = Mbuf::new(smallvec::smallvec![0u8; 4], payload);
        assert_eq!(q.enqueue(mbuf.clone()), EnqueueOutcome::Accepted);
        assert_eq!(q.enqueue(mbuf), EnqueueOutcome::RingFull);
    }
}
