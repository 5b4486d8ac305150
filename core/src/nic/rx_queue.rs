//! RX queue abstraction: optional 5-tuple flow steering and optional
//! header-split (header and payload land in separate mbuf segments so the
//! payload can be DMA-copied straight into the application frame buffer).
//!
//! SPDX-License-Identifier: MPL-2.0

use crate::nic::flow::FlowSpec;
use crate::nic::mbuf::Mbuf;

pub trait RxQueue: Send {
    fn queue_id(&self) -> u16;

    fn flow(&self) -> Option<FlowSpec>;

    fn header_split_enabled(&self) -> bool;

    /// Pull up to `max` received mbufs. Never blocks; returns an empty
    /// burst when nothing is pending.
    fn dequeue_burst(&mut self, max: usize) -> Vec<Mbuf>;
}

/// Software RX queue for tests and non-accelerated hosts. Packets are
/// injected with [`LoopbackRxQueue::inject`] (e.g. by a test harness
/// standing in for the wire) and drained with `dequeue_burst`.
pub struct LoopbackRxQueue {
    id: u16,
    flow: Option<FlowSpec>,
    header_split: bool,
    pending: std::collections::VecDeque<Mbuf>,
}

impl LoopbackRxQueue {
    pub fn new(id: u16, flow: Option<FlowSpec>, header_split: bool) -> Self {
        LoopbackRxQueue { id, flow, header_split, pending: std::collections::VecDeque::new() }
    }

    pub fn inject(&mut self, mbuf: Mbuf) {
        self.pending.push_back(mbuf);
    }
}

impl RxQueue for LoopbackRxQueue {
    fn queue_id(&self) -> u16 {
        self.id
    }

    fn flow(&self) -> Option<FlowSpec> {
        self.flow
    }

    fn header_split_enabled(&self) -> bool {
        self.header_split
    }

    fn dequeue_burst(&mut self, max: usize) -> Vec<Mbuf> {
        let n = max.min(self.pending.len());
        self.pending.drain(..n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nic::mbuf::Payload;
    use std::sync::Arc;

    #[test]
    fn burst_respects_max_and_order() {
        let mut q = LoopbackRxQueue::new(0, None, false);
        for i in 0..3u8 {
            q.inject(Mbuf::new(smallvec::smallvec![i], Payload::Owned(Arc::from(vec![i]))));
        }
        let burst = q.dequeue_burst(2);
        assert_eq!(burst.len(), 2);
        assert_eq!(burst[0].header[0], 0);
        assert_eq!(q.dequeue_burst(10).len(), 1);
    }
}
