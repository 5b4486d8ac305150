//! Userspace poll-mode NIC queue abstraction (spec §4.2).
//!
//! A physical port exposes a fixed number of TX and RX queues. Sessions
//! request a queue (and, for TX, a bandwidth quota) from the port rather
//! than touching hardware directly, so admission control lives in one
//! place instead of being re-checked by every session.
//!
//! SPDX-License-Identifier: MPL-2.0

pub mod flow;
pub mod kernel_socket;
pub mod mbuf;
pub mod rx_queue;
pub mod tx_queue;

pub use flow::FlowSpec;
pub use kernel_socket::{KernelSocketRxQueue, KernelSocketTxQueue};
pub use mbuf::{Mbuf, Payload};
pub use rx_queue::{LoopbackRxQueue, RxQueue};
pub use tx_queue::{EnqueueOutcome, LoopbackTxQueue, TxQueue};

use crate::error::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub u16);

/// One physical NIC port: a bounded set of TX/RX queues plus the
/// port-level bandwidth budget they share (spec §4.2).
pub struct NicPort {
    port_id: u16,
    link_speed_mbps: u32,
    tx_queues: Vec<Box<dyn TxQueue>>,
    rx_queues: Vec<Box<dyn RxQueue>>,
    max_tx_queues: usize,
    max_rx_queues: usize,
}

impl NicPort {
    pub fn new(port_id: u16, link_speed_mbps: u32, max_tx_queues: usize, max_rx_queues: usize) -> Self {
        NicPort {
            port_id,
            link_speed_mbps,
            tx_queues: Vec::new(),
            rx_queues: Vec::new(),
            max_tx_queues,
            max_rx_queues,
        }
    }

    pub fn port_id(&self) -> u16 {
        self.port_id
    }

    /// Total Mbps already committed across every TX queue on this port.
    pub fn committed_mbps(&self) -> u32 {
        self.tx_queues.iter().map(|q| q.committed_mbps()).sum()
    }

    pub fn remaining_port_mbps(&self) -> u32 {
        self.link_speed_mbps.saturating_sub(self.committed_mbps())
    }

    /// Request a TX queue with `quota_mbps` of reserved bandwidth. Reuses an
    /// existing queue with spare budget before opening a new one; fails
    /// with [`QueueError::NoQueueBudget`] once both the port-wide budget and
    /// the queue count are exhausted.
    pub fn request_tx_queue(&mut self, quota_mbps: u32) -> Result<QueueId, QueueError> {
        if quota_mbps > self.remaining_port_mbps() {
            return Err(QueueError::NoQueueBudget { port: self.port_id, requested_mbps: quota_mbps });
        }

        for q in self.tx_queues.iter_mut() {
            if q.try_reserve_mbps(quota_mbps) {
                return Ok(QueueId(q.queue_id()));
            }
        }

        if self.tx_queues.len() >= self.max_tx_queues {
            return Err(QueueError::NoQueueBudget { port: self.port_id, requested_mbps: quota_mbps });
        }

        let id = self.tx_queues.len() as u16;
        let mut q = Box::new(LoopbackTxQueue::new(id, self.link_speed_mbps, 4096));
        q.try_reserve_mbps(quota_mbps);
        self.tx_queues.push(q);
        tracing::debug!(port = self.port_id, queue = id, quota_mbps, "opened tx queue");
        Ok(QueueId(id))
    }

    /// Request an RX queue, optionally with a 5-tuple flow steering rule
    /// and/or header-split enabled.
    pub fn request_rx_queue(
        &mut self,
        flow: Option<FlowSpec>,
        header_split: bool,
    ) -> Result<QueueId, QueueError> {
        if self.rx_queues.len() >= self.max_rx_queues {
            return Err(QueueError::FlowInstallFailed { port: self.port_id });
        }
        let id = self.rx_queues.len() as u16;
        self.rx_queues.push(Box::new(LoopbackRxQueue::new(id, flow, header_split)));
        tracing::debug!(port = self.port_id, queue = id, header_split, "opened rx queue");
        Ok(QueueId(id))
    }

    pub fn tx_queue_mut(&mut self, id: QueueId) -> Option<&mut Box<dyn TxQueue>> {
        self.tx_queues.get_mut(id.0 as usize)
    }

    pub fn rx_queue_mut(&mut self, id: QueueId) -> Option<&mut Box<dyn RxQueue>> {
        self.rx_queues.get_mut(id.0 as usize)
    }

    pub fn release_tx_queue(&mut self, id: QueueId, quota_mbps: u32) {
        if let Some(q) = self.tx_queues.get_mut(id.0 as usize) {
            q.release_mbps(quota_mbps);
        }
    }
}
