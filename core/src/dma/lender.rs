//! A single lender's view onto a shared DMA channel (spec §4.4 /
//! `st_dma_lender_dev`).
//!
//! SPDX-License-Identifier: MPL-2.0

use std::collections::VecDeque;

use crate::error::DmaError;
use crate::nic::mbuf::Mbuf;

/// One descriptor-ring slot worth of outstanding copy, tracked so
/// `completed()` can report how many descriptors drained since the last
/// poll.
#[derive(Clone, Copy)]
struct PendingCopy {
    idx: u16,
}

/// A lender borrowed from a [`super::DmaPool`] channel. Mirrors
/// `st_dma_lender_dev`: mbufs handed to the DMA engine are parked here
/// until their copy completes, at which point the caller drops them.
pub struct DmaLender {
    pub(super) lender_id: u32,
    pub(super) channel_id: u32,
    ring_capacity: u16,
    next_idx: u16,
    submitted: VecDeque<PendingCopy>,
    borrowed: VecDeque<Mbuf>,
}

impl DmaLender {
    pub(super) fn new(lender_id: u32, channel_id: u32, ring_capacity: u16) -> Self {
        DmaLender {
            lender_id,
            channel_id,
            ring_capacity,
            next_idx: 0,
            submitted: VecDeque::new(),
            borrowed: VecDeque::new(),
        }
    }

    pub fn lender_id(&self) -> u32 {
        self.lender_id
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// Number of copies queued but not yet submitted/completed.
    pub fn in_flight(&self) -> usize {
        self.submitted.len()
    }

    pub fn is_full(&self) -> bool {
        self.submitted.len() >= self.ring_capacity as usize
    }

    pub fn is_empty(&self) -> bool {
        self.borrowed.is_empty()
    }

    /// Enqueue one descriptor for a copy. In this software model the byte
    /// move happens eagerly; only the completion bookkeeping is deferred,
    /// since there is no real DMA engine to poll against.
    pub fn copy(&mut self, dst: &mut [u8], src: &[u8]) -> Result<(), DmaError> {
        if self.is_full() {
            return Err(DmaError::SubmitRingFull);
        }
        let len = src.len().min(dst.len());
        dst[..len].copy_from_slice(&src[..len]);
        self.submitted.push_back(PendingCopy { idx: self.next_idx });
        self.next_idx = self.next_idx.wrapping_add(1);
        Ok(())
    }

    pub fn fill(&mut self, dst: &mut [u8], pattern: u8) -> Result<(), DmaError> {
        if self.is_full() {
            return Err(DmaError::SubmitRingFull);
        }
        dst.fill(pattern);
        self.submitted.push_back(PendingCopy { idx: self.next_idx });
        self.next_idx = self.next_idx.wrapping_add(1);
        Ok(())
    }

    /// Marks all currently-submitted descriptors as handed to the engine.
    /// A no-op beyond bookkeeping in the software model.
    pub fn submit(&mut self) {}

    /// Drains up to `max` completed descriptors, returning how many
    /// actually completed. The software model completes everything
    /// submitted so far.
    pub fn completed(&mut self, max: u16) -> u16 {
        let n = (max as usize).min(self.submitted.len());
        for _ in 0..n {
            self.submitted.pop_front();
        }
        n as u16
    }

    /// Park an mbuf whose payload copy was just submitted so it outlives
    /// the copy; the caller must not touch the source buffer until
    /// [`Self::completed`] confirms the copy landed.
    pub fn borrow_mbuf(&mut self, mbuf: Mbuf) {
        self.borrowed.push_back(mbuf);
    }

    /// Release up to `nb` borrowed mbufs whose copies have completed.
    pub fn drop_mbuf(&mut self, nb: u16) -> Result<usize, DmaError> {
        let n = (nb as usize).min(self.borrowed.len());
        if n == 0 && nb > 0 && self.borrowed.is_empty() {
            return Err(DmaError::BorrowUnderflow);
        }
        self.borrowed.drain(..n);
        Ok(n)
    }
}
