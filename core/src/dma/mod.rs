//! DMA engine pool (spec §4.4 / `st_dma`).
//!
//! A small number of physical DMA channels are shared across many TX/RX
//! sessions ("lenders"). Each channel admits up to `max_shared` concurrent
//! lenders; a lender that requests a channel when all are full fails with
//! [`DmaError::ChannelExhausted`] and the caller (a session) falls back to
//! CPU-copy (spec §4.5.2: "no DMA capacity -> CPU memcpy fallback, session
//! keeps running").
//!
//! SPDX-License-Identifier: MPL-2.0

pub mod lender;

pub use lender::DmaLender;

use crate::error::DmaError;

struct Channel {
    capacity: usize,
    lenders_issued: usize,
}

/// Pool of DMA channels available on this host. In the software model each
/// channel is just an admission counter plus ring capacity handed to every
/// [`DmaLender`] issued from it; the actual byte copy happens inline on
/// `DmaLender::copy`, since there is no hardware DMA engine to drive.
pub struct DmaPool {
    channels: Vec<Channel>,
    ring_capacity: u16,
    next_lender_id: u32,
}

impl DmaPool {
    pub fn new(num_channels: usize, max_shared_per_channel: usize, ring_capacity: u16) -> Self {
        DmaPool {
            channels: (0..num_channels)
                .map(|_| Channel { capacity: max_shared_per_channel, lenders_issued: 0 })
                .collect(),
            ring_capacity,
            next_lender_id: 0,
        }
    }

    /// Request a lender on the least-loaded channel. Fails once every
    /// channel is at `max_shared`.
    pub fn request_dev(&mut self) -> Result<DmaLender, DmaError> {
        let (channel_id, channel) = self
            .channels
            .iter_mut()
            .enumerate()
            .min_by_key(|(_, c)| c.lenders_issued)
            .expect("pool has at least one channel");

        if channel.lenders_issued >= channel.capacity {
            return Err(DmaError::ChannelExhausted {
                in_use: channel.lenders_issued,
                capacity: channel.capacity,
            });
        }

        channel.lenders_issued += 1;
        let lender_id = self.next_lender_id;
        self.next_lender_id += 1;
        tracing::debug!(channel_id, lender_id, "dma lender issued");
        Ok(DmaLender::new(lender_id, channel_id as u32, self.ring_capacity))
    }

    /// Release a lender back to its channel. The caller must have drained
    /// every borrowed mbuf first (spec §4.4: "detach drains in-flight
    /// copies before the channel slot is reused").
    pub fn free_dev(&mut self, lender: DmaLender) -> Result<(), DmaError> {
        if !lender.is_empty() || lender.in_flight() != 0 {
            return Err(DmaError::BorrowUnderflow);
        }
        if let Some(channel) = self.channels.get_mut(lender.channel_id() as usize) {
            channel.lenders_issued = channel.lenders_issued.saturating_sub(1);
        }
        Ok(())
    }
}
