//! Kernel-socket PMD: a real (non-loopback) TX/RX queue pair backed by a
//! plain UDP socket, for the `PmdType::KernelSocket` path (spec §6 "PMD
//! selection") on hosts without a DPDK-class poll-mode driver. No rate
//! offload and no header-split -- both are hardware-queue features the
//! kernel socket path cannot provide, so the TX session's TSC pacing gate
//! and the RX session's own reassembly carry the full load here.
//!
//! SPDX-License-Identifier: MPL-2.0

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};

use crate::nic::mbuf::{Mbuf, Payload};
use crate::nic::tx_queue::{EnqueueOutcome, TxQueue};

/// Sends each enqueued mbuf immediately as one UDP datagram. There is no
/// ring to fill, so this queue never reports `RingFull`; reclaim is a no-op
/// because nothing is held past `enqueue`.
pub struct KernelSocketTxQueue {
    id: u16,
    capacity_mbps: u32,
    committed_mbps: u32,
    socket: Socket,
    dst: SocketAddr,
    sent_count: usize,
}

impl KernelSocketTxQueue {
    pub fn bind(id: u16, capacity_mbps: u32, src: SocketAddr, dst: SocketAddr) -> io::Result<Self> {
        let domain = if src.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.bind(&src.into())?;
        Ok(KernelSocketTxQueue { id, capacity_mbps, committed_mbps: 0, socket, dst, sent_count: 0 })
    }
}

impl TxQueue for KernelSocketTxQueue {
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
        false
    }

    fn set_queue_rate_bps(&mut self, _bps: u64) {
        // No hardware rate limiter behind a kernel socket; the TX session
        // keeps pacing itself against the TSC gate (spec §4.5.1).
    }

    fn enqueue(&mut self, mbuf: Mbuf) -> EnqueueOutcome {
        let mut datagram = Vec::with_capacity(mbuf.total_len());
        datagram.extend_from_slice(&mbuf.header);
        datagram.extend_from_slice(mbuf.payload.as_slice());
        match self.socket.send_to(&datagram, &self.dst.into()) {
            Ok(_) => {
                self.sent_count += 1;
                EnqueueOutcome::Accepted
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => EnqueueOutcome::RingFull,
            Err(e) => {
                tracing::warn!(queue = self.id, error = %e, "kernel socket send failed, dropping datagram");
                EnqueueOutcome::Accepted
            }
        }
    }

    fn reclaim_sent(&mut self) -> usize {
        std::mem::take(&mut self.sent_count)
    }
}

/// Pulls datagrams off a bound UDP socket. Header-split is not available on
/// this path: the whole datagram lands in the mbuf's header segment and the
/// payload segment is empty, leaving RFC 4175/8331 parsing to split it.
pub struct KernelSocketRxQueue {
    id: u16,
    socket: Socket,
    recv_buf: Vec<u8>,
}

impl KernelSocketRxQueue {
    pub fn bind(id: u16, src: SocketAddr, max_datagram: usize) -> io::Result<Self> {
        let domain = if src.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.bind(&src.into())?;
        Ok(KernelSocketRxQueue { id, socket, recv_buf: vec![0u8; max_datagram] })
    }
}

impl crate::nic::rx_queue::RxQueue for KernelSocketRxQueue {
    fn queue_id(&self) -> u16 {
        self.id
    }

    fn flow(&self) -> Option<crate::nic::flow::FlowSpec> {
        // Kernel sockets filter by bind address/port alone; 5-tuple steering
        // on top of that is a userspace-driver feature this path lacks.
        None
    }

    fn header_split_enabled(&self) -> bool {
        false
    }

    fn dequeue_burst(&mut self, max: usize) -> Vec<Mbuf> {
        let mut out = Vec::new();
        while out.len() < max {
            // SAFETY: `recv_buf` is plain-initialized `u8`, so reinterpreting
            // it as `MaybeUninit<u8>` for the duration of this call is sound.
            let uninit = unsafe {
                std::slice::from_raw_parts_mut(
                    self.recv_buf.as_mut_ptr() as *mut std::mem::MaybeUninit<u8>,
                    self.recv_buf.len(),
                )
            };
            match self.socket.recv(uninit) {
                Ok(n) => {
                    let header: smallvec::SmallVec<[u8; 64]> = self.recv_buf[..n].into();
                    out.push(Mbuf::new(header, Payload::Owned(std::sync::Arc::from(Vec::new()))));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(queue = self.id, error = %e, "kernel socket recv failed");
                    break;
                }
            }
        }
        out
    }
}
