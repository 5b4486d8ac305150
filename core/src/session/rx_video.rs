//! RX video session: packet-to-frame reassembly (spec §4.6).
//!
//! SPDX-License-Identifier: MPL-2.0

use crate::dma::DmaLender;
use crate::ebu::{EbuAccumulator, EbuSummary, PacketSample};
use crate::formats::VideoFormat;
use crate::nic::mbuf::Mbuf;
use crate::rtp::rfc4175::{parse_srd_chain, SrdHeader};
use crate::rtp::seq::SeqExtender;
use crate::rtp::RtpBaseHeader;

/// Redundant-path tolerance for distinguishing "really reconstructed" from
/// "just a duplicate packet" (spec §4.6.5, open question (b)): retained as a
/// literal per the original, documented as tolerance for normal reordering
/// rather than tied to any particular packing mode.
const RECONSTRUCTED_TOLERANCE: u32 = 16;

/// Payloads at or above this size use the attached DMA lender instead of a
/// CPU `copy_from_slice` (spec §4.6.2 step 6).
pub const DMA_MIN_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Complete,
    Reconstructed,
    Corrupted,
}

#[derive(Debug, Clone)]
pub struct FrameMeta {
    pub timestamp: u32,
    pub status: FrameStatus,
    pub frame_total_size: u64,
    pub frame_recv_size: u64,
    pub second_field: bool,
}

/// Capability set the session uses to obtain writable frame buffers and
/// deliver completed ones (spec §9's opaque `{GetNext, NotifyReady}` pair).
pub trait RxFrameSink: Send {
    /// A writable buffer of at least `size` bytes, or `None` if the
    /// application has none ready; packets for this timestamp are dropped
    /// (counted) until one becomes available.
    fn acquire_frame_buffer(&mut self, size: usize) -> Option<Vec<u8>>;

    fn notify_frame_ready(&mut self, frame: Vec<u8>, meta: FrameMeta);

    /// Slice-mode delivery (spec §4.6.3): called as contiguous runs of
    /// packet indices complete, ahead of the full frame. Applications that
    /// don't care about sub-frame latency can ignore this.
    fn notify_slice_ready(&mut self, _timestamp: u32, _pkts_ready: u32) {}
}

/// Fixed-size bit-set used for per-packet-index de-duplication within one
/// slot (spec §3 "bitmap bit i set iff packet index i has been written").
#[derive(Clone)]
struct Bitmap {
    words: Vec<u64>,
    bits: u32,
}

impl Bitmap {
    fn new(bits: u32) -> Self {
        Bitmap { words: vec![0u64; (bits as usize).div_ceil(64)], bits }
    }

    fn in_range(&self, idx: u32) -> bool {
        idx < self.bits
    }

    fn is_set(&self, idx: u32) -> bool {
        if !self.in_range(idx) {
            return false;
        }
        self.words[(idx / 64) as usize] & (1u64 << (idx % 64)) != 0
    }

    /// Sets bit `idx` and returns whether it was already set.
    fn test_and_set(&mut self, idx: u32) -> bool {
        let word = &mut self.words[(idx / 64) as usize];
        let mask = 1u64 << (idx % 64);
        let was_set = *word & mask != 0;
        *word |= mask;
        was_set
    }

    fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }
}

struct Slot {
    rtp_timestamp: Option<u32>,
    seq_id_base: Option<u32>,
    frame: Option<Vec<u8>>,
    bitmap: Bitmap,
    pkts_received: u32,
    pkts_redundant: u32,
    frame_recv_size: u64,
    /// Next packet index not yet confirmed present in a contiguous run from
    /// 0 -- advances only while the bitmap is unbroken, so a slice becomes
    /// ready only once every packet up to it has actually arrived.
    slice_cursor: u32,
    last_slice_notified: u32,
    first_arrival_ns: Option<u64>,
}

impl Slot {
    fn new(bitmap_bits: u32) -> Self {
        Slot {
            rtp_timestamp: None,
            seq_id_base: None,
            frame: None,
            bitmap: Bitmap::new(bitmap_bits),
            pkts_received: 0,
            pkts_redundant: 0,
            frame_recv_size: 0,
            slice_cursor: 0,
            last_slice_notified: 0,
            first_arrival_ns: None,
        }
    }

    fn reset(&mut self) {
        self.rtp_timestamp = None;
        self.seq_id_base = None;
        self.frame = None;
        self.bitmap.clear();
        self.pkts_received = 0;
        self.pkts_redundant = 0;
        self.frame_recv_size = 0;
        self.slice_cursor = 0;
        self.last_slice_notified = 0;
        self.first_arrival_ns = None;
    }

    fn is_reconstructed(&self) -> bool {
        self.pkts_redundant + RECONSTRUCTED_TOLERANCE < self.pkts_received
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RxSessionStats {
    pub pkts_received: u64,
    pub pkts_redundant_dropped: u64,
    pub pkts_idx_dropped: u64,
    /// Mbufs rejected by [`RxVideoSession::receive_burst`] before reaching
    /// reassembly at all: wrong RTP version or payload type, or a
    /// truncated/malformed SRD chain (spec §4.6.2 step 1).
    pub pkts_validation_dropped: u64,
    pub pkts_dma_copied: u64,
    pub frames_complete: u64,
    pub frames_reconstructed: u64,
    pub frames_corrupted: u64,
}

/// Result of validating and extracting wire fields from one received
/// packet, handed to [`RxVideoSession::handle_packet`].
pub struct RxPacket<'a> {
    pub rtp: RtpBaseHeader,
    pub srd: SrdHeader,
    pub payload: &'a [u8],
}

pub struct RxVideoSession {
    format: VideoFormat,
    payload_type: u8,
    pkts_per_frame: u32,
    num_ports: usize,
    slots: Vec<Slot>,
    next_slot: usize,
    seq_extenders: Vec<SeqExtender>,
    sink: Box<dyn RxFrameSink>,
    pub stats: RxSessionStats,
    slice_size_pkts: Option<u32>,
    ebu: Option<EbuAccumulator>,
    last_ebu_summary: Option<EbuSummary>,
    dma: Option<DmaLender>,
}

impl RxVideoSession {
    pub fn new(
        format: VideoFormat,
        payload_type: u8,
        max_payload: usize,
        num_ports: usize,
        num_slots: usize,
        sink: Box<dyn RxFrameSink>,
    ) -> Self {
        let pkts_per_frame = format.pkts_per_frame(max_payload);
        // Headroom above the nominal packet count absorbs minor reordering
        // and redundant-path duplicates without growing the bitmap per packet.
        let bitmap_bits = pkts_per_frame * 2;
        RxVideoSession {
            format,
            payload_type,
            pkts_per_frame,
            num_ports: num_ports.max(1),
            slots: (0..num_slots.max(1)).map(|_| Slot::new(bitmap_bits)).collect(),
            next_slot: 0,
            seq_extenders: (0..num_ports.max(1)).map(|_| SeqExtender::new()).collect(),
            sink,
            stats: RxSessionStats::default(),
            slice_size_pkts: None,
            ebu: None,
            last_ebu_summary: None,
            dma: None,
        }
    }

    /// Enables slice-mode delivery: [`RxFrameSink::notify_slice_ready`] fires
    /// every time a further `slice_size_pkts` contiguous packets land.
    pub fn enable_slice_mode(&mut self, slice_size_pkts: u32) {
        self.slice_size_pkts = Some(slice_size_pkts.max(1));
    }

    /// Enables EBU R 143 compliance measurement (spec §4.6.6).
    pub fn enable_ebu(&mut self, summary_every_n_frames: u32) {
        self.ebu = Some(EbuAccumulator::new(summary_every_n_frames));
    }

    /// Attaches a DMA lender: payloads at or above [`DMA_MIN_SIZE`] copy
    /// through it instead of a CPU `copy_from_slice` (spec §4.6.2 step 6).
    pub fn enable_dma(&mut self, lender: DmaLender) {
        self.dma = Some(lender);
    }

    /// Validates and extracts RTP/RFC 4175 fields from one NIC-queue mbuf
    /// (spec §4.6.2 steps 1-2). By the time a burst reaches this layer its
    /// Ethernet/IPv4/UDP framing is already gone -- `KernelSocketRxQueue`
    /// hands over only the UDP payload (the kernel's own bind/connect did
    /// the L2-L4 demultiplexing), and a hardware PMD queue would do the
    /// equivalent with 5-tuple flow steering (`nic::flow::FlowSpec`) before
    /// the mbuf is ever handed up. What's left to check here is the RTP
    /// version (via [`RtpBaseHeader::parse`]) and payload type.
    fn parse_rx_packet<'a>(&self, mbuf: &'a Mbuf) -> Option<RxPacket<'a>> {
        let rtp = RtpBaseHeader::parse(&mbuf.header)?;
        if rtp.payload_type != self.payload_type {
            return None;
        }
        let (chain, trailing) = parse_srd_chain(&mbuf.header[RtpBaseHeader::LEN..])?;
        let srd = *chain.first()?;
        let payload = if mbuf.payload.is_empty() { trailing } else { mbuf.payload.as_slice() };
        Some(RxPacket { rtp, srd, payload })
    }

    /// Validates, parses, and reassembles one burst of mbufs pulled off
    /// transport port `port_idx` via [`crate::nic::rx_queue::RxQueue::dequeue_burst`]
    /// (spec §4.6.2). `arrival_ns` is the local clock reading taken once for
    /// the whole burst, matching how a poll-mode driver timestamps a single
    /// `dequeue_burst` call rather than each packet within it.
    pub fn receive_burst(&mut self, port_idx: usize, mbufs: &[Mbuf], arrival_ns: u64) {
        for mbuf in mbufs {
            match self.parse_rx_packet(mbuf) {
                Some(pkt) => self.handle_packet(port_idx, &pkt, arrival_ns),
                None => self.stats.pkts_validation_dropped += 1,
            }
        }
    }

    fn slot_for_timestamp(&mut self, timestamp: u32) -> usize {
        if let Some(idx) = self.slots.iter().position(|s| s.rtp_timestamp == Some(timestamp)) {
            return idx;
        }

        let idx = self.next_slot;
        self.next_slot = (self.next_slot + 1) % self.slots.len();
        self.evict_if_incomplete(idx);
        self.slots[idx].rtp_timestamp = Some(timestamp);
        idx
    }

    fn evict_if_incomplete(&mut self, idx: usize) {
        let had_frame = self.slots[idx].frame.is_some();
        if !had_frame {
            return;
        }
        let reconstructed = self.slots[idx].is_reconstructed();
        let slot = &mut self.slots[idx];
        let frame = slot.frame.take().expect("checked above");
        let meta = FrameMeta {
            timestamp: slot.rtp_timestamp.unwrap_or(0),
            status: if reconstructed { FrameStatus::Reconstructed } else { FrameStatus::Corrupted },
            frame_total_size: self.format.frame_size(),
            frame_recv_size: slot.frame_recv_size,
            second_field: false,
        };
        if reconstructed {
            self.stats.frames_reconstructed += 1;
        } else {
            self.stats.frames_corrupted += 1;
        }
        self.sink.notify_frame_ready(frame, meta);
        slot.reset();
    }

    /// Handle one received packet arriving on transport port `port_idx`
    /// (`0` for the primary path, `1` for the ST 2022-7 redundant path).
    /// `arrival_ns` is the local clock reading at receipt, used only for EBU
    /// timing metrics when [`Self::enable_ebu`] is on.
    pub fn handle_packet(&mut self, port_idx: usize, pkt: &RxPacket, arrival_ns: u64) {
        self.stats.pkts_received += 1;

        let seq32 = self.seq_extenders[port_idx.min(self.seq_extenders.len() - 1)].extend(pkt.rtp.sequence_number);
        let timestamp = pkt.rtp.timestamp;
        let slot_idx = self.slot_for_timestamp(timestamp);

        if self.slots[slot_idx].frame.is_none() {
            let Some(buf) = self.sink.acquire_frame_buffer(self.format.frame_size() as usize) else {
                self.stats.pkts_idx_dropped += 1;
                return;
            };
            self.slots[slot_idx].frame = Some(buf);
            self.slots[slot_idx].seq_id_base = Some(seq32);
            self.slots[slot_idx].first_arrival_ns = Some(arrival_ns);
        }

        let slot = &mut self.slots[slot_idx];
        let seq_id_base = slot.seq_id_base.unwrap_or(seq32);
        let pkt_idx = seq32.wrapping_sub(seq_id_base);

        if !slot.bitmap.in_range(pkt_idx) {
            self.stats.pkts_idx_dropped += 1;
            return;
        }

        if slot.bitmap.test_and_set(pkt_idx) {
            slot.pkts_redundant += 1;
            self.stats.pkts_redundant_dropped += 1;
            return;
        }

        let linesize = self.format.linesize();
        let (pg_size, pg_coverage) = self.format.pixel_format.pgroup();
        let dest_offset =
            pkt.srd.line_number as u64 * linesize as u64 + (pkt.srd.offset as u64 / pg_coverage as u64) * pg_size as u64;
        let len = pkt.payload.len();

        let frame = slot.frame.as_mut().expect("allocated above");
        if dest_offset + len as u64 > frame.len() as u64 {
            self.stats.pkts_idx_dropped += 1;
            return;
        }
        let dest_offset = dest_offset as usize;
        let dst = &mut frame[dest_offset..dest_offset + len];

        // Payloads under DMA_MIN_SIZE, or with no lender attached or its
        // ring full, fall back to a plain CPU copy (spec §4.6.2 step 6).
        let mut copied_via_dma = false;
        if len >= DMA_MIN_SIZE {
            if let Some(lender) = self.dma.as_mut() {
                if !lender.is_full() && lender.copy(dst, pkt.payload).is_ok() {
                    // The software DMA model copies eagerly, so the
                    // descriptor is already done; mark it completed right
                    // away rather than holding ring capacity for nothing.
                    lender.completed(1);
                    copied_via_dma = true;
                }
            }
        }
        if !copied_via_dma {
            dst.copy_from_slice(pkt.payload);
        } else {
            self.stats.pkts_dma_copied += 1;
        }

        let is_first_of_frame = slot.pkts_received == 0;
        slot.pkts_received += 1;
        slot.frame_recv_size += len as u64;

        while slot.bitmap.is_set(slot.slice_cursor) {
            slot.slice_cursor += 1;
        }
        if let Some(slice_size) = self.slice_size_pkts {
            if slot.slice_cursor >= slot.last_slice_notified + slice_size {
                slot.last_slice_notified = slot.slice_cursor - (slot.slice_cursor % slice_size);
                self.sink.notify_slice_ready(timestamp, slot.slice_cursor);
            }
        }

        if let Some(ebu) = self.ebu.as_mut() {
            let first_arrival = slot.first_arrival_ns.unwrap_or(arrival_ns);
            let sample = PacketSample {
                time_since_epoch_ns: arrival_ns.saturating_sub(first_arrival) as i64,
                trs_ns: self.format.trs_ns(self.pkts_per_frame),
            };
            ebu.observe_packet(sample, is_first_of_frame);
        }

        if slot.frame_recv_size >= self.format.frame_size() {
            let reconstructed = slot.is_reconstructed();
            let frame = slot.frame.take().expect("just written");
            let meta = FrameMeta {
                timestamp,
                status: if reconstructed { FrameStatus::Reconstructed } else { FrameStatus::Complete },
                frame_total_size: self.format.frame_size(),
                frame_recv_size: slot.frame_recv_size,
                second_field: pkt.srd.field,
            };
            if reconstructed {
                self.stats.frames_reconstructed += 1;
            } else {
                self.stats.frames_complete += 1;
            }
            self.sink.notify_frame_ready(frame, meta);
            slot.reset();

            if let Some(ebu) = self.ebu.as_mut() {
                if let Some(summary) = ebu.observe_frame_complete() {
                    self.last_ebu_summary = Some(summary);
                }
            }
        }
    }

    /// Most recent EBU compliance summary, if EBU measurement is enabled and
    /// at least one summary interval has elapsed.
    pub fn last_ebu_summary(&self) -> Option<EbuSummary> {
        self.last_ebu_summary
    }

    pub fn pkts_per_frame(&self) -> u32 {
        self.pkts_per_frame
    }

    pub fn num_ports(&self) -> usize {
        self.num_ports
    }
}
