//! TX video session: the per-session pacing state machine (spec §4.5).
//!
//! Runs as a [`Tasklet`] on a scheduler thread: each `handler()` call either
//! pulls a new frame, waits for its pacing cursor, or emits the next packet.
//! It never blocks -- a ring-full enqueue or an absent application frame
//! just returns `HasPending`/`AllDone` for the scheduler to retry.
//!
//! SPDX-License-Identifier: MPL-2.0

use std::sync::Arc;

use crate::clock::{media_timestamp, EpochClock, VIDEO_SAMPLING_RATE};
use crate::formats::{PackingMode, VideoFormat, BPM_PAYLOAD_SIZE};
use crate::nic::mbuf::{Mbuf, Payload};
use crate::nic::tx_queue::{EnqueueOutcome, TxQueue};
use crate::rtp::rfc4175::{write_srd_chain, SrdHeader};
use crate::rtp::RtpBaseHeader;
use crate::sched::{Tasklet, TaskletResult};

/// Supplies frame buffers to a TX session and is notified once the core is
/// done with one. Stands in for the opaque `{GetNext, NotifyDone}`
/// capability set from spec §9 -- the frame itself (an `Arc<[u8]>`) plays
/// the role the original's `idx`/`iova` pair played, since ownership here is
/// expressed directly rather than through a separate handle table.
pub trait TxFrameSource: Send {
    /// Returns the next frame to send, or `None` if the application has
    /// nothing ready. When `None`, the session must not advance its pacing
    /// cursor (spec §4.5.3: "session remains in WAIT_FRAME").
    fn get_next_frame(&mut self) -> Option<Arc<[u8]>>;

    /// Called once every external reference (outstanding NIC mbufs) to the
    /// frame has been dropped, mirroring the refcount-to-zero transition
    /// back to `FREE` (spec §3 "Frame buffer ownership").
    fn notify_frame_done(&mut self, frame: Arc<[u8]>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    WaitFrame,
    Pacing,
}

struct ActiveFrame {
    buf: Arc<[u8]>,
    next_pkt_idx: u32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TxSessionStats {
    pub frames_sent: u64,
    pub pkts_sent: u64,
    pub epoch_mismatch: u64,
    pub frames_skipped: u64,
}

enum EpochAcquire {
    Ready,
    SkipFrame,
}

pub struct TxVideoSession {
    pub format: VideoFormat,
    pub payload_type: u8,
    pub ssrc: u32,
    pkts_per_frame: u32,
    max_payload: usize,
    trs_ns: u64,
    tr_offset_ns: u64,

    clock: Arc<EpochClock>,
    queue: Box<dyn TxQueue>,
    source: Box<dyn TxFrameSource>,

    state: SessionState,
    active: Option<ActiveFrame>,
    seq: u16,
    seq_ext: u16,

    cur_epoch: u64,
    cur_time_stamp: u32,
    tsc_time_cursor: u64,
    consecutive_overshoots: u32,

    pub stats: TxSessionStats,
}

impl TxVideoSession {
    pub fn new(
        format: VideoFormat,
        payload_type: u8,
        ssrc: u32,
        max_payload: usize,
        clock: Arc<EpochClock>,
        queue: Box<dyn TxQueue>,
        source: Box<dyn TxFrameSource>,
    ) -> Self {
        let pkts_per_frame = format.pkts_per_frame(max_payload);
        let trs_ns = format.trs_ns(pkts_per_frame);
        let tr_offset_ns = format.tr_offset_ns();
        TxVideoSession {
            format,
            payload_type,
            ssrc,
            pkts_per_frame,
            max_payload,
            trs_ns,
            tr_offset_ns,
            clock,
            queue,
            source,
            state: SessionState::WaitFrame,
            active: None,
            seq: 0,
            seq_ext: 0,
            cur_epoch: 0,
            cur_time_stamp: 0,
            tsc_time_cursor: 0,
            consecutive_overshoots: 0,
            stats: TxSessionStats::default(),
        }
    }

    /// Epoch acquisition, run once per frame before its first packet (spec
    /// §4.5.1). Two consecutive overshoots cause the frame to be skipped
    /// rather than sent late.
    fn acquire_epoch(&mut self) -> EpochAcquire {
        let frame_time_ns = self.format.fps.frame_time_ns();
        let frame_time_samp = self.format.fps.frame_time_sampling(VIDEO_SAMPLING_RATE);

        let ptp = self.clock.ptp_now_ns();
        let mut e = ptp / frame_time_ns + 1;
        if e == self.cur_epoch {
            e += 1;
        }
        let mut delta = e as i64 * frame_time_ns as i64 + self.tr_offset_ns as i64 - ptp as i64;

        if delta < 0 {
            e += 1;
            delta = e as i64 * frame_time_ns as i64 + self.tr_offset_ns as i64 - ptp as i64;
            self.stats.epoch_mismatch += 1;
            self.consecutive_overshoots += 1;
            if self.consecutive_overshoots >= 2 {
                self.consecutive_overshoots = 0;
                return EpochAcquire::SkipFrame;
            }
        } else {
            self.consecutive_overshoots = 0;
        }

        self.cur_epoch = e;
        self.cur_time_stamp = media_timestamp(e, frame_time_samp);
        self.tsc_time_cursor = self.clock.tsc_now() + delta as u64;
        EpochAcquire::Ready
    }

    /// Line segments carried by the packet at `pkt_idx`, as
    /// `(line_number, offset_pixels, byte_offset, byte_len)` tuples in wire
    /// order. Segments always span a contiguous byte range of the frame --
    /// even a BPM packet that crosses a line boundary -- so the payload
    /// itself stays one contiguous slice; only the SRD header chain needs a
    /// header per line segment (spec §4.5.2, RFC 4175 continuation bit).
    fn segments_for_packet(&self, pkt_idx: u32) -> smallvec::SmallVec<[(u32, u16, usize, usize); 4]> {
        let linesize = self.format.linesize() as usize;
        let frame_len = self.format.frame_size() as usize;

        match self.format.packing {
            PackingMode::GpmSl => {
                let line = pkt_idx;
                let byte_offset = line as usize * linesize;
                let len = linesize.min(frame_len.saturating_sub(byte_offset));
                smallvec::smallvec![(line, 0u16, byte_offset, len)]
            }
            PackingMode::Gpm => {
                let per_pkt_lines = ((self.max_payload / linesize.max(1)) as u32).max(1);
                let first_line = pkt_idx * per_pkt_lines;
                let lines_this_pkt = per_pkt_lines.min(self.format.height.saturating_sub(first_line));
                (0..lines_this_pkt)
                    .map(|i| {
                        let line = first_line + i;
                        (line, 0u16, line as usize * linesize, linesize)
                    })
                    .collect()
            }
            PackingMode::Bpm => {
                let (pg_size, pg_coverage) = self.format.pixel_format.pgroup();
                let pkt_start = pkt_idx as usize * BPM_PAYLOAD_SIZE;
                let mut remaining = BPM_PAYLOAD_SIZE.min(frame_len.saturating_sub(pkt_start));
                let mut byte_pos = pkt_start;
                let mut segments = smallvec::SmallVec::new();
                while remaining > 0 {
                    let line = (byte_pos / linesize) as u32;
                    let offset_in_line = byte_pos % linesize;
                    let seg_len = remaining.min(linesize - offset_in_line);
                    let offset_pixels = (offset_in_line / pg_size as usize * pg_coverage as usize) as u16;
                    segments.push((line, offset_pixels, byte_pos, seg_len));
                    byte_pos += seg_len;
                    remaining -= seg_len;
                }
                segments
            }
        }
    }

    /// Builds one wire packet using the session's current sequence number
    /// without mutating it -- the caller advances `seq` only once the
    /// packet is actually accepted by the queue, so a ring-full retry
    /// rebuilds an identical packet. Emits one SRD header per line segment
    /// the packet covers: exactly one for GPM_SL, several chained with the
    /// continuation bit for GPM/BPM.
    fn build_packet(&self, pkt_idx: u32, frame: &Arc<[u8]>) -> Mbuf {
        let segments = self.segments_for_packet(pkt_idx);
        let byte_offset = segments.first().map(|s| s.2).unwrap_or(0);
        let total_len: usize = segments.iter().map(|s| s.3).sum();

        let mut header = smallvec::SmallVec::new();
        header.resize(RtpBaseHeader::LEN, 0u8);
        let rtp = RtpBaseHeader {
            marker: pkt_idx + 1 == self.pkts_per_frame,
            payload_type: self.payload_type,
            sequence_number: self.seq,
            timestamp: self.cur_time_stamp,
            ssrc: self.ssrc,
        };
        rtp.write(&mut header);

        let srd_headers: smallvec::SmallVec<[SrdHeader; 4]> = segments
            .iter()
            .enumerate()
            .map(|(i, &(line, offset, _, len))| SrdHeader {
                length: len as u16,
                field: false,
                line_number: line as u16,
                offset,
                continuation: i + 1 < segments.len(),
            })
            .collect();
        let mut srd_bytes = Vec::with_capacity(SrdHeader::LEN * srd_headers.len());
        write_srd_chain(&srd_headers, &mut srd_bytes);
        header.extend_from_slice(&srd_bytes);

        let payload = Payload::External { frame: frame.clone(), offset: byte_offset, len: total_len };
        Mbuf::new(header, payload)
    }

    fn advance_seq(&mut self) {
        self.seq = self.seq.wrapping_add(1);
        if self.seq == 0 {
            self.seq_ext = self.seq_ext.wrapping_add(1);
        }
    }
}

impl Tasklet for TxVideoSession {
    fn name(&self) -> &str {
        "tx_video"
    }

    fn handler(&mut self) -> TaskletResult {
        if !self.clock.is_synced() {
            return TaskletResult::AllDone;
        }

        if self.active.is_none() {
            let Some(frame) = self.source.get_next_frame() else {
                self.state = SessionState::WaitFrame;
                return TaskletResult::AllDone;
            };

            match self.acquire_epoch() {
                EpochAcquire::SkipFrame => {
                    self.stats.frames_skipped += 1;
                    self.source.notify_frame_done(frame);
                    return TaskletResult::HasPending;
                }
                EpochAcquire::Ready => {
                    self.active = Some(ActiveFrame { buf: frame, next_pkt_idx: 0 });
                    self.state = SessionState::Pacing;
                }
            }
        }

        if self.clock.tsc_now() < self.tsc_time_cursor {
            return TaskletResult::HasPending;
        }

        let active = self.active.as_ref().expect("checked above");
        let pkt_idx = active.next_pkt_idx;
        let frame_buf = active.buf.clone();
        let mbuf = self.build_packet(pkt_idx, &frame_buf);

        match self.queue.enqueue(mbuf) {
            EnqueueOutcome::RingFull => TaskletResult::HasPending,
            EnqueueOutcome::Accepted => {
                self.advance_seq();
                self.tsc_time_cursor += self.trs_ns;
                self.stats.pkts_sent += 1;

                let active = self.active.as_mut().expect("checked above");
                active.next_pkt_idx += 1;
                if active.next_pkt_idx >= self.pkts_per_frame {
                    let frame = self.active.take().expect("just matched Some").buf;
                    self.stats.frames_sent += 1;
                    self.source.notify_frame_done(frame);
                }
                TaskletResult::HasPending
            }
        }
    }

    fn sleep_us_hint(&self) -> u32 {
        if self.state == SessionState::WaitFrame {
            100
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrameRate;
    use crate::formats::{PackingMode, PixelFormat};
    use crate::nic::tx_queue::LoopbackTxQueue;
    use std::sync::Mutex;

    fn fmt() -> VideoFormat {
        VideoFormat {
            width: 1920,
            height: 1080,
            fps: FrameRate::new(60_000, 1001),
            pixel_format: PixelFormat::Yuv422p10Be,
            packing: PackingMode::GpmSl,
            interlaced: false,
        }
    }

    #[derive(Clone)]
    struct OneShotSource {
        frame: Arc<Mutex<Option<Arc<[u8]>>>>,
        done_count: Arc<Mutex<u32>>,
    }

    impl TxFrameSource for OneShotSource {
        fn get_next_frame(&mut self) -> Option<Arc<[u8]>> {
            self.frame.lock().unwrap().take()
        }

        fn notify_frame_done(&mut self, _frame: Arc<[u8]>) {
            *self.done_count.lock().unwrap() += 1;
        }
    }

    #[test]
    fn no_frame_available_keeps_cursor_idle() {
        let clock = Arc::new(EpochClock::calibrate_from_system_clock());
        clock.publish_offset(0);
        let source = OneShotSource { frame: Arc::new(Mutex::new(None)), done_count: Arc::new(Mutex::new(0)) };
        let queue = Box::new(LoopbackTxQueue::new(0, 10_000, 4096));
        let mut session =
            TxVideoSession::new(fmt(), 112, 0xdead_beef, 1460, clock, queue, Box::new(source));
        assert_eq!(session.handler(), TaskletResult::AllDone);
        assert_eq!(session.stats.pkts_sent, 0);
    }

    #[test]
    fn full_frame_drains_to_completion() {
        let clock = Arc::new(EpochClock::calibrate_from_system_clock());
        clock.publish_offset(0);
        let frame_bytes: Arc<[u8]> = Arc::from(vec![0u8; fmt().frame_size() as usize]);
        let source = OneShotSource {
            frame: Arc::new(Mutex::new(Some(frame_bytes))),
            done_count: Arc::new(Mutex::new(0)),
        };
        let done_count = source.done_count.clone();
        let queue = Box::new(LoopbackTxQueue::new(0, 10_000, 4096));
        let mut session =
            TxVideoSession::new(fmt(), 112, 0xdead_beef, 1460, clock.clone(), queue, Box::new(source));

        let pkts_per_frame = session.pkts_per_frame;
        for _ in 0..pkts_per_frame + 2 {
            // pacing cursor gates each packet; jump the clock ahead of it
            // deterministically instead of sleeping in a unit test.
            session.tsc_time_cursor = 0;
            session.handler();
        }
        assert_eq!(session.stats.pkts_sent, pkts_per_frame as u64);
        assert_eq!(session.stats.frames_sent, 1);
        assert_eq!(*done_count.lock().unwrap(), 1);
    }

    fn session_with_packing(packing: PackingMode, max_payload: usize) -> (TxVideoSession, u32) {
        let mut format = fmt();
        format.packing = packing;
        let clock = Arc::new(EpochClock::calibrate_from_system_clock());
        clock.publish_offset(0);
        let frame_bytes: Arc<[u8]> = Arc::from(vec![0u8; format.frame_size() as usize]);
        let source =
            OneShotSource { frame: Arc::new(Mutex::new(Some(frame_bytes))), done_count: Arc::new(Mutex::new(0)) };
        let queue = Box::new(LoopbackTxQueue::new(0, 10_000, 65536));
        let session = TxVideoSession::new(format, 112, 0xdead_beef, max_payload, clock, queue, Box::new(source));
        let pkts_per_frame = session.pkts_per_frame;
        (session, pkts_per_frame)
    }

    #[test]
    fn gpm_packet_carries_one_srd_per_line_and_stays_within_frame_bounds() {
        let (session, pkts_per_frame) = session_with_packing(PackingMode::Gpm, 10_000);
        let linesize = session.format.linesize() as usize;
        let frame: Arc<[u8]> = Arc::from(vec![0u8; session.format.frame_size() as usize]);

        let mut total_len = 0usize;
        for pkt_idx in 0..pkts_per_frame {
            let segments = session.segments_for_packet(pkt_idx);
            assert!(segments.len() > 1, "GPM packet should span more than one line");
            for &(_, _, byte_offset, len) in &segments {
                assert!(byte_offset + len <= frame.len());
                assert_eq!(len, linesize);
            }
            total_len += segments.iter().map(|s| s.3).sum::<usize>();
        }
        assert_eq!(total_len, frame.len());
    }

    #[test]
    fn bpm_packet_payload_is_fixed_size_except_the_last() {
        let (session, pkts_per_frame) = session_with_packing(PackingMode::Bpm, 1460);
        let frame_len = session.format.frame_size() as usize;

        for pkt_idx in 0..pkts_per_frame {
            let segments = session.segments_for_packet(pkt_idx);
            let total_len: usize = segments.iter().map(|s| s.3).sum();
            if pkt_idx + 1 < pkts_per_frame {
                assert_eq!(total_len, BPM_PAYLOAD_SIZE);
            } else {
                assert_eq!(total_len, frame_len - pkt_idx as usize * BPM_PAYLOAD_SIZE);
            }
            // Segments chain contiguously: each one starts where the
            // previous one ended.
            let mut cursor = segments[0].2;
            for &(_, _, byte_offset, len) in &segments {
                assert_eq!(byte_offset, cursor);
                cursor += len;
            }
        }
    }

    #[test]
    fn bpm_full_frame_drains_with_multi_segment_packets() {
        let (mut session, pkts_per_frame) = session_with_packing(PackingMode::Bpm, 1460);
        for _ in 0..pkts_per_frame + 2 {
            session.tsc_time_cursor = 0;
            session.handler();
        }
        assert_eq!(session.stats.pkts_sent, pkts_per_frame as u64);
        assert_eq!(session.stats.frames_sent, 1);
    }
}
