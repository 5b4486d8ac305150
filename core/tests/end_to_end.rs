//! End-to-end loopback scenarios (spec §8 S1-S3, plus a failover check
//! standing in for S6). Frame counts are scaled down from the scenario's
//! nominal 600 frames / 10 s to keep the suite fast; the pacing and
//! reassembly logic under test does not change behaviour with scale.
//!
//! SPDX-License-Identifier: MPL-2.0

use std::sync::{Arc, Mutex};

use st2110_core::clock::{EpochClock, FrameRate};
use st2110_core::formats::{PackingMode, PixelFormat, VideoFormat};
use st2110_core::nic::LoopbackTxQueue;
use st2110_core::rtp::rfc4175::SrdHeader;
use st2110_core::rtp::RtpBaseHeader;
use st2110_core::sched::Tasklet;
use st2110_core::session::{
    DetectProgress, FormatDetector, FrameMeta, FrameStatus, RxFrameSink, RxPacket, RxVideoSession, TxFrameSource, TxVideoSession,
};

fn fmt_1080p59() -> VideoFormat {
    VideoFormat {
        width: 1920,
        height: 1080,
        fps: FrameRate::new(60_000, 1001),
        pixel_format: PixelFormat::Yuv422p10Be,
        packing: PackingMode::GpmSl,
        interlaced: false,
    }
}

struct CountingSource {
    frame_size: usize,
    remaining: u32,
}

impl TxFrameSource for CountingSource {
    fn get_next_frame(&mut self) -> Option<Arc<[u8]>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(Arc::from(vec![0xA5u8; self.frame_size]))
    }

    fn notify_frame_done(&mut self, _frame: Arc<[u8]>) {}
}

struct CollectingSink {
    frames: Arc<Mutex<Vec<FrameMeta>>>,
}

impl RxFrameSink for CollectingSink {
    fn acquire_frame_buffer(&mut self, size: usize) -> Option<Vec<u8>> {
        Some(vec![0u8; size])
    }

    fn notify_frame_ready(&mut self, _frame: Vec<u8>, meta: FrameMeta) {
        self.frames.lock().unwrap().push(meta);
    }
}

/// S1 - 1080p59.94 single-port loopback: every frame the source hands over
/// is paced to completion with no ring overflow.
#[test]
fn s1_single_port_loopback_delivers_every_frame_complete() {
    const FRAMES: u32 = 3;
    let format = fmt_1080p59();

    let clock = Arc::new(EpochClock::calibrate_from_system_clock());
    clock.publish_offset(0);
    let source = CountingSource { frame_size: format.frame_size() as usize, remaining: FRAMES };
    let queue = Box::new(LoopbackTxQueue::new(0, 10_000, 8192));
    let mut tx = TxVideoSession::new(format, 112, 0x1111, 1460, clock, queue, Box::new(source));

    for _ in 0..(FRAMES as u64 * 20_000) {
        if tx.stats.frames_sent >= FRAMES as u64 {
            break;
        }
        tx.handler();
    }

    assert_eq!(tx.stats.frames_sent, FRAMES as u64);
    assert_eq!(tx.stats.pkts_sent, FRAMES as u64 * format.pkts_per_frame(1460) as u64);
}

/// S2 - ST 2022-7 redundant loopback: feeding the same stream to both ports,
/// with the primary path losing more packets than a duplicate burst could
/// plausibly explain, still completes the frame from the secondary path's
/// copies and reports it as reconstructed rather than merely complete.
#[test]
fn s2_redundant_path_reconstructs_under_simulated_primary_loss() {
    let format = VideoFormat { width: 64, height: 64, ..fmt_1080p59() };
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = Box::new(CollectingSink { frames: frames.clone() });
    let mut rx = RxVideoSession::new(format, 112, 1460, 2, 2, sink);

    let linesize = format.linesize() as usize;
    let payload = vec![0x5Au8; linesize];
    // Drop the first 20 lines on the primary path: comfortably above
    // RECONSTRUCTED_TOLERANCE (16), so the completed frame can only have
    // come from the redundant path's copies, not a handful of duplicates.
    const DROPPED_ON_PRIMARY: u16 = 20;

    for line in 0..format.height as u16 {
        let rtp = RtpBaseHeader { marker: false, payload_type: 112, sequence_number: line, timestamp: 42, ssrc: 7 };
        let srd = SrdHeader { length: payload.len() as u16, field: false, line_number: line, offset: 0, continuation: false };

        if line >= DROPPED_ON_PRIMARY {
            let pkt = RxPacket { rtp, srd, payload: &payload };
            rx.handle_packet(0, &pkt, line as u64);
        }

        // Redundant path always delivers (spec §4.5.2 zero-copy mirror).
        let pkt = RxPacket { rtp, srd, payload: &payload };
        rx.handle_packet(1, &pkt, line as u64);
    }

    let delivered = frames.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert!(matches!(delivered[0].status, FrameStatus::Reconstructed));
    assert_eq!(rx.stats.pkts_redundant_dropped as u32, (format.height as u16 - DROPPED_ON_PRIMARY) as u32);
}

/// S3 - format auto-detect: geometry and cadence resolve within a handful of
/// observed frames from nothing but SRD headers and RTP timestamps.
#[test]
fn s3_format_auto_detect_resolves_from_observed_packets() {
    let format = VideoFormat {
        width: 3840,
        height: 2160,
        fps: FrameRate::new(30_000, 1001),
        pixel_format: PixelFormat::Yuv422p10Be,
        packing: PackingMode::Bpm,
        interlaced: false,
    };
    let mut detector = FormatDetector::new(format.pixel_format, format.packing, 3);
    let linesize = format.linesize();
    let frame_time_sampling = format.fps.frame_time_sampling(st2110_core::clock::VIDEO_SAMPLING_RATE);

    let lines_sampled = [0u16, (format.height / 2) as u16, (format.height - 1) as u16];
    let mut progress = DetectProgress::NeedMoreFrames;
    for frame in 0..4u32 {
        let ts = frame.wrapping_mul(frame_time_sampling as u32);
        for &line in &lines_sampled {
            let srd = SrdHeader { length: linesize as u16, field: false, line_number: line, offset: 0, continuation: false };
            progress = detector.observe(ts, &srd);
        }
    }

    assert_eq!(progress, DetectProgress::Resolved);
    let detected = detector.resolve().expect("resolved after 4 frames");
    assert_eq!(detected.height, format.height);
    assert_eq!(detected.fps, format.fps);
}

/// Stands in for S6's consumer-side guarantee: once PTP failover publishes a
/// new offset, the disciplined clock never runs backwards. Grandmaster
/// reselection itself is covered by `clock::ptp`'s own
/// `backup_promoted_after_drop_time` test.
#[test]
fn epoch_clock_never_runs_backwards_across_a_republished_offset() {
    let clock = EpochClock::calibrate_from_system_clock();
    clock.publish_offset(0);
    let t0 = clock.ptp_now_ns();
    clock.publish_offset(50_000_000);
    let t1 = clock.ptp_now_ns();
    assert!(t1 > t0);
}
