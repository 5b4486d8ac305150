//! Benchmarks the TX pacing state machine draining one 1080p59.94 frame end
//! to end: epoch acquisition, packet build, and enqueue, gated by the real
//! TSC clock exactly as the scheduler would call it.
//!
//! SPDX-License-Identifier: MPL-2.0

use std::env;
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, Criterion};

use st2110_core::clock::{EpochClock, FrameRate};
use st2110_core::formats::{PackingMode, PixelFormat, VideoFormat};
use st2110_core::nic::LoopbackTxQueue;
use st2110_core::sched::Tasklet;
use st2110_core::session::{TxFrameSource, TxVideoSession};

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

/// Always has a frame ready, so the session never idles in `WaitFrame`
/// between frames.
struct LoopingSource {
    frame: Arc<[u8]>,
}

impl TxFrameSource for LoopingSource {
    fn get_next_frame(&mut self) -> Option<Arc<[u8]>> {
        Some(self.frame.clone())
    }

    fn notify_frame_done(&mut self, _frame: Arc<[u8]>) {}
}

fn bench_tx_pacing_drain(c: &mut Criterion) {
    c.bench_function("tx_pacing_drain_one_frame_1080p59", |b| {
        b.iter(|| {
            let format = fmt_1080p59();
            let clock = Arc::new(EpochClock::calibrate_from_system_clock());
            clock.publish_offset(0);
            let frame: Arc<[u8]> = Arc::from(vec![0u8; format.frame_size() as usize]);
            let source = LoopingSource { frame };
            let queue = Box::new(LoopbackTxQueue::new(0, 10_000, 4096));
            let mut session = TxVideoSession::new(format, 112, 0xdead_beef, 1460, clock, queue, Box::new(source));

            let pkts_per_frame = format.pkts_per_frame(1460) as u64;
            while session.stats.pkts_sent < pkts_per_frame {
                session.handler();
            }
            black_box(session.stats.pkts_sent)
        });
    });
}

fn main() {
    let quick_mode = env::args().skip(1).any(|a| a == "--quick");

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion.sample_size(10).warm_up_time(Duration::from_millis(100)).measurement_time(Duration::from_millis(500));
    }

    bench_tx_pacing_drain(&mut criterion);
    criterion.final_summary();
}
