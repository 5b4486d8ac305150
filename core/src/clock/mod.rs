//! Epoch clock: derives the media clock (integer epoch count on a frame-rate
//! grid) from a PTP-disciplined time source, and provides the TSC<->PTP
//! calibration used by the pacing hot path.
//!
//! SPDX-License-Identifier: MPL-2.0

pub mod ptp;
pub mod tsc;

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub use ptp::{MasterChooseMode, PtpSlave};
pub use tsc::TscCalibration;

use crate::error::ClockError;

/// A simple rational frame rate, `num/den` frames per second (e.g. 60000/1001
/// for 59.94p).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub const fn new(num: u32, den: u32) -> Self {
        FrameRate { num, den }
    }

    /// `frame_time_ns = 1e9 * den / num`
    pub fn frame_time_ns(self) -> u64 {
        1_000_000_000u64 * self.den as u64 / self.num as u64
    }

    /// `frame_time_sampling = sampling_rate * den / num`
    pub fn frame_time_sampling(self, sampling_rate: u32) -> u64 {
        sampling_rate as u64 * self.den as u64 / self.num as u64
    }
}

/// Standard video RTP clock rate.
pub const VIDEO_SAMPLING_RATE: u32 = 90_000;

/// `epoch = floor(ptp_ns / frame_time_ns)`
pub fn epoch_of(ptp_ns: u64, frame_time_ns: u64) -> u64 {
    ptp_ns / frame_time_ns
}

/// Low 32 bits of `epoch * frame_time_sampling`, carried as the RTP
/// timestamp.
pub fn media_timestamp(epoch: u64, frame_time_sampling: u64) -> u32 {
    (epoch.wrapping_mul(frame_time_sampling) & 0xFFFF_FFFF) as u32
}

/// Shared, lock-light view of the PTP-disciplined wall clock. Updated by one
/// PTP service tasklet (§5: "release-store / acquire-load discipline on the
/// (wall_ns, tsc) pair"), read by every scheduler.
pub struct EpochClock {
    calibration: Mutex<TscCalibration>,
    /// Release-store / acquire-load snapshot updated by the PTP service.
    wall_ns_snapshot: AtomicU64,
    tsc_snapshot: AtomicU64,
    offset_ns: AtomicI64,
    synced: std::sync::atomic::AtomicBool,
}

impl EpochClock {
    pub fn new(calibration: TscCalibration) -> Self {
        let clock = EpochClock {
            wall_ns_snapshot: AtomicU64::new(calibration.wall0_ns),
            tsc_snapshot: AtomicU64::new(calibration.tsc0),
            calibration: Mutex::new(calibration),
            offset_ns: AtomicI64::new(0),
            synced: std::sync::atomic::AtomicBool::new(false),
        };
        clock
    }

    /// Run TSC calibration against the host clock and build a clock from it.
    pub fn calibrate_from_system_clock() -> Self {
        let start = Instant::now();
        let cal = tsc::calibrate(
            || {
                let wall_ns = start.elapsed().as_nanos() as u64;
                let tsc = tsc_now();
                (wall_ns, tsc)
            },
            std::thread::sleep,
        );
        Self::new(cal)
    }

    pub fn tsc_hz(&self) -> u64 {
        self.calibration.lock().hz
    }

    /// Applies the current PTP-derived offset to the TSC-converted wall
    /// clock, giving the disciplined PTP time.
    pub fn ptp_now_ns(&self) -> u64 {
        let cal = self.calibration.lock();
        let raw = cal.tsc_to_ns(tsc_now());
        (raw as i64 + self.offset_ns.load(Ordering::Acquire)) as u64
    }

    /// Convert a TSC reading taken elsewhere to the current PTP timeline.
    pub fn tsc_to_ptp_ns(&self, tsc: u64) -> u64 {
        let cal = self.calibration.lock();
        (cal.tsc_to_ns(tsc) as i64 + self.offset_ns.load(Ordering::Acquire)) as u64
    }

    pub fn tsc_now(&self) -> u64 {
        tsc_now()
    }

    /// Updated by the PTP service tasklet whenever `PtpSlave` completes a
    /// two-step exchange.
    pub fn publish_offset(&self, offset_ns: i64) {
        self.offset_ns.store(offset_ns, Ordering::Release);
        self.synced.store(true, Ordering::Release);
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub fn require_synced(&self) -> Result<(), ClockError> {
        if self.is_synced() {
            Ok(())
        } else {
            Err(ClockError::PtpNotSynced)
        }
    }

    /// Busy-wait on `rdtsc` (or the equivalent monotonic counter on
    /// non-x86 hosts) until `target_tsc` is reached. Used for sub-microsecond
    /// pacing delays where `thread::sleep` granularity is too coarse.
    pub fn delay_to(&self, target_tsc: u64) {
        while tsc_now() < target_tsc {
            std::hint::spin_loop();
        }
    }
}

/// Reads the monotonic tick counter used as "TSC" on this host. On x86 this
/// would be `core::arch::x86_64::_rdtsc()`; we use a portable nanosecond
/// monotonic counter so the pacing math (which treats TSC as "a counter
/// convertible to ns via a calibrated frequency") stays correct on any host,
/// per the scalar-fallback requirement in spec §9.
fn tsc_now() -> u64 {
    use once_cell::sync::Lazy;
    static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);
    EPOCH.elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_constants_match_st2110_21() {
        // 59.94p
        let fps = FrameRate::new(60_000, 1001);
        assert_eq!(fps.frame_time_ns(), 16_683_333);
        assert_eq!(fps.frame_time_sampling(VIDEO_SAMPLING_RATE), 1_501);
    }

    #[test]
    fn epoch_advances_monotonically_with_ptp_time() {
        let frame_time_ns = FrameRate::new(60_000, 1001).frame_time_ns();
        let e0 = epoch_of(0, frame_time_ns);
        let e1 = epoch_of(frame_time_ns, frame_time_ns);
        assert_eq!(e1, e0 + 1);
    }

    #[test]
    fn requires_sync_before_use() {
        let clock = EpochClock::calibrate_from_system_clock();
        assert!(clock.require_synced().is_err());
        clock.publish_offset(0);
        assert!(clock.require_synced().is_ok());
    }
}
