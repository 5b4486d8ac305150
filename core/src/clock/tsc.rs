// TSC <-> wall-clock calibration.
//
// SPDX-License-Identifier: MPL-2.0

use std::time::Duration;

/// Number of (wall_ns, tsc) samples collected during calibration.
pub const CALIBRATION_SAMPLES: usize = 100;
/// Spacing between samples.
pub const CALIBRATION_SAMPLE_SPACING: Duration = Duration::from_millis(10);
/// Samples trimmed from each end of the sorted frequency estimate list
/// before averaging, to reject outliers caused by scheduler jitter.
pub const CALIBRATION_TRIM: usize = 10;

/// Result of a TSC calibration pass: the steady-state frequency estimate and
/// an additive offset so `tsc_to_ns(tsc) = (tsc - tsc0) * ns_per_tick + wall0`.
#[derive(Debug, Clone, Copy)]
pub struct TscCalibration {
    pub hz: u64,
    pub wall0_ns: u64,
    pub tsc0: u64,
}

impl TscCalibration {
    /// Convert a raw TSC reading to nanoseconds on the wall-clock timeline.
    pub fn tsc_to_ns(&self, tsc: u64) -> u64 {
        let delta_ticks = tsc.saturating_sub(self.tsc0);
        let delta_ns = (delta_ticks as u128 * 1_000_000_000u128 / self.hz as u128) as u64;
        self.wall0_ns + delta_ns
    }

    /// Convert a nanosecond wall-clock target to the TSC tick it corresponds to.
    pub fn ns_to_tsc(&self, ns: u64) -> u64 {
        let delta_ns = ns.saturating_sub(self.wall0_ns);
        let delta_ticks = (delta_ns as u128 * self.hz as u128 / 1_000_000_000u128) as u64;
        self.tsc0 + delta_ticks
    }
}

/// Runs the calibration protocol against a caller-supplied sampler, so the
/// busy-wait/sleep loop can be driven by a real clock in production and a
/// deterministic fake in tests.
///
/// `sample()` returns one `(wall_ns, tsc)` pair. `sleep()` is called between
/// samples with the nominal spacing; a fake clock can make this a no-op.
pub fn calibrate(
    mut sample: impl FnMut() -> (u64, u64),
    mut sleep: impl FnMut(Duration),
) -> TscCalibration {
    let mut samples = Vec::with_capacity(CALIBRATION_SAMPLES);
    for i in 0..CALIBRATION_SAMPLES {
        samples.push(sample());
        if i + 1 < CALIBRATION_SAMPLES {
            sleep(CALIBRATION_SAMPLE_SPACING);
        }
    }

    // Per-adjacent-pair frequency estimate (ticks per second), sorted so the
    // trimmed mean rejects preemption-induced outliers.
    let mut freqs: Vec<f64> = samples
        .windows(2)
        .filter_map(|w| {
            let (wn0, t0) = w[0];
            let (wn1, t1) = w[1];
            let dn = wn1.saturating_sub(wn0);
            let dt = t1.saturating_sub(t0);
            if dn == 0 {
                None
            } else {
                Some(dt as f64 * 1_000_000_000.0 / dn as f64)
            }
        })
        .collect();
    freqs.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let trim = CALIBRATION_TRIM.min(freqs.len() / 2);
    let trimmed = &freqs[trim..freqs.len() - trim];
    let hz = if trimmed.is_empty() {
        // Degenerate fallback: a sampler with no resolution at all.
        1_000_000_000
    } else {
        (trimmed.iter().sum::<f64>() / trimmed.len() as f64).round() as u64
    };

    let (wall0_ns, tsc0) = samples[0];
    TscCalibration { hz, wall0_ns, tsc0 }
}
