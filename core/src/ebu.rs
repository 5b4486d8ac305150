//! EBU R 143 / ST 2110-21 compliance measurement (spec §4.6.6), optional
//! per RX session.
//!
//! SPDX-License-Identifier: MPL-2.0

/// Running min/avg/max accumulator for one measured quantity.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinAvgMax {
    pub min: f64,
    pub max: f64,
    sum: f64,
    count: u64,
}

impl MinAvgMax {
    fn observe(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.count += 1;
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    fn reset(&mut self) {
        *self = MinAvgMax::default();
    }
}

/// ST 2110-21 compliance classes, narrowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceClass {
    Narrow,
    Wide,
    Fail,
}

/// Per-frame sample fed to the accumulator each time a packet arrives.
pub struct PacketSample {
    /// Packet arrival time relative to the frame's epoch start, in ns.
    pub time_since_epoch_ns: i64,
    /// Nominal inter-packet time for this format, in ns.
    pub trs_ns: u64,
}

/// Accumulates the metrics named in spec §4.6.6 and periodically emits a
/// pass/fail summary against the standard narrow/wide thresholds.
pub struct EbuAccumulator {
    cinst: MinAvgMax,
    vrx: MinAvgMax,
    fpt: MinAvgMax,
    latency: MinAvgMax,
    frames_since_summary: u32,
    summary_every_n_frames: u32,
    vrx_fill: f64,
    last_pkt_time_ns: Option<i64>,
}

/// Narrow-sender Cinst bound from ST 2110-21 (packets): momentary deviation
/// from the ideal inter-packet cadence must stay within this many TRS units.
const NARROW_CINST_MAX: f64 = 4.0;
const WIDE_CINST_MAX: f64 = 16.0;

impl EbuAccumulator {
    pub fn new(summary_every_n_frames: u32) -> Self {
        EbuAccumulator {
            cinst: MinAvgMax::default(),
            vrx: MinAvgMax::default(),
            fpt: MinAvgMax::default(),
            latency: MinAvgMax::default(),
            frames_since_summary: 0,
            summary_every_n_frames: summary_every_n_frames.max(1),
            vrx_fill: 0.0,
            last_pkt_time_ns: None,
        }
    }

    /// Feed one packet's timing sample. `is_first_of_frame` marks FPT
    /// (first-packet time after epoch).
    pub fn observe_packet(&mut self, sample: PacketSample, is_first_of_frame: bool) {
        if is_first_of_frame {
            self.fpt.observe(sample.time_since_epoch_ns as f64);
        }

        if let Some(last) = self.last_pkt_time_ns {
            let inter_packet = (sample.time_since_epoch_ns - last) as f64;
            let ideal = sample.trs_ns as f64;
            let cinst = (inter_packet - ideal).abs() / ideal.max(1.0);
            self.cinst.observe(cinst);
        }
        self.last_pkt_time_ns = Some(sample.time_since_epoch_ns);

        self.vrx_fill += 1.0;
        self.vrx.observe(self.vrx_fill);
        self.latency.observe(sample.time_since_epoch_ns as f64);
    }

    /// Called when a frame completes; drains the virtual receive buffer
    /// fill counter and, every `summary_every_n_frames`, returns a
    /// pass/fail summary for the caller to log.
    pub fn observe_frame_complete(&mut self) -> Option<EbuSummary> {
        self.vrx_fill = 0.0;
        self.frames_since_summary += 1;
        if self.frames_since_summary < self.summary_every_n_frames {
            return None;
        }
        self.frames_since_summary = 0;

        let class = if self.cinst.max <= NARROW_CINST_MAX {
            ComplianceClass::Narrow
        } else if self.cinst.max <= WIDE_CINST_MAX {
            ComplianceClass::Wide
        } else {
            ComplianceClass::Fail
        };

        let summary = EbuSummary {
            class,
            cinst: self.cinst,
            vrx: self.vrx,
            fpt: self.fpt,
            latency: self.latency,
        };

        self.cinst.reset();
        self.vrx.reset();
        self.fpt.reset();
        self.latency.reset();

        Some(summary)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EbuSummary {
    pub class: ComplianceClass,
    pub cinst: MinAvgMax,
    pub vrx: MinAvgMax,
    pub fpt: MinAvgMax,
    pub latency: MinAvgMax,
}
