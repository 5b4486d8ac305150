//! Format auto-detect for an RX session started without a pre-negotiated
//! `VideoFormat` (spec §4.6.4): watch a few frames' worth of SRD headers and
//! the epoch-aligned RTP timestamp cadence, then resolve a concrete format
//! so the normal reassembly path in [`super::rx_video`] can take over.
//!
//! Pixel format cannot be recovered from RFC 4175 wire data alone -- the
//! payload carries pixel groups, not a format tag -- so the detector takes
//! the expected pixel format as a hint and only infers geometry and frame
//! rate from what is actually on the wire.
//!
//! SPDX-License-Identifier: MPL-2.0

use crate::clock::FrameRate;
use crate::formats::{PackingMode, PixelFormat, VideoFormat};
use crate::rtp::rfc4175::SrdHeader;

/// Standard ST 2110-21 frame rates, checked against the observed RTP
/// timestamp delta between frames (spec §4.6.4: "cadence match against the
/// standard rate table").
const KNOWN_RATES: &[FrameRate] = &[
    FrameRate::new(24, 1),
    FrameRate::new(24_000, 1001),
    FrameRate::new(25, 1),
    FrameRate::new(30, 1),
    FrameRate::new(30_000, 1001),
    FrameRate::new(50, 1),
    FrameRate::new(60, 1),
    FrameRate::new(60_000, 1001),
];

/// Accumulates SRD geometry across one frame's packets and the RTP
/// timestamp cadence across frames, then resolves a [`VideoFormat`].
pub struct FormatDetector {
    pixel_format_hint: PixelFormat,
    packing_hint: PackingMode,
    max_line: u16,
    max_offset_bytes: u32,
    first_timestamp: Option<u32>,
    last_timestamp: Option<u32>,
    frames_observed: u32,
    frames_required: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectProgress {
    NeedMoreFrames,
    Resolved,
}

impl FormatDetector {
    pub fn new(pixel_format_hint: PixelFormat, packing_hint: PackingMode, frames_required: u32) -> Self {
        FormatDetector {
            pixel_format_hint,
            packing_hint,
            max_line: 0,
            max_offset_bytes: 0,
            first_timestamp: None,
            last_timestamp: None,
            frames_observed: 0,
            frames_required: frames_required.max(2),
        }
    }

    /// Feed one packet's SRD header and RTP timestamp. Call for every packet
    /// on the flow being probed, in arrival order.
    pub fn observe(&mut self, timestamp: u32, srd: &SrdHeader) -> DetectProgress {
        self.max_line = self.max_line.max(srd.line_number);
        let (pg_size, pg_coverage) = self.pixel_format_hint.pgroup();
        let end_bytes = srd.offset as u32 / pg_coverage * pg_size + srd.length as u32;
        self.max_offset_bytes = self.max_offset_bytes.max(end_bytes);

        if self.first_timestamp.is_none() {
            self.first_timestamp = Some(timestamp);
        } else if Some(timestamp) != self.last_timestamp && self.last_timestamp.is_some() {
            self.frames_observed += 1;
        }
        self.last_timestamp = Some(timestamp);

        if self.frames_observed >= self.frames_required {
            DetectProgress::Resolved
        } else {
            DetectProgress::NeedMoreFrames
        }
    }

    /// Resolves the observed geometry and cadence into a concrete format.
    /// Returns `None` if called before enough frames have been observed.
    pub fn resolve(&self) -> Option<VideoFormat> {
        if self.frames_observed < self.frames_required {
            return None;
        }
        let first = self.first_timestamp?;
        let last = self.last_timestamp?;
        let span = last.wrapping_sub(first);
        let per_frame_ticks = span / self.frames_observed.max(1);

        let fps = KNOWN_RATES
            .iter()
            .copied()
            .min_by_key(|r| {
                let expected = r.frame_time_sampling(crate::clock::VIDEO_SAMPLING_RATE);
                (expected as i64 - per_frame_ticks as i64).unsigned_abs()
            })?;

        let height = self.max_line as u32 + 1;
        let (_pg_size, pg_coverage) = self.pixel_format_hint.pgroup();
        // Round the observed byte extent back to a pixel width via the same
        // pgroup math the wire packing used to produce it.
        let width_pg_units = self.max_offset_bytes / self.pixel_format_hint.pgroup().0;
        let width = width_pg_units * pg_coverage;

        Some(VideoFormat {
            width,
            height,
            fps,
            pixel_format: self.pixel_format_hint,
            packing: self.packing_hint,
            interlaced: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srd(line: u16, offset: u16, length: u16) -> SrdHeader {
        SrdHeader { length, field: false, line_number: line, offset, continuation: false }
    }

    #[test]
    fn resolves_geometry_from_observed_lines_and_offsets() {
        let mut det = FormatDetector::new(PixelFormat::Yuv422p8, PackingMode::GpmSl, 2);
        let linesize_pixels = 64u16;
        let frame_time_sampling = FrameRate::new(25, 1).frame_time_sampling(crate::clock::VIDEO_SAMPLING_RATE) as u32;

        for frame in 0..3u32 {
            let ts = frame.wrapping_mul(frame_time_sampling);
            for line in 0..4u16 {
                det.observe(ts, &srd(line, 0, linesize_pixels * 2));
            }
        }

        let fmt = det.resolve().expect("resolved after enough frames");
        assert_eq!(fmt.height, 4);
        assert_eq!(fmt.width, 64);
        assert_eq!(fmt.fps, FrameRate::new(25, 1));
    }

    #[test]
    fn stays_unresolved_before_enough_frames() {
        let mut det = FormatDetector::new(PixelFormat::Yuv422p8, PackingMode::GpmSl, 3);
        det.observe(0, &srd(0, 0, 128));
        assert!(det.resolve().is_none());
    }
}
