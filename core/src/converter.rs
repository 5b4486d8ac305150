//! Plugin-based frame converter contract (spec §4.8).
//!
//! The core only defines the contract and a registry; concrete conversion
//! kernels (SIMD-specialised RFC 4175 <-> planar/v210, etc.) are external
//! collaborators (spec §1/§9: "keep the converter contract
//! language-neutral... the core must include a scalar fallback").
//!
//! SPDX-License-Identifier: MPL-2.0

use std::collections::HashMap;

use crate::formats::PixelFormat;

/// A source or destination frame: a byte buffer plus the line stride
/// actually used, which may be larger than the tight "bytes in line" count
/// (spec §4.8: "must tolerate padded line sizes... by converting line-by-line
/// rather than as a contiguous block").
pub struct FrameView<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub linesize: u32,
    pub format: PixelFormat,
}

pub struct FrameViewMut<'a> {
    pub data: &'a mut [u8],
    pub width: u32,
    pub height: u32,
    pub linesize: u32,
    pub format: PixelFormat,
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("no converter registered for {src:?} -> {dst:?}")]
    Unsupported { src: PixelFormat, dst: PixelFormat },

    #[error("source frame dimensions ({sw}x{sh}) do not match destination ({dw}x{dh})")]
    DimensionMismatch { sw: u32, sh: u32, dw: u32, dh: u32 },
}

/// Opaque conversion between two pixel layouts. Implementations may use
/// architecture intrinsics internally under a `cfg`/runtime-detect gate, but
/// every registered converter must behave correctly (if slowly) without one,
/// per the scalar-fallback requirement in spec §9.
pub trait Converter: Send + Sync {
    fn convert(&self, src: &FrameView, dst: &mut FrameViewMut) -> Result<(), ConvertError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ConverterKey {
    src: PixelFormat,
    dst: PixelFormat,
}

/// Registry mapping `(src_fmt, dst_fmt)` pairs to a converter implementation,
/// looked up by the RX/TX pipelines when an application requests a pixel
/// format different from the wire format.
#[derive(Default)]
pub struct ConverterRegistry {
    converters: HashMap<ConverterKey, Box<dyn Converter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, src: PixelFormat, dst: PixelFormat, converter: Box<dyn Converter>) {
        self.converters.insert(ConverterKey { src, dst }, converter);
    }

    pub fn convert(&self, src: &FrameView, dst: &mut FrameViewMut) -> Result<(), ConvertError> {
        if src.width != dst.width || src.height != dst.height {
            return Err(ConvertError::DimensionMismatch { sw: src.width, sh: src.height, dw: dst.width, dh: dst.height });
        }
        let key = ConverterKey { src: src.format, dst: dst.format };
        let converter = self
            .converters
            .get(&key)
            .ok_or(ConvertError::Unsupported { src: src.format, dst: dst.format })?;
        converter.convert(src, dst)
    }
}

/// A scalar, always-available identity converter for same-format copies,
/// registered by default so pass-through pipelines never hit `Unsupported`.
pub struct IdentityConverter;

impl Converter for IdentityConverter {
    fn convert(&self, src: &FrameView, dst: &mut FrameViewMut) -> Result<(), ConvertError> {
        for line in 0..src.height {
            let s_off = (line * src.linesize) as usize;
            let d_off = (line * dst.linesize) as usize;
            let (pg_size, pg_coverage) = src.format.pgroup();
            let bytes_in_line = ((src.width + pg_coverage - 1) / pg_coverage * pg_size) as usize;
            dst.data[d_off..d_off + bytes_in_line].copy_from_slice(&src.data[s_off..s_off + bytes_in_line]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_converter_copies_line_by_line_respecting_padding() {
        let fmt = PixelFormat::Yuv422p8;
        let (pg_size, pg_coverage) = fmt.pgroup();
        let width = 4u32;
        let bytes_in_line = (width / pg_coverage) * pg_size;
        let linesize = bytes_in_line + 8; // padded stride

        let mut src_data = vec![0u8; (linesize * 2) as usize];
        for line in 0..2u32 {
            let off = (line * linesize) as usize;
            src_data[off..off + bytes_in_line as usize].fill((line + 1) as u8);
        }
        let mut dst_data = vec![0u8; (linesize * 2) as usize];

        let src = FrameView { data: &src_data, width, height: 2, linesize, format: fmt };
        let mut dst = FrameViewMut { data: &mut dst_data, width, height: 2, linesize, format: fmt };
        IdentityConverter.convert(&src, &mut dst).unwrap();

        assert_eq!(&dst_data[0..bytes_in_line as usize], &vec![1u8; bytes_in_line as usize][..]);
        assert_eq!(
            &dst_data[linesize as usize..linesize as usize + bytes_in_line as usize],
            &vec![2u8; bytes_in_line as usize][..]
        );
    }

    #[test]
    fn unregistered_pair_reports_unsupported() {
        let registry = ConverterRegistry::new();
        let data = [0u8; 16];
        let mut out = [0u8; 16];
        let src = FrameView { data: &data, width: 2, height: 2, linesize: 8, format: PixelFormat::Yuv422p8 };
        let mut dst = FrameViewMut { data: &mut out, width: 2, height: 2, linesize: 8, format: PixelFormat::Rgb8 };
        assert!(matches!(registry.convert(&src, &mut dst), Err(ConvertError::Unsupported { .. })));
    }
}
