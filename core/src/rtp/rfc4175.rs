//! RFC 4175 "RTP Payload Format for Uncompressed Video" header layout.
//!
//! Wire layout (spec §6):
//! `[Ether | IPv4 | UDP | RTP-base | RFC4175-RTP-ext | [SRD extra hdr] | payload]`
//!
//! Each Sample Row Data (SRD) header is 6 bytes: a 2-byte length, a 1-byte
//! field+line-number-high, a 1-byte line-number-low, and a 2-byte
//! continuation+offset. When the continuation bit is set, a second SRD header
//! immediately follows for the next line segment packed into the same
//! packet (used by GPM/BPM multi-line packing).
//!
//! SPDX-License-Identifier: MPL-2.0

/// One Sample Row Data header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrdHeader {
    /// Length of this SRD's payload segment, in bytes.
    pub length: u16,
    /// Set for the second field of an interlaced frame.
    pub field: bool,
    pub line_number: u16,
    /// Pixel offset (not byte offset) of this segment within the line.
    pub offset: u16,
    /// True if another SRD header follows immediately after this segment.
    pub continuation: bool,
}

impl SrdHeader {
    pub const LEN: usize = 6;

    pub fn write(&self, out: &mut [u8]) {
        assert!(out.len() >= Self::LEN);
        out[0..2].copy_from_slice(&self.length.to_be_bytes());
        let line_hi = ((self.line_number >> 8) & 0x7F) as u8;
        out[2] = ((self.field as u8) << 7) | line_hi;
        out[3] = (self.line_number & 0xFF) as u8;
        let off = self.offset & 0x7FFF;
        let word = ((self.continuation as u16) << 15) | off;
        out[4..6].copy_from_slice(&word.to_be_bytes());
    }

    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        let length = u16::from_be_bytes([buf[0], buf[1]]);
        let field = (buf[2] & 0x80) != 0;
        let line_hi = (buf[2] & 0x7F) as u16;
        let line_number = (line_hi << 8) | buf[3] as u16;
        let word = u16::from_be_bytes([buf[4], buf[5]]);
        let continuation = (word & 0x8000) != 0;
        let offset = word & 0x7FFF;
        Some(SrdHeader { length, field, line_number, offset, continuation })
    }
}

/// A packet's full set of SRD headers (one for GPM_SL, one or more for
/// GPM/BPM multi-segment packets), parsed in order.
pub fn parse_srd_chain(mut buf: &[u8]) -> Option<(smallvec::SmallVec<[SrdHeader; 4]>, &[u8])> {
    let mut headers = smallvec::SmallVec::new();
    loop {
        let hdr = SrdHeader::parse(buf)?;
        let continuation = hdr.continuation;
        headers.push(hdr);
        buf = &buf[SrdHeader::LEN..];
        if !continuation {
            break;
        }
    }
    Some((headers, buf))
}

pub fn write_srd_chain(headers: &[SrdHeader], out: &mut Vec<u8>) {
    for h in headers {
        let mut bytes = [0u8; SrdHeader::LEN];
        h.write(&mut bytes);
        out.extend_from_slice(&bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_srd_round_trips() {
        let hdr = SrdHeader { length: 2400, field: false, line_number: 540, offset: 0, continuation: false };
        let mut buf = [0u8; SrdHeader::LEN];
        hdr.write(&mut buf);
        assert_eq!(SrdHeader::parse(&buf).unwrap(), hdr);
    }

    #[test]
    fn interlaced_second_field_bit_set() {
        let hdr = SrdHeader { length: 1200, field: true, line_number: 10, offset: 100, continuation: false };
        let mut buf = [0u8; SrdHeader::LEN];
        hdr.write(&mut buf);
        let parsed = SrdHeader::parse(&buf).unwrap();
        assert!(parsed.field);
        assert_eq!(parsed.line_number, 10);
        assert_eq!(parsed.offset, 100);
    }

    #[test]
    fn continuation_chain_parses_two_segments() {
        let first = SrdHeader { length: 600, field: false, line_number: 0, offset: 0, continuation: true };
        let second = SrdHeader { length: 600, field: false, line_number: 1, offset: 0, continuation: false };
        let mut buf = Vec::new();
        write_srd_chain(&[first, second], &mut buf);
        buf.extend_from_slice(&[0xAA; 10]); // payload tail
        let (chain, rest) = parse_srd_chain(&buf).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0], first);
        assert_eq!(chain[1], second);
        assert_eq!(rest, &[0xAA; 10][..]);
    }
}
