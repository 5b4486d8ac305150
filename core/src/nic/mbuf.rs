//! Two-segment mbuf: a small owned header segment plus a payload segment
//! that may be owned or externally attached (zero-copy) to an application
//! frame buffer (spec §3 "Mbuf").
//!
//! SPDX-License-Identifier: MPL-2.0

use std::sync::Arc;

/// The payload segment of an [`Mbuf`]. `External` shares the application's
/// frame buffer via `Arc` refcounting rather than a manual refcount field --
/// the same semantics (the descriptor cannot be recycled while any clone is
/// alive) expressed as ownership, per the design note in spec §9.
#[derive(Clone)]
pub enum Payload {
    Owned(Arc<[u8]>),
    External { frame: Arc<[u8]>, offset: usize, len: usize },
}

impl Payload {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Owned(buf) => buf,
            Payload::External { frame, offset, len } => &frame[*offset..*offset + *len],
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live references to the backing storage. For `External`
    /// payloads this is the frame descriptor's external-attachment refcount
    /// (spec §3 "sh_info refcount").
    pub fn strong_count(&self) -> usize {
        match self {
            Payload::Owned(buf) => Arc::strong_count(buf),
            Payload::External { frame, .. } => Arc::strong_count(frame),
        }
    }
}

/// A single packet buffer: header bytes built fresh per packet, payload
/// either owned (copy path) or externally attached (zero-copy `EXT_FRAME`
/// path, spec §4.5.2).
#[derive(Clone)]
pub struct Mbuf {
    pub header: smallvec::SmallVec<[u8; 64]>,
    pub payload: Payload,
}

impl Mbuf {
    pub fn new(header: smallvec::SmallVec<[u8; 64]>, payload: Payload) -> Self {
        Mbuf { header, payload }
    }

    pub fn total_len(&self) -> usize {
        self.header.len() + self.payload.len()
    }

    /// Clone this mbuf's header and share its payload by reference, as done
    /// for the 2022-7 redundant path (spec §4.5.2: "a second packet is
    /// produced by cloning the header mbuf and sharing the payload mbuf").
    pub fn clone_for_redundant_path(&self) -> Self {
        Mbuf { header: self.header.clone(), payload: self.payload.clone() }
    }
}
