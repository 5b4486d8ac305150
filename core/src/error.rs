// ST 2110 core error handling
//
// Copyright (C) 2025 Media Transport Library contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public License, v2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at
// <https://mozilla.org/MPL/2.0/>.
//
// SPDX-License-Identifier: MPL-2.0

use thiserror::Error;

/// Flat signed error code, kept byte-for-byte compatible with the original
/// library's C ABI (spec §6) so embedders that only want the numeric code can
/// avoid matching on [`St2110Error`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    General = -1,
    NoMemory = -2,
    NotSupported = -3,
    InvalidParam = -4,
    PktDrop = -5,
    PktLost = -6,
    DevErr = -7,
    PtpErr = -8,
    IgmpErr = -9,
}

/// Top-level error type for the core crate. Each subsystem gets its own
/// variant set and converts transparently, mirroring the layered
/// `RtspError` design this crate is grounded on.
#[derive(Debug, Error)]
pub enum St2110Error {
    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Dma(#[from] DmaError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl St2110Error {
    /// Project onto the flat C-ABI error code space.
    pub fn code(&self) -> ErrorCode {
        match self {
            St2110Error::Clock(ClockError::PtpNotSynced) => ErrorCode::PtpErr,
            St2110Error::Clock(_) => ErrorCode::General,
            St2110Error::Queue(QueueError::NoQueueBudget { .. }) => ErrorCode::NoMemory,
            St2110Error::Queue(_) => ErrorCode::DevErr,
            St2110Error::Dma(_) => ErrorCode::DevErr,
            St2110Error::Session(SessionError::NoSchedulerCapacity) => ErrorCode::NoMemory,
            St2110Error::Session(SessionError::InvalidParam(_)) => ErrorCode::InvalidParam,
            St2110Error::Session(_) => ErrorCode::General,
            St2110Error::Config(_) => ErrorCode::InvalidParam,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("session start requested before the first PTP SYNC exchange completed")]
    PtpNotSynced,

    #[error("no PTP grandmaster available and no backup could be promoted")]
    NoGrandmaster,

    #[error("TSC calibration failed: {reason}")]
    CalibrationFailed { reason: String },
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no TX queue on port {port} has {requested_mbps} Mbps of free budget")]
    NoQueueBudget { port: u16, requested_mbps: u32 },

    #[error("5-tuple flow rule install failed on port {port}")]
    FlowInstallFailed { port: u16 },

    #[error("header-split requested but not supported by queue {queue}")]
    HeaderSplitUnsupported { queue: u16 },
}

#[derive(Debug, Error)]
pub enum DmaError {
    #[error("DMA channel exhausted: {in_use}/{capacity} lenders already issued")]
    ChannelExhausted { in_use: usize, capacity: usize },

    #[error("DMA copy submission failed: ring full")]
    SubmitRingFull,

    #[error("borrowed mbuf count underflow on drop")]
    BorrowUnderflow,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session parameter: {0}")]
    InvalidParam(String),

    #[error("no scheduler has spare bandwidth budget for this session")]
    NoSchedulerCapacity,

    #[error("session slot table is full")]
    SlotTableFull,

    #[error("stream dropped: {reason}")]
    StreamDrop { reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("plugin entry missing required field(s): {0}")]
    IncompletePluginEntry(String),
}

pub type Result<T> = std::result::Result<T, St2110Error>;
