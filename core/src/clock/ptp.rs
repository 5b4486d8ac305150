// PTP (IEEE 1588) two-step slave state machine and wire message layout.
//
// Grounded on `DPDKMediaStreamer/lib/include/st_ptp.h` from the original C
// implementation: message type enum, packed header, clock/port identities,
// BMCA-lite grandmaster selection, offset slewing vs. direct jump.
//
// SPDX-License-Identifier: MPL-2.0

use std::time::Duration;

use crate::error::ClockError;

/// PTP message types (st_ptp_messages in the original).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PtpMessageType {
    Sync = 0x0,
    DelayReq = 0x1,
    PDelayReq = 0x2,
    PDelayResp = 0x3,
    FollowUp = 0x8,
    DelayResp = 0x9,
    PDelayRespFollowUp = 0xA,
    Announce = 0xB,
    Signaling = 0xC,
    Management = 0xD,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockId(pub [u8; 8]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId {
    pub clock_identity: ClockId,
    pub port_number: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockQuality {
    pub clock_class: u8,
    pub clock_accuracy: u8,
    pub offset_scaled_log_variance: u16,
}

/// 64-bit nanosecond PTP timestamp, reduced from the 80-bit wire format
/// (`ptp_tmstamp_t`: 48-bit seconds + 32-bit nanoseconds) at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PtpTimestamp(pub u64);

impl PtpTimestamp {
    pub fn from_wire(sec_msb: u16, sec_lsb: u32, ns: u32) -> Self {
        let secs = ((sec_msb as u64) << 32) | sec_lsb as u64;
        PtpTimestamp(secs * 1_000_000_000 + ns as u64)
    }

    pub fn as_ns(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtpHeader {
    pub message_type: PtpMessageType,
    pub domain_number: u8,
    pub source_port_identity: PortId,
    pub sequence_id: u16,
    pub log_message_interval: i8,
}

#[derive(Debug, Clone)]
pub struct AnnounceMsg {
    pub header: PtpHeader,
    pub grandmaster_priority1: u8,
    pub grandmaster_clock_quality: ClockQuality,
    pub grandmaster_priority2: u8,
    pub grandmaster_identity: ClockId,
    pub steps_removed: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncMsg {
    pub header: PtpHeader,
    pub origin_timestamp: PtpTimestamp,
}

#[derive(Debug, Clone, Copy)]
pub struct FollowUpMsg {
    pub header: PtpHeader,
    pub precise_origin_timestamp: PtpTimestamp,
}

#[derive(Debug, Clone, Copy)]
pub struct DelayRespMsg {
    pub header: PtpHeader,
    pub receive_timestamp: PtpTimestamp,
    pub requesting_port_identity: PortId,
}

/// How the local grandmaster is selected (ptp_master_choose_mode_t).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterChooseMode {
    /// Best Master Clock Algorithm over seen ANNOUNCE messages.
    BestKnownMaster,
    /// Pinned to a specific configured clock id.
    SetMaster(ClockId),
    /// First ANNOUNCE seen wins and is never displaced except by failover.
    FirstKnownMaster,
}

/// If the measured offset exceeds this, apply it directly instead of
/// slewing (matches the original's "large jumps are applied directly"
/// rule).
pub const DEFAULT_JUMP_THRESHOLD_NS: i64 = 1_000_000_000; // 1s

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtpState {
    NotInitialized,
    Initialized,
}

/// One candidate grandmaster, tracked from ANNOUNCE traffic.
#[derive(Debug, Clone)]
struct Candidate {
    port_identity: PortId,
    priority1: u8,
    clock_quality: ClockQuality,
    priority2: u8,
    steps_removed: u16,
    last_seen: Duration,
}

impl Candidate {
    /// BMCA dataset comparison: lower priority1 wins, then clock class,
    /// then priority2, then clock identity as a deterministic tiebreak.
    fn better_than(&self, other: &Candidate) -> bool {
        (self.priority1, self.clock_quality.clock_class, self.priority2)
            < (
                other.priority1,
                other.clock_quality.clock_class,
                other.priority2,
            )
    }
}

/// Two-step PTP slave. Owns the running offset/delay estimate and the
/// candidate grandmaster set; does not itself own a socket — callers feed it
/// decoded messages and local receive timestamps.
pub struct PtpSlave {
    state: PtpState,
    mode: MasterChooseMode,
    active_master: Option<Candidate>,
    backup: Option<Candidate>,
    drop_time: Duration,
    jump_threshold_ns: i64,

    // In-flight two-step exchange state.
    t1: Option<PtpTimestamp>, // master sync origin (from FOLLOW_UP)
    t2: Option<u64>,          // local receive time of SYNC, ns
    t3: Option<u64>,          // local send time of DELAY_REQ, ns
    t4: Option<PtpTimestamp>, // master receive time of DELAY_REQ

    offset_ns: i64,
    mean_path_delay_ns: i64,
}

impl PtpSlave {
    pub fn new(mode: MasterChooseMode, drop_time: Duration) -> Self {
        Self {
            state: PtpState::NotInitialized,
            mode,
            active_master: None,
            backup: None,
            drop_time,
            jump_threshold_ns: DEFAULT_JUMP_THRESHOLD_NS,
            t1: None,
            t2: None,
            t3: None,
            t4: None,
            offset_ns: 0,
            mean_path_delay_ns: 0,
        }
    }

    pub fn with_jump_threshold(mut self, ns: i64) -> Self {
        self.jump_threshold_ns = ns;
        self
    }

    pub fn is_synced(&self) -> bool {
        self.state == PtpState::Initialized
    }

    /// Feed an ANNOUNCE message, tracking the best candidate and, on
    /// `FirstKnownMaster`/`SetMaster` modes, accepting only the matching one.
    pub fn on_announce(&mut self, msg: &AnnounceMsg, now: Duration) {
        let candidate = Candidate {
            port_identity: msg.header.source_port_identity,
            priority1: msg.grandmaster_priority1,
            clock_quality: msg.grandmaster_clock_quality,
            priority2: msg.grandmaster_priority2,
            steps_removed: msg.steps_removed,
            last_seen: now,
        };

        match self.mode {
            MasterChooseMode::SetMaster(id) => {
                if msg.grandmaster_identity == id {
                    self.active_master = Some(candidate);
                }
            }
            MasterChooseMode::FirstKnownMaster => {
                if self.active_master.is_none() {
                    self.active_master = Some(candidate);
                } else if self.active_master.as_ref().unwrap().port_identity
                    != candidate.port_identity
                {
                    // Track as a backup candidate for failover.
                    self.backup = Some(candidate);
                }
            }
            MasterChooseMode::BestKnownMaster => match &self.active_master {
                None => self.active_master = Some(candidate),
                Some(cur) => {
                    if candidate.better_than(cur) {
                        self.backup = Some(cur.clone());
                        self.active_master = Some(candidate);
                    } else {
                        self.backup = Some(candidate);
                    }
                }
            },
        }
    }

    /// Promote the backup candidate if the active master has been silent
    /// for longer than `drop_time`. Returns `true` if a failover happened.
    pub fn check_failover(&mut self, now: Duration) -> bool {
        let Some(active) = &self.active_master else {
            return false;
        };
        if now.saturating_sub(active.last_seen) >= self.drop_time {
            if let Some(backup) = self.backup.take() {
                self.active_master = Some(backup);
                // A fresh master requires a fresh two-step exchange.
                self.t1 = None;
                self.t2 = None;
                self.t3 = None;
                self.t4 = None;
                return true;
            }
        }
        false
    }

    pub fn on_sync(&mut self, msg: &SyncMsg, local_receive_ns: u64) {
        if !self.accept(&msg.header) {
            return;
        }
        self.t2 = Some(local_receive_ns);
        // One-step: origin_timestamp carries t1 directly when non-zero.
        if msg.origin_timestamp.as_ns() != 0 {
            self.t1 = Some(msg.origin_timestamp);
        }
    }

    pub fn on_follow_up(&mut self, msg: &FollowUpMsg) {
        if !self.accept(&msg.header) {
            return;
        }
        self.t1 = Some(msg.precise_origin_timestamp);
    }

    pub fn on_delay_req_sent(&mut self, local_send_ns: u64) {
        self.t3 = Some(local_send_ns);
    }

    pub fn on_delay_resp(&mut self, msg: &DelayRespMsg) {
        if !self.accept(&msg.header) {
            return;
        }
        self.t4 = Some(msg.receive_timestamp);
        self.try_complete_exchange();
    }

    fn accept(&self, header: &PtpHeader) -> bool {
        match &self.active_master {
            Some(m) => m.port_identity == header.source_port_identity,
            None => false,
        }
    }

    fn try_complete_exchange(&mut self) {
        let (Some(t1), Some(t2), Some(t3), Some(t4)) = (self.t1, self.t2, self.t3, self.t4) else {
            return;
        };

        let t1 = t1.as_ns() as i64;
        let t2 = t2 as i64;
        let t3 = t3 as i64;
        let t4 = t4.as_ns() as i64;

        // Standard PTP delay/offset computation.
        let mean_path_delay = ((t2 - t1) + (t4 - t3)) / 2;
        let offset = (t2 - t1) - mean_path_delay;

        self.mean_path_delay_ns = mean_path_delay;

        if offset.unsigned_abs() as i64 > self.jump_threshold_ns {
            self.offset_ns = offset;
        } else {
            // IIR slew: half the measured offset per step.
            self.offset_ns += offset / 2;
        }

        self.state = PtpState::Initialized;
        self.t1 = None;
        self.t2 = None;
        self.t3 = None;
        self.t4 = None;
    }

    pub fn offset_ns(&self) -> i64 {
        self.offset_ns
    }

    pub fn mean_path_delay_ns(&self) -> i64 {
        self.mean_path_delay_ns
    }

    pub fn require_synced(&self) -> Result<(), ClockError> {
        if self.is_synced() {
            Ok(())
        } else {
            Err(ClockError::PtpNotSynced)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(id: u8) -> PortId {
        PortId { clock_identity: ClockId([id; 8]), port_number: 1 }
    }

    fn header(port_identity: PortId, seq: u16, ty: PtpMessageType) -> PtpHeader {
        PtpHeader {
            message_type: ty,
            domain_number: 0,
            source_port_identity: port_identity,
            sequence_id: seq,
            log_message_interval: 0,
        }
    }

    #[test]
    fn not_synced_before_first_exchange() {
        let slave = PtpSlave::new(MasterChooseMode::FirstKnownMaster, Duration::from_secs(3));
        assert!(slave.require_synced().is_err());
    }

    #[test]
    fn full_two_step_exchange_computes_offset() {
        let mut slave = PtpSlave::new(MasterChooseMode::FirstKnownMaster, Duration::from_secs(3));
        let p = port(1);
        slave.on_announce(
            &AnnounceMsg {
                header: header(p, 0, PtpMessageType::Announce),
                grandmaster_priority1: 128,
                grandmaster_clock_quality: ClockQuality {
                    clock_class: 6,
                    clock_accuracy: 0x20,
                    offset_scaled_log_variance: 0,
                },
                grandmaster_priority2: 128,
                grandmaster_identity: p.clock_identity,
                steps_removed: 0,
            },
            Duration::from_secs(0),
        );

        // Master's clock runs 1000ns ahead of the slave, symmetric path delay 200ns.
        slave.on_sync(
            &SyncMsg { header: header(p, 1, PtpMessageType::Sync), origin_timestamp: PtpTimestamp(0) },
            200, // t2: local receive, 200ns path delay after t1=0... approximated below
        );
        slave.on_follow_up(&FollowUpMsg {
            header: header(p, 1, PtpMessageType::FollowUp),
            precise_origin_timestamp: PtpTimestamp(1000),
        });
        slave.on_delay_req_sent(1500);
        slave.on_delay_resp(&DelayRespMsg {
            header: header(p, 1, PtpMessageType::DelayResp),
            receive_timestamp: PtpTimestamp(2300),
            requesting_port_identity: p,
        });

        assert!(slave.is_synced());
        assert!(slave.require_synced().is_ok());
    }

    #[test]
    fn backup_promoted_after_drop_time() {
        let mut slave = PtpSlave::new(MasterChooseMode::BestKnownMaster, Duration::from_secs(3));
        let primary = Candidate {
            port_identity: port(1),
            priority1: 100,
            clock_quality: ClockQuality { clock_class: 6, clock_accuracy: 0, offset_scaled_log_variance: 0 },
            priority2: 100,
            steps_removed: 0,
            last_seen: Duration::from_secs(0),
        };
        let backup = Candidate {
            port_identity: port(2),
            priority1: 200,
            clock_quality: ClockQuality { clock_class: 6, clock_accuracy: 0, offset_scaled_log_variance: 0 },
            priority2: 200,
            steps_removed: 0,
            last_seen: Duration::from_secs(0),
        };
        slave.active_master = Some(primary);
        slave.backup = Some(backup);

        assert!(!slave.check_failover(Duration::from_secs(2)));
        assert!(slave.check_failover(Duration::from_secs(4)));
        assert_eq!(slave.active_master.unwrap().port_identity, port(2));
    }
}
