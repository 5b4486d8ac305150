//! Session manager: attach/detach, admission control, and CPU-busy
//! migration across schedulers (spec §4.7).
//!
//! SPDX-License-Identifier: MPL-2.0

use parking_lot::Mutex;

use crate::error::SessionError;

/// Per-scheduler bandwidth budget tracked by the manager (spec §4.7
//  "admission control").
struct SchedulerBudget {
    capacity_bps: u64,
    committed_bps: u64,
    /// Sessions pinned here by `DISABLE_MIGRATE`, or just currently
    /// assigned -- tracked by id only; the scheduler itself owns the
    /// tasklets.
    session_ids: Vec<u64>,
}

impl SchedulerBudget {
    fn remaining_bps(&self) -> u64 {
        self.capacity_bps.saturating_sub(self.committed_bps)
    }
}

/// One slot in the manager's fixed session table. A `parking_lot::Mutex`
/// per slot lets `tasklet_handler` `try_lock` each slot independently so a
/// concurrent `detach` never blocks the whole table (spec §4.7: "spinlock
/// per slot... detach can race safely with the tasklet").
struct Slot {
    session_id: Option<u64>,
    bandwidth_bps: u64,
    scheduler_idx: Option<usize>,
    pinned: bool,
    cpu_busy_score: f64,
}

impl Slot {
    fn empty() -> Self {
        Slot { session_id: None, bandwidth_bps: 0, scheduler_idx: None, pinned: false, cpu_busy_score: 0.0 }
    }
}

/// Manages one media type's sessions across a fixed set of schedulers. Each
/// session is pinned to exactly one scheduler for its lifetime unless the
/// manager migrates it (spec §5: "a session is bound to exactly one thread
/// for its lifetime unless migrated by the manager").
pub struct SessionManager {
    slots: Vec<Mutex<Slot>>,
    schedulers: Vec<Mutex<SchedulerBudget>>,
    max_idx: std::sync::atomic::AtomicUsize,
    next_session_id: std::sync::atomic::AtomicU64,
}

impl SessionManager {
    pub fn new(max_sessions: usize, scheduler_capacities_bps: &[u64]) -> Self {
        SessionManager {
            slots: (0..max_sessions).map(|_| Mutex::new(Slot::empty())).collect(),
            schedulers: scheduler_capacities_bps
                .iter()
                .map(|&capacity_bps| Mutex::new(SchedulerBudget { capacity_bps, committed_bps: 0, session_ids: Vec::new() }))
                .collect(),
            max_idx: std::sync::atomic::AtomicUsize::new(0),
            next_session_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Finds a scheduler with enough spare budget and an empty table slot,
    /// reserves both, and returns the new session's id. Errors with
    /// `NoSchedulerCapacity` if no scheduler can take the bandwidth, or
    /// `SlotTableFull` if every table slot is occupied.
    pub fn attach(&self, bandwidth_bps: u64, pinned: bool) -> Result<u64, SessionError> {
        let scheduler_idx = self
            .schedulers
            .iter()
            .enumerate()
            .find(|(_, s)| s.lock().remaining_bps() >= bandwidth_bps)
            .map(|(i, _)| i)
            .ok_or(SessionError::NoSchedulerCapacity)?;

        let slot_idx = self
            .slots
            .iter()
            .position(|s| s.lock().session_id.is_none())
            .ok_or(SessionError::SlotTableFull)?;

        let session_id = self.next_session_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        {
            let mut sched = self.schedulers[scheduler_idx].lock();
            sched.committed_bps += bandwidth_bps;
            sched.session_ids.push(session_id);
        }
        {
            let mut slot = self.slots[slot_idx].lock();
            *slot = Slot { session_id: Some(session_id), bandwidth_bps, scheduler_idx: Some(scheduler_idx), pinned, cpu_busy_score: 0.0 };
        }

        self.max_idx.fetch_max(slot_idx + 1, std::sync::atomic::Ordering::Relaxed);
        tracing::info!(session_id, scheduler_idx, bandwidth_bps, "session attached");
        Ok(session_id)
    }

    /// Releases `session_id`'s slot and scheduler budget. A no-op if the id
    /// is not found (already detached).
    pub fn detach(&self, session_id: u64) {
        let max_idx = self.max_idx.load(std::sync::atomic::Ordering::Relaxed);
        for slot_lock in &self.slots[..max_idx] {
            let mut slot = slot_lock.lock();
            if slot.session_id == Some(session_id) {
                if let Some(sched_idx) = slot.scheduler_idx {
                    let mut sched = self.schedulers[sched_idx].lock();
                    sched.committed_bps = sched.committed_bps.saturating_sub(slot.bandwidth_bps);
                    sched.session_ids.retain(|&id| id != session_id);
                }
                *slot = Slot::empty();
                tracing::info!(session_id, "session detached");
                return;
            }
        }
    }

    /// Updates the CPU-busy score used by `rebalance`. Pinned sessions
    /// still record a score (for observability) but are never migrated.
    pub fn record_busy_score(&self, session_id: u64, score: f64) {
        let max_idx = self.max_idx.load(std::sync::atomic::Ordering::Relaxed);
        for slot_lock in &self.slots[..max_idx] {
            let mut slot = slot_lock.lock();
            if slot.session_id == Some(session_id) {
                slot.cpu_busy_score = score;
                return;
            }
        }
    }

    /// Moves the busiest unpinned session off its current scheduler onto
    /// the least-loaded one with spare budget, if doing so would reduce
    /// the max-min imbalance. Returns the migrated session id, if any.
    pub fn rebalance(&self) -> Option<u64> {
        let max_idx = self.max_idx.load(std::sync::atomic::Ordering::Relaxed);

        let busiest = self.slots[..max_idx]
            .iter()
            .filter_map(|s| {
                let slot = s.lock();
                (!slot.pinned && slot.session_id.is_some())
                    .then(|| (slot.session_id.unwrap(), slot.scheduler_idx.unwrap(), slot.bandwidth_bps, slot.cpu_busy_score))
            })
            .max_by(|a, b| a.3.partial_cmp(&b.3).unwrap_or(std::cmp::Ordering::Equal))?;

        let (session_id, from_idx, bandwidth_bps, _) = busiest;

        let target_idx = self
            .schedulers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != from_idx)
            .filter(|(_, s)| s.lock().remaining_bps() >= bandwidth_bps)
            .min_by_key(|(_, s)| s.lock().committed_bps)
            .map(|(i, _)| i)?;

        {
            let mut from = self.schedulers[from_idx].lock();
            from.committed_bps = from.committed_bps.saturating_sub(bandwidth_bps);
            from.session_ids.retain(|&id| id != session_id);
        }
        {
            let mut to = self.schedulers[target_idx].lock();
            to.committed_bps += bandwidth_bps;
            to.session_ids.push(session_id);
        }
        for slot_lock in &self.slots[..max_idx] {
            let mut slot = slot_lock.lock();
            if slot.session_id == Some(session_id) {
                slot.scheduler_idx = Some(target_idx);
            }
        }

        tracing::debug!(session_id, from_idx, target_idx, "session migrated");
        Some(session_id)
    }
}
