//! Cooperative single-threaded-per-core tasklet scheduler (spec §4.3 / §5).
//!
//! No preemption: tasklets are polled round-robin on the scheduler's own OS
//! thread, and between rounds the scheduler is the only place a suspension
//! (`sleep`/spin) happens. This deliberately does not build on an async
//! runtime -- the contract ("handler never blocks", "suspension only at
//! scheduler boundaries", "sleep wakes aligned to PTP epoch") is exactly the
//! cooperative run-loop shape the original `st_sch` implements, and
//! expressing it as a plain loop keeps that real-time guarantee legible
//! rather than hiding it behind an executor's own scheduling heuristics.
//!
//! SPDX-License-Identifier: MPL-2.0

pub mod tasklet;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use tasklet::{Tasklet, TaskletResult};

use crate::clock::EpochClock;

/// Below this, the scheduler spins instead of sleeping (avoids paying timer
/// wakeup latency for very short naps).
const DEFAULT_SPIN_FLOOR_US: u32 = 50;

#[derive(Clone)]
pub struct SchedulerConfig {
    /// Sleeps shorter than this spin instead of calling into the OS timer.
    pub spin_floor_us: u32,
    /// If set, sleep wakeups are aligned to the nearest epoch boundary of
    /// this frame time instead of firing after a flat duration.
    pub ptp_aligned_wakeup_frame_time_ns: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { spin_floor_us: DEFAULT_SPIN_FLOOR_US, ptp_aligned_wakeup_frame_time_ns: None }
    }
}

/// Cooperative scheduler owning a set of tasklets, meant to be run on one
/// dedicated OS thread (spec §5: "parallelism is session-level; within a
/// thread there is no parallelism").
pub struct Scheduler {
    name: String,
    tasklets: Vec<Box<dyn Tasklet>>,
    config: SchedulerConfig,
    exit_requested: Arc<AtomicBool>,
    clock: Option<Arc<EpochClock>>,
}

/// A cloneable handle used to request scheduler shutdown from another
/// thread.
#[derive(Clone)]
pub struct SchedulerHandle {
    exit_requested: Arc<AtomicBool>,
}

impl SchedulerHandle {
    pub fn request_exit(&self) {
        self.exit_requested.store(true, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(name: impl Into<String>, config: SchedulerConfig) -> Self {
        Scheduler {
            name: name.into(),
            tasklets: Vec::new(),
            config,
            exit_requested: Arc::new(AtomicBool::new(false)),
            clock: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<EpochClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle { exit_requested: self.exit_requested.clone() }
    }

    /// Registration: tasklets are polled in the order they were registered.
    pub fn register(&mut self, tasklet: Box<dyn Tasklet>) {
        tracing::debug!(scheduler = %self.name, tasklet = tasklet.name(), "registering tasklet");
        self.tasklets.push(tasklet);
    }

    /// Runs until `request_exit` is observed, calling `start()` on every
    /// tasklet first and `stop()` on all of them (in reverse registration
    /// order) on the way out.
    pub fn run(&mut self) {
        for t in self.tasklets.iter_mut() {
            t.start();
        }

        while !self.exit_requested.load(Ordering::Acquire) {
            let all_done = self.run_round();
            if all_done {
                self.sleep_between_rounds();
            }
        }

        for t in self.tasklets.iter_mut().rev() {
            t.stop();
        }
        tracing::info!(scheduler = %self.name, "scheduler stopped");
    }

    /// Runs exactly one round over every registered tasklet. Returns `true`
    /// if every tasklet reported `AllDone`. Exposed separately from `run()`
    /// so tests can drive the scheduler deterministically.
    pub fn run_round(&mut self) -> bool {
        let mut all_done = true;
        for t in self.tasklets.iter_mut() {
            if self.exit_requested.load(Ordering::Acquire) {
                break;
            }
            if t.handler() == TaskletResult::HasPending {
                all_done = false;
            }
        }
        all_done
    }

    fn sleep_between_rounds(&self) {
        let min_hint_us = self.tasklets.iter().map(|t| t.sleep_us_hint()).min();
        let Some(hint_us) = min_hint_us else {
            return;
        };
        if hint_us == 0 {
            std::thread::yield_now();
            return;
        }
        if hint_us < self.config.spin_floor_us {
            // Busy-spin for very short sleeps rather than pay OS timer cost.
            let deadline = std::time::Instant::now() + Duration::from_micros(hint_us as u64);
            while std::time::Instant::now() < deadline {
                std::hint::spin_loop();
            }
            return;
        }

        match (self.config.ptp_aligned_wakeup_frame_time_ns, &self.clock) {
            (Some(frame_time_ns), Some(clock)) => {
                let now_ns = clock.ptp_now_ns();
                let next_epoch_ns = ((now_ns / frame_time_ns) + 1) * frame_time_ns;
                let wait_ns = next_epoch_ns.saturating_sub(now_ns);
                std::thread::sleep(Duration::from_nanos(wait_ns.min(hint_us as u64 * 1000 * 4)));
            }
            _ => std::thread::sleep(Duration::from_micros(hint_us as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingTasklet {
        remaining: AtomicU32,
    }

    impl Tasklet for CountingTasklet {
        fn name(&self) -> &str {
            "counting"
        }

        fn handler(&mut self) -> TaskletResult {
            let prev = self.remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                if v == 0 {
                    None
                } else {
                    Some(v - 1)
                }
            });
            match prev {
                Ok(_) => TaskletResult::HasPending,
                Err(_) => TaskletResult::AllDone,
            }
        }
    }

    #[test]
    fn round_reports_all_done_once_every_tasklet_drains() {
        let mut sched = Scheduler::new("test", SchedulerConfig::default());
        sched.register(Box::new(CountingTasklet { remaining: AtomicU32::new(2) }));

        assert!(!sched.run_round());
        assert!(!sched.run_round());
        assert!(sched.run_round());
    }

    #[test]
    fn request_exit_stops_the_run_loop() {
        struct Forever;
        impl Tasklet for Forever {
            fn name(&self) -> &str {
                "forever"
            }
            fn handler(&mut self) -> TaskletResult {
                TaskletResult::HasPending
            }
        }

        let mut sched = Scheduler::new("test", SchedulerConfig::default());
        sched.register(Box::new(Forever));
        let handle = sched.handle();
        handle.request_exit();
        sched.run(); // must return promptly since exit was requested before the first round
    }
}
