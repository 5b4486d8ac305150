//! The `Tasklet` contract run by a [`super::Scheduler`].
//!
//! SPDX-License-Identifier: MPL-2.0

/// Returned by [`Tasklet::handler`] each round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskletResult {
    /// Nothing left to do this round; the scheduler may sleep.
    AllDone,
    /// More work is pending; keep the scheduler awake.
    HasPending,
}

/// A unit of cooperative work bound to one scheduler/core for its lifetime.
/// `handler` must never block -- per spec §5, suspension only happens at
/// scheduler boundaries, never inside a tasklet.
pub trait Tasklet: Send {
    /// Human-readable name, used in logs and stats.
    fn name(&self) -> &str;

    /// Called once when the tasklet is registered and the scheduler thread
    /// starts running it.
    fn start(&mut self) {}

    /// Called once, in reverse registration order, after `request_exit` has
    /// been observed by every tasklet.
    fn stop(&mut self) {}

    /// Non-blocking unit of work. Must return promptly.
    fn handler(&mut self) -> TaskletResult;

    /// Suggested sleep length when this tasklet (and every other tasklet on
    /// the same scheduler) returned `AllDone`. `0` means "yield, do not
    /// sleep".
    fn sleep_us_hint(&self) -> u32 {
        0
    }
}
