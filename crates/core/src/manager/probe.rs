//! Probe-size backoff.
//!
//! When a stream transcoder dies mid-stream with an input I/O failure, the
//! usual cause is that it gave up analysing the camera stream too early.
//! Each failure doubles the probe size (up to a ceiling). The override
//! decays back to the camera's hint after a quiet period, unless failures
//! keep happening, in which case it becomes permanent.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Tunables for the probe-size backoff.
#[derive(Debug, Clone)]
pub struct ProbeSizePolicy {
    /// Largest probe size the backoff will reach, in bytes.
    pub ceiling: u32,
    /// Quiet period after which the override is dropped.
    pub decay: Duration,
    /// Failure count at which the override is kept for good.
    pub permanent_after: u32,
}

impl Default for ProbeSizePolicy {
    fn default() -> Self {
        Self {
            ceiling: 5_000_000,
            decay: Duration::from_secs(10 * 60),
            permanent_after: 10,
        }
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    failures: u32,
    /// Zero when no override is in effect.
    override_size: u32,
    /// Bumped on every failure so an older decay timer can't clear a newer
    /// override.
    generation: u64,
    decaying: bool,
}

/// Per-camera probe-size state, shared across sessions.
///
/// Decay timers are Tokio tasks; [`record_failure`](Self::record_failure)
/// must be called from within a runtime.
#[derive(Debug, Clone)]
pub struct ProbeSize {
    hint: u32,
    policy: ProbeSizePolicy,
    state: Arc<Mutex<ProbeState>>,
}

impl ProbeSize {
    pub fn new(hint: u32, policy: ProbeSizePolicy) -> Self {
        Self {
            hint,
            policy,
            state: Arc::new(Mutex::new(ProbeState::default())),
        }
    }

    /// Probe size to hand the next transcoder.
    pub fn effective(&self) -> u32 {
        match self.state.lock().override_size {
            0 => self.hint,
            size => size,
        }
    }

    pub fn failures(&self) -> u32 {
        self.state.lock().failures
    }

    pub fn override_size(&self) -> u32 {
        self.state.lock().override_size
    }

    /// True while a decay timer is armed.
    pub fn is_decaying(&self) -> bool {
        self.state.lock().decaying
    }

    /// Register one transcoder I/O failure and grow the probe size.
    ///
    /// Returns the new effective probe size.
    pub fn record_failure(&self) -> u32 {
        let mut state = self.state.lock();
        state.failures += 1;

        let current = match state.override_size {
            0 => self.hint,
            size => size,
        };
        state.override_size = current.saturating_mul(2).min(self.policy.ceiling);
        state.generation += 1;

        if state.failures < self.policy.permanent_after {
            state.decaying = true;
            let deadline = tokio::time::Instant::now() + self.policy.decay;
            self.arm_decay(state.generation, deadline);
        } else {
            state.decaying = false;
            tracing::warn!(
                failures = state.failures,
                probe_size = state.override_size,
                "probe size override is now permanent"
            );
        }

        tracing::info!(
            failures = state.failures,
            probe_size = state.override_size,
            "probe size increased"
        );
        state.override_size
    }

    /// Clear the override at `deadline` unless a newer failure superseded it.
    fn arm_decay(&self, generation: u64, deadline: tokio::time::Instant) {
        let state = Arc::downgrade(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = state.lock();
            if state.generation == generation {
                state.override_size = 0;
                state.decaying = false;
                tracing::debug!(failures = state.failures, "probe size override expired");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe() -> ProbeSize {
        ProbeSize::new(16384, ProbeSizePolicy::default())
    }

    async fn advance(by: Duration) {
        tokio::time::advance(by).await;
        // Let the woken decay task run.
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn doubles_from_hint() {
        let p = probe();
        assert_eq!(p.effective(), 16384);
        assert_eq!(p.record_failure(), 32768);
        assert_eq!(p.record_failure(), 65536);
        assert_eq!(p.effective(), 65536);
        assert_eq!(p.failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn capped_at_ceiling() {
        let p = ProbeSize::new(
            3_000_000,
            ProbeSizePolicy {
                permanent_after: 100,
                ..Default::default()
            },
        );
        assert_eq!(p.record_failure(), 5_000_000);
        assert_eq!(p.record_failure(), 5_000_000);
    }

    #[tokio::test(start_paused = true)]
    async fn override_decays() {
        let p = probe();
        p.record_failure();
        assert!(p.is_decaying());

        advance(Duration::from_secs(9 * 60)).await;
        assert_eq!(p.override_size(), 32768);

        advance(Duration::from_secs(61)).await;
        assert_eq!(p.override_size(), 0);
        assert_eq!(p.effective(), 16384);
        assert!(!p.is_decaying());
    }

    #[tokio::test(start_paused = true)]
    async fn decay_counts_from_the_failure() {
        let p = probe();
        p.record_failure();

        // The timer task has not run yet when the clock moves.
        tokio::time::advance(Duration::from_secs(10 * 60 + 1)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(p.override_size(), 0);
        assert!(!p.is_decaying());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_failure_restarts_decay() {
        let p = probe();
        p.record_failure();
        advance(Duration::from_secs(8 * 60)).await;
        p.record_failure();

        // First timer fires here but must not clear the newer override.
        advance(Duration::from_secs(3 * 60)).await;
        assert_eq!(p.override_size(), 65536);

        advance(Duration::from_secs(8 * 60)).await;
        assert_eq!(p.override_size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn nine_failures_still_decay() {
        let p = probe();
        for _ in 0..9 {
            p.record_failure();
        }
        assert!(p.is_decaying());
        advance(Duration::from_secs(11 * 60)).await;
        assert_eq!(p.override_size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ten_failures_are_permanent() {
        let p = probe();
        for _ in 0..10 {
            p.record_failure();
        }
        assert!(!p.is_decaying());
        let size = p.override_size();
        assert_eq!(size, 5_000_000);

        advance(Duration::from_secs(60 * 60)).await;
        assert_eq!(p.override_size(), size);
        assert_eq!(p.effective(), size);
    }
}
