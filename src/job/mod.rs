/*!
 * Pull and Push jobs (§4.6, §4.7): the outbound transfer state machines.
 *
 * Per §9's design note, these are modeled as a phase tag plus a `step()`
 * that advances it, not as an OO state-subclass hierarchy. `step()` does
 * one bounded unit of work and returns whether the job has more to do;
 * `run()` is a convenience loop over `step()` for callers that just want
 * the whole thing to happen.
 */

pub mod pull;
pub mod push;

pub use pull::PullJob;
pub use push::PushJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobProgress {
    /// More `step()` calls are needed.
    Continue,
    /// The job reached `Done` or `Failed`; further `step()` calls are no-ops.
    Terminal,
}

/// How long a `step()` caller waits before re-checking a still-`Running`
/// queue. `run()`'s loop and the coordinator's tracking thread both just
/// call `step()` back to back, so gating it here throttles every caller
/// without needing its own wait.
pub(crate) const QUEUE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

/// `(1 + completed) / (2 + scheduled)` (§4.6, §4.7): the `+1`/`+2` bracket
/// the bucket-transfer phase between the step that created the job and
/// the step that finalizes it, so the fraction is never `0` before any
/// work starts and never `1.0` before finalization actually runs.
pub(crate) fn bucket_phase_progress(completed: u64, scheduled: u64) -> f64 {
    (1.0 + completed as f64) / (2.0 + scheduled as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_never_reaches_one_before_finalize() {
        let progress = bucket_phase_progress(10, 10);
        assert!(progress < 1.0);
    }

    #[test]
    fn progress_is_never_zero_once_scheduled() {
        let progress = bucket_phase_progress(0, 10);
        assert!(progress > 0.0);
    }
}
