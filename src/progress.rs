//! Observer trait for job lifecycle events.
//!
//! Inject an [`Arc<dyn JobEvents>`] via
//! [`crate::scheduler::JobScheduler::events`] to see every job as it moves
//! through the scheduler, including each line the converter prints.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events wherever they like (a progress bar, a metrics
//! counter, an admin chat) without the library knowing how the host
//! application communicates. The trait is `Send + Sync` because jobs run
//! concurrently on tokio tasks.
//!
//! # Example
//!
//! ```rust
//! use fb2kindle::{ConversionOutcome, JobEvents};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct FailureCounter(AtomicUsize);
//!
//! impl JobEvents for FailureCounter {
//!     fn on_job_complete(&self, _job_id: u64, outcome: &ConversionOutcome) {
//!         if !outcome.is_success() {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//! ```

use crate::output::ConversionOutcome;
use crate::request::ConversionRequest;
use std::sync::Arc;

/// Called by the scheduler as jobs progress.
///
/// All methods have no-op defaults so implementors override only what they
/// need. Events for different jobs may arrive concurrently from different
/// threads.
///
/// Every job gets exactly one `on_job_complete`, cancelled jobs included.
/// A panic in `on_job_complete` is logged and swallowed.
pub trait JobEvents: Send + Sync {
    /// The job was accepted; it may still wait for a free worker slot.
    fn on_job_submitted(&self, job_id: u64, request: &ConversionRequest) {
        let _ = (job_id, request);
    }

    /// The job holds a worker slot and is about to start the converter.
    fn on_job_started(&self, job_id: u64) {
        let _ = job_id;
    }

    /// The converter printed a line.
    fn on_output_line(&self, job_id: u64, line: &str) {
        let _ = (job_id, line);
    }

    /// The job produced its outcome and finished cleanup.
    fn on_job_complete(&self, job_id: u64, outcome: &ConversionOutcome) {
        let _ = (job_id, outcome);
    }
}

/// A no-op implementation. This is the scheduler's default.
pub struct NoopJobEvents;

impl JobEvents for NoopJobEvents {}

/// Convenience alias matching the type stored in the scheduler.
pub type JobEventsHandle = Arc<dyn JobEvents>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Profile;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        submitted: AtomicUsize,
        started: AtomicUsize,
        lines: AtomicUsize,
        completed: AtomicUsize,
    }

    impl JobEvents for Tracking {
        fn on_job_submitted(&self, _job_id: u64, _request: &ConversionRequest) {
            self.submitted.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_started(&self, _job_id: u64) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_output_line(&self, _job_id: u64, _line: &str) {
            self.lines.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_complete(&self, _job_id: u64, _outcome: &ConversionOutcome) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_events_do_not_panic() {
        let ev = NoopJobEvents;
        let req = ConversionRequest::new("/tmp/a.fb2", 1, "", Profile::Default);
        ev.on_job_submitted(1, &req);
        ev.on_job_started(1);
        ev.on_output_line(1, "hello");
        ev.on_job_complete(1, &ConversionOutcome::failure("x"));
    }

    #[test]
    fn tracking_events_receive_calls() {
        let t = Tracking::default();
        let req = ConversionRequest::new("/tmp/a.fb2", 1, "", Profile::Default);
        t.on_job_submitted(1, &req);
        t.on_job_started(1);
        t.on_output_line(1, "a");
        t.on_output_line(1, "b");
        t.on_job_complete(1, &ConversionOutcome::success("/out/a.epub", None));

        assert_eq!(t.submitted.load(Ordering::SeqCst), 1);
        assert_eq!(t.started.load(Ordering::SeqCst), 1);
        assert_eq!(t.lines.load(Ordering::SeqCst), 2);
        assert_eq!(t.completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_events_work() {
        let ev: JobEventsHandle = Arc::new(NoopJobEvents);
        ev.on_job_started(9);
    }
}
