//! Job scheduler: run conversions off the caller's thread.
//!
//! ## Why a runtime handle?
//!
//! A chat front-end typically sits in its own polling loop, often on a plain
//! thread. [`JobScheduler::submit`] spawns onto a stored tokio [`Handle`], so
//! it returns immediately from any thread, inside the runtime or not.
//!
//! ## Guarantees
//!
//! * Every submitted request gets exactly one [`ConversionOutcome`] through
//!   its [`JobHandle`]. Panics, cancellation and internal errors all become
//!   `Failure` outcomes. The handle never yields an error.
//! * The completion callback runs exactly once per job, for every outcome,
//!   cancelled jobs included. A panicking callback is logged and does not
//!   change the outcome.
//! * Jobs are independent: no ordering between them, no shared state beyond
//!   the filesystem.
//! * With `max_concurrent_jobs` set, at most that many converters run at
//!   once. Further jobs wait for a slot.

use crate::config::ConverterConfig;
use crate::convert::{self, outcome_from_error};
use crate::error::ConvertError;
use crate::output::ConversionOutcome;
use crate::pipeline::process::{ProcessLauncher, SystemLauncher};
use crate::progress::{JobEvents, NoopJobEvents};
use crate::request::ConversionRequest;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info_span, warn, Instrument};

/// Accepts conversion requests and runs each as its own tokio task.
pub struct JobScheduler {
    config: Arc<ConverterConfig>,
    launcher: Arc<dyn ProcessLauncher>,
    events: Arc<dyn JobEvents>,
    slots: Option<Arc<Semaphore>>,
    runtime: Handle,
    next_id: AtomicU64,
}

impl JobScheduler {
    /// Create a scheduler on the current tokio runtime.
    ///
    /// # Errors
    /// [`ConvertError::Internal`] when called outside a runtime.
    pub fn new(config: ConverterConfig) -> Result<Self, ConvertError> {
        let runtime = Handle::try_current()
            .map_err(|e| ConvertError::Internal(format!("no tokio runtime: {e}")))?;
        Ok(Self::with_runtime(config, runtime))
    }

    /// Create a scheduler that spawns onto `runtime`.
    pub fn with_runtime(config: ConverterConfig, runtime: Handle) -> Self {
        let slots = config
            .max_concurrent_jobs
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        Self {
            config: Arc::new(config),
            launcher: Arc::new(SystemLauncher),
            events: Arc::new(NoopJobEvents),
            slots,
            runtime,
            next_id: AtomicU64::new(0),
        }
    }

    /// Replace the process launcher (test doubles, sandboxes).
    pub fn launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Receive job lifecycle events.
    pub fn events(mut self, events: Arc<dyn JobEvents>) -> Self {
        self.events = events;
        self
    }

    /// Configuration used by [`JobScheduler::submit`].
    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Queue `request` and return immediately.
    pub fn submit(&self, request: ConversionRequest) -> JobHandle {
        self.submit_with(request, None, |_| {})
    }

    /// Queue `request` with a one-off configuration.
    pub fn submit_with_config(&self, request: ConversionRequest, config: ConverterConfig) -> JobHandle {
        self.submit_with(request, Some(config), |_| {})
    }

    /// Queue `request` and run `on_complete` with its outcome on the worker.
    ///
    /// The returned handle resolves after `on_complete` has returned.
    pub fn submit_then<F>(&self, request: ConversionRequest, on_complete: F) -> JobHandle
    where
        F: FnOnce(&ConversionOutcome) + Send + 'static,
    {
        self.submit_with(request, None, on_complete)
    }

    /// General form of the `submit*` methods.
    pub fn submit_with<F>(
        &self,
        request: ConversionRequest,
        config: Option<ConverterConfig>,
        on_complete: F,
    ) -> JobHandle
    where
        F: FnOnce(&ConversionOutcome) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.events.on_job_submitted(id, &request);

        let config = config.map(Arc::new).unwrap_or_else(|| Arc::clone(&self.config));
        let launcher = Arc::clone(&self.launcher);
        let events = Arc::clone(&self.events);
        let slots = self.slots.clone();
        let span = info_span!("job", id, requester = request.requester_id());
        let (cancel, mut cancelled) = watch::channel(false);

        let task = async move {
            let job = async {
                let _permit = match slots {
                    Some(slots) => Some(slots.acquire_owned().await.map_err(|_| {
                        ConvertError::Internal("scheduler slots closed".into())
                    })?),
                    None => None,
                };
                events.on_job_started(id);
                let mut on_line = |line: &str| events.on_output_line(id, line);
                Ok::<_, ConvertError>(
                    convert::execute_with(launcher.as_ref(), &request, &config, &mut on_line)
                        .await,
                )
            };

            // A dropped handle closes the channel, which disables the
            // cancel branch rather than firing it.
            let outcome = tokio::select! {
                result = AssertUnwindSafe(job).catch_unwind() => match result {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => outcome_from_error(&e),
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!("Job panicked: {}", message);
                        outcome_from_error(&ConvertError::Internal(format!("job panicked: {message}")))
                    }
                },
                Ok(_) = cancelled.wait_for(|c| *c) => {
                    warn!("Job cancelled");
                    outcome_from_error(&ConvertError::Cancelled)
                }
            };

            guarded("JobEvents::on_job_complete", || events.on_job_complete(id, &outcome));
            guarded("completion callback", || on_complete(&outcome));
            outcome
        }
        .instrument(span);

        JobHandle {
            id,
            cancel,
            task: self.runtime.spawn(task),
        }
    }
}

/// Run a caller-supplied hook, logging instead of unwinding if it panics.
fn guarded(what: &str, hook: impl FnOnce()) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(hook)) {
        error!("{} panicked: {}", what, panic_message(panic.as_ref()));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

impl fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobScheduler")
            .field("config", &self.config)
            .field("available_slots", &self.slots.as_ref().map(|s| s.available_permits()))
            .field("submitted", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

/// Future of one job's outcome.
///
/// Dropping the handle detaches the job; it still runs to completion. Use
/// [`JobHandle::cancel`] to stop it.
#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    cancel: watch::Sender<bool>,
    task: JoinHandle<ConversionOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop the job. The converter, if running, is killed with its whole
    /// process group, the completion callback sees a cancelled failure, and
    /// the handle resolves to it. Cleanup does not run for a cancelled job.
    /// No effect once the job has finished.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for JobHandle {
    type Output = ConversionOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(outcome) => outcome,
            // Only reachable when the runtime shuts down under the job.
            Err(e) if e.is_cancelled() => {
                warn!(job = id, "Job cancelled");
                outcome_from_error(&ConvertError::Cancelled)
            }
            Err(e) => {
                error!(job = id, "Job task failed: {}", e);
                outcome_from_error(&ConvertError::Internal(format!("job task failed: {e}")))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::CANCELLED_MESSAGE;
    use crate::pipeline::process::RunningProcess;
    use crate::request::Profile;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Every launch succeeds with the given transcript.
    struct Fixed(Vec<String>, i32);

    impl ProcessLauncher for Fixed {
        fn launch(&self, _: &Path, _: &Path, _: &[String]) -> Result<RunningProcess, ConvertError> {
            Ok(RunningProcess::from_transcript(self.0.clone(), self.1))
        }
    }

    /// Replays a transcript slowly and records peak concurrency.
    struct Slow {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl ProcessLauncher for Slow {
        fn launch(&self, _: &Path, _: &Path, _: &[String]) -> Result<RunningProcess, ConvertError> {
            let running = Arc::clone(&self.running);
            let peak = Arc::clone(&self.peak);
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let lines = futures::stream::once(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                r#"Conversion completed {"to":"/out/x.epub"}"#.to_string()
            });
            let mut p = RunningProcess::from_transcript(Vec::<String>::new(), 0);
            *p.lines() = Box::pin(lines);
            Ok(p)
        }
    }

    /// Never produces output.
    struct Hang;

    impl ProcessLauncher for Hang {
        fn launch(&self, _: &Path, _: &Path, _: &[String]) -> Result<RunningProcess, ConvertError> {
            let mut p = RunningProcess::from_transcript(Vec::<String>::new(), 0);
            *p.lines() = Box::pin(futures::stream::pending());
            Ok(p)
        }
    }

    fn request(id: i64) -> ConversionRequest {
        ConversionRequest::new(format!("/data/{id}_book.fb2"), id, "", Profile::Default)
    }

    fn success_transcript() -> Fixed {
        Fixed(
            vec![r#"Conversion completed {"elapsed":"1s","to":"/out/book.epub"}"#.to_string()],
            0,
        )
    }

    #[tokio::test]
    async fn submit_resolves_with_outcome() {
        let s = JobScheduler::new(ConverterConfig::default())
            .unwrap()
            .launcher(Arc::new(success_transcript()));
        let handle = s.submit(request(1));
        assert_eq!(handle.id(), 1);
        let outcome = handle.await;
        assert!(outcome.is_success());
        assert_eq!(outcome.output_path(), Some(Path::new("/out/book.epub")));
    }

    #[tokio::test]
    async fn job_ids_increase() {
        let s = JobScheduler::new(ConverterConfig::default())
            .unwrap()
            .launcher(Arc::new(success_transcript()));
        let a = s.submit(request(1));
        let b = s.submit(request(2));
        assert!(b.id() > a.id());
        a.await;
        b.await;
    }

    #[tokio::test]
    async fn callback_runs_before_handle_resolves() {
        let s = JobScheduler::new(ConverterConfig::default())
            .unwrap()
            .launcher(Arc::new(success_transcript()));
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let outcome = s
            .submit_then(request(1), move |o| {
                *sink.lock().unwrap() = Some(o.message().to_string());
            })
            .await;
        assert!(outcome.is_success());
        assert_eq!(seen.lock().unwrap().as_deref(), Some("Conversion successful"));
    }

    #[tokio::test]
    async fn panicking_callback_still_resolves() {
        let s = JobScheduler::new(ConverterConfig::default())
            .unwrap()
            .launcher(Arc::new(success_transcript()));
        let outcome = s.submit_then(request(1), |_| panic!("front-end bug")).await;
        assert!(outcome.is_success(), "{}", outcome.message());
        assert_eq!(outcome.output_path(), Some(Path::new("/out/book.epub")));
    }

    /// Panics inside `launch`.
    struct Buggy;

    impl ProcessLauncher for Buggy {
        fn launch(&self, _: &Path, _: &Path, _: &[String]) -> Result<RunningProcess, ConvertError> {
            panic!("launcher bug")
        }
    }

    #[tokio::test]
    async fn panicking_launcher_still_runs_callback() {
        let s = JobScheduler::new(ConverterConfig::default())
            .unwrap()
            .launcher(Arc::new(Buggy));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let outcome = s
            .submit_then(request(1), move |o| {
                sink.lock().unwrap().push(o.message().to_string());
            })
            .await;
        assert!(!outcome.is_success());
        assert!(outcome.message().contains("launcher bug"), "{}", outcome.message());
        assert_eq!(*seen.lock().unwrap(), vec![outcome.message().to_string()]);
    }

    #[tokio::test]
    async fn cancel_resolves_to_cancelled_failure() {
        let s = JobScheduler::new(ConverterConfig::default())
            .unwrap()
            .launcher(Arc::new(Hang));
        let handle = s.submit(request(1));
        handle.cancel();
        let outcome = handle.await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.message(), CANCELLED_MESSAGE);
    }

    #[tokio::test]
    async fn cancel_still_runs_callback_once() {
        let recorder = Arc::new(Recorder::default());
        let s = JobScheduler::new(ConverterConfig::default())
            .unwrap()
            .launcher(Arc::new(Hang))
            .events(Arc::clone(&recorder) as Arc<dyn JobEvents>);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = s.submit_then(request(1), move |o| {
            sink.lock().unwrap().push(o.message().to_string());
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
        handle.cancel();
        let outcome = handle.await;

        assert_eq!(outcome.message(), CANCELLED_MESSAGE);
        assert_eq!(*seen.lock().unwrap(), vec![CANCELLED_MESSAGE.to_string()]);
        assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_after_finish_keeps_outcome() {
        let s = JobScheduler::new(ConverterConfig::default())
            .unwrap()
            .launcher(Arc::new(success_transcript()));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut handle = s.submit_then(request(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        handle.cancel();
        let outcome = (&mut handle).await;
        assert!(outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Panics on every output line.
    struct PanickyEvents;

    impl JobEvents for PanickyEvents {
        fn on_output_line(&self, _job_id: u64, _line: &str) {
            panic!("observer bug")
        }
    }

    #[tokio::test]
    async fn panicking_observer_still_runs_callback() {
        let s = JobScheduler::new(ConverterConfig::default())
            .unwrap()
            .launcher(Arc::new(success_transcript()))
            .events(Arc::new(PanickyEvents));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let outcome = s
            .submit_then(request(1), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(!outcome.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_resolves_to_failure() {
        let config = ConverterConfig::builder().timeout_secs(1).build().unwrap();
        let s = JobScheduler::new(config).unwrap().launcher(Arc::new(Hang));
        let outcome = s.submit(request(1)).await;
        assert_eq!(outcome.message(), "Conversion timed out after 1s");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bounded_pool_caps_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let config = ConverterConfig::builder().max_concurrent_jobs(2).build().unwrap();
        let s = JobScheduler::new(config).unwrap().launcher(Arc::new(Slow {
            running: Arc::clone(&running),
            peak: Arc::clone(&peak),
        }));

        let handles: Vec<_> = (0..6).map(|i| s.submit(request(i))).collect();
        let outcomes = futures::future::join_all(handles).await;

        assert!(outcomes.iter().all(|o| o.is_success()));
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak = {}", peak.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn per_job_config_override() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("5_book.fb2");
        std::fs::write(&input, b"in").unwrap();

        let s = JobScheduler::new(ConverterConfig::default())
            .unwrap()
            .launcher(Arc::new(success_transcript()));
        let override_config = ConverterConfig::builder()
            .delete_input_file(true)
            .build()
            .unwrap();
        let req = ConversionRequest::new(&input, 5, "", Profile::Default);
        s.submit_with_config(req, override_config).await;
        assert!(!input.exists());
        assert!(!s.config().delete_input_file);
    }

    #[test]
    fn submit_from_plain_thread() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let s = JobScheduler::with_runtime(ConverterConfig::default(), rt.handle().clone())
            .launcher(Arc::new(Fixed(vec![], 3)));
        // Not inside the runtime: submit must still return straight away.
        let handle = s.submit(request(1));
        let outcome = rt.block_on(handle);
        assert_eq!(outcome.message(), convert::EXIT_FAILURE_MESSAGE);
    }

    #[test]
    fn new_outside_runtime_fails() {
        assert!(matches!(
            JobScheduler::new(ConverterConfig::default()),
            Err(ConvertError::Internal(_))
        ));
    }

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<(u64, String)>>,
        completed: AtomicUsize,
    }

    impl JobEvents for Recorder {
        fn on_output_line(&self, job_id: u64, line: &str) {
            self.lines.lock().unwrap().push((job_id, line.to_string()));
        }

        fn on_job_complete(&self, _job_id: u64, _outcome: &ConversionOutcome) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn events_see_every_line() {
        let recorder = Arc::new(Recorder::default());
        let s = JobScheduler::new(ConverterConfig::default())
            .unwrap()
            .launcher(Arc::new(Fixed(
                vec!["one".into(), "two".into()],
                0,
            )))
            .events(Arc::clone(&recorder) as Arc<dyn JobEvents>);
        let handle = s.submit(request(1));
        let id = handle.id();
        handle.await;

        let lines = recorder.lines.lock().unwrap().clone();
        assert_eq!(lines, vec![(id, "one".to_string()), (id, "two".to_string())]);
        assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);
    }
}
