//! Conversion job: run the converter once and settle on one outcome.
//!
//! ## Steps
//!
//! ```text
//! request ─▶ build args ─▶ spawn ─▶ drain + extract ─▶ wait ─▶ classify ─▶ cleanup ─▶ outcome
//! ```
//!
//! Every failure along the way (the converter won't start, it prints no
//! result, it reports an error, it hangs) is folded into a
//! [`ConversionOutcome`] with status `Failure`. A job never returns an
//! error, so the scheduler can always resolve its handle.
//!
//! ## Classification
//!
//! | Exit | Result line | Outcome |
//! |------|-------------|---------|
//! | 0    | has a non-empty `to` | Success, `output_path = to` |
//! | 0    | missing, malformed, or no `to` | Failure (`error` text if any) |
//! | ≠ 0  | anything | Failure, `error` text or a fixed fallback |
//!
//! A zero exit without a usable `to` is a failure: there is no document to
//! point the caller at.

use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::output::ConversionOutcome;
use crate::pipeline::extract::{self, ProcessResultFragment, SentinelKind};
use crate::pipeline::process::{ExitStatus, ProcessLauncher, RunningProcess, SystemLauncher};
use crate::pipeline::cleanup;
use crate::request::ConversionRequest;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Message when the converter cannot be started.
pub const SPAWN_FAILURE_MESSAGE: &str = "fb2c converter error!";

/// Message when the converter exits non-zero without an `error` field.
pub const EXIT_FAILURE_MESSAGE: &str = "Converter exited with an error";

/// Message when the converter exits cleanly but reports no usable result.
pub const NO_RESULT_MESSAGE: &str = "Converter finished without reporting a result";

/// Message for jobs aborted through their handle.
pub const CANCELLED_MESSAGE: &str = "Conversion cancelled";

/// Run one conversion with the system launcher.
///
/// # Example
/// ```rust,no_run
/// use fb2kindle::{execute, ConversionRequest, ConverterConfig, Profile};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConverterConfig::builder().converter_path("/opt/fb2c").build()?;
/// let request = ConversionRequest::new("/data/42_book.fb2", 42, "me@kindle.com", Profile::Default);
/// let outcome = execute(&request, &config).await;
/// println!("{}", outcome.message());
/// # Ok(())
/// # }
/// ```
pub async fn execute(request: &ConversionRequest, config: &ConverterConfig) -> ConversionOutcome {
    execute_with(&SystemLauncher, request, config, &mut |_| {}).await
}

/// Run one conversion with an explicit launcher, passing every output line
/// to `on_line`.
pub async fn execute_with(
    launcher: &dyn ProcessLauncher,
    request: &ConversionRequest,
    config: &ConverterConfig,
    on_line: &mut (dyn FnMut(&str) + Send),
) -> ConversionOutcome {
    let start = Instant::now();
    info!(
        "Conversion started. File: {}",
        request.input_path().display()
    );

    let program = config.script_path();
    let args = converter_args(request);

    let outcome = match launcher.launch(&config.converter_path, &program, &args) {
        Ok(process) => {
            let finished = match config.timeout_secs {
                Some(secs) => tokio::time::timeout(
                    Duration::from_secs(secs),
                    run_to_exit(process, on_line),
                )
                .await
                .unwrap_or(Err(ConvertError::Timeout { secs })),
                None => run_to_exit(process, on_line).await,
            };
            finished
                .and_then(|(status, extracted)| classify(status, extracted))
                .unwrap_or_else(|e| outcome_from_error(&e))
        }
        Err(e) => outcome_from_error(&e),
    };

    cleanup::apply(config, request, &outcome).await;

    info!(
        "Conversion finished in {}ms: {}",
        start.elapsed().as_millis(),
        outcome.message()
    );
    outcome
}

/// Arguments passed to the converter script:
/// `<requester> <email> <absolute input> <profile>`.
pub fn converter_args(request: &ConversionRequest) -> Vec<String> {
    vec![
        request.requester_id().to_string(),
        request.target_email().to_string(),
        request.absolute_input_path().to_string_lossy().into_owned(),
        request.profile().path().to_string(),
    ]
}

/// Drain the output through the extractor, then collect the exit status.
///
/// If this future is dropped (timeout, cancellation) the process handle goes
/// with it and the converter's process group is killed.
async fn run_to_exit(
    mut process: RunningProcess,
    on_line: &mut (dyn FnMut(&str) + Send),
) -> Result<(ExitStatus, Result<ProcessResultFragment, ConvertError>), ConvertError> {
    let extracted = extract::extract(process.lines(), on_line).await;
    let status = process.wait().await?;
    Ok((status, extracted))
}

/// Turn an exit status and extraction result into an outcome.
fn classify(
    status: ExitStatus,
    extracted: Result<ProcessResultFragment, ConvertError>,
) -> Result<ConversionOutcome, ConvertError> {
    if !status.success() {
        let message = extracted
            .ok()
            .and_then(|f| f.error())
            .unwrap_or_else(|| EXIT_FAILURE_MESSAGE.to_string());
        info!("Error detected ({}): {}", status, message);
        return Err(ConvertError::ConverterReported { message });
    }

    let fragment = extracted?;
    let elapsed = fragment.elapsed();
    if let Some(ref elapsed) = elapsed {
        info!("Elapsed time: {}", elapsed);
    }

    // Only the completion sentinel can carry a result path.
    let output_path = match fragment.kind() {
        SentinelKind::Completed => fragment.output_path(),
        SentinelKind::Failed => None,
    };
    match output_path {
        Some(path) => {
            info!("Result file path: {}", path.display());
            Ok(ConversionOutcome::success(path, elapsed))
        }
        None => match fragment.error() {
            Some(message) => Err(ConvertError::ConverterReported { message }),
            None => Err(ConvertError::MalformedResult {
                line: fragment.line().to_string(),
                detail: match fragment.kind() {
                    SentinelKind::Completed => "result has no 'to' path".into(),
                    SentinelKind::Failed => "failure result has no 'error'".into(),
                },
            }),
        },
    }
}

/// Fold a job error into the failure outcome the user sees.
pub fn outcome_from_error(err: &ConvertError) -> ConversionOutcome {
    let message = match err {
        ConvertError::Spawn { .. } => {
            error!("{}", err);
            SPAWN_FAILURE_MESSAGE.to_string()
        }
        ConvertError::ConverterReported { message } => message.clone(),
        ConvertError::NoResult | ConvertError::MalformedResult { .. } => {
            warn!("{}", err);
            NO_RESULT_MESSAGE.to_string()
        }
        ConvertError::Timeout { secs } => {
            warn!("{}", err);
            format!("Conversion timed out after {secs}s")
        }
        ConvertError::Cancelled => CANCELLED_MESSAGE.to_string(),
        other => {
            error!("{}", other);
            format!("Conversion failed: {other}")
        }
    };
    ConversionOutcome::failure(message)
}
