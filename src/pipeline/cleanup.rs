//! Best-effort removal of job files.
//!
//! Cleanup runs after the outcome is settled and can never change it. A file
//! that is already gone, or that cannot be removed, is logged at `warn` and
//! otherwise ignored, so running cleanup twice is harmless.

use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::output::ConversionOutcome;
use crate::request::ConversionRequest;
use std::path::Path;
use tracing::{debug, warn};

/// Delete whatever `config` asks for once `outcome` is final.
///
/// The input is removed whatever the status; the output only after a
/// success.
pub async fn apply(config: &ConverterConfig, request: &ConversionRequest, outcome: &ConversionOutcome) {
    if config.delete_input_file {
        remove_file(request.input_path(), "input").await;
    }
    if config.delete_output_file {
        if let Some(path) = outcome.output_path() {
            remove_file(path, "output").await;
        }
    }
}

/// Remove `path`, logging instead of failing. Returns whether it was removed.
pub async fn remove_file(path: &Path, what: &str) -> bool {
    let result = tokio::fs::remove_file(path).await;
    report(path, what, result)
}

/// Blocking twin of [`remove_file`] for callers outside the runtime.
pub fn remove_file_blocking(path: &Path, what: &str) -> bool {
    let result = std::fs::remove_file(path);
    report(path, what, result)
}

fn report(path: &Path, what: &str, result: std::io::Result<()>) -> bool {
    match result {
        Ok(()) => {
            debug!("Deleted {} file {}", what, path.display());
            true
        }
        Err(source) => {
            let err = ConvertError::Cleanup {
                path: path.to_path_buf(),
                source,
            };
            warn!("Cleanup of {} file skipped: {}", what, err);
            false
        }
    }
}
