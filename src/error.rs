//! Error types for the fb2kindle library.
//!
//! Two error types cover two different boundaries:
//!
//! * [`ConvertError`] covers everything that can go wrong while running a
//!   single conversion job (the converter cannot be started, its output
//!   carries no parseable result, it reports a failure, it hangs).
//!   These never escape a job: [`crate::convert::execute`] folds every
//!   variant into a [`crate::output::ConversionOutcome`] so the scheduler
//!   always resolves. The only place they surface as `Err` is configuration
//!   validation, before any job exists.
//!
//! * [`TransportError`] covers the chat front-end (sending replies,
//!   downloading documents). The bot logs these and carries on.

use std::path::PathBuf;
use thiserror::Error;

/// Everything that can fail inside a conversion job.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Process errors ────────────────────────────────────────────────────
    /// The converter executable could not be started (missing binary,
    /// permission denied, bad working directory).
    #[error("Failed to start converter '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The converter ran past the configured deadline and was killed.
    #[error("Converter timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The job was aborted before it completed.
    #[error("Conversion was cancelled")]
    Cancelled,

    // ── Result errors ─────────────────────────────────────────────────────
    /// No output line carried a completion or error sentinel.
    #[error("Converter output contains no result line")]
    NoResult,

    /// A sentinel line was found, but its `{...}` span is missing or is not
    /// a JSON object.
    #[error("Malformed converter result: {detail}\nLine: {line}")]
    MalformedResult { line: String, detail: String },

    /// The converter reported a failure of its own.
    #[error("Converter reported an error: {message}")]
    ConverterReported { message: String },

    // ── Cleanup errors ────────────────────────────────────────────────────
    /// Deleting an input or output file failed. Only ever logged.
    #[error("Failed to delete '{path}': {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading the converter output or a config file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failure talking to the chat network.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A reply could not be delivered.
    #[error("Failed to send to chat {chat_id}: {detail}")]
    SendFailed { chat_id: i64, detail: String },

    /// A user's document could not be fetched.
    #[error("Failed to download document '{file_id}': {detail}")]
    DownloadFailed { file_id: String, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
