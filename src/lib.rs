//! # fb2kindle
//!
//! Orchestrate an external fb2 converter and deliver the result to Kindle
//! readers.
//!
//! ## Why this crate?
//!
//! The converter (`fb2c`, wrapped by a `run.sh` script) is slow, prints a
//! lot of unstructured text, and buries its one useful answer in a single
//! JSON fragment on a sentinel line. A chat front-end cannot wait for it on
//! its polling thread. This crate runs each conversion as its own tokio
//! task, reads the merged output as it arrives, extracts exactly one result,
//! cleans up after itself and hands back one outcome per request.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ConversionRequest
//!  │
//!  ├─ 1. Schedule  JobScheduler::submit returns a JobHandle immediately
//!  ├─ 2. Spawn     run.sh <requester> <email> <input> <profile>, stdout+stderr on one pipe
//!  ├─ 3. Extract   first "Conversion completed" / "Command ended with error" line wins
//!  ├─ 4. Classify  exit status + result fragment → Success / Failure
//!  ├─ 5. Cleanup   delete input / output files as configured
//!  └─ 6. Notify    the handle resolves, the completion callback runs
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fb2kindle::{ConversionRequest, ConverterConfig, JobScheduler, Profile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConverterConfig::builder()
//!         .converter_path("/opt/fb2converter")
//!         .timeout_secs(600)
//!         .build()?;
//!     let scheduler = JobScheduler::new(config)?;
//!     let request = ConversionRequest::new("book.fb2", 42, "me@kindle.com", Profile::Default);
//!     let outcome = scheduler.submit(request).await;
//!     println!("{}", outcome.message());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fb2kindle` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! fb2kindle = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod bot;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod request;
pub mod scheduler;
pub mod user;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use bot::{Bot, ConsoleTransport, IncomingDocument, MemoryUserStore, Transport, Update, UserStore};
pub use config::{BotConfig, ConverterConfig, ConverterConfigBuilder};
pub use convert::{execute, execute_with};
pub use error::{ConvertError, TransportError};
pub use output::{ConversionOutcome, OutcomeStatus};
pub use progress::{JobEvents, NoopJobEvents};
pub use request::{ConversionRequest, Profile};
pub use scheduler::{JobHandle, JobScheduler};
pub use user::UserPreference;
