//! Pipeline stages for a single conversion job.
//!
//! Each submodule owns one step, so each can be tested on its own and the
//! process stage can be swapped for a transcript double.
//!
//! ## Data Flow
//!
//! ```text
//! process ──▶ extract ──▶ (classify) ──▶ cleanup
//! (spawn +     (sentinel    convert.rs     (delete
//!  line stream) + JSON)                     files)
//! ```
//!
//! 1. [`process`] spawns the converter with stdout and stderr merged into
//!    one pipe, and exposes the output as a line stream
//! 2. [`extract`] scans the stream for the first result line and decodes
//!    its JSON object
//! 3. [`cleanup`] deletes the input and output files the config asks for,
//!    logging any failure

pub mod cleanup;
pub mod extract;
pub mod process;
