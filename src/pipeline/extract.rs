//! Result extraction: find the converter's status line and decode its JSON.
//!
//! The converter prints free-form log text. Exactly one line is meant to
//! carry the result: it contains a sentinel phrase and, further along, a JSON
//! object. The object spans from the first `{` to the last `}` on that line.
//!
//! ```text
//! 12:00:01 INFO  Reading input file
//! 12:00:03 INFO  Conversion completed {"elapsed":"2s","to":"/out/book.epub"}
//! ```
//!
//! Only the first sentinel line counts. Later lines are still read to the
//! end so the process can be waited on (see [`super::process`]).

use crate::error::ConvertError;
use futures::stream::{Stream, StreamExt};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::info;

/// Phrase on the line reporting a finished conversion.
pub const COMPLETED_SENTINEL: &str = "Conversion completed";

/// Phrase on the line reporting a failed conversion.
pub const FAILED_SENTINEL: &str = "Command ended with error";

/// Which sentinel a result line carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelKind {
    Completed,
    Failed,
}

/// Decides whether a line is a result line.
pub trait SentinelMatcher: Send + Sync {
    fn classify(&self, line: &str) -> Option<SentinelKind>;
}

/// The phrases printed by the fb2 converter.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fb2cSentinels;

impl SentinelMatcher for Fb2cSentinels {
    fn classify(&self, line: &str) -> Option<SentinelKind> {
        if line.contains(COMPLETED_SENTINEL) {
            Some(SentinelKind::Completed)
        } else if line.contains(FAILED_SENTINEL) {
            Some(SentinelKind::Failed)
        } else {
            None
        }
    }
}

/// The decoded JSON object from a result line.
///
/// Untyped on purpose: the converter may add keys. Accessors cover the keys
/// the orchestrator relies on.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResultFragment {
    kind: SentinelKind,
    fields: Map<String, Value>,
    line: String,
}

impl ProcessResultFragment {
    pub fn kind(&self) -> SentinelKind {
        self.kind
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The raw line the fragment was taken from.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Where the converter wrote its output (`to`). Only non-empty strings
    /// count.
    pub fn output_path(&self) -> Option<PathBuf> {
        match self.fields.get("to") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(PathBuf::from(s)),
            _ => None,
        }
    }

    /// Converter-reported duration (`elapsed`).
    pub fn elapsed(&self) -> Option<String> {
        self.fields.get("elapsed").and_then(value_text)
    }

    /// Converter-reported error text (`error`).
    pub fn error(&self) -> Option<String> {
        self.fields.get("error").and_then(value_text)
    }
}

/// Render a JSON value as message text. Strings are taken verbatim.
fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Decode the `{...}` span of a result line.
pub fn parse_result_line(kind: SentinelKind, line: &str) -> Result<ProcessResultFragment, ConvertError> {
    let malformed = |detail: String| ConvertError::MalformedResult {
        line: line.to_string(),
        detail,
    };

    let span = match (line.find('{'), line.rfind('}')) {
        (Some(start), Some(end)) if start < end => &line[start..=end],
        _ => return Err(malformed("no JSON object on result line".into())),
    };

    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(fields)) => Ok(ProcessResultFragment {
            kind,
            fields,
            line: line.to_string(),
        }),
        Ok(other) => Err(malformed(format!("expected a JSON object, found {other}"))),
        Err(e) => Err(malformed(format!("invalid JSON: {e}"))),
    }
}

/// Push-style extractor: feed it every line, then ask for the result.
///
/// The first line the matcher accepts decides the result, even when its
/// JSON turns out to be malformed.
#[derive(Debug)]
pub struct ResultExtractor<M = Fb2cSentinels> {
    matcher: M,
    result: Option<Result<ProcessResultFragment, ConvertError>>,
    lines_seen: usize,
}

impl ResultExtractor {
    pub fn new() -> Self {
        Self::with_matcher(Fb2cSentinels)
    }
}

impl Default for ResultExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: SentinelMatcher> ResultExtractor<M> {
    pub fn with_matcher(matcher: M) -> Self {
        Self {
            matcher,
            result: None,
            lines_seen: 0,
        }
    }

    pub fn feed(&mut self, line: &str) {
        self.lines_seen += 1;
        if self.result.is_some() {
            return;
        }
        if let Some(kind) = self.matcher.classify(line) {
            self.result = Some(parse_result_line(kind, line));
        }
    }

    pub fn lines_seen(&self) -> usize {
        self.lines_seen
    }

    /// # Errors
    /// [`ConvertError::NoResult`] when no line matched, or the
    /// [`ConvertError::MalformedResult`] of the first matching line.
    pub fn finish(self) -> Result<ProcessResultFragment, ConvertError> {
        self.result.unwrap_or(Err(ConvertError::NoResult))
    }

    /// Consume `lines` to the end, logging each one and passing it to
    /// `on_line`, then return the result.
    pub async fn drain<S, F>(
        mut self,
        lines: &mut S,
        mut on_line: F,
    ) -> Result<ProcessResultFragment, ConvertError>
    where
        S: Stream<Item = String> + Unpin + ?Sized,
        F: FnMut(&str),
    {
        while let Some(line) = lines.next().await {
            info!(target: "fb2kindle::converter", "{}", line);
            on_line(&line);
            self.feed(&line);
        }
        self.finish()
    }
}

/// Extract the result from `lines` using the standard sentinels.
pub async fn extract<S, F>(lines: &mut S, on_line: F) -> Result<ProcessResultFragment, ConvertError>
where
    S: Stream<Item = String> + Unpin + ?Sized,
    F: FnMut(&str),
{
    ResultExtractor::new().drain(lines, on_line).await
}
