//! The terminal result of one conversion attempt.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Message carried by every successful outcome.
pub const SUCCESS_MESSAGE: &str = "Conversion successful";

/// Whether the converter produced a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Result of one conversion job. Produced exactly once per request.
///
/// The only constructors are [`ConversionOutcome::success`] and
/// [`ConversionOutcome::failure`], so `output_path` is present if and only
/// if the status is [`OutcomeStatus::Success`].
///
/// `output_path` records where the converter wrote the document. If the
/// job was configured to delete outputs, the file may already be gone.
///
/// Serialize-only: a deserialized value could pair a path with `Failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionOutcome {
    status: OutcomeStatus,
    message: String,
    output_path: Option<PathBuf>,
    /// Converter-reported duration, when it printed one.
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed: Option<String>,
}

impl ConversionOutcome {
    pub fn success(output_path: impl Into<PathBuf>, elapsed: Option<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: SUCCESS_MESSAGE.to_string(),
            output_path: Some(output_path.into()),
            elapsed,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failure,
            message: message.into(),
            output_path: None,
            elapsed: None,
        }
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// Human-readable text, relayed verbatim to the user on failure.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub fn elapsed(&self) -> Option<&str> {
        self.elapsed.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_has_path_and_fixed_message() {
        let o = ConversionOutcome::success("/out/book.epub", Some("2s".into()));
        assert!(o.is_success());
        assert_eq!(o.message(), "Conversion successful");
        assert_eq!(o.output_path(), Some(Path::new("/out/book.epub")));
        assert_eq!(o.elapsed(), Some("2s"));
    }

    #[test]
    fn failure_never_has_path() {
        let o = ConversionOutcome::failure("bad fb2 xml");
        assert_eq!(o.status(), OutcomeStatus::Failure);
        assert_eq!(o.message(), "bad fb2 xml");
        assert!(o.output_path().is_none());
    }

    #[test]
    fn serialises_to_json() {
        let o = ConversionOutcome::success("/out/a.epub", None);
        let json = serde_json::to_string(&o).unwrap();
        assert!(json.contains(r#""status":"Success""#), "got: {json}");
        assert!(!json.contains("elapsed"));
    }

    /// `true` when `T: DeserializeOwned`. Inherent consts win over the
    /// blanket trait const when their bounds hold.
    struct Deserializable<T>(std::marker::PhantomData<T>);

    trait NotDeserializable {
        const YES: bool = false;
    }
    impl<T> NotDeserializable for Deserializable<T> {}

    impl<T: serde::de::DeserializeOwned> Deserializable<T> {
        const YES: bool = true;
    }

    #[test]
    fn outcome_cannot_be_built_from_json() {
        assert!(Deserializable::<OutcomeStatus>::YES);
        assert!(!Deserializable::<ConversionOutcome>::YES);
    }
}
