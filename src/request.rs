//! What a caller hands to the scheduler: one document, one requester, one
//! rendering profile.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Stylesheet selecting the converter's rendering options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Profile {
    /// Embeds fonts into the book. (default)
    #[default]
    Default,
    /// Leaves fonts to the reading device.
    NoFonts,
}

impl Profile {
    /// Pick the profile matching a user's font-embedding preference.
    pub fn for_embed_fonts(embed_fonts: bool) -> Self {
        if embed_fonts {
            Profile::Default
        } else {
            Profile::NoFonts
        }
    }

    /// Profile file, relative to the converter's working directory.
    pub fn path(self) -> &'static str {
        match self {
            Profile::Default => "profiles/default.css",
            Profile::NoFonts => "profiles/default-no-fonts.css",
        }
    }
}

/// A single conversion request.
///
/// Immutable once created; consumed by exactly one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRequest {
    input_path: PathBuf,
    requester_id: i64,
    target_email: String,
    profile: Profile,
}

impl ConversionRequest {
    /// `target_email` may be empty, in which case the converter skips
    /// email delivery.
    pub fn new(
        input_path: impl Into<PathBuf>,
        requester_id: i64,
        target_email: impl Into<String>,
        profile: Profile,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            requester_id,
            target_email: target_email.into(),
            profile,
        }
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn requester_id(&self) -> i64 {
        self.requester_id
    }

    pub fn target_email(&self) -> &str {
        &self.target_email
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Input path as handed to the converter. Relative paths are resolved
    /// against the current directory, since the converter runs elsewhere.
    pub fn absolute_input_path(&self) -> PathBuf {
        std::path::absolute(&self.input_path).unwrap_or_else(|_| self.input_path.clone())
    }
}
