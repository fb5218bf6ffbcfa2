//! Configuration types for the converter orchestrator and the bot front-end.
//!
//! Everything a conversion job needs to know about its environment lives in
//! [`ConverterConfig`], passed explicitly to every job. Nothing is read from
//! globals, so two schedulers with different converter installations can run
//! side by side in one process (and in one test binary).
//!
//! # Design choice: builder over constructor
//! Most deployments only set the converter path and the two cleanup flags.
//! The builder lets callers set what they care about and validates the
//! result in one place.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default margin string offered to users who have not picked their own.
/// Order is top, right, bottom, left.
pub const DEFAULT_MARGIN: &str = "0pt -13pt 0pt -13pt";

/// Default name of the converter's entry-point script.
pub const DEFAULT_SCRIPT_NAME: &str = "run.sh";

/// Configuration for running the external converter.
///
/// Built via [`ConverterConfig::builder()`], or loaded from JSON with
/// [`ConverterConfig::from_json_file`].
///
/// # Example
/// ```rust
/// use fb2kindle::ConverterConfig;
///
/// let config = ConverterConfig::builder()
///     .converter_path("/opt/fb2converter")
///     .delete_input_file(true)
///     .max_concurrent_jobs(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.script_path(), std::path::Path::new("/opt/fb2converter/run.sh"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Directory of the converter installation. The converter runs with this
    /// as its working directory, and profile paths are relative to it.
    pub converter_path: PathBuf,

    /// Entry-point script inside `converter_path`. Default: `run.sh`.
    pub script_name: String,

    /// Delete the submitted document once the job finishes, whatever the
    /// outcome. Default: false.
    pub delete_input_file: bool,

    /// Delete the converted document once a successful job finishes.
    /// Default: false.
    ///
    /// The outcome still carries the path, but the file may be gone by the
    /// time the caller looks at it. Callers that need the file must run the
    /// job with this flag off and remove the file themselves.
    pub delete_output_file: bool,

    /// Margin suggested to users by the front-end. Not used by jobs.
    pub default_margin: String,

    /// Upper bound on jobs running at once. `None` means unbounded.
    pub max_concurrent_jobs: Option<usize>,

    /// Wall-clock limit per job in seconds, after which the converter is
    /// killed. `None` means no limit.
    pub timeout_secs: Option<u64>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            converter_path: PathBuf::from("./fb2converter"),
            script_name: DEFAULT_SCRIPT_NAME.to_string(),
            delete_input_file: false,
            delete_output_file: false,
            default_margin: DEFAULT_MARGIN.to_string(),
            max_concurrent_jobs: None,
            timeout_secs: None,
        }
    }
}

impl ConverterConfig {
    /// Create a new builder for `ConverterConfig`.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }

    /// Builder seeded with this configuration, for layering overrides.
    pub fn into_builder(self) -> ConverterConfigBuilder {
        ConverterConfigBuilder { config: self }
    }

    /// Full path of the converter executable.
    pub fn script_path(&self) -> PathBuf {
        self.converter_path.join(&self.script_name)
    }

    /// Load and validate a config from a JSON file. Missing fields take
    /// their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConvertError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            ConvertError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConvertError> {
        if self.converter_path.as_os_str().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "converter_path must not be empty".into(),
            ));
        }
        if self.script_name.trim().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "script_name must not be empty".into(),
            ));
        }
        if self.max_concurrent_jobs == Some(0) {
            return Err(ConvertError::InvalidConfig(
                "max_concurrent_jobs must be ≥ 1".into(),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConvertError::InvalidConfig(
                "timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn converter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.converter_path = path.into();
        self
    }

    pub fn script_name(mut self, name: impl Into<String>) -> Self {
        self.config.script_name = name.into();
        self
    }

    pub fn delete_input_file(mut self, v: bool) -> Self {
        self.config.delete_input_file = v;
        self
    }

    pub fn delete_output_file(mut self, v: bool) -> Self {
        self.config.delete_output_file = v;
        self
    }

    pub fn default_margin(mut self, margin: impl Into<String>) -> Self {
        self.config.default_margin = margin.into();
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.max_concurrent_jobs = Some(n);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = Some(secs);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, ConvertError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Settings for the chat front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Display name of the bot.
    pub name: String,

    /// Chat allowed to run admin commands such as `/users`.
    pub admin_chat_id: Option<i64>,

    /// Directory where received documents are stored before conversion.
    pub data_dir: PathBuf,

    /// Address users must whitelist in their Kindle settings.
    pub sender_email: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "fb2kindle".to_string(),
            admin_chat_id: None,
            data_dir: PathBuf::from("./data/userFiles"),
            sender_email: "fb2kindle.bot@gmail.com".to_string(),
        }
    }
}
