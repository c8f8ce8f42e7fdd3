//! Process-wide import defaults.
//!
//! Every import is seeded from an [`ImportConfig`]; individual imports then
//! override what they need through [`crate::ImportOptions`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::IngestResult;

/// Sheet row (0-based) holding the column headers.
pub const DEFAULT_HEADER_ROW_INDEX: usize = 0;
/// Data rows accepted before the import is cut off.
pub const DEFAULT_MAX_ALLOWED_ROWS: u64 = 100_000;
/// Accepted records handed to the sink per call.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;
/// File name of the rejected-row export.
pub const DEFAULT_REJECTED_EXPORT_NAME: &str = "rejected_rows.xlsx";
/// The only input suffix the controller accepts.
pub const SPREADSHEET_SUFFIX: &str = ".xlsx";
/// Directory the rejected-row export is written under.
pub const DEFAULT_EXPORT_BASE_PATH: &str = "import_failures";

/// Environment variable naming a TOML config file for [`ImportConfig::load_default`].
pub const CONFIG_PATH_ENV: &str = "XLSX_INGEST_CONFIG";

/// What happens to the first data row past `max_allowed_rows`.
///
/// Config files spell it in snake or kebab case; anything else is a
/// [`crate::IngestError::Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitPolicy {
    /// The row is counted and rejected with a `LimitExceeded` reason.
    #[default]
    #[serde(alias = "reject-overflow-row")]
    RejectOverflowRow,
    /// The row is read but never counted; `total_seen` stops at the ceiling.
    #[serde(alias = "stop-at-ceiling")]
    StopAtCeiling,
}

/// Import defaults shared by every controller in the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    pub header_row_index: usize,
    pub max_allowed_rows: u64,
    pub batch_size: usize,
    pub rejected_export_name: String,
    pub spreadsheet_suffix: String,
    pub export_base_path: PathBuf,
    pub limit_policy: LimitPolicy,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            header_row_index: DEFAULT_HEADER_ROW_INDEX,
            max_allowed_rows: DEFAULT_MAX_ALLOWED_ROWS,
            batch_size: DEFAULT_BATCH_SIZE,
            rejected_export_name: DEFAULT_REJECTED_EXPORT_NAME.to_string(),
            spreadsheet_suffix: SPREADSHEET_SUFFIX.to_string(),
            export_base_path: PathBuf::from(DEFAULT_EXPORT_BASE_PATH),
            limit_policy: LimitPolicy::default(),
        }
    }
}

/// On-disk shape; every key is optional and falls back to the defaults.
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    header_row_index: Option<usize>,
    max_allowed_rows: Option<u64>,
    batch_size: Option<usize>,
    rejected_export_name: Option<String>,
    spreadsheet_suffix: Option<String>,
    export_base_path: Option<String>,
    limit_policy: Option<LimitPolicy>,
}

impl ImportConfig {
    /// Parses TOML text over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IngestError::Config`] if the text is not valid TOML
    /// for this shape.
    pub fn from_toml_str(contents: &str) -> IngestResult<Self> {
        let file: ConfigFile = toml::from_str(contents)?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> IngestResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Loads the file named by [`CONFIG_PATH_ENV`], or the defaults when the
    /// variable is unset or the file is unusable.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(path) = std::env::var_os(CONFIG_PATH_ENV) else {
            return Self::default();
        };
        match Self::load_from_file(Path::new(&path)) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "ignoring unreadable import config");
                Self::default()
            }
        }
    }

    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(v) = file.header_row_index {
            config.header_row_index = v;
        }
        if let Some(v) = file.max_allowed_rows {
            config.max_allowed_rows = v;
        }
        if let Some(v) = file.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = file.rejected_export_name {
            config.rejected_export_name = v;
        }
        if let Some(v) = file.spreadsheet_suffix {
            config.spreadsheet_suffix = v;
        }
        if let Some(v) = file.export_base_path {
            config.export_base_path = PathBuf::from(v);
        }
        if let Some(v) = file.limit_policy {
            config.limit_policy = v;
        }

        config
    }

    /// Sets the directory rejected-row files are written under.
    #[must_use]
    pub fn with_export_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_base_path = path.into();
        self
    }
}
