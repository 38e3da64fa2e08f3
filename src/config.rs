//! Assignment configuration
//!
//! One `AssignmentConfig` describes how a whole batch is graded and is
//! immutable for the run. It is typically loaded from a TOML file.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Configuration for grading one assignment
#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentConfig {
    /// Skip archives carrying the `_LATE_` marker
    #[serde(default)]
    pub only_current: bool,
    /// Default start command, used when the manifest declares none
    #[serde(default)]
    pub start_command: Option<String>,
    /// Whether to launch the submission's server before test cases
    #[serde(default)]
    pub run_start_command: bool,
    /// Files that must exist somewhere in the submission tree.
    /// A missing one aborts that submission, it is not a deduction.
    #[serde(default)]
    pub required_files: BTreeSet<String>,
    /// Collection names the submission must register when it uses a database
    #[serde(default)]
    pub required_data_collections: BTreeSet<String>,
    /// Whether to inspect and penalize the project manifest
    #[serde(default)]
    pub check_manifest: bool,
    /// Whether the assignment needs a database provisioned
    #[serde(default)]
    pub uses_database: bool,
    /// Grading-controlled connection string submissions are pointed at
    #[serde(default)]
    pub database_connection_string: String,
    /// Base URL where the student's server is expected to listen
    #[serde(default)]
    pub server_url: Option<String>,
}

impl AssignmentConfig {
    /// Load from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read assignment config {:?}", path))?;
        let config: AssignmentConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid assignment config {:?}", path))?;
        Ok(config)
    }
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            only_current: false,
            start_command: None,
            run_start_command: false,
            required_files: BTreeSet::new(),
            required_data_collections: BTreeSet::new(),
            check_manifest: false,
            uses_database: false,
            database_connection_string: String::new(),
            server_url: None,
        }
    }
}
