//! Submission archive naming convention
//!
//! Gradebook exports name archives `<name>[_LATE]_<digits>.zip`; the
//! digit group is the student's external identifier. Archives that
//! don't match can still be graded, they just can't be uploaded
//! automatically.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

/// Archive extension the orchestrator recognizes
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Marker in archive names for late submissions
pub const LATE_MARKER: &str = "_LATE_";

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([^_]+)(?:_LATE)?_(\d+)").expect("name pattern is valid")
    })
}

/// One student's archived project
#[derive(Debug, Clone)]
pub struct Submission {
    /// Archive file name, e.g. `jdoe_LATE_123456.zip`
    pub archive_name: String,
}

impl Submission {
    pub fn from_path(path: &Path) -> Self {
        Self {
            archive_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }

    fn stem(&self) -> &str {
        self.archive_name
            .strip_suffix(&format!(".{}", ARCHIVE_EXTENSION))
            .unwrap_or(&self.archive_name)
    }

    /// External gradebook identifier, when the archive name matches the
    /// naming convention
    pub fn student_id(&self) -> Option<String> {
        name_pattern()
            .captures(self.stem())
            .map(|c| c[2].to_string())
    }

    /// Human-readable name portion of the archive name
    pub fn display_name(&self) -> String {
        name_pattern()
            .captures(self.stem())
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| self.stem().to_string())
    }

    /// Whether the archive carries the late marker
    pub fn is_late(&self) -> bool {
        self.archive_name.contains(LATE_MARKER)
    }
}
