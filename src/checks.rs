//! Structural checks on an extracted submission
//!
//! These run before any test case: scan the tree, flag vendored
//! dependencies, verify required files, cross-check registered database
//! collections, and install declared dependencies. Missing required
//! files and collection mismatches abort the submission (they are not
//! deductions); vendored dependencies and manifest problems only cost
//! points.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::GradeError;
use crate::workspace::skip_dir;

/// Vendored-dependency directory submissions should not ship
pub const VENDOR_DIR: &str = "node_modules";

/// Fixed cost of shipping the vendored-dependency directory
pub const VENDOR_DIR_PENALTY: f64 = 5.0;

/// Cost of a missing or unparseable manifest (when manifest checks run)
pub const MISSING_MANIFEST_PENALTY: f64 = 5.0;

/// Cost of a manifest without a declared start script
pub const MISSING_START_SCRIPT_PENALTY: f64 = 5.0;

/// Matches collection registrations in submission sources, e.g.
/// `db.createCollection("posts")` or `mongoose.model('Post', ...)`
fn collection_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?:createCollection|collection|model)\s*\(\s*['"]([A-Za-z0-9_.-]+)['"]"#)
            .expect("collection pattern is valid")
    })
}

/// What a full scan of the submission tree found
#[derive(Debug, Default)]
pub struct TreeScan {
    /// Every file name anywhere in the tree (vendored contents excluded)
    pub file_names: BTreeSet<String>,
    /// Whether a vendored-dependency directory exists anywhere.
    /// Flagged once no matter how many or how deep.
    pub vendored_present: bool,
}

/// Walk the submission tree. Vendored directories are flagged but never
/// descended into.
pub fn scan_tree(root: &Path) -> TreeScan {
    let mut scan = TreeScan::default();
    scan_into(root, &mut scan);
    scan
}

fn scan_into(dir: &Path, scan: &mut TreeScan) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if path.is_dir() {
            if name == VENDOR_DIR {
                scan.vendored_present = true;
            } else if !skip_dir(&name) {
                scan_into(&path, scan);
            }
        } else {
            scan.file_names.insert(name);
        }
    }
}

/// Every required file must exist somewhere in the tree. Absence is
/// fatal to this submission, not a deduction: there is nothing
/// meaningful to grade.
pub fn check_required_files(scan: &TreeScan, required: &BTreeSet<String>) -> Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .filter(|name| !scan.file_names.contains(*name))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(GradeError::Local(format!("missing required files: {}", missing.join(", "))).into())
    }
}

/// Collect collection names registered anywhere in the submission's
/// JavaScript sources (vendored contents excluded).
pub fn scan_collections(work_dir: &Path) -> BTreeSet<String> {
    let mut declared = BTreeSet::new();
    scan_collections_into(work_dir, &mut declared);
    declared
}

fn scan_collections_into(dir: &Path, declared: &mut BTreeSet<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if path.is_dir() {
            if !skip_dir(&name) {
                scan_collections_into(&path, declared);
            }
            continue;
        }
        let is_source = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("js") | Some("mjs") | Some("cjs")
        );
        if !is_source {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for capture in collection_pattern().captures_iter(&content) {
            declared.insert(capture[1].to_string());
        }
    }
}

/// The declared collection set must match the required one exactly;
/// a mismatch means the submission's schema is wrong enough that the
/// database-backed test cases would only produce noise.
pub fn check_collections(declared: &BTreeSet<String>, required: &BTreeSet<String>) -> Result<()> {
    if declared == required {
        debug!("Collection registrations match: {:?}", required);
        return Ok(());
    }
    Err(GradeError::Local(format!(
        "registered collections do not match the assignment: required [{}], found [{}]",
        required.iter().cloned().collect::<Vec<_>>().join(", "),
        declared.iter().cloned().collect::<Vec<_>>().join(", "),
    ))
    .into())
}

/// Install the submission's declared dependencies, blocking until the
/// install finishes. Install failures are logged, not fatal: the test
/// cases will show what's broken.
pub async fn install_dependencies(work_dir: &Path) -> bool {
    info!("Installing declared dependencies in {:?}", work_dir);
    match tokio::process::Command::new("npm")
        .arg("install")
        .current_dir(work_dir)
        .output()
        .await
    {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            warn!(
                "npm install failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
            false
        }
        Err(e) => {
            warn!("Could not run npm install: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{severity_of, Severity};

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn test_scan_finds_files_anywhere() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("app.js"));
        touch(&dir.path().join("routes/items.js"));

        let scan = scan_tree(dir.path());
        assert!(scan.file_names.contains("app.js"));
        assert!(scan.file_names.contains("items.js"));
        assert!(!scan.vendored_present);
    }

    #[test]
    fn test_vendored_flagged_once_and_not_descended() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("node_modules/express/index.js"));
        touch(&dir.path().join("lib/node_modules/lodash/lodash.js"));
        touch(&dir.path().join("app.js"));

        let scan = scan_tree(dir.path());
        assert!(scan.vendored_present);
        // Vendored contents don't satisfy required-file checks
        assert!(!scan.file_names.contains("lodash.js"));
        assert!(!scan.file_names.contains("index.js"));
    }

    #[test]
    fn test_missing_required_file_names_it() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("routes.js"));

        let scan = scan_tree(dir.path());
        let required: BTreeSet<String> = ["app.js".to_string(), "routes.js".to_string()].into();
        let err = check_required_files(&scan, &required).unwrap_err();
        assert_eq!(severity_of(&err), Severity::Local);
        assert!(err.to_string().contains("app.js"));
        assert!(!err.to_string().contains("routes.js"));
    }

    #[test]
    fn test_collection_scan_and_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("db.js"),
            r#"
            await db.createCollection("posts");
            const users = db.collection('users');
            "#,
        )
        .unwrap();

        let declared = scan_collections(dir.path());
        let required: BTreeSet<String> = ["posts".to_string(), "users".to_string()].into();
        check_collections(&declared, &required).unwrap();
    }

    #[test]
    fn test_collection_mismatch_lists_both_sets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("db.js"), r#"db.createCollection("post")"#).unwrap();

        let declared = scan_collections(dir.path());
        let required: BTreeSet<String> = ["posts".to_string()].into();
        let err = check_collections(&declared, &required).unwrap_err();
        assert_eq!(severity_of(&err), Severity::Local);
        let message = err.to_string();
        assert!(message.contains("required [posts]"));
        assert!(message.contains("found [post]"));
    }

    #[test]
    fn test_collection_scan_skips_vendored_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/mongodb")).unwrap();
        std::fs::write(
            dir.path().join("node_modules/mongodb/index.js"),
            r#"db.createCollection("internal")"#,
        )
        .unwrap();

        assert!(scan_collections(dir.path()).is_empty());
    }
}
