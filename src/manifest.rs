//! Project manifest parsing
//!
//! Submissions ship a `package.json` at (or below) their root. The
//! manifest is parsed once during structural checks and read-only
//! afterward. Absence or garbage is not an error here: the grader
//! decides what a missing manifest costs.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

/// Manifest file name expected in every submission
pub const MANIFEST_FILE: &str = "package.json";

/// Parsed project manifest
#[derive(Debug, Clone, Default)]
pub struct ManifestInfo {
    /// Whether a parseable manifest was found
    pub present: bool,
    /// `"type": "module"` marks ESM-style semantics
    pub is_module: bool,
    /// Declared author, if any
    pub author: Option<String>,
    /// `scripts.start`, if declared
    pub start_command: Option<String>,
    /// Declared dependencies (name -> version requirement)
    pub dependencies: BTreeMap<String, String>,
}

impl ManifestInfo {
    /// Parse `package.json` in `dir`. A missing or unparseable file
    /// yields `present: false` with everything else empty.
    pub async fn load(dir: &Path) -> Self {
        let path = dir.join(MANIFEST_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                debug!("No readable manifest at {:?}: {}", path, e);
                return Self::default();
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(value) => Self::from_value(&value),
            Err(e) => {
                debug!("Unparseable manifest at {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    fn from_value(value: &Value) -> Self {
        let is_module = value.get("type").and_then(Value::as_str) == Some("module");

        // "author" is either a plain string or an object with a name field
        let author = match value.get("author") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Object(map)) => map
                .get("name")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            _ => None,
        };

        let start_command = value
            .pointer("/scripts/start")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let dependencies = value
            .get("dependencies")
            .and_then(Value::as_object)
            .map(|deps| {
                deps.iter()
                    .filter_map(|(name, req)| {
                        req.as_str().map(|r| (name.clone(), r.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            present: true,
            is_module,
            author,
            start_command,
            dependencies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_manifest() {
        let value: Value = serde_json::from_str(
            r#"{
                "name": "store-api",
                "type": "module",
                "author": "Jane Doe",
                "scripts": { "start": "node server.js", "test": "jest" },
                "dependencies": { "express": "^4.18.0", "mongodb": "^6.0.0" }
            }"#,
        )
        .unwrap();

        let info = ManifestInfo::from_value(&value);
        assert!(info.present);
        assert!(info.is_module);
        assert_eq!(info.author.as_deref(), Some("Jane Doe"));
        assert_eq!(info.start_command.as_deref(), Some("node server.js"));
        assert_eq!(info.dependencies.len(), 2);
    }

    #[test]
    fn test_author_object_form() {
        let value: Value =
            serde_json::from_str(r#"{ "author": { "name": "Jane", "email": "j@x.edu" } }"#)
                .unwrap();
        let info = ManifestInfo::from_value(&value);
        assert_eq!(info.author.as_deref(), Some("Jane"));
        assert!(!info.is_module);
        assert!(info.start_command.is_none());
    }

    #[test]
    fn test_blank_start_script_is_none() {
        let value: Value = serde_json::from_str(r#"{ "scripts": { "start": "  " } }"#).unwrap();
        let info = ManifestInfo::from_value(&value);
        assert!(info.start_command.is_none());
    }

    #[tokio::test]
    async fn test_load_missing_and_garbage() {
        let dir = tempfile::tempdir().unwrap();

        let info = ManifestInfo::load(dir.path()).await;
        assert!(!info.present);

        tokio::fs::write(dir.path().join(MANIFEST_FILE), "{ not json")
            .await
            .unwrap();
        let info = ManifestInfo::load(dir.path()).await;
        assert!(!info.present);
    }
}
