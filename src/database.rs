//! Database provisioning seam
//!
//! Database-backed assignments need a grading-controlled database per
//! submission. The driver itself is an external collaborator; the
//! grader only needs these two narrow traits plus a way to point the
//! submission's own configuration at the grading instance.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

/// Opens submission-specific database state before test cases run
#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    /// Set up a database for the submission in `work_dir`, reachable at
    /// `connection_string`, returning a handle for later teardown.
    async fn provision(
        &self,
        work_dir: &Path,
        connection_string: &str,
    ) -> Result<Box<dyn DatabaseHandle>>;
}

/// Open database state owned by one grading lifecycle
#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    /// Drop whatever `provision` created. Must tolerate being called
    /// after a partially failed setup.
    async fn teardown(&mut self) -> Result<()>;
}

/// `.env` keys recognized as the submission's database connection string
fn connection_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(MONGODB?_URI|MONGO_URL|DB_URI|DB_URL|DATABASE_URL|ATLAS_URI|CONNECTION_STRING)$")
            .expect("connection key pattern is valid")
    })
}

/// Point the submission's local connection configuration at the
/// grading-controlled database. Rewrites the recognized key in the
/// working directory's `.env`, appending one when the file has none
/// (or doesn't exist).
pub async fn rewrite_connection_config(work_dir: &Path, connection_string: &str) -> Result<()> {
    let env_path = work_dir.join(".env");
    let original = match tokio::fs::read_to_string(&env_path).await {
        Ok(content) => content,
        Err(_) => String::new(),
    };

    let mut rewritten = false;
    let mut lines: Vec<String> = original
        .lines()
        .map(|line| {
            if let Some((key, _)) = line.split_once('=') {
                if connection_key_pattern().is_match(key.trim()) {
                    rewritten = true;
                    return format!("{}={}", key.trim(), connection_string);
                }
            }
            line.to_string()
        })
        .collect();

    if !rewritten {
        lines.push(format!("MONGODB_URI={}", connection_string));
    }

    debug!(
        "Rewrote connection config at {:?} (existing key: {})",
        env_path, rewritten
    );
    tokio::fs::write(&env_path, lines.join("\n") + "\n")
        .await
        .with_context(|| format!("Failed to write {:?}", env_path))?;
    Ok(())
}
