//! Grading lifecycle
//!
//! One `Grader` takes one extracted submission through a fixed phase
//! sequence: structural checks, optional database setup, optional
//! server start, assignment-specific test cases, cleanup. Each phase
//! gates the next; any failure propagates to the batch orchestrator,
//! which runs [`Grader::cleanup`] defensively and decides whether the
//! batch continues.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::assertions::http::HttpTester;
use crate::checks::{
    self, check_collections, check_required_files, scan_collections, scan_tree,
    MISSING_MANIFEST_PENALTY, MISSING_START_SCRIPT_PENALTY, VENDOR_DIR, VENDOR_DIR_PENALTY,
};
use crate::config::AssignmentConfig;
use crate::database::{rewrite_connection_config, DatabaseHandle, DatabaseProvisioner};
use crate::error::GradeError;
use crate::ledger::ScoreLedger;
use crate::manifest::ManifestInfo;
use crate::supervisor::{ProcessSupervisor, Readiness};
use crate::workspace::locate_working_dir;

/// The only value crossing the lifecycle -> orchestrator boundary
#[derive(Debug, Clone)]
pub struct GradingResult {
    pub grade: f64,
    /// Deduction log joined by newline, oldest first
    pub comments: String,
}

/// Everything an assignment-specific test suite may touch
pub struct GradeContext<'a> {
    pub config: &'a AssignmentConfig,
    pub work_dir: &'a Path,
    pub manifest: &'a ManifestInfo,
    pub ledger: &'a mut ScoreLedger,
    pub http: &'a HttpTester,
}

/// The assignment-specific phase of the lifecycle. Everything else is
/// fixed orchestration; this is the one injected capability.
#[async_trait]
pub trait TestSuite: Send + Sync {
    async fn run(&self, cx: &mut GradeContext<'_>) -> Result<()>;
}

/// Per-submission grading state machine
pub struct Grader {
    config: AssignmentConfig,
    work_dir: PathBuf,
    suite: Option<Arc<dyn TestSuite>>,
    provisioner: Option<Arc<dyn DatabaseProvisioner>>,
    ledger: ScoreLedger,
    supervisor: ProcessSupervisor,
    manifest: ManifestInfo,
    resolved_start: Option<String>,
    db_handle: Option<Box<dyn DatabaseHandle>>,
    /// Whether grading (not the student) introduced the vendored
    /// directory; only then may cleanup remove it
    grader_installed_vendor: bool,
    /// Whether the test-case phase ran to completion, i.e. the ledger
    /// holds a full grade even if cleanup failed afterwards
    tests_completed: bool,
}

impl Grader {
    pub fn new(
        config: AssignmentConfig,
        work_dir: impl Into<PathBuf>,
        suite: Option<Arc<dyn TestSuite>>,
        provisioner: Option<Arc<dyn DatabaseProvisioner>>,
    ) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
            suite,
            provisioner,
            ledger: ScoreLedger::new(),
            supervisor: ProcessSupervisor::new(),
            manifest: ManifestInfo::default(),
            resolved_start: None,
            db_handle: None,
            grader_installed_vendor: false,
            tests_completed: false,
        }
    }

    /// Drive the whole lifecycle. On success cleanup has already run;
    /// on error the caller must invoke [`cleanup`](Self::cleanup).
    pub async fn run(&mut self) -> Result<GradingResult> {
        self.structural_checks().await?;
        if self.config.uses_database {
            self.setup_database().await?;
        }
        if self.config.run_start_command {
            self.start_server().await?;
        }
        self.run_test_cases().await?;
        self.tests_completed = true;
        self.cleanup().await?;

        let (grade, comments) = self.ledger.finalize();
        Ok(GradingResult { grade, comments })
    }

    async fn structural_checks(&mut self) -> Result<()> {
        let scan = scan_tree(&self.work_dir);

        if scan.vendored_present {
            self.ledger.deduct(
                VENDOR_DIR_PENALTY,
                &format!("submission ships a {} directory", VENDOR_DIR),
                None,
            );
        }

        check_required_files(&scan, &self.config.required_files)?;

        // The manifest's directory anchors all later relative paths
        self.work_dir = locate_working_dir(&self.work_dir, &self.config.required_files);
        self.manifest = ManifestInfo::load(&self.work_dir).await;

        if self.config.check_manifest {
            if !self.manifest.present {
                self.ledger.deduct(
                    MISSING_MANIFEST_PENALTY,
                    "package.json is missing or unparseable",
                    None,
                );
            } else if self.manifest.start_command.is_none() {
                self.ledger.deduct(
                    MISSING_START_SCRIPT_PENALTY,
                    "package.json declares no start script",
                    None,
                );
            }
            if let Some(author) = &self.manifest.author {
                debug!("Manifest author: {}", author);
            }
        }

        // Fall back to the configured default when the manifest
        // declares nothing usable
        self.resolved_start = self
            .manifest
            .start_command
            .clone()
            .or_else(|| self.config.start_command.clone());

        if self.config.uses_database && !self.config.required_data_collections.is_empty() {
            let declared = scan_collections(&self.work_dir);
            check_collections(&declared, &self.config.required_data_collections)?;
        }

        if !self.manifest.dependencies.is_empty() {
            let vendor_preexisting = self.work_dir.join(VENDOR_DIR).exists();
            checks::install_dependencies(&self.work_dir).await;
            if !vendor_preexisting && self.work_dir.join(VENDOR_DIR).exists() {
                self.grader_installed_vendor = true;
            }
        }

        Ok(())
    }

    async fn setup_database(&mut self) -> Result<()> {
        rewrite_connection_config(&self.work_dir, &self.config.database_connection_string)
            .await?;
        if let Some(provisioner) = &self.provisioner {
            let handle = provisioner
                .provision(&self.work_dir, &self.config.database_connection_string)
                .await?;
            self.db_handle = Some(handle);
        }
        Ok(())
    }

    async fn start_server(&mut self) -> Result<()> {
        let command = self.resolved_start.clone().ok_or_else(|| {
            GradeError::Config(
                "no start command: the manifest declares none and no default is configured"
                    .into(),
            )
        })?;

        let readiness = self.supervisor.start(&command, &self.work_dir).await?;
        if readiness == Readiness::TimedOutButRunning {
            info!("Server never announced readiness; proceeding anyway");
        }
        Ok(())
    }

    async fn run_test_cases(&mut self) -> Result<()> {
        let suite = self.suite.clone().ok_or_else(|| {
            GradeError::Config("no test suite supplied for this assignment".into())
        })?;

        let http = HttpTester::new()?;
        let mut cx = GradeContext {
            config: &self.config,
            work_dir: &self.work_dir,
            manifest: &self.manifest,
            ledger: &mut self.ledger,
            http: &http,
        };
        suite.run(&mut cx).await
    }

    /// Tear down whatever this lifecycle set up. Safe after any partial
    /// setup and safe to call twice. An unkillable server still
    /// propagates as fatal, but never before the rest of the teardown
    /// has been attempted.
    pub async fn cleanup(&mut self) -> Result<()> {
        if let Some(mut handle) = self.db_handle.take() {
            if let Err(e) = handle.teardown().await {
                warn!("Database teardown failed: {}", e);
            }
        }

        let stop_result = self.supervisor.stop().await;

        if self.grader_installed_vendor {
            self.grader_installed_vendor = false;
            let vendor = self.work_dir.join(VENDOR_DIR);
            if vendor.exists() {
                if let Err(e) = std::fs::remove_dir_all(&vendor) {
                    warn!("Could not remove grader-installed {:?}: {}", vendor, e);
                }
            }
        }

        stop_result
    }

    /// Current score and comments, for reporting after a failed run
    pub fn partial_result(&self) -> GradingResult {
        let (grade, comments) = self.ledger.finalize();
        GradingResult { grade, comments }
    }

    /// Whether the test-case phase finished before any failure
    pub fn tests_completed(&self) -> bool {
        self.tests_completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{severity_of, Severity};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct DeductingSuite {
        points: f64,
        ran: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TestSuite for DeductingSuite {
        async fn run(&self, cx: &mut GradeContext<'_>) -> Result<()> {
            self.ran.store(true, Ordering::SeqCst);
            if self.points > 0.0 {
                cx.ledger.deduct(self.points, "failed a test case", None);
            }
            Ok(())
        }
    }

    fn suite(points: f64) -> (Arc<dyn TestSuite>, Arc<AtomicBool>) {
        let ran = Arc::new(AtomicBool::new(false));
        (
            Arc::new(DeductingSuite {
                points,
                ran: ran.clone(),
            }),
            ran,
        )
    }

    fn write_project(dir: &Path, manifest: Option<&str>) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("app.js"), "// app").unwrap();
        if let Some(manifest) = manifest {
            std::fs::write(dir.join("package.json"), manifest).unwrap();
        }
    }

    #[tokio::test]
    async fn test_clean_run_keeps_full_score() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), Some(r#"{"scripts": {"start": "node app.js"}}"#));

        let (suite, ran) = suite(0.0);
        let mut grader = Grader::new(
            AssignmentConfig {
                check_manifest: true,
                ..Default::default()
            },
            tmp.path(),
            Some(suite),
            None,
        );

        let result = grader.run().await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(result.grade, 100.0);
        assert!(result.comments.is_empty());
    }

    #[tokio::test]
    async fn test_deduction_flows_into_result() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), Some(r#"{"scripts": {"start": "node app.js"}}"#));

        let (suite, _) = suite(10.0);
        let mut grader = Grader::new(AssignmentConfig::default(), tmp.path(), Some(suite), None);

        let result = grader.run().await.unwrap();
        assert_eq!(result.grade, 90.0);
        assert!(result.comments.contains("-10; failed a test case"));
    }

    #[tokio::test]
    async fn test_missing_required_file_aborts_before_test_cases() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), Some("{}"));

        let (suite, ran) = suite(0.0);
        let mut grader = Grader::new(
            AssignmentConfig {
                required_files: BTreeSet::from(["routes.js".to_string()]),
                ..Default::default()
            },
            tmp.path(),
            Some(suite),
            None,
        );

        let err = grader.run().await.unwrap_err();
        assert_eq!(severity_of(&err), Severity::Local);
        assert!(err.to_string().contains("routes.js"));
        assert!(!ran.load(Ordering::SeqCst));
        grader.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_unparseable_manifest_deducts_then_completes() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), Some("{ this is not json"));

        let (suite, ran) = suite(0.0);
        let mut grader = Grader::new(
            AssignmentConfig {
                check_manifest: true,
                start_command: Some("node app.js".into()),
                ..Default::default()
            },
            tmp.path(),
            Some(suite),
            None,
        );

        let result = grader.run().await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(result.grade, 100.0 - MISSING_MANIFEST_PENALTY);
        assert!(result.comments.contains("missing or unparseable"));
    }

    #[tokio::test]
    async fn test_shipped_vendor_dir_penalized_never_removed() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), Some("{}"));
        std::fs::create_dir_all(tmp.path().join(VENDOR_DIR).join("express")).unwrap();

        let (suite, _) = suite(0.0);
        let mut grader = Grader::new(AssignmentConfig::default(), tmp.path(), Some(suite), None);

        let result = grader.run().await.unwrap();
        assert_eq!(result.grade, 100.0 - VENDOR_DIR_PENALTY);
        // The student's own node_modules survives cleanup
        assert!(tmp.path().join(VENDOR_DIR).exists());
    }

    #[tokio::test]
    async fn test_missing_suite_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), Some("{}"));

        let mut grader = Grader::new(AssignmentConfig::default(), tmp.path(), None, None);
        let err = grader.run().await.unwrap_err();
        assert_eq!(severity_of(&err), Severity::Config);
    }

    #[tokio::test]
    async fn test_missing_start_command_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), Some("{}"));

        let (suite, ran) = suite(0.0);
        let mut grader = Grader::new(
            AssignmentConfig {
                run_start_command: true,
                ..Default::default()
            },
            tmp.path(),
            Some(suite),
            None,
        );

        let err = grader.run().await.unwrap_err();
        assert_eq!(severity_of(&err), Severity::Config);
        assert!(!ran.load(Ordering::SeqCst));
        grader.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_collection_mismatch_aborts_submission() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), Some("{}"));
        std::fs::write(
            tmp.path().join("db.js"),
            r#"db.createCollection("wrong_name")"#,
        )
        .unwrap();

        let (suite, ran) = suite(0.0);
        let mut grader = Grader::new(
            AssignmentConfig {
                uses_database: true,
                required_data_collections: BTreeSet::from(["posts".to_string()]),
                ..Default::default()
            },
            tmp.path(),
            Some(suite),
            None,
        );

        let err = grader.run().await.unwrap_err();
        assert_eq!(severity_of(&err), Severity::Local);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_database_setup_rewrites_config_and_tears_down() {
        struct FakeProvisioner {
            torn_down: Arc<AtomicBool>,
        }
        struct FakeHandle {
            torn_down: Arc<AtomicBool>,
        }

        #[async_trait]
        impl DatabaseProvisioner for FakeProvisioner {
            async fn provision(
                &self,
                _work_dir: &Path,
                _connection_string: &str,
            ) -> Result<Box<dyn DatabaseHandle>> {
                Ok(Box::new(FakeHandle {
                    torn_down: self.torn_down.clone(),
                }))
            }
        }

        #[async_trait]
        impl DatabaseHandle for FakeHandle {
            async fn teardown(&mut self) -> Result<()> {
                self.torn_down.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), Some("{}"));

        let torn_down = Arc::new(AtomicBool::new(false));
        let (suite, _) = suite(0.0);
        let mut grader = Grader::new(
            AssignmentConfig {
                uses_database: true,
                database_connection_string: "mongodb://localhost:27017/grading".into(),
                ..Default::default()
            },
            tmp.path(),
            Some(suite),
            Some(Arc::new(FakeProvisioner {
                torn_down: torn_down.clone(),
            })),
        );

        grader.run().await.unwrap();
        assert!(torn_down.load(Ordering::SeqCst));
        let env = std::fs::read_to_string(tmp.path().join(".env")).unwrap();
        assert!(env.contains("mongodb://localhost:27017/grading"));
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_partial_setup() {
        let tmp = tempfile::tempdir().unwrap();
        let mut grader = Grader::new(AssignmentConfig::default(), tmp.path(), None, None);
        grader.cleanup().await.unwrap();
        grader.cleanup().await.unwrap();
    }
}
