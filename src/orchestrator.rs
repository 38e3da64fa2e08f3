//! Batch orchestrator
//!
//! Iterates a directory of submission archives in strict sequential
//! order, materializing each into a freshly reset workspace and driving
//! one grading lifecycle per archive. Failures are classified: local
//! and configuration errors cost one submission, fatal errors halt the
//! remaining batch because shared state may be corrupted. Queued grades
//! are flushed to the gradebook in one call after the loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::AssignmentConfig;
use crate::database::DatabaseProvisioner;
use crate::error::{severity_of, Severity};
use crate::gradebook::Gradebook;
use crate::grader::{Grader, GradingResult, TestSuite};
use crate::submission::{Submission, ARCHIVE_EXTENSION};
use crate::workspace::{extract_archive, locate_working_dir, reset_workspace};

/// Subdirectory of the submissions directory that uploaded archives
/// are moved into
const UPLOADED_DIR: &str = "uploaded";

/// Visual separator between submissions in the log
const SEPARATOR: &str = "================================================================";

/// What one batch run produced
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Archive name and grade for every submission that produced a result
    pub graded: Vec<(String, f64)>,
    /// (display name, archive name) pairs queued for gradebook upload
    pub queued: Vec<(String, String)>,
    /// Whether a fatal failure halted the batch early
    pub halted: bool,
    /// Whether a gradebook flush happened
    pub flushed: bool,
}

/// Drives one batch of archived submissions through grading
pub struct BatchOrchestrator {
    submissions_dir: PathBuf,
    workspace_dir: PathBuf,
    config: AssignmentConfig,
    suite: Option<Arc<dyn TestSuite>>,
    provisioner: Option<Arc<dyn DatabaseProvisioner>>,
    gradebook: Option<Box<dyn Gradebook>>,
}

enum Outcome {
    Graded(GradingResult),
    Failed {
        error: anyhow::Error,
        /// Ledger state at the time of failure, plus whether the
        /// test-case phase had completed (a fatal cleanup can follow a
        /// fully graded submission)
        partial: GradingResult,
        graded_before_failure: bool,
    },
}

impl BatchOrchestrator {
    pub fn new(
        submissions_dir: impl Into<PathBuf>,
        config: AssignmentConfig,
        suite: Arc<dyn TestSuite>,
    ) -> Self {
        let submissions_dir = submissions_dir.into();
        let workspace_dir = submissions_dir.join("workspace");
        Self {
            submissions_dir,
            workspace_dir,
            config,
            suite: Some(suite),
            provisioner: None,
            gradebook: None,
        }
    }

    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    pub fn with_gradebook(mut self, gradebook: Box<dyn Gradebook>) -> Self {
        self.gradebook = Some(gradebook);
        self
    }

    pub fn with_database(mut self, provisioner: Arc<dyn DatabaseProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Grade every archive in the submissions directory, then flush
    /// queued grades and move their archives aside.
    pub async fn run(mut self) -> Result<BatchReport> {
        let archives = self.collect_archives()?;
        info!("Found {} submission archives", archives.len());

        let mut report = BatchReport::default();

        for archive_path in &archives {
            info!("{}", SEPARATOR);
            let submission = Submission::from_path(archive_path);

            if self.config.only_current && submission.is_late() {
                info!("Skipping late submission {}", submission.archive_name);
                continue;
            }

            info!("Grading {}", submission.archive_name);
            let outcome = self.grade_one(archive_path).await;
            if self.handle_outcome(&mut report, &submission, outcome) {
                break;
            }
        }
        info!("{}", SEPARATOR);

        self.flush(&mut report).await?;
        Ok(report)
    }

    /// Record or log one submission's outcome. Returns true when the
    /// failure was fatal and the batch must halt.
    fn handle_outcome(
        &mut self,
        report: &mut BatchReport,
        submission: &Submission,
        outcome: Outcome,
    ) -> bool {
        match outcome {
            Outcome::Graded(result) => {
                info!("{}: grade {}", submission.archive_name, result.grade);
                self.record(report, submission, result);
                false
            }
            Outcome::Failed {
                error,
                partial,
                graded_before_failure,
            } => match severity_of(&error) {
                Severity::Fatal => {
                    error!(
                        "Fatal failure on {}: {:#}. Halting the batch.",
                        submission.archive_name, error
                    );
                    // Grading itself may have finished before the fatal
                    // cleanup; keep what it produced
                    if graded_before_failure {
                        self.record(report, submission, partial);
                    }
                    report.halted = true;
                    true
                }
                Severity::Config => {
                    error!(
                        "Could not automatically grade {} (grading setup problem): {:#}",
                        submission.archive_name, error
                    );
                    false
                }
                Severity::Local => {
                    warn!(
                        "Could not automatically grade {}: {:#}",
                        submission.archive_name, error
                    );
                    false
                }
            },
        }
    }

    fn collect_archives(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.submissions_dir).with_context(|| {
            format!(
                "Submissions directory {:?} is not accessible",
                self.submissions_dir
            )
        })?;

        let mut archives: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(ARCHIVE_EXTENSION)
            })
            .collect();
        archives.sort();
        Ok(archives)
    }

    async fn grade_one(&self, archive_path: &Path) -> Outcome {
        let mut grader = match self.materialize(archive_path) {
            Ok(work_dir) => Grader::new(
                self.config.clone(),
                work_dir,
                self.suite.clone(),
                self.provisioner.clone(),
            ),
            Err(error) => {
                return Outcome::Failed {
                    error,
                    partial: GradingResult {
                        grade: crate::ledger::STARTING_SCORE,
                        comments: String::new(),
                    },
                    graded_before_failure: false,
                }
            }
        };

        match grader.run().await {
            Ok(result) => Outcome::Graded(result),
            Err(error) => {
                let partial = grader.partial_result();
                let graded_before_failure = grader.tests_completed();
                // Defensive cleanup; an unkillable process found here
                // outranks whatever failed first
                if let Err(cleanup_error) = grader.cleanup().await {
                    if severity_of(&cleanup_error) == Severity::Fatal {
                        warn!("Original failure before fatal cleanup: {:#}", error);
                        return Outcome::Failed {
                            error: cleanup_error,
                            partial,
                            graded_before_failure,
                        };
                    }
                    warn!("Cleanup after failure also failed: {:#}", cleanup_error);
                }
                Outcome::Failed {
                    error,
                    partial,
                    graded_before_failure,
                }
            }
        }
    }

    /// Reset the shared workspace and extract one archive into it,
    /// returning the effective working directory.
    fn materialize(&self, archive_path: &Path) -> Result<PathBuf> {
        reset_workspace(&self.workspace_dir)?;

        let stem = archive_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "submission".to_string());
        let dest = self.workspace_dir.join(stem);
        std::fs::create_dir_all(&dest)?;
        extract_archive(archive_path, &dest)?;

        Ok(locate_working_dir(&dest, &self.config.required_files))
    }

    fn record(&mut self, report: &mut BatchReport, submission: &Submission, result: GradingResult) {
        report
            .graded
            .push((submission.archive_name.clone(), result.grade));

        if self.gradebook.is_none() {
            return;
        }
        match submission.student_id() {
            Some(student_id) => {
                if let Some(gradebook) = self.gradebook.as_mut() {
                    gradebook.add_student(&student_id, result.grade, &result.comments);
                }
                report
                    .queued
                    .push((submission.display_name(), submission.archive_name.clone()));
            }
            None => {
                warn!(
                    "No student id in archive name {:?}; handle manually. Grade {} with comments:\n{}",
                    submission.archive_name, result.grade, result.comments
                );
            }
        }
    }

    /// One gradebook round-trip for everything queued, then move the
    /// uploaded archives aside so a re-run doesn't double-grade them.
    async fn flush(&mut self, report: &mut BatchReport) -> Result<()> {
        let Some(gradebook) = self.gradebook.as_mut() else {
            return Ok(());
        };
        if gradebook.pending() == 0 {
            info!("No grades were queued; nothing uploaded");
            return Ok(());
        }

        gradebook.send_update(true).await?;
        report.flushed = true;

        let uploaded_dir = self.submissions_dir.join(UPLOADED_DIR);
        std::fs::create_dir_all(&uploaded_dir)
            .with_context(|| format!("Failed to create {:?}", uploaded_dir))?;
        for (display_name, archive_name) in &report.queued {
            let from = self.submissions_dir.join(archive_name);
            let to = uploaded_dir.join(archive_name);
            if let Err(e) = std::fs::rename(&from, &to) {
                warn!(
                    "Uploaded {} but could not move {:?} aside: {}",
                    display_name, archive_name, e
                );
            }
        }
        info!("Uploaded {} grades", report.queued.len());
        Ok(())
    }
}
