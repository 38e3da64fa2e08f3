//! Batch autograder for zipped student project submissions
//!
//! Grades a directory of independently submitted archives against a
//! fixed set of behavioral checks: each submission is extracted into a
//! fresh workspace, structurally validated, optionally launched as a
//! server, probed by an assignment-specific test suite, and cleaned up,
//! producing a numeric grade plus a deduction log. Results can be
//! flushed to an external gradebook in one batch call.
//!
//! Submissions run strictly one at a time; serialization is the
//! isolation boundary between partially trusted student code and the
//! shared workspace.

pub mod assertions;
pub mod checks;
pub mod config;
pub mod database;
pub mod error;
pub mod gradebook;
pub mod grader;
pub mod ledger;
pub mod manifest;
pub mod orchestrator;
pub mod submission;
pub mod suites;
pub mod supervisor;
pub mod workspace;
