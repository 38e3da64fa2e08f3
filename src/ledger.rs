//! Per-submission scoring ledger
//!
//! Every submission starts at 100 points. Assertions and structural
//! checks only ever subtract, and every subtraction leaves a comment
//! so the student can see where the points went.

/// Starting score for every submission
pub const STARTING_SCORE: f64 = 100.0;

/// Running score and ordered deduction log for one submission.
/// Owned exclusively by one grading lifecycle; never shared.
#[derive(Debug)]
pub struct ScoreLedger {
    score: f64,
    comments: Vec<String>,
}

impl ScoreLedger {
    pub fn new() -> Self {
        Self {
            score: STARTING_SCORE,
            comments: Vec::new(),
        }
    }

    /// Subtract `points` and log why. The score floors at zero:
    /// deductions past the remaining score are truncated, not rejected.
    pub fn deduct(&mut self, points: f64, reason: &str, detail: Option<&str>) {
        self.score = (self.score - points).max(0.0);

        let mut entry = format!("-{}; {}", points, reason);
        if let Some(detail) = detail {
            entry.push('\n');
            entry.push_str(detail);
        }
        self.comments.push(entry);
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn comment_count(&self) -> usize {
        self.comments.len()
    }

    /// Final grade and the deduction log joined by newline, oldest first.
    pub fn finalize(&self) -> (f64, String) {
        (self.score, self.comments.join("\n"))
    }
}

impl Default for ScoreLedger {
    fn default() -> Self {
        Self::new()
    }
}
