//! Assertion engine
//!
//! Check primitives that report into a [`ScoreLedger`](crate::ledger::ScoreLedger).
//! Every assertion takes a point value and a zero-argument probe (a
//! deferred, possibly async computation against the submission) and
//! never panics or propagates probe failures: a failing probe is worth
//! a deduction, not a crash of the batch.
//!
//! Values are `serde_json::Value` and equality is structural.

pub mod http;

use std::future::Future;

use serde_json::Value;

use crate::error::GradeError;
use crate::ledger::ScoreLedger;

/// A failure raised by a probe, carrying the error's kind (type name)
/// and message so exception assertions can award partial credit.
#[derive(Debug, Clone)]
pub struct ProbeError {
    pub kind: String,
    pub message: String,
}

impl ProbeError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// What a probe produces: a value, or a raised error
pub type ProbeOutcome = Result<Value, ProbeError>;

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Deduct on structural inequality, showing both values.
pub(crate) fn check_equal(
    ledger: &mut ScoreLedger,
    points: f64,
    label: &str,
    actual: &Value,
    expected: &Value,
) {
    if actual != expected {
        ledger.deduct(
            points,
            &format!("{}: unexpected value", label),
            Some(&format!(
                "expected:\n{}\nactual:\n{}",
                pretty(expected),
                pretty(actual)
            )),
        );
    }
}

/// Equality assertion: run the probe and compare structurally against
/// `expected`. A probe failure costs full points.
pub async fn assert_equals<F, Fut>(
    ledger: &mut ScoreLedger,
    points: f64,
    label: &str,
    probe: F,
    expected: &Value,
) where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ProbeOutcome>,
{
    match probe().await {
        Err(e) => ledger.deduct(
            points,
            &format!("{}: error thrown on valid input", label),
            Some(&e.to_string()),
        ),
        Ok(actual) => check_equal(ledger, points, label, &actual, expected),
    }
}

/// Options equality: succeed if the actual value deep-equals any
/// element of `expected_options`; otherwise deduct full points and list
/// every acceptable option.
pub async fn assert_equals_any<F, Fut>(
    ledger: &mut ScoreLedger,
    points: f64,
    label: &str,
    probe: F,
    expected_options: &[Value],
) where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ProbeOutcome>,
{
    match probe().await {
        Err(e) => ledger.deduct(
            points,
            &format!("{}: error thrown on valid input", label),
            Some(&e.to_string()),
        ),
        Ok(actual) => {
            if !expected_options.iter().any(|option| *option == actual) {
                let options = expected_options
                    .iter()
                    .map(pretty)
                    .collect::<Vec<_>>()
                    .join("\n");
                ledger.deduct(
                    points,
                    &format!("{}: unexpected value", label),
                    Some(&format!(
                        "acceptable values:\n{}\nactual:\n{}",
                        options,
                        pretty(&actual)
                    )),
                );
            }
        }
    }
}

/// What an exception assertion expects of the raised error.
///
/// Message and kind expectations each carry their own point share so a
/// submission raising the right error the wrong way earns partial
/// credit. Each expectation must be paired with its points.
#[derive(Debug, Clone, Default)]
pub struct RaiseExpectation {
    pub message: Option<String>,
    pub message_points: Option<f64>,
    pub kind: Option<String>,
    pub kind_points: Option<f64>,
}

impl RaiseExpectation {
    /// Any raised error is acceptable
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: impl Into<String>, points: f64) -> Self {
        self.message = Some(message.into());
        self.message_points = Some(points);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>, points: f64) -> Self {
        self.kind = Some(kind.into());
        self.kind_points = Some(points);
        self
    }

    fn validate(&self) -> Result<(), GradeError> {
        if self.message.is_some() && self.message_points.is_none() {
            return Err(GradeError::Config(
                "exception assertion expects a message but no message points".into(),
            ));
        }
        if self.kind.is_some() && self.kind_points.is_none() {
            return Err(GradeError::Config(
                "exception assertion expects an error kind but no kind points".into(),
            ));
        }
        Ok(())
    }
}

/// Exception assertion: the probe must raise.
///
/// Not raising costs full points. When message/kind expectations are
/// given, mismatches cost their own point shares, with the combined
/// deduction capped at `points` so two symptoms of one bug never
/// double-count past the test's budget.
///
/// Returns a configuration error when an expectation lacks its paired
/// point value; that is a broken grading setup, not a student failure.
pub async fn assert_raises<F, Fut>(
    ledger: &mut ScoreLedger,
    points: f64,
    label: &str,
    probe: F,
    expectation: &RaiseExpectation,
) -> anyhow::Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ProbeOutcome>,
{
    expectation.validate()?;

    let raised = match probe().await {
        Ok(value) => {
            ledger.deduct(
                points,
                &format!("{}: expected an error, got a result", label),
                Some(&pretty(&value)),
            );
            return Ok(());
        }
        Err(raised) => raised,
    };

    if expectation.message.is_none() && expectation.kind.is_none() {
        return Ok(());
    }

    let mut deducted = 0.0;

    if let (Some(expected_message), Some(message_points)) =
        (&expectation.message, expectation.message_points)
    {
        if raised.message.trim() != expected_message.trim() {
            ledger.deduct(
                message_points,
                &format!("{}: wrong error message", label),
                Some(&format!(
                    "expected: {}\nactual: {}",
                    expected_message,
                    raised.message.trim()
                )),
            );
            deducted = message_points;
        }
    }

    if let (Some(expected_kind), Some(kind_points)) = (&expectation.kind, expectation.kind_points)
    {
        if raised.kind != *expected_kind {
            // Cap the cumulative penalty at the test's point value
            let capped = kind_points.min(points - deducted).max(0.0);
            ledger.deduct(
                capped,
                &format!("{}: wrong error kind", label),
                Some(&format!(
                    "expected: {}\nactual: {}",
                    expected_kind, raised.kind
                )),
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{severity_of, Severity};
    use serde_json::json;

    #[tokio::test]
    async fn test_equals_success_deducts_nothing() {
        let mut ledger = ScoreLedger::new();
        assert_equals(
            &mut ledger,
            10.0,
            "shape",
            || async { Ok(json!({"a": [1, 2], "b": "x"})) },
            &json!({"a": [1, 2], "b": "x"}),
        )
        .await;
        assert_eq!(ledger.score(), 100.0);
        assert_eq!(ledger.comment_count(), 0);
    }

    #[tokio::test]
    async fn test_equals_mismatch_shows_both_values() {
        let mut ledger = ScoreLedger::new();
        assert_equals(
            &mut ledger,
            10.0,
            "count",
            || async { Ok(json!(4)) },
            &json!(3),
        )
        .await;
        assert_eq!(ledger.score(), 90.0);
        let (_, comments) = ledger.finalize();
        assert!(comments.contains("expected:\n3"));
        assert!(comments.contains("actual:\n4"));
    }

    #[tokio::test]
    async fn test_equals_probe_failure_deducts_full_points() {
        let mut ledger = ScoreLedger::new();
        assert_equals(
            &mut ledger,
            10.0,
            "count",
            || async { Err(ProbeError::new("TypeError", "x is not a function")) },
            &json!(3),
        )
        .await;
        assert_eq!(ledger.score(), 90.0);
        let (_, comments) = ledger.finalize();
        assert!(comments.contains("error thrown on valid input"));
        assert!(comments.contains("x is not a function"));
    }

    #[tokio::test]
    async fn test_equals_any_matches_one_option() {
        let mut ledger = ScoreLedger::new();
        assert_equals_any(
            &mut ledger,
            10.0,
            "variant",
            || async { Ok(json!({"a": 1})) },
            &[json!({"a": 2}), json!({"a": 1})],
        )
        .await;
        assert_eq!(ledger.score(), 100.0);
    }

    #[tokio::test]
    async fn test_equals_any_lists_options_on_miss() {
        let mut ledger = ScoreLedger::new();
        assert_equals_any(
            &mut ledger,
            10.0,
            "variant",
            || async { Ok(json!({"a": 1})) },
            &[json!({"a": 2}), json!({"a": 3})],
        )
        .await;
        assert_eq!(ledger.score(), 90.0);
        let (_, comments) = ledger.finalize();
        assert!(comments.contains("acceptable values"));
    }

    #[tokio::test]
    async fn test_raises_missing_error_costs_full_points() {
        let mut ledger = ScoreLedger::new();
        assert_raises(
            &mut ledger,
            8.0,
            "reject bad input",
            || async { Ok(json!("fine")) },
            &RaiseExpectation::any(),
        )
        .await
        .unwrap();
        assert_eq!(ledger.score(), 92.0);
        let (_, comments) = ledger.finalize();
        assert!(comments.contains("expected an error, got a result"));
    }

    #[tokio::test]
    async fn test_raises_any_error_is_acceptable() {
        let mut ledger = ScoreLedger::new();
        assert_raises(
            &mut ledger,
            8.0,
            "reject bad input",
            || async { Err(ProbeError::new("RangeError", "whatever")) },
            &RaiseExpectation::any(),
        )
        .await
        .unwrap();
        assert_eq!(ledger.score(), 100.0);
    }

    #[tokio::test]
    async fn test_raises_partial_credit_for_message_only() {
        let mut ledger = ScoreLedger::new();
        assert_raises(
            &mut ledger,
            10.0,
            "reject bad input",
            || async { Err(ProbeError::new("RangeError", "out of bounds")) },
            &RaiseExpectation::any().with_message("index out of range", 4.0),
        )
        .await
        .unwrap();
        assert_eq!(ledger.score(), 96.0);
    }

    #[tokio::test]
    async fn test_raises_message_comparison_trims() {
        let mut ledger = ScoreLedger::new();
        assert_raises(
            &mut ledger,
            10.0,
            "reject bad input",
            || async { Err(ProbeError::new("RangeError", "  index out of range \n")) },
            &RaiseExpectation::any().with_message("index out of range", 4.0),
        )
        .await
        .unwrap();
        assert_eq!(ledger.score(), 100.0);
    }

    #[tokio::test]
    async fn test_raises_combined_penalty_never_exceeds_points() {
        // Property: message + kind penalties are capped at the test's
        // point value, for any configured split.
        let splits = [(6.0, 6.0), (10.0, 10.0), (4.0, 5.0), (9.0, 3.0)];
        for (message_points, kind_points) in splits {
            let mut ledger = ScoreLedger::new();
            assert_raises(
                &mut ledger,
                10.0,
                "reject bad input",
                || async { Err(ProbeError::new("RangeError", "nope")) },
                &RaiseExpectation::any()
                    .with_message("index out of range", message_points)
                    .with_kind("TypeError", kind_points),
            )
            .await
            .unwrap();
            let lost = 100.0 - ledger.score();
            assert!(
                lost <= 10.0,
                "split ({}, {}) deducted {}",
                message_points,
                kind_points,
                lost
            );
        }
    }

    #[tokio::test]
    async fn test_raises_unpaired_points_is_config_error() {
        let mut ledger = ScoreLedger::new();
        let expectation = RaiseExpectation {
            message: Some("index out of range".into()),
            message_points: None,
            kind: None,
            kind_points: None,
        };
        let err = assert_raises(
            &mut ledger,
            10.0,
            "reject bad input",
            || async { Err(ProbeError::new("RangeError", "nope")) },
            &expectation,
        )
        .await
        .unwrap_err();
        assert_eq!(severity_of(&err), Severity::Config);
        // A configuration error must not touch the ledger
        assert_eq!(ledger.comment_count(), 0);
    }
}
