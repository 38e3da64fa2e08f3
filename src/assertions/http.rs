//! HTTP response assertions
//!
//! Probes the student's running server and reports into the ledger.
//! Failing to reach the server at all is not an assertion failure: it
//! means the grading environment (or the server launch) is broken, so
//! it surfaces as a configuration error instead of a deduction.

use anyhow::Result;
use reqwest::{Client, Method, Response};
use serde_json::Value;
use tracing::debug;

use super::check_equal;
use crate::error::GradeError;
use crate::ledger::ScoreLedger;

/// Request timeout for probing the student server
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Length of the hexadecimal object identifier stripped by
/// [`HttpTester::assert_body_equals_stripped`]
const OBJECT_ID_LEN: usize = 24;

/// HTTP prober for a student's server
pub struct HttpTester {
    client: Client,
}

impl HttpTester {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }

    /// Issue a request. Non-string bodies are JSON-serialized with a
    /// `Content-Type: application/json` header; string bodies go out
    /// as-is. Transport failures become configuration errors.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Response> {
        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = body {
            request = match body {
                Value::String(s) => request.body(s.clone()),
                other => request.json(other),
            };
        }

        debug!("Probing student server: {} {}", method, url);
        request.send().await.map_err(|e| {
            GradeError::Config(format!(
                "could not reach {}: the server either didn't start, is at an unexpected URL, \
                 or crashed ({})",
                url, e
            ))
            .into()
        })
    }

    /// Deduct full points unless the response status matches.
    pub async fn assert_status(
        &self,
        ledger: &mut ScoreLedger,
        points: f64,
        label: &str,
        method: Method,
        url: &str,
        body: Option<&Value>,
        expected_status: u16,
    ) -> Result<()> {
        let response = self.request(method, url, body).await?;
        let status = response.status().as_u16();
        if status != expected_status {
            ledger.deduct(
                points,
                &format!("{}: unexpected status", label),
                Some(&format!("expected {}, got {}", expected_status, status)),
            );
        }
        Ok(())
    }

    /// Deduct full points if the status is not 200, if a non-string
    /// expectation meets an unparsable body, or if the body does not
    /// deep-equal `expected`.
    pub async fn assert_body_equals(
        &self,
        ledger: &mut ScoreLedger,
        points: f64,
        label: &str,
        method: Method,
        url: &str,
        body: Option<&Value>,
        expected: &Value,
    ) -> Result<()> {
        if let Some(actual) = self
            .fetch_body(ledger, points, label, method, url, body, expected)
            .await?
        {
            check_equal(ledger, points, label, &actual, expected);
        }
        Ok(())
    }

    /// Like [`assert_body_equals`](Self::assert_body_equals), but strips
    /// the `_id` field (a 24-character lowercase-hex identifier) from
    /// the actual payload before comparing, and returns it so later test
    /// cases can reference the resource this request created. A missing
    /// or malformed identifier fails the probe for full points.
    pub async fn assert_body_equals_stripped(
        &self,
        ledger: &mut ScoreLedger,
        points: f64,
        label: &str,
        method: Method,
        url: &str,
        body: Option<&Value>,
        expected: &Value,
    ) -> Result<Option<String>> {
        let Some(mut actual) = self
            .fetch_body(ledger, points, label, method, url, body, expected)
            .await?
        else {
            return Ok(None);
        };

        match strip_object_id(&mut actual) {
            Ok(id) => {
                check_equal(ledger, points, label, &actual, expected);
                Ok(Some(id))
            }
            Err(why) => {
                ledger.deduct(
                    points,
                    &format!("{}: error thrown on valid input", label),
                    Some(&why),
                );
                Ok(None)
            }
        }
    }

    /// Shared status/parse handling for the body assertions. Returns
    /// `None` when a deduction already settled the check.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_body(
        &self,
        ledger: &mut ScoreLedger,
        points: f64,
        label: &str,
        method: Method,
        url: &str,
        body: Option<&Value>,
        expected: &Value,
    ) -> Result<Option<Value>> {
        let response = self.request(method, url, body).await?;
        let status = response.status().as_u16();
        if status != 200 {
            ledger.deduct(
                points,
                &format!("{}: unexpected status", label),
                Some(&format!("expected 200, got {}", status)),
            );
            return Ok(None);
        }

        let text = response.text().await.map_err(|e| {
            GradeError::Config(format!("could not read response body from {}: {}", url, e))
        })?;

        if expected.is_string() {
            return Ok(Some(Value::String(text)));
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(actual) => Ok(Some(actual)),
            Err(_) => {
                ledger.deduct(
                    points,
                    &format!("{}: unexpected value", label),
                    Some(&format!("response body is not valid JSON:\n{}", text)),
                );
                Ok(None)
            }
        }
    }
}

/// Remove the `_id` field from a JSON object and validate its shape.
/// Returns the identifier, or a description of what was wrong with it.
pub(crate) fn strip_object_id(value: &mut Value) -> Result<String, String> {
    let Some(object) = value.as_object_mut() else {
        return Err(format!("expected a JSON object, got: {}", value));
    };

    let Some(id_value) = object.remove("_id") else {
        return Err("response object has no _id field".into());
    };

    let Some(id) = id_value.as_str() else {
        return Err(format!("_id is not a string: {}", id_value));
    };

    if id.len() != OBJECT_ID_LEN {
        return Err(format!(
            "_id must be {} characters, got {} ({:?})",
            OBJECT_ID_LEN,
            id.len(),
            id
        ));
    }
    if !id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return Err(format!("_id is not lowercase hex: {:?}", id));
    }

    Ok(id.to_string())
}
