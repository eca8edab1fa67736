// ABOUTME: Built-in assertions for validating captured task output
// ABOUTME: Provides exit code, substring, equality, JSON, and regex checks plus aggregation

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::engine::Task;

/// A single assertion failure. Aggregated failures join their messages
/// with `"; "` so one error carries every mismatch from an attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct AssertionError(String);

impl AssertionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// An assertion inspects a completed task and reports a failure, if any.
pub type AssertionFn = Arc<dyn Fn(&Task) -> Result<(), AssertionError> + Send + Sync>;

/// Runs every assertion registered on the task, in insertion order, and
/// aggregates all failures into a single error. Returns `Ok(())` only when
/// every assertion passed.
pub fn run_assertions(task: &Task) -> Result<(), AssertionError> {
    let mut failures = Vec::new();
    for assertion in &task.asserts {
        if let Err(err) = assertion(task) {
            failures.push(err.to_string());
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(AssertionError::new(failures.join("; ")))
    }
}

/// Fails unless the task exited with `expected`.
pub fn exit_code(expected: i32) -> AssertionFn {
    Arc::new(move |task: &Task| {
        if task.output.exit_code != expected {
            return Err(AssertionError::new(format!(
                "exit code mismatch: expected {}, got {}",
                expected, task.output.exit_code
            )));
        }
        Ok(())
    })
}

/// Substring test over the raw combined output. No normalization is applied,
/// unlike [`output_equals`] and [`output_matches`].
pub fn output_contains(expected: impl Into<String>) -> AssertionFn {
    let expected = expected.into();
    Arc::new(move |task: &Task| {
        if !task.output.output.contains(&expected) {
            return Err(AssertionError::new(format!(
                "output does not contain expected substring: {:?}",
                expected
            )));
        }
        Ok(())
    })
}

/// Compares output to `expected` after normalizing both sides.
pub fn output_equals(expected: impl Into<String>) -> AssertionFn {
    let expected = expected.into();
    Arc::new(move |task: &Task| {
        let want = normalize(&expected);
        let got = normalize(&task.output.output);
        if got != want {
            return Err(AssertionError::new(format!(
                "output mismatch: expected {:?}, got {:?}",
                want, got
            )));
        }
        Ok(())
    })
}

/// Parses both the expected string and the captured output as JSON and
/// compares them structurally. Differences whose dotted path exactly matches
/// an entry in `skip_paths` are ignored.
pub fn output_json_equals(expected: impl Into<String>, skip_paths: Vec<String>) -> AssertionFn {
    let expected = expected.into();
    Arc::new(move |task: &Task| {
        let want: Value = serde_json::from_str(&expected).map_err(|err| {
            AssertionError::new(format!("failed to parse expected output as JSON: {}", err))
        })?;
        let raw = task.output.output.replace("\r\n", "\n");
        let got: Value = serde_json::from_str(&raw).map_err(|err| {
            AssertionError::new(format!("failed to parse actual output as JSON: {}", err))
        })?;

        let mut diffs = Vec::new();
        json_diff(&want, &got, String::new(), &mut diffs);
        diffs.retain(|diff| !skip_paths.iter().any(|skip| skip == &diff.path));

        if let Some(diff) = diffs.first() {
            return Err(AssertionError::new(format!(
                "json mismatch at path {:?}: expected {}, got {}",
                diff.path, diff.expected, diff.actual
            )));
        }
        Ok(())
    })
}

/// Regex search against the normalized output. An invalid pattern is itself
/// reported as an assertion failure.
pub fn output_matches(pattern: impl Into<String>) -> AssertionFn {
    let pattern = pattern.into();
    Arc::new(move |task: &Task| {
        let regex = Regex::new(&pattern).map_err(|err| {
            AssertionError::new(format!("invalid regexp pattern {:?}: {}", pattern, err))
        })?;
        if !regex.is_match(&normalize(&task.output.output)) {
            return Err(AssertionError::new(format!(
                "output does not match pattern: {:?}",
                pattern
            )));
        }
        Ok(())
    })
}

fn normalize(raw: &str) -> String {
    raw.replace("\r\n", "\n").trim().to_string()
}

struct JsonDiff {
    path: String,
    expected: Value,
    actual: Value,
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn json_diff(expected: &Value, actual: &Value, path: String, diffs: &mut Vec<JsonDiff>) {
    match (expected, actual) {
        (Value::Object(want), Value::Object(got)) => {
            for (key, want_value) in want {
                match got.get(key) {
                    Some(got_value) => {
                        json_diff(want_value, got_value, join_path(&path, key), diffs)
                    }
                    None => diffs.push(JsonDiff {
                        path: join_path(&path, key),
                        expected: want_value.clone(),
                        actual: Value::Null,
                    }),
                }
            }
            for (key, got_value) in got {
                if !want.contains_key(key) {
                    diffs.push(JsonDiff {
                        path: join_path(&path, key),
                        expected: Value::Null,
                        actual: got_value.clone(),
                    });
                }
            }
        }
        (Value::Array(want), Value::Array(got)) => {
            if want.len() != got.len() {
                diffs.push(JsonDiff {
                    path,
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
                return;
            }
            for (index, (want_value, got_value)) in want.iter().zip(got.iter()).enumerate() {
                json_diff(
                    want_value,
                    got_value,
                    join_path(&path, &index.to_string()),
                    diffs,
                );
            }
        }
        _ => {
            if expected != actual {
                diffs.push(JsonDiff {
                    path,
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
    }
}
