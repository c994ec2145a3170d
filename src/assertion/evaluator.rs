use crate::assertion::extractor::{extract_json_path, json_to_string};
use crate::assertion::types::{AssertError, AssertionDef, AssertionKind, AssertionResult, CompareOp};
use crate::http::Response;
use regex::Regex;

/// 对响应执行所有启用的断言，结果与输入顺序一致
pub fn evaluate_assertions(assertions: &[AssertionDef], response: &Response) -> Vec<AssertionResult> {
    let mut parsed_body: Option<Result<serde_json::Value, String>> = None;

    assertions
        .iter()
        .filter(|a| a.enabled)
        .map(|assertion| {
            if assertion.kind == AssertionKind::JsonPath {
                let body = parsed_body.get_or_insert_with(|| {
                    serde_json::from_str(&response.body).map_err(|e| e.to_string())
                });
                match body {
                    Ok(json) => evaluate_json_path(assertion, json),
                    Err(e) => AssertionResult::failure(
                        assertion,
                        None,
                        format!("Response body is not valid JSON: {}", e),
                    ),
                }
            } else {
                evaluate_assertion(assertion, response)
            }
        })
        .collect()
}

/// 执行单个断言求值
pub fn evaluate_assertion(assertion: &AssertionDef, response: &Response) -> AssertionResult {
    match assertion.kind {
        AssertionKind::Status => {
            let actual = response.status.to_string();
            compare_and_report(assertion, Some(actual))
        }

        AssertionKind::Header => {
            let actual = response
                .header(assertion.property.trim())
                .map(str::to_string);
            compare_and_report(assertion, actual)
        }

        AssertionKind::JsonPath => match serde_json::from_str::<serde_json::Value>(&response.body) {
            Ok(json) => evaluate_json_path(assertion, &json),
            Err(e) => AssertionResult::error(assertion, AssertError::JsonError(e)),
        },

        AssertionKind::BodyContains => {
            // 对 body-contains 而言，eq 与 contains 同义，neq 表示不包含
            let op = match assertion.op {
                CompareOp::Equal => CompareOp::Contains,
                other => other,
            };
            let actual = response.body.clone();
            let outcome = if op == CompareOp::NotEqual {
                Ok(!actual.contains(&assertion.expected))
            } else {
                compare(&actual, op, &assertion.expected)
            };
            report(assertion, Some(actual), outcome)
        }
    }
}

fn evaluate_json_path(assertion: &AssertionDef, json: &serde_json::Value) -> AssertionResult {
    let actual = extract_json_path(json, &assertion.property)
        .ok()
        .map(json_to_string);
    compare_and_report(assertion, actual)
}

fn compare_and_report(assertion: &AssertionDef, actual: Option<String>) -> AssertionResult {
    match actual {
        Some(actual) => {
            let outcome = compare(&actual, assertion.op, &assertion.expected);
            report(assertion, Some(actual), outcome)
        }
        None => {
            let target = target_label(assertion);
            let message = if assertion.op == CompareOp::Exists {
                format!("Expected {} to exist, but it was not found", target)
            } else {
                format!("{} not found", target)
            };
            AssertionResult::failure(assertion, None, message)
        }
    }
}

fn report(
    assertion: &AssertionDef,
    actual: Option<String>,
    outcome: Result<bool, AssertError>,
) -> AssertionResult {
    match outcome {
        Ok(true) => AssertionResult::success(assertion, actual.unwrap_or_default()),
        Ok(false) => {
            let shown = actual.as_deref().map(preview).unwrap_or_default();
            let message = if assertion.op == CompareOp::Exists {
                format!("Expected {} to exist, but it was empty", target_label(assertion))
            } else {
                format!(
                    "Expected {} {} {}, but got {}",
                    target_label(assertion),
                    assertion.op,
                    assertion.expected,
                    shown
                )
            };
            AssertionResult::failure(assertion, actual, message)
        }
        Err(e) => AssertionResult::failure(assertion, actual, e.to_string()),
    }
}

fn target_label(assertion: &AssertionDef) -> String {
    match assertion.kind {
        AssertionKind::Status => "status".to_string(),
        AssertionKind::Header => format!("header '{}'", assertion.property),
        AssertionKind::JsonPath => format!("'{}'", assertion.property),
        AssertionKind::BodyContains => "body".to_string(),
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 120;
    if text.chars().count() > LIMIT {
        let cut: String = text.chars().take(LIMIT).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

fn parse_number(text: &str) -> Result<f64, AssertError> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| AssertError::InvalidNumber(text.to_string()))
}

fn loosely_equal(actual: &str, expected: &str) -> bool {
    if actual == expected {
        return true;
    }
    match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => (a - b).abs() < f64::EPSILON,
        _ => false,
    }
}

/// 比较实际值与期望值
pub fn compare(actual: &str, op: CompareOp, expected: &str) -> Result<bool, AssertError> {
    match op {
        CompareOp::Equal => Ok(loosely_equal(actual, expected)),
        CompareOp::NotEqual => Ok(!loosely_equal(actual, expected)),
        CompareOp::Contains => Ok(actual.contains(expected)),
        CompareOp::Greater => Ok(parse_number(actual)? > parse_number(expected)?),
        CompareOp::Less => Ok(parse_number(actual)? < parse_number(expected)?),
        CompareOp::Exists => Ok(!actual.is_empty()),
        CompareOp::Regex => {
            let re = Regex::new(expected).map_err(|e| AssertError::InvalidRegex {
                pattern: expected.to_string(),
                reason: e.to_string(),
            })?;
            Ok(re.is_match(actual))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_response(status: u16, body: &str) -> Response {
        Response::new(status, body).with_header("content-type", "application/json")
    }

    #[test]
    fn test_evaluate_status_success() {
        let result = evaluate_assertion(&AssertionDef::status(200), &create_test_response(200, "{}"));
        assert!(result.passed);
        assert_eq!(result.actual, Some("200".to_string()));
    }

    #[test]
    fn test_evaluate_status_failure() {
        let result = evaluate_assertion(&AssertionDef::status(200), &create_test_response(404, "{}"));
        assert!(!result.passed);
        assert_eq!(result.actual, Some("404".to_string()));
        assert!(result.message.contains("404"));
    }

    #[test]
    fn test_evaluate_header_contains() {
        let def = AssertionDef::new(
            "h1",
            AssertionKind::Header,
            "Content-Type",
            CompareOp::Contains,
            "json",
        );
        let result = evaluate_assertion(&def, &create_test_response(200, "{}"));
        assert!(result.passed);
        assert_eq!(result.assertion_id, "h1");
    }

    #[test]
    fn test_evaluate_json_path_eq() {
        let def = AssertionDef::json_path("$.a.b", CompareOp::Equal, "1");
        let result = evaluate_assertion(&def, &create_test_response(200, r#"{"a":{"b":1}}"#));
        assert!(result.passed);
    }

    #[test]
    fn test_evaluate_json_path_string_is_unquoted() {
        let def = AssertionDef::json_path("$.name", CompareOp::Equal, "test");
        let result = evaluate_assertion(&def, &create_test_response(200, r#"{"name":"test"}"#));
        assert!(result.passed);
        assert_eq!(result.actual, Some("test".to_string()));
    }

    #[test]
    fn test_numeric_comparisons() {
        let response = create_test_response(200, r#"{"count": 5}"#);
        let gt = AssertionDef::json_path("$.count", CompareOp::Greater, "4.5");
        let lt = AssertionDef::json_path("$.count", CompareOp::Less, "5");
        assert!(evaluate_assertion(&gt, &response).passed);
        assert!(!evaluate_assertion(&lt, &response).passed);

        let bad = AssertionDef::json_path("$.count", CompareOp::Greater, "many");
        let result = evaluate_assertion(&bad, &response);
        assert!(!result.passed);
        assert!(result.message.contains("Invalid number"));
    }

    #[test]
    fn test_invalid_body_does_not_panic() {
        let def = AssertionDef::json_path("$.a", CompareOp::Exists, "");
        let results = evaluate_assertions(&[def], &create_test_response(200, "<html>"));
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
        assert!(results[0].message.contains("not valid JSON"));
    }

    #[test]
    fn test_invalid_regex_fails() {
        let def = AssertionDef::new("r", AssertionKind::BodyContains, "", CompareOp::Regex, "(");
        let result = evaluate_assertion(&def, &create_test_response(200, "abc"));
        assert!(!result.passed);
        assert!(result.message.contains("Invalid regex"));
    }

    #[test]
    fn test_exists_and_missing_header() {
        let response = create_test_response(200, "{}").with_header("X-Empty", "");
        let exists = AssertionDef::new("", AssertionKind::Header, "x-empty", CompareOp::Exists, "");
        assert!(!evaluate_assertion(&exists, &response).passed);

        let missing = AssertionDef::new("", AssertionKind::Header, "x-none", CompareOp::Exists, "");
        let result = evaluate_assertion(&missing, &response);
        assert!(!result.passed);
        assert!(result.actual.is_none());
    }

    #[test]
    fn test_body_contains() {
        let response = create_test_response(200, r#"{"message":"hello world"}"#);
        let def = AssertionDef::new("", AssertionKind::BodyContains, "", CompareOp::Equal, "hello");
        assert!(evaluate_assertion(&def, &response).passed);

        let def = AssertionDef::new("", AssertionKind::BodyContains, "", CompareOp::NotEqual, "bye");
        assert!(evaluate_assertion(&def, &response).passed);
    }

    #[test]
    fn test_disabled_assertions_are_skipped() {
        let mut disabled = AssertionDef::status(500);
        disabled.enabled = false;
        let results = evaluate_assertions(
            &[AssertionDef::status(200), disabled, AssertionDef::status(201)],
            &create_test_response(200, "{}"),
        );
        assert_eq!(results.len(), 2);
        assert!(results[0].passed);
        assert!(!results[1].passed);
    }
}
