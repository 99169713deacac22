//! Maps `validator` and `serde_json` failures onto [`ConfigurationError`].

use crate::errors::ConfigurationError;
use validator::{ValidationErrors, ValidationErrorsKind};

struct Issue {
    path: String,
    value: String,
    message: String,
}

/// Flattens a (possibly nested) validation report into a single error.
///
/// Issues are ordered by dotted path; the first one becomes the error's field.
pub fn from_validation_errors(errors: &ValidationErrors) -> ConfigurationError {
    let mut issues = Vec::new();
    collect_issues("", errors, &mut issues);
    issues.sort_by(|a, b| a.path.cmp(&b.path));

    let details = issues
        .iter()
        .map(|issue| format!("{}: {}", issue.path, issue.message))
        .collect();

    match issues.into_iter().next() {
        Some(first) => ConfigurationError {
            field: first.path,
            value: first.value,
            expected: first.message,
            details,
        },
        None => ConfigurationError::new("unknown", "unknown", "invalid configuration"),
    }
}

/// Every issue as `path: message`, ordered by path.
pub fn issue_messages(errors: &ValidationErrors) -> Vec<String> {
    let mut issues = Vec::new();
    collect_issues("", errors, &mut issues);
    issues.sort_by(|a, b| a.path.cmp(&b.path));
    issues
        .into_iter()
        .map(|issue| format!("{}: {}", issue.path, issue.message))
        .collect()
}

fn collect_issues(prefix: &str, errors: &ValidationErrors, out: &mut Vec<Issue>) {
    for (field, kind) in errors.errors() {
        let name = field.to_string();
        let path = if prefix.is_empty() { name } else { format!("{}.{}", prefix, name) };

        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for err in field_errors {
                    out.push(Issue {
                        path: path.clone(),
                        value: err
                            .params
                            .get("value")
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "unknown".to_string()),
                        message: err
                            .message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| err.code.to_string()),
                    });
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_issues(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_issues(&format!("{}.{}", path, index), inner, out);
                }
            }
        }
    }
}

/// Converts a deserialization failure of structured input.
///
/// `serde_json` does not report paths, but it does name missing fields,
/// which is the common case for required settings.
pub fn from_serde_error(err: &serde_json::Error) -> ConfigurationError {
    let message = err.to_string();
    let field = message
        .strip_prefix("missing field `")
        .and_then(|rest| rest.split('`').next())
        .unwrap_or("unknown")
        .to_string();

    ConfigurationError {
        field,
        value: "undefined".to_string(),
        expected: message.clone(),
        details: vec![message],
    }
}
