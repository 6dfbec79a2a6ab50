//! Structural validation of the model's JSON answer.
//!
//! Shape violations fail with [`AnalysisError::Schema`] carrying a JSON path
//! such as `$.assignees[1].tasks[0].dueDate`. Content that has the right shape
//! but is inconsistent is accepted and reported as [`ConsistencyWarning`]s.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use super::AnalysisError;
use crate::plan::{AssigneeSummary, ExtractionResult, Task};

/// Tolerated inconsistency in an otherwise well-formed result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyWarning {
    /// A task's `assignee` differs from the name it is grouped under
    AssigneeMismatch {
        group: String,
        task: String,
        task_assignee: String,
    },
    /// The same name appears in more than one group
    DuplicateAssignee { name: String },
    /// Priority outside High/Medium/Low (treated as Low)
    UnrecognizedPriority {
        group: String,
        task: String,
        priority: String,
    },
}

impl fmt::Display for ConsistencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AssigneeMismatch {
                group,
                task,
                task_assignee,
            } => write!(
                f,
                "task '{}' under '{}' names assignee '{}'",
                task, group, task_assignee
            ),
            Self::DuplicateAssignee { name } => write!(f, "assignee '{}' appears more than once", name),
            Self::UnrecognizedPriority {
                group,
                task,
                priority,
            } => write!(
                f,
                "task '{}' under '{}' has unrecognized priority '{}'",
                task, group, priority
            ),
        }
    }
}

/// Parse and validate response text.
pub fn parse_response(text: &str) -> Result<(ExtractionResult, Vec<ConsistencyWarning>), AnalysisError> {
    let value: Value = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| AnalysisError::schema("$", format!("response is not valid JSON: {}", e)))?;
    let result = extraction_result(&value)?;
    let warnings = consistency_warnings(&result);
    Ok((result, warnings))
}

/// Models sometimes wrap JSON in a ```json fence despite the MIME type.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn extraction_result(value: &Value) -> Result<ExtractionResult, AnalysisError> {
    let obj = as_object(value, "$")?;
    let summary = required_str(obj, "summary", "$")?;
    let assignees = required_array(obj, "assignees", "$")?
        .iter()
        .enumerate()
        .map(|(i, v)| assignee(v, &format!("$.assignees[{}]", i)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ExtractionResult { summary, assignees })
}

fn assignee(value: &Value, path: &str) -> Result<AssigneeSummary, AnalysisError> {
    let obj = as_object(value, path)?;
    let tasks = required_array(obj, "tasks", path)?
        .iter()
        .enumerate()
        .map(|(i, v)| task(v, &format!("{}.tasks[{}]", path, i)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AssigneeSummary {
        name: required_str(obj, "name", path)?,
        email: optional_str(obj, "email", path)?,
        tasks,
    })
}

fn task(value: &Value, path: &str) -> Result<Task, AnalysisError> {
    let obj = as_object(value, path)?;
    Ok(Task {
        id: optional_str(obj, "id", path)?,
        title: required_text(obj, "title", path)?,
        description: optional_str(obj, "description", path)?.unwrap_or_default(),
        due_date: required_str(obj, "dueDate", path)?,
        status: optional_str(obj, "status", path)?.unwrap_or_default(),
        assignee: required_str(obj, "assignee", path)?,
        priority: optional_str(obj, "priority", path)?,
    })
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, AnalysisError> {
    value
        .as_object()
        .ok_or_else(|| AnalysisError::schema(path, format!("expected an object, found {}", type_name(value))))
}

fn required_str(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String, AnalysisError> {
    let field_path = format!("{}.{}", path, key);
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(AnalysisError::schema(
            field_path,
            format!("expected a string, found {}", type_name(other)),
        )),
        None => Err(AnalysisError::schema(field_path, "required field is missing")),
    }
}

/// A required string that must hold something besides whitespace.
fn required_text(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String, AnalysisError> {
    let text = required_str(obj, key, path)?;
    if text.trim().is_empty() {
        return Err(AnalysisError::schema(
            format!("{}.{}", path, key),
            "must not be empty",
        ));
    }
    Ok(text)
}

/// Missing and `null` both read as absent.
fn optional_str(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<String>, AnalysisError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(AnalysisError::schema(
            format!("{}.{}", path, key),
            format!("expected a string or null, found {}", type_name(other)),
        )),
    }
}

fn required_array<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'a Vec<Value>, AnalysisError> {
    let field_path = format!("{}.{}", path, key);
    match obj.get(key) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(AnalysisError::schema(
            field_path,
            format!("expected an array, found {}", type_name(other)),
        )),
        None => Err(AnalysisError::schema(field_path, "required field is missing")),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn consistency_warnings(result: &ExtractionResult) -> Vec<ConsistencyWarning> {
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();

    for group in &result.assignees {
        if !seen.insert(group.name.as_str()) {
            warnings.push(ConsistencyWarning::DuplicateAssignee {
                name: group.name.clone(),
            });
        }

        for task in group.mismatched_tasks() {
            warnings.push(ConsistencyWarning::AssigneeMismatch {
                group: group.name.clone(),
                task: task.title.clone(),
                task_assignee: task.assignee.clone(),
            });
        }
        for task in &group.tasks {
            match &task.priority {
                Some(priority) if task.has_unrecognized_priority() => {
                    warnings.push(ConsistencyWarning::UnrecognizedPriority {
                        group: group.name.clone(),
                        task: task.title.clone(),
                        priority: priority.clone(),
                    });
                }
                _ => {}
            }
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Priority;

    fn schema_path(err: AnalysisError) -> String {
        match err {
            AnalysisError::Schema { path, .. } => path,
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_response() {
        let text = r#"{
            "summary": "Two tasks next week",
            "assignees": [{
                "name": "Ana",
                "email": null,
                "tasks": [
                    {"title": "Report", "dueDate": "2024-06-10", "assignee": "Ana", "priority": "High"},
                    {"id": "T-2", "title": "Deck", "dueDate": "2024-06-11", "assignee": "Ana", "status": "Open"}
                ]
            }]
        }"#;
        let (result, warnings) = parse_response(text).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(result.summary, "Two tasks next week");
        let ana = result.assignee("Ana").unwrap();
        assert_eq!(ana.email, None);
        assert_eq!(ana.tasks[0].effective_priority(), Priority::High);
        assert_eq!(ana.tasks[1].id.as_deref(), Some("T-2"));
        assert_eq!(ana.tasks[1].status, "Open");
        assert_eq!(ana.tasks[1].description, "");
    }

    #[test]
    fn test_missing_assignees() {
        let err = parse_response(r#"{"summary": "nothing"}"#).unwrap_err();
        assert_eq!(schema_path(err), "$.assignees");
    }

    #[test]
    fn test_wrong_type_reports_nested_path() {
        let text = r#"{"summary": "", "assignees": [
            {"name": "Ana", "tasks": []},
            {"name": "Bo", "tasks": [{"title": "Deck", "dueDate": 45453, "assignee": "Bo"}]}
        ]}"#;
        let err = parse_response(text).unwrap_err();
        assert_eq!(schema_path(err), "$.assignees[1].tasks[0].dueDate");
    }

    #[test]
    fn test_not_json() {
        let err = parse_response("I could not find any tasks.").unwrap_err();
        assert_eq!(schema_path(err), "$");
        let err = parse_response("[]").unwrap_err();
        assert_eq!(schema_path(err), "$");
    }

    #[test]
    fn test_code_fence_is_stripped() {
        let text = "```json\n{\"summary\": \"ok\", \"assignees\": []}\n```";
        let (result, _) = parse_response(text).unwrap();
        assert_eq!(result.summary, "ok");
    }

    #[test]
    fn test_tolerated_inconsistencies_become_warnings() {
        let text = r#"{"summary": "", "assignees": [
            {"name": "Ana", "tasks": [
                {"title": "Report", "dueDate": "2024-06-10", "assignee": "Bo", "priority": "Urgent"}
            ]},
            {"name": "Ana", "tasks": []}
        ]}"#;
        let (result, warnings) = parse_response(text).unwrap();

        assert_eq!(result.assignees.len(), 2);
        assert_eq!(
            result.assignees[0].tasks[0].priority.as_deref(),
            Some("Urgent")
        );
        assert_eq!(result.assignees[0].tasks[0].effective_priority(), Priority::Low);
        assert_eq!(
            warnings,
            vec![
                ConsistencyWarning::AssigneeMismatch {
                    group: "Ana".into(),
                    task: "Report".into(),
                    task_assignee: "Bo".into(),
                },
                ConsistencyWarning::UnrecognizedPriority {
                    group: "Ana".into(),
                    task: "Report".into(),
                    priority: "Urgent".into(),
                },
                ConsistencyWarning::DuplicateAssignee { name: "Ana".into() },
            ]
        );
    }

    #[test]
    fn test_blank_title_is_a_schema_error() {
        let text = r#"{"summary": "", "assignees": [
            {"name": "Ana", "tasks": [{"title": "Report", "dueDate": "2024-06-10", "assignee": "Ana"}]},
            {"name": "Bo", "tasks": [
                {"title": "Deck", "dueDate": "2024-06-11", "assignee": "Bo"},
                {"title": "  ", "dueDate": "2024-06-12", "assignee": "Bo"}
            ]}
        ]}"#;
        let err = parse_response(text).unwrap_err();
        assert_eq!(schema_path(err), "$.assignees[1].tasks[1].title");
    }
}
