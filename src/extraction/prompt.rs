//! Prompt text and response schema for task extraction.

use serde_json::{json, Value};

use super::ExtractionRequest;

/// Build the instruction prompt for one extraction request.
pub fn build_prompt(request: &ExtractionRequest) -> Result<String, serde_json::Error> {
    let rows = serde_json::to_string(&request.rows)?;
    let reference = request.reference_date.format("%Y-%m-%d");
    let cutoff = request.cutoff_date().format("%Y-%m-%d");

    Ok(format!(
        "You are given rows exported from a work plan spreadsheet.\n\
         Reference date (today): {reference}\n\
         \n\
         1. Work out which columns hold the task title, due date, assignee, status, \
         description and priority. Header names vary between sheets.\n\
         2. Keep only tasks due from {reference} up to and including {cutoff}.\n\
         3. Group the kept tasks by assignee. Use the same spelling of the name for \
         the group and for each of its tasks.\n\
         4. Write a short summary of the workload for the coming week.\n\
         \n\
         Report dates as YYYY-MM-DD. Use High, Medium or Low for priority when the \
         sheet gives one.\n\
         \n\
         Rows (JSON):\n{rows}"
    ))
}

/// JSON schema the model must answer with.
pub fn response_schema() -> Value {
    let task = json!({
        "type": "OBJECT",
        "properties": {
            "id": {"type": "STRING"},
            "title": {"type": "STRING"},
            "description": {"type": "STRING"},
            "dueDate": {"type": "STRING"},
            "status": {"type": "STRING"},
            "assignee": {"type": "STRING"},
            "priority": {"type": "STRING", "enum": ["High", "Medium", "Low"]}
        },
        "required": ["title", "dueDate", "assignee"]
    });

    json!({
        "type": "OBJECT",
        "properties": {
            "summary": {
                "type": "STRING",
                "description": "Short summary of next week's workload"
            },
            "assignees": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": {"type": "STRING"},
                        "email": {"type": "STRING", "nullable": true},
                        "tasks": {"type": "ARRAY", "items": task}
                    },
                    "required": ["name", "tasks"]
                }
            }
        },
        "required": ["summary", "assignees"]
    })
}
