//! Task extraction - turns parsed rows into an [`ExtractionResult`] via an LLM.
//!
//! The request carries the first rows of the sheet (capped) and a reference
//! date; the model is asked for tasks due within [`LOOKAHEAD_DAYS`] of it,
//! grouped by assignee. The answer is validated structurally before it is
//! accepted (see [`validate`]).

mod error;
mod prompt;
mod validate;

pub use error::AnalysisError;
pub use prompt::{build_prompt, response_schema};
pub use validate::{parse_response, ConsistencyWarning};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};

use crate::ingest::RowRecord;
use crate::llm::LlmClient;
use crate::plan::ExtractionResult;

/// Default number of rows forwarded to the model.
pub const DEFAULT_MAX_ROWS: usize = 200;

/// Tasks due up to this many days after the reference date are kept.
pub const LOOKAHEAD_DAYS: i64 = 7;

/// Rows to analyse plus the date they are judged against.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// Leading rows of the sheet, in original order
    pub rows: Vec<RowRecord>,
    /// Row count before the cap was applied
    pub total_rows: usize,
    pub reference_date: NaiveDate,
}

impl ExtractionRequest {
    /// Keep the first `max_rows` rows.
    pub fn new(mut rows: Vec<RowRecord>, reference_date: NaiveDate, max_rows: usize) -> Self {
        let total_rows = rows.len();
        rows.truncate(max_rows);
        Self {
            rows,
            total_rows,
            reference_date,
        }
    }

    pub fn cutoff_date(&self) -> NaiveDate {
        self.reference_date + Duration::days(LOOKAHEAD_DAYS)
    }

    /// True if rows were dropped by the cap.
    pub fn is_truncated(&self) -> bool {
        self.rows.len() < self.total_rows
    }
}

/// A validated result with the tolerated inconsistencies found in it.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub result: ExtractionResult,
    pub warnings: Vec<ConsistencyWarning>,
}

/// Turns row records into grouped tasks.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<Extraction, AnalysisError>;
}

/// Extraction backed by an LLM structured-output call.
pub struct LlmExtractionClient {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl LlmExtractionClient {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ExtractionClient for LlmExtractionClient {
    async fn extract(&self, request: &ExtractionRequest) -> Result<Extraction, AnalysisError> {
        let prompt = build_prompt(request)
            .map_err(|e| AnalysisError::Upstream(format!("could not encode rows: {}", e)))?;

        if request.is_truncated() {
            tracing::info!(
                "Forwarding first {} of {} rows for analysis",
                request.rows.len(),
                request.total_rows
            );
        }

        let response = self
            .llm
            .generate_json(&self.model, &prompt, &response_schema())
            .await?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                "Extraction used {} prompt + {} completion tokens",
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }

        let (result, warnings) = parse_response(&response.text)?;
        for warning in &warnings {
            tracing::warn!("Extraction result: {}", warning);
        }

        tracing::info!(
            "Extracted {} tasks for {} assignees (due by {})",
            result.total_tasks(),
            result.assignees.len(),
            request.cutoff_date()
        );

        Ok(Extraction { result, warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, StructuredResponse};
    use serde_json::json;
    use std::sync::Mutex;

    /// Returns a canned answer and records the prompts it was given.
    struct ScriptedLlm {
        answer: Result<String, LlmError>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn answering(text: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing(err: LlmError) -> Arc<Self> {
            Arc::new(Self {
                answer: Err(err),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate_json(
            &self,
            _model: &str,
            prompt: &str,
            _schema: &serde_json::Value,
        ) -> Result<StructuredResponse, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.answer.clone().map(|text| StructuredResponse {
                text,
                finish_reason: Some("STOP".into()),
                usage: None,
                model: None,
            })
        }
    }

    fn rows(n: usize) -> Vec<RowRecord> {
        (0..n)
            .map(|i| {
                let mut row = RowRecord::new();
                row.insert("Task".into(), json!(format!("task-{}", i)));
                row
            })
            .collect()
    }

    fn june_7() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 7).unwrap()
    }

    #[test]
    fn test_request_caps_rows_in_order() {
        let request = ExtractionRequest::new(rows(250), june_7(), DEFAULT_MAX_ROWS);
        assert_eq!(request.rows.len(), 200);
        assert_eq!(request.total_rows, 250);
        assert!(request.is_truncated());
        assert_eq!(request.rows[0]["Task"], "task-0");
        assert_eq!(request.rows[199]["Task"], "task-199");
        assert_eq!(request.cutoff_date(), NaiveDate::from_ymd_opt(2024, 6, 14).unwrap());

        let small = ExtractionRequest::new(rows(3), june_7(), DEFAULT_MAX_ROWS);
        assert!(!small.is_truncated());
    }

    #[tokio::test]
    async fn test_extract_validates_answer() {
        let llm = ScriptedLlm::answering(
            r#"{"summary": "One task", "assignees": [{"name": "Ana", "tasks": [
                {"title": "Report", "dueDate": "2024-06-10", "assignee": "Ana", "priority": "Critical"}
            ]}]}"#,
        );
        let client = LlmExtractionClient::new(llm.clone(), "gemini-test");
        let request = ExtractionRequest::new(rows(250), june_7(), DEFAULT_MAX_ROWS);

        let extraction = client.extract(&request).await.unwrap();
        assert_eq!(extraction.result.total_tasks(), 1);
        assert_eq!(extraction.warnings.len(), 1);

        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("2024-06-07"));
        assert!(prompts[0].contains("2024-06-14"));
        assert!(prompts[0].contains("task-199"));
        assert!(!prompts[0].contains("task-200"));
    }

    #[tokio::test]
    async fn test_extract_rejects_missing_assignees() {
        let client = LlmExtractionClient::new(ScriptedLlm::answering(r#"{"summary": "x"}"#), "m");
        let request = ExtractionRequest::new(rows(1), june_7(), DEFAULT_MAX_ROWS);
        let err = client.extract(&request).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Schema { ref path, .. } if path == "$.assignees"));
    }

    #[tokio::test]
    async fn test_llm_errors_are_mapped() {
        let client = LlmExtractionClient::new(
            ScriptedLlm::failing(LlmError::authentication("no key".into(), None)),
            "m",
        );
        let request = ExtractionRequest::new(rows(1), june_7(), DEFAULT_MAX_ROWS);
        let err = client.extract(&request).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Authentication(_)));

        let client = LlmExtractionClient::new(
            ScriptedLlm::failing(LlmError::server_error(503, "overloaded".into())),
            "m",
        );
        let err = client.extract(&request).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Upstream(_)));
    }
}
