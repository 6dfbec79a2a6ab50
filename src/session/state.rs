//! Session state, snapshots and events.

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use super::error::ErrorInfo;
use crate::extraction::ConsistencyWarning;
use crate::plan::{ExtractionResult, NotificationDraft, PlanStats};

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    ParsingInput,
    AnalyzingRemote,
    Reviewing,
}

impl Phase {
    /// A cycle is between file selection and its outcome.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::ParsingInput | Self::AnalyzingRemote)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ParsingInput => "parsing input",
            Self::AnalyzingRemote => "analyzing",
            Self::Reviewing => "reviewing",
        };
        f.write_str(s)
    }
}

/// What the current upload cycle is working on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadInfo {
    pub cycle_id: Uuid,
    pub file_name: String,
    /// Rows read from the sheet (set once parsing succeeds)
    pub parsed_rows: Option<usize>,
    /// Rows forwarded for analysis after the cap
    pub analyzed_rows: Option<usize>,
    pub reference_date: Option<NaiveDate>,
}

/// Canonical session state. Derived values are never stored here.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub phase: Phase,
    pub result: Option<ExtractionResult>,
    pub warnings: Vec<ConsistencyWarning>,
    pub error: Option<ErrorInfo>,
    pub sent: HashSet<String>,
    pub upload: Option<UploadInfo>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            result: None,
            warnings: Vec::new(),
            error: None,
            sent: HashSet::new(),
            upload: None,
        }
    }
}

impl SessionState {
    /// Every assignee has been marked sent. Only meaningful while reviewing.
    pub fn fully_dispatched(&self) -> bool {
        match (&self.phase, &self.result) {
            (Phase::Reviewing, Some(result)) => result
                .assignees
                .iter()
                .all(|a| self.sent.contains(&a.name)),
            _ => false,
        }
    }

    /// The in-flight cycle is still `cycle_id` in the expected phase.
    pub fn is_cycle(&self, cycle_id: Uuid, phase: Phase) -> bool {
        self.phase == phase && self.is_current(cycle_id)
    }

    /// `cycle_id` belongs to the upload currently held by the session.
    pub fn is_current(&self, cycle_id: Uuid) -> bool {
        self.upload.as_ref().map(|u| u.cycle_id) == Some(cycle_id)
    }

    pub fn drafts(&self) -> Vec<NotificationDraft> {
        self.result
            .iter()
            .flat_map(|r| r.assignees.iter())
            .filter(|a| !self.sent.contains(&a.name))
            .map(NotificationDraft::new)
            .collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        // Sent names in result order
        let sent = self
            .result
            .iter()
            .flat_map(|r| r.assignees.iter())
            .filter(|a| self.sent.contains(&a.name))
            .map(|a| a.name.clone())
            .fold(Vec::new(), |mut names: Vec<String>, name| {
                if !names.contains(&name) {
                    names.push(name);
                }
                names
            });

        SessionSnapshot {
            phase: self.phase,
            fully_dispatched: self.fully_dispatched(),
            result: self.result.clone(),
            stats: self.result.as_ref().map(PlanStats::from_result),
            drafts: self.drafts(),
            sent,
            warnings: self.warnings.clone(),
            error: self.error.clone(),
            upload: self.upload.clone(),
        }
    }
}

/// Read-only view of the session with derived values filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    /// Reviewing and every assignee marked sent
    pub fully_dispatched: bool,
    pub result: Option<ExtractionResult>,
    pub stats: Option<PlanStats>,
    /// Drafts for assignees not yet marked sent
    pub drafts: Vec<NotificationDraft>,
    pub sent: Vec<String>,
    pub warnings: Vec<ConsistencyWarning>,
    pub error: Option<ErrorInfo>,
    pub upload: Option<UploadInfo>,
}

/// Broadcast to subscribers on every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    PhaseChanged { phase: Phase },
    Sent { assignee: String, fully_dispatched: bool },
    Failed { error: ErrorInfo },
    ErrorDismissed,
    Reset,
}

impl SessionEvent {
    /// Name used for the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PhaseChanged { .. } => "phase_changed",
            Self::Sent { .. } => "sent",
            Self::Failed { .. } => "failed",
            Self::ErrorDismissed => "error_dismissed",
            Self::Reset => "reset",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{AssigneeSummary, Task};

    fn reviewing(names: &[&str]) -> SessionState {
        SessionState {
            phase: Phase::Reviewing,
            result: Some(ExtractionResult {
                summary: String::new(),
                assignees: names
                    .iter()
                    .map(|n| AssigneeSummary::new(*n, vec![Task::new("Report", "2024-06-10", *n)]))
                    .collect(),
            }),
            ..SessionState::default()
        }
    }

    #[test]
    fn test_fully_dispatched_requires_every_assignee() {
        let mut state = reviewing(&["Ana", "Bo"]);
        assert!(!state.fully_dispatched());
        state.sent.insert("Ana".into());
        assert!(!state.fully_dispatched());
        state.sent.insert("Bo".into());
        assert!(state.fully_dispatched());

        state.phase = Phase::Idle;
        assert!(!state.fully_dispatched());
    }

    #[test]
    fn test_empty_result_is_fully_dispatched() {
        assert!(reviewing(&[]).fully_dispatched());
    }

    #[test]
    fn test_snapshot_drafts_skip_sent() {
        let mut state = reviewing(&["Ana", "Bo"]);
        state.sent.insert("Bo".into());
        let snapshot = state.snapshot();

        assert_eq!(snapshot.sent, vec!["Bo"]);
        assert_eq!(snapshot.drafts.len(), 1);
        assert_eq!(snapshot.drafts[0].assignee, "Ana");
        assert_eq!(snapshot.stats.as_ref().map(|s| s.total_tasks), Some(2));
    }

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::PhaseChanged {
            phase: Phase::AnalyzingRemote,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "phase_changed");
        assert_eq!(json["phase"], "analyzing_remote");
        assert_eq!(event.name(), "phase_changed");
    }
}
