//! Extraction payload types.
//!
//! Field names follow the JSON the extraction model returns (`dueDate`,
//! `assignees`, ...), so these types serialize back out in the same shape.

use serde::Serialize;

/// Task priority as used for rendering and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Parse one of the three recognized labels. Matching is exact.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "High" => Some(Self::High),
            "Medium" => Some(Self::Medium),
            "Low" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Low
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work due in the upcoming window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Identifier from the source sheet, when the model found one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    /// Calendar date as returned by the model (normally `YYYY-MM-DD`).
    pub due_date: String,
    pub status: String,
    pub assignee: String,
    /// Raw priority label exactly as returned; see [`Task::effective_priority`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl Task {
    pub fn new(
        title: impl Into<String>,
        due_date: impl Into<String>,
        assignee: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: String::new(),
            due_date: due_date.into(),
            status: String::new(),
            assignee: assignee.into(),
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Priority used for display. Missing or unrecognized labels count as `Low`;
    /// the stored raw value is left untouched.
    pub fn effective_priority(&self) -> Priority {
        self.priority
            .as_deref()
            .and_then(Priority::parse)
            .unwrap_or_default()
    }

    /// True if the stored label is present but not one of High/Medium/Low.
    pub fn has_unrecognized_priority(&self) -> bool {
        self.priority
            .as_deref()
            .map_or(false, |p| Priority::parse(p).is_none())
    }
}

/// Tasks grouped under one person. `name` is the grouping key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssigneeSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub tasks: Vec<Task>,
}

impl AssigneeSummary {
    pub fn new(name: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            name: name.into(),
            email: None,
            tasks,
        }
    }

    /// Tasks whose `assignee` field disagrees with this summary's name.
    pub fn mismatched_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |t| t.assignee != self.name)
    }
}

/// Whole-session extraction payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub summary: String,
    pub assignees: Vec<AssigneeSummary>,
}

impl ExtractionResult {
    pub fn assignee(&self, name: &str) -> Option<&AssigneeSummary> {
        self.assignees.iter().find(|a| a.name == name)
    }

    pub fn has_assignee(&self, name: &str) -> bool {
        self.assignee(name).is_some()
    }

    pub fn total_tasks(&self) -> usize {
        self.assignees.iter().map(|a| a.tasks.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_priority_defaults_to_low() {
        let task = Task::new("Report", "2024-06-10", "Ana");
        assert_eq!(task.effective_priority(), Priority::Low);
        assert!(!task.has_unrecognized_priority());

        let urgent = task.clone().with_priority("Urgent");
        assert_eq!(urgent.effective_priority(), Priority::Low);
        assert!(urgent.has_unrecognized_priority());
        // Raw value is kept as-is
        assert_eq!(urgent.priority.as_deref(), Some("Urgent"));

        let high = task.with_priority("High");
        assert_eq!(high.effective_priority(), Priority::High);
    }

    #[test]
    fn test_task_serializes_camel_case() {
        let task = Task::new("Report", "2024-06-10", "Ana").with_priority("Medium");
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["dueDate"], "2024-06-10");
        assert_eq!(json["priority"], "Medium");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_mismatched_tasks() {
        let summary = AssigneeSummary::new(
            "Ana",
            vec![
                Task::new("Report", "2024-06-10", "Ana"),
                Task::new("Deck", "2024-06-11", "Bo"),
            ],
        );
        let mismatched: Vec<_> = summary.mismatched_tasks().map(|t| t.title.as_str()).collect();
        assert_eq!(mismatched, vec!["Deck"]);
    }
}
