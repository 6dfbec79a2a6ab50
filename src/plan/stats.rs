//! Aggregate counts over an extraction result.

use serde::Serialize;

use super::types::{ExtractionResult, Priority};

/// Task count for one assignee, in result order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssigneeLoad {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PriorityBreakdown {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStats {
    pub total_tasks: usize,
    pub assignee_count: usize,
    pub summary: String,
    pub distribution: Vec<AssigneeLoad>,
    pub priorities: PriorityBreakdown,
}

impl PlanStats {
    pub fn from_result(result: &ExtractionResult) -> Self {
        let mut priorities = PriorityBreakdown::default();
        for task in result.assignees.iter().flat_map(|a| a.tasks.iter()) {
            match task.effective_priority() {
                Priority::High => priorities.high += 1,
                Priority::Medium => priorities.medium += 1,
                Priority::Low => priorities.low += 1,
            }
        }

        Self {
            total_tasks: result.total_tasks(),
            assignee_count: result.assignees.len(),
            summary: result.summary.clone(),
            distribution: result
                .assignees
                .iter()
                .map(|a| AssigneeLoad {
                    name: a.name.clone(),
                    count: a.tasks.len(),
                })
                .collect(),
            priorities,
        }
    }
}
