//! Notification draft text.

use serde::Serialize;

use super::types::AssigneeSummary;

const GREETING_TAIL: &str = "Here are your tasks for next week:";
const SIGN_OFF: &str = "Best regards,\nYour WorkPlan Agent";

/// Draft message addressed to one assignee.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationDraft {
    pub assignee: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub body: String,
}

/// Build the draft body for an assignee.
pub fn draft_for(assignee: &AssigneeSummary) -> String {
    let lines: Vec<String> = assignee
        .tasks
        .iter()
        .map(|t| format!("• {} (Due: {})", t.title, t.due_date))
        .collect();

    format!(
        "Hi {},\n\n{}\n\n{}\n\n{}",
        assignee.name,
        GREETING_TAIL,
        lines.join("\n"),
        SIGN_OFF
    )
}

impl NotificationDraft {
    pub fn new(assignee: &AssigneeSummary) -> Self {
        Self {
            assignee: assignee.name.clone(),
            email: assignee.email.clone(),
            body: draft_for(assignee),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Task;

    #[test]
    fn test_single_task_draft() {
        let ana = AssigneeSummary::new("Ana", vec![Task::new("Report", "2024-06-10", "Ana")]);
        assert_eq!(
            draft_for(&ana),
            "Hi Ana,\n\nHere are your tasks for next week:\n\n• Report (Due: 2024-06-10)\n\nBest regards,\nYour WorkPlan Agent"
        );
    }

    #[test]
    fn test_multiple_tasks_keep_order() {
        let bo = AssigneeSummary::new(
            "Bo",
            vec![
                Task::new("Deck", "2024-06-11", "Bo"),
                Task::new("Budget", "2024-06-12", "Bo"),
            ],
        );
        let body = draft_for(&bo);
        assert!(body.contains("• Deck (Due: 2024-06-11)\n• Budget (Due: 2024-06-12)\n\n"));
    }

    #[test]
    fn test_no_tasks_leaves_empty_list() {
        let cy = AssigneeSummary::new("Cy", Vec::new());
        assert_eq!(
            draft_for(&cy),
            "Hi Cy,\n\nHere are your tasks for next week:\n\n\n\nBest regards,\nYour WorkPlan Agent"
        );
    }
}
