//! Work plan module - extracted tasks, assignee groupings, and what we derive from them.
//!
//! - `types`: the extraction payload (tasks grouped by assignee)
//! - `draft`: notification draft text for one assignee
//! - `stats`: aggregate counts for a dashboard view

mod draft;
mod stats;
mod types;

pub use draft::{draft_for, NotificationDraft};
pub use stats::{AssigneeLoad, PlanStats, PriorityBreakdown};
pub use types::{AssigneeSummary, ExtractionResult, Priority, Task};
