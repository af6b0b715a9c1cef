use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Status {
    #[serde(rename = "To Do")]
    ToDo,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Done")]
    Done,
    #[serde(rename = "Blocked")]
    Blocked,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::ToDo => "To Do",
            Status::InProgress => "In Progress",
            Status::Done => "Done",
            Status::Blocked => "Blocked",
        }
    }

    /// Accepts the canonical form and the hyphenated CLI slugs, case-insensitively.
    pub fn parse(value: &str) -> Result<Self> {
        let normalized = value.trim().to_lowercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "to do" | "todo" => Ok(Status::ToDo),
            "in progress" => Ok(Status::InProgress),
            "done" => Ok(Status::Done),
            "blocked" => Ok(Status::Blocked),
            _ => Err(TaskError::InvalidValue(format!("unknown status: {value}"))),
        }
    }

    /// A dependency in any of these states has not been delivered yet.
    pub fn blocks_dependents(self) -> bool {
        matches!(self, Status::ToDo | Status::InProgress | Status::Blocked)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(TaskError::InvalidValue(format!("unknown priority: {value}"))),
        }
    }
}

/// One checklist line inside the AC fence. Indices are 1-based and contiguous.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcceptanceCriterion {
    pub index: usize,
    pub checked: bool,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation_plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation_notes: Option<String>,
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    /// Frontmatter fields this version does not know about, written back unchanged.
    #[serde(skip)]
    pub extra: serde_yaml::Mapping,
}

impl Task {
    /// Numeric suffix of the task's ID, used for store ordering.
    pub fn number(&self) -> u64 {
        self.id
            .rsplit('-')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    pub fn add_ac(&mut self, text: impl Into<String>) {
        let index = self.acceptance_criteria.len() + 1;
        self.acceptance_criteria.push(AcceptanceCriterion {
            index,
            checked: false,
            text: text.into(),
        });
    }

    pub fn remove_ac(&mut self, index: usize) -> Result<()> {
        self.check_ac_bounds(index)?;
        self.acceptance_criteria.remove(index - 1);
        for (position, criterion) in self.acceptance_criteria.iter_mut().enumerate() {
            criterion.index = position + 1;
        }
        Ok(())
    }

    pub fn set_ac_checked(&mut self, index: usize, checked: bool) -> Result<()> {
        self.check_ac_bounds(index)?;
        self.acceptance_criteria[index - 1].checked = checked;
        Ok(())
    }

    fn check_ac_bounds(&self, index: usize) -> Result<()> {
        if index == 0 || index > self.acceptance_criteria.len() {
            return Err(TaskError::InvalidAcIndex {
                index,
                len: self.acceptance_criteria.len(),
            });
        }
        Ok(())
    }
}

/// Fields accepted by `TaskStore::create_task`.
#[derive(Debug, Clone, Default)]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    pub dependencies: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub acceptance_criteria: Vec<String>,
}

/// Partial update applied by `TaskStore::update_task`. `None` fields are
/// left untouched; list operations are applied after any replacement.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub labels: Option<Vec<String>>,
    pub add_labels: Vec<String>,
    pub remove_labels: Vec<String>,
    pub dependencies: Option<Vec<String>>,
    pub add_dependencies: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub implementation_plan: Option<String>,
    pub append_notes: Option<String>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.assignee.is_none()
            && self.labels.is_none()
            && self.add_labels.is_empty()
            && self.remove_labels.is_empty()
            && self.dependencies.is_none()
            && self.add_dependencies.is_empty()
            && self.due_date.is_none()
            && self.description.is_none()
            && self.implementation_plan.is_none()
            && self.append_notes.is_none()
    }

    pub fn touches_dependencies(&self) -> bool {
        self.dependencies.is_some() || !self.add_dependencies.is_empty()
    }
}

/// Filter for `TaskStore::list_tasks` and `TaskStore::search`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub assignee: Option<String>,
    pub label: Option<String>,
    pub ready: bool,
}
