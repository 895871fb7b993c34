use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::recurrence::RecurrenceRule;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    Todo,
    InProgress,
    Review,
    Done,
    Canceled,
}

impl TaskStatus {
    /// Kanban column order.
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Backlog,
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Canceled => "canceled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "Backlog",
            TaskStatus::Todo => "To do",
            TaskStatus::InProgress => "In progress",
            TaskStatus::Review => "In review",
            TaskStatus::Done => "Done",
            TaskStatus::Canceled => "Canceled",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Canceled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "backlog" => Ok(TaskStatus::Backlog),
            "todo" | "to_do" => Ok(TaskStatus::Todo),
            "in_progress" | "in-progress" | "doing" => Ok(TaskStatus::InProgress),
            "review" | "in_review" => Ok(TaskStatus::Review),
            "done" => Ok(TaskStatus::Done),
            "canceled" | "cancelled" => Ok(TaskStatus::Canceled),
            other => Err(anyhow!(
                "Unknown status '{}': expected backlog|todo|in_progress|review|done|canceled",
                other
            )),
        }
    }
}

impl ValueEnum for TaskStatus {
    fn value_variants<'a>() -> &'a [Self] {
        &TaskStatus::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Low,
    #[default]
    None,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Low, Priority::None];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Low => "low",
            Priority::None => "none",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Low => "Low",
            Priority::None => "No priority",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" | "h" => Ok(Priority::High),
            "low" | "l" => Ok(Priority::Low),
            "none" | "" => Ok(Priority::None),
            other => Err(anyhow!("Unknown priority '{}': expected high|low|none", other)),
        }
    }
}

impl ValueEnum for Priority {
    fn value_variants<'a>() -> &'a [Self] {
        &Priority::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

/// Planning bucket. `Logbook` is stored as `none` and marks completed work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WhenType {
    Inbox,
    Today,
    Anytime,
    Someday,
    Scheduled,
    #[serde(rename = "none")]
    Logbook,
}

impl WhenType {
    pub const ALL: [WhenType; 6] = [
        WhenType::Inbox,
        WhenType::Today,
        WhenType::Anytime,
        WhenType::Someday,
        WhenType::Scheduled,
        WhenType::Logbook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WhenType::Inbox => "inbox",
            WhenType::Today => "today",
            WhenType::Anytime => "anytime",
            WhenType::Someday => "someday",
            WhenType::Scheduled => "scheduled",
            WhenType::Logbook => "none",
        }
    }

    pub fn is_logbook(&self) -> bool {
        matches!(self, WhenType::Logbook)
    }
}

impl fmt::Display for WhenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WhenType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inbox" => Ok(WhenType::Inbox),
            "today" => Ok(WhenType::Today),
            "anytime" => Ok(WhenType::Anytime),
            "someday" => Ok(WhenType::Someday),
            "scheduled" | "upcoming" => Ok(WhenType::Scheduled),
            "none" | "logbook" => Ok(WhenType::Logbook),
            other => Err(anyhow!(
                "Unknown when type '{}': expected inbox|today|anytime|someday|scheduled|none",
                other
            )),
        }
    }
}

impl ValueEnum for WhenType {
    fn value_variants<'a>() -> &'a [Self] {
        &WhenType::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl TimeEntry {
    /// Minutes tracked so far; a running entry counts up to `now`.
    pub fn minutes(&self, now: DateTime<Utc>) -> i64 {
        let end = self.ended_at.unwrap_or(now);
        (end - self.started_at).num_minutes().max(0)
    }

    pub fn is_running(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub when_type: WhenType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDate>,
    pub owner_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_entries: Vec<TimeEntry>,
    pub sort_order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceRule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Date used for due-date buckets: the due date, falling back to the deadline.
    pub fn effective_due(&self) -> Option<NaiveDate> {
        self.due_date.or(self.deadline)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Done || self.completed_at.is_some()
    }

    pub fn is_visible_to(&self, user_id: &str) -> bool {
        self.owner_id == user_id || self.assignee_id.as_deref() == Some(user_id)
    }

    pub fn tracked_minutes(&self, now: DateTime<Utc>) -> i64 {
        self.time_entries.iter().map(|entry| entry.minutes(now)).sum()
    }

    pub fn running_entry(&self) -> Option<&TimeEntry> {
        self.time_entries.iter().find(|entry| entry.is_running())
    }
}

/// Fields for a task that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub notes: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub when_type: WhenType,
    pub when_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub deadline: Option<NaiveDate>,
    pub assignee_id: Option<String>,
    pub project_id: Option<String>,
    pub area_id: Option<String>,
    pub tag_ids: Vec<String>,
    pub recurrence: Option<RecurrenceRule>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>, when_type: WhenType) -> Self {
        Self {
            title: title.into(),
            notes: None,
            status: TaskStatus::Todo,
            priority: Priority::None,
            when_type,
            when_date: None,
            due_date: None,
            deadline: None,
            assignee_id: None,
            project_id: None,
            area_id: None,
            tag_ids: Vec::new(),
            recurrence: None,
        }
    }

    pub fn into_task(self, owner_id: &str, sort_order: i64, now: DateTime<Utc>) -> Task {
        Task {
            id: Ulid::new().to_string(),
            title: self.title,
            notes: self.notes,
            status: self.status,
            priority: self.priority,
            when_type: self.when_type,
            when_date: self.when_date,
            due_date: self.due_date,
            deadline: self.deadline,
            owner_id: owner_id.to_string(),
            assignee_id: self.assignee_id,
            project_id: self.project_id,
            area_id: self.area_id,
            tag_ids: self.tag_ids,
            time_entries: Vec::new(),
            sort_order,
            recurrence: self.recurrence,
            created_at: now,
            updated_at: now,
            completed_at: None,
            deleted_at: None,
        }
    }
}

/// Partial update. Outer `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub notes: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub when_type: Option<WhenType>,
    pub when_date: Option<Option<NaiveDate>>,
    pub due_date: Option<Option<NaiveDate>>,
    pub deadline: Option<Option<NaiveDate>>,
    pub assignee_id: Option<Option<String>>,
    pub project_id: Option<Option<String>>,
    pub area_id: Option<Option<String>>,
    pub tag_ids: Option<Vec<String>>,
    pub sort_order: Option<i64>,
    pub recurrence: Option<Option<RecurrenceRule>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub deleted_at: Option<Option<DateTime<Utc>>>,
}

macro_rules! diff_field {
    ($patch:ident, $before:ident, $after:ident, $($field:ident),+ $(,)?) => {
        $(
            if $before.$field != $after.$field {
                $patch.$field = Some($after.$field.clone());
            }
        )+
    };
}

macro_rules! apply_field {
    ($patch:ident, $task:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = &$patch.$field {
                $task.$field = value.clone();
            }
        )+
    };
}

impl TaskPatch {
    /// The patch that turns `before` into `after` (bookkeeping fields excluded).
    pub fn between(before: &Task, after: &Task) -> Self {
        let mut patch = TaskPatch::default();
        diff_field!(
            patch,
            before,
            after,
            title,
            notes,
            status,
            priority,
            when_type,
            when_date,
            due_date,
            deadline,
            assignee_id,
            project_id,
            area_id,
            tag_ids,
            sort_order,
            recurrence,
            completed_at,
            deleted_at,
        );
        patch
    }

    pub fn apply_to(&self, task: &mut Task) {
        apply_field!(
            self,
            task,
            title,
            notes,
            status,
            priority,
            when_type,
            when_date,
            due_date,
            deadline,
            assignee_id,
            project_id,
            area_id,
            tag_ids,
            sort_order,
            recurrence,
            completed_at,
            deleted_at,
        );
    }

    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: crate::permissions::Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

/// Reference lists used to resolve ids into display labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct References {
    pub users: Vec<User>,
    pub areas: Vec<Area>,
    pub projects: Vec<Project>,
    pub tags: Vec<Tag>,
}

impl References {
    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.iter().find(|user| user.id == id)
    }

    pub fn area(&self, id: &str) -> Option<&Area> {
        self.areas.iter().find(|area| area.id == id)
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.id == id)
    }

    pub fn tag(&self, id: &str) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.id == id)
    }

    pub fn tag_by_name(&self, name: &str) -> Option<&Tag> {
        self.tags
            .iter()
            .find(|tag| tag.name.eq_ignore_ascii_case(name))
    }

    pub fn project_by_name(&self, name: &str) -> Option<&Project> {
        self.projects
            .iter()
            .find(|project| project.name.eq_ignore_ascii_case(name))
    }

    pub fn area_by_name(&self, name: &str) -> Option<&Area> {
        self.areas
            .iter()
            .find(|area| area.name.eq_ignore_ascii_case(name))
    }

    /// Match a user by id first, then by display name.
    pub fn user_by_handle(&self, handle: &str) -> Option<&User> {
        self.user(handle).or_else(|| {
            self.users
                .iter()
                .find(|user| user.name.eq_ignore_ascii_case(handle))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "kebab-case")]
pub enum View {
    Inbox,
    Today,
    Upcoming,
    Anytime,
    Someday,
    Logbook,
    Trash,
    All,
}

impl View {
    pub fn as_str(&self) -> &'static str {
        match self {
            View::Inbox => "inbox",
            View::Today => "today",
            View::Upcoming => "upcoming",
            View::Anytime => "anytime",
            View::Someday => "someday",
            View::Logbook => "logbook",
            View::Trash => "trash",
            View::All => "all",
        }
    }

    /// Planning bucket given to tasks created while this view is open.
    pub fn default_when(&self) -> WhenType {
        match self {
            View::Today => WhenType::Today,
            View::Anytime => WhenType::Anytime,
            View::Someday => WhenType::Someday,
            View::Upcoming => WhenType::Scheduled,
            View::Inbox | View::Logbook | View::Trash | View::All => WhenType::Inbox,
        }
    }

    /// The when-type a view is built from, if any.
    pub fn when_type(&self) -> Option<WhenType> {
        match self {
            View::Inbox => Some(WhenType::Inbox),
            View::Today => Some(WhenType::Today),
            View::Upcoming => Some(WhenType::Scheduled),
            View::Anytime => Some(WhenType::Anytime),
            View::Someday => Some(WhenType::Someday),
            View::Logbook => Some(WhenType::Logbook),
            View::Trash | View::All => None,
        }
    }

    pub fn is_trash(&self) -> bool {
        matches!(self, View::Trash)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for View {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inbox" => Ok(View::Inbox),
            "today" => Ok(View::Today),
            "upcoming" | "scheduled" => Ok(View::Upcoming),
            "anytime" => Ok(View::Anytime),
            "someday" => Ok(View::Someday),
            "logbook" => Ok(View::Logbook),
            "trash" => Ok(View::Trash),
            "all" => Ok(View::All),
            other => Err(anyhow!(
                "Unknown view '{}': expected inbox|today|upcoming|anytime|someday|logbook|trash|all",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrder {
    SortOrder,
    WhenDate,
    CompletedDesc,
    DeletedDesc,
}

/// Store-side selection for one list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskQuery {
    pub view: View,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
    pub order: QueryOrder,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    pub offset: usize,
}

impl TaskQuery {
    pub fn for_view(view: View) -> Self {
        let order = match view {
            View::Upcoming => QueryOrder::WhenDate,
            View::Logbook => QueryOrder::CompletedDesc,
            View::Trash => QueryOrder::DeletedDesc,
            View::Inbox | View::Today | View::Anytime | View::Someday | View::All => {
                QueryOrder::SortOrder
            }
        };

        Self {
            view,
            visible_to: None,
            project_id: None,
            area_id: None,
            order,
            limit: None,
            offset: 0,
        }
    }

    pub fn visible_to(mut self, user_id: impl Into<String>) -> Self {
        self.visible_to = Some(user_id.into());
        self
    }

    /// Whether a task belongs to this selection, mirroring the store predicates.
    pub fn matches(&self, task: &Task) -> bool {
        if self.view.is_trash() != task.is_deleted() {
            return false;
        }
        if let Some(when) = self.view.when_type() {
            if task.when_type != when {
                return false;
            }
        }
        if let Some(user) = &self.visible_to {
            if !task.is_visible_to(user) {
                return false;
            }
        }
        if self.project_id.is_some() && task.project_id != self.project_id {
            return false;
        }
        if self.area_id.is_some() && task.area_id != self.area_id {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AddOutcome {
    pub id: String,
    pub title: String,
    pub when_type: WhenType,
    pub created_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub id: String,
    pub deleted: bool,
}


#[cfg(test)]
mod tests {
    use super::fixtures::{date, task};
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn query_for_view_sets_order() {
        assert_eq!(TaskQuery::for_view(View::Inbox).order, QueryOrder::SortOrder);
        assert_eq!(TaskQuery::for_view(View::Upcoming).order, QueryOrder::WhenDate);
        assert_eq!(TaskQuery::for_view(View::Trash).order, QueryOrder::DeletedDesc);
        assert_eq!(
            TaskQuery::for_view(View::Logbook).order,
            QueryOrder::CompletedDesc
        );
    }

    #[test]
    fn logbook_tasks_stay_out_of_when_views() {
        let mut done = task("t1");
        done.when_type = WhenType::Logbook;
        for view in [View::Inbox, View::Today, View::Anytime, View::Someday, View::Upcoming] {
            assert!(!TaskQuery::for_view(view).matches(&done), "{view}");
        }
        assert!(TaskQuery::for_view(View::Logbook).matches(&done));
    }

    #[test]
    fn deleted_tasks_only_match_trash() {
        let mut trashed = task("t1");
        trashed.deleted_at = Some(Utc::now());
        assert!(!TaskQuery::for_view(View::All).matches(&trashed));
        assert!(!TaskQuery::for_view(View::Anytime).matches(&trashed));
        assert!(TaskQuery::for_view(View::Trash).matches(&trashed));
    }

    #[test]
    fn patch_between_round_trips_changes() {
        let before = task("t1");
        let mut after = before.clone();
        after.status = TaskStatus::Done;
        after.due_date = Some(date("2024-02-01"));
        after.assignee_id = None;

        let patch = TaskPatch::between(&before, &after);
        assert_eq!(patch.status, Some(TaskStatus::Done));
        assert_eq!(patch.due_date, Some(Some(date("2024-02-01"))));
        assert!(patch.assignee_id.is_none());

        let mut replayed = before.clone();
        patch.apply_to(&mut replayed);
        assert_eq!(replayed, after);
    }

    #[test]
    fn patch_between_identical_tasks_is_empty() {
        let task = task("t1");
        assert!(TaskPatch::between(&task, &task).is_empty());
    }

    #[test]
    fn status_parses_aliases() {
        assert_eq!("in-progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("cancelled".parse::<TaskStatus>().unwrap(), TaskStatus::Canceled);
        assert!("waiting".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn logbook_serializes_as_none() {
        let json = serde_json::to_string(&WhenType::Logbook).unwrap();
        assert_eq!(json, "\"none\"");
    }

    #[test]
    fn tracked_minutes_counts_running_entries() {
        let mut task = task("t1");
        let start = task.created_at;
        task.time_entries = vec![
            TimeEntry {
                id: "e1".into(),
                task_id: "t1".into(),
                user_id: "owner".into(),
                started_at: start,
                ended_at: Some(start + chrono::Duration::minutes(30)),
            },
            TimeEntry {
                id: "e2".into(),
                task_id: "t1".into(),
                user_id: "owner".into(),
                started_at: start + chrono::Duration::hours(1),
                ended_at: None,
            },
        ];
        let now = start + chrono::Duration::minutes(75);
        assert_eq!(task.tracked_minutes(now), 45);
        assert_eq!(task.running_entry().map(|e| e.id.as_str()), Some("e2"));
    }
}
