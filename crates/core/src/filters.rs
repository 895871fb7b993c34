//! Client-side filtering and sorting of an already loaded task list.
//!
//! Filters never touch the store: they narrow and reorder whatever the view
//! query delivered. Categories combine with AND; tags match if any listed tag
//! is present.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{Datelike, Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::model::{Priority, Task, TaskStatus, WhenType};

/// The user's calendar date. Due buckets and relative dates are measured from it.
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Wire value selecting tasks without an assignee.
pub const UNASSIGNED: &str = "unassigned";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "user_id")]
pub enum AssigneeFilter {
    #[default]
    Any,
    Unassigned,
    Specific(String),
}

impl AssigneeFilter {
    /// Single-select over a list-shaped input: only the first id counts.
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Self {
        match ids.first().map(|id| id.as_ref().trim()) {
            None | Some("") => AssigneeFilter::Any,
            Some(UNASSIGNED) => AssigneeFilter::Unassigned,
            Some(id) => AssigneeFilter::Specific(id.to_string()),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, AssigneeFilter::Any)
    }

    pub fn matches(&self, task: &Task) -> bool {
        match self {
            AssigneeFilter::Any => true,
            AssigneeFilter::Unassigned => task.assignee_id.is_none(),
            AssigneeFilter::Specific(id) => task.assignee_id.as_deref() == Some(id.as_str()),
        }
    }

    /// Option value used by the assignee facet.
    pub fn value(&self) -> Option<&str> {
        match self {
            AssigneeFilter::Any => None,
            AssigneeFilter::Unassigned => Some(UNASSIGNED),
            AssigneeFilter::Specific(id) => Some(id.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DueBucket {
    Overdue,
    Today,
    ThisWeek,
    ThisMonth,
    NoDate,
}

impl DueBucket {
    /// Display order of the due-date facet.
    pub const ALL: [DueBucket; 5] = [
        DueBucket::Overdue,
        DueBucket::Today,
        DueBucket::ThisWeek,
        DueBucket::ThisMonth,
        DueBucket::NoDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DueBucket::Overdue => "overdue",
            DueBucket::Today => "today",
            DueBucket::ThisWeek => "this_week",
            DueBucket::ThisMonth => "this_month",
            DueBucket::NoDate => "no_date",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DueBucket::Overdue => "Overdue",
            DueBucket::Today => "Today",
            DueBucket::ThisWeek => "This week",
            DueBucket::ThisMonth => "This month",
            DueBucket::NoDate => "No date",
        }
    }

    /// Weeks run Monday through Sunday.
    pub fn contains(&self, date: Option<NaiveDate>, today: NaiveDate) -> bool {
        match (self, date) {
            (DueBucket::NoDate, date) => date.is_none(),
            (_, None) => false,
            (DueBucket::Overdue, Some(date)) => date < today,
            (DueBucket::Today, Some(date)) => date == today,
            (DueBucket::ThisWeek, Some(date)) => {
                let start = week_start(today);
                let end = start + Duration::days(6);
                date >= start && date <= end
            }
            (DueBucket::ThisMonth, Some(date)) => {
                date.year() == today.year() && date.month() == today.month()
            }
        }
    }

    pub fn matches(&self, task: &Task, today: NaiveDate) -> bool {
        self.contains(task.effective_due(), today)
    }
}

impl fmt::Display for DueBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DueBucket {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "overdue" => Ok(DueBucket::Overdue),
            "today" => Ok(DueBucket::Today),
            "this_week" | "week" => Ok(DueBucket::ThisWeek),
            "this_month" | "month" => Ok(DueBucket::ThisMonth),
            "no_date" | "none" => Ok(DueBucket::NoDate),
            other => Err(anyhow!(
                "Unknown due bucket '{}': expected today|this_week|this_month|overdue|no_date",
                other
            )),
        }
    }
}

fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(day.weekday().num_days_from_monday().into())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOption {
    /// Keep the order the view query delivered.
    #[default]
    Default,
    DeadlineAsc,
    DeadlineDesc,
}

impl SortOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOption::Default => "default",
            SortOption::DeadlineAsc => "deadline_asc",
            SortOption::DeadlineDesc => "deadline_desc",
        }
    }
}

impl FromStr for SortOption {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "default" | "manual" => Ok(SortOption::Default),
            "deadline_asc" | "deadline" => Ok(SortOption::DeadlineAsc),
            "deadline_desc" => Ok(SortOption::DeadlineDesc),
            other => Err(anyhow!(
                "Unknown sort '{}': expected default|deadline_asc|deadline_desc",
                other
            )),
        }
    }
}

/// Filter categories shown as facets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Facet {
    Assignee,
    Status,
    Area,
    Priority,
    Due,
    Tag,
}

impl Facet {
    pub const ALL: [Facet; 6] = [
        Facet::Assignee,
        Facet::Status,
        Facet::Area,
        Facet::Priority,
        Facet::Due,
        Facet::Tag,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Facet::Assignee => "Assignee",
            Facet::Status => "Status",
            Facet::Area => "Area",
            Facet::Priority => "Priority",
            Facet::Due => "Due date",
            Facet::Tag => "Tags",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilters {
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub assignee: AssigneeFilter,
    pub due: Option<DueBucket>,
    pub priority: Option<Priority>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub area: Option<String>,
    pub when: Option<WhenType>,
    pub search: Option<String>,
    #[serde(default)]
    pub sort: SortOption,
}

impl TaskFilters {
    /// No constraint and no explicit sort.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.assignee.is_any()
            && self.due.is_none()
            && self.priority.is_none()
            && self.tags.is_empty()
            && self.project.is_none()
            && self.area.is_none()
            && self.when.is_none()
            && self.search_needle().is_none()
            && self.sort == SortOption::Default
    }

    /// The same filters with one facet's constraint cleared.
    pub fn without(&self, facet: Facet) -> Self {
        let mut narrowed = self.clone();
        match facet {
            Facet::Assignee => narrowed.assignee = AssigneeFilter::Any,
            Facet::Status => narrowed.status = None,
            Facet::Area => narrowed.area = None,
            Facet::Priority => narrowed.priority = None,
            Facet::Due => narrowed.due = None,
            Facet::Tag => narrowed.tags.clear(),
        }
        narrowed
    }

    pub fn matches(&self, task: &Task, today: NaiveDate) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if !self.assignee.matches(task) {
            return false;
        }
        if let Some(bucket) = self.due {
            if !bucket.matches(task, today) {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }
        if !self.tags.is_empty() && !task.tag_ids.iter().any(|tag| self.tags.contains(tag)) {
            return false;
        }
        if let Some(project) = &self.project {
            if task.project_id.as_deref() != Some(project.as_str()) {
                return false;
            }
        }
        if let Some(area) = &self.area {
            if task.area_id.as_deref() != Some(area.as_str()) {
                return false;
            }
        }
        if let Some(when) = self.when {
            if task.when_type != when {
                return false;
            }
        }
        if let Some(needle) = self.search_needle() {
            let in_title = task.title.to_lowercase().contains(&needle);
            let in_notes = task
                .notes
                .as_ref()
                .map(|notes| notes.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !in_title && !in_notes {
                return false;
            }
        }
        true
    }

    fn search_needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|needle| !needle.is_empty())
            .map(str::to_lowercase)
    }

    pub fn summary(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let mut parts = Vec::new();
        if let Some(status) = self.status {
            parts.push(format!("status:{status}"));
        }
        if let Some(value) = self.assignee.value() {
            parts.push(format!("assignee:{value}"));
        }
        if let Some(due) = self.due {
            parts.push(format!("due:{due}"));
        }
        if let Some(priority) = self.priority {
            parts.push(format!("priority:{priority}"));
        }
        if !self.tags.is_empty() {
            let joined = self
                .tags
                .iter()
                .map(|t| format!("#{t}"))
                .collect::<Vec<_>>()
                .join(",");
            parts.push(format!("tag:{joined}"));
        }
        if let Some(project) = &self.project {
            parts.push(format!("project:{project}"));
        }
        if let Some(area) = &self.area {
            parts.push(format!("area:{area}"));
        }
        if let Some(when) = self.when {
            parts.push(format!("when:{when}"));
        }
        if let Some(needle) = self.search_needle() {
            parts.push(format!("search:\"{needle}\""));
        }
        if self.sort != SortOption::Default {
            parts.push(format!("sort:{}", self.sort.as_str()));
        }

        Some(parts.join(" | "))
    }
}

/// Apply `filters` to `tasks`, keeping input order unless a deadline sort is requested.
pub fn filter_tasks(tasks: &[Task], filters: &TaskFilters, today: NaiveDate) -> Vec<Task> {
    let mut result: Vec<Task> = tasks
        .iter()
        .filter(|task| filters.matches(task, today))
        .cloned()
        .collect();

    match filters.sort {
        SortOption::Default => {}
        SortOption::DeadlineAsc => result.sort_by(|a, b| compare_deadlines(a, b, false)),
        SortOption::DeadlineDesc => result.sort_by(|a, b| compare_deadlines(a, b, true)),
    }
    result
}

/// Undated tasks go last in both directions.
fn compare_deadlines(a: &Task, b: &Task, descending: bool) -> Ordering {
    match (a.deadline, b.deadline) {
        (Some(left), Some(right)) if descending => right.cmp(&left),
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
