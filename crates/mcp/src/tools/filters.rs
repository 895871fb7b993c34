use std::str::FromStr;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use taskdeck_core::filters::{AssigneeFilter, DueBucket, SortOption, TaskFilters};
use taskdeck_core::model::{Priority, References, TaskStatus, View, WhenType};

/// View plus filter arguments shared by the list, facet and reorder tools.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewArgs {
    pub view: Option<String>,
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub due: Option<String>,
    pub priority: Option<String>,
    pub tags: Option<Vec<String>>,
    pub project: Option<String>,
    pub area: Option<String>,
    pub when: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
}

impl ViewArgs {
    pub fn view(&self) -> Result<View> {
        match self.view.as_deref() {
            Some(view) => View::from_str(view),
            None => Ok(View::Inbox),
        }
    }

    /// Build filters, accepting either ids or names for labelled entities.
    pub fn to_filters(&self, references: &References) -> Result<TaskFilters> {
        let assignee = match self.assignee.as_deref() {
            Some(handle) => {
                let id = references
                    .user_by_handle(handle.trim())
                    .map(|user| user.id.as_str())
                    .unwrap_or(handle);
                AssigneeFilter::from_ids(&[id])
            }
            None => AssigneeFilter::Any,
        };

        let tags = self
            .tags
            .iter()
            .flatten()
            .map(|tag| tag.trim().trim_start_matches('#'))
            .filter(|tag| !tag.is_empty())
            .map(|tag| {
                references
                    .tag_by_name(tag)
                    .map(|found| found.id.clone())
                    .unwrap_or_else(|| tag.to_string())
            })
            .collect();

        let project = self.project.as_deref().map(|value| {
            references
                .project_by_name(value)
                .map(|project| project.id.clone())
                .unwrap_or_else(|| value.to_string())
        });
        let area = self.area.as_deref().map(|value| {
            references
                .area_by_name(value)
                .map(|area| area.id.clone())
                .unwrap_or_else(|| value.to_string())
        });

        Ok(TaskFilters {
            status: self.status.as_deref().map(TaskStatus::from_str).transpose()?,
            assignee,
            due: self.due.as_deref().map(DueBucket::from_str).transpose()?,
            priority: self.priority.as_deref().map(Priority::from_str).transpose()?,
            tags,
            project,
            area,
            when: self.when.as_deref().map(WhenType::from_str).transpose()?,
            search: self.search.clone(),
            sort: self
                .sort
                .as_deref()
                .map(SortOption::from_str)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

/// JSON schema properties for [`ViewArgs`].
pub fn view_properties() -> Value {
    json!({
        "view": {
            "type": "string",
            "enum": ["inbox", "today", "upcoming", "anytime", "someday", "logbook", "trash", "all"],
            "description": "List to load (defaults to inbox)"
        },
        "status": {
            "type": "string",
            "enum": ["backlog", "todo", "in_progress", "review", "done", "canceled"]
        },
        "assignee": {
            "type": "string",
            "description": "User id or name, or \"unassigned\""
        },
        "due": {
            "type": "string",
            "enum": ["today", "this_week", "this_month", "overdue", "no_date"]
        },
        "priority": { "type": "string", "enum": ["high", "low", "none"] },
        "tags": {
            "type": "array",
            "items": { "type": "string" },
            "description": "Tag ids or names; a task needs any one of them"
        },
        "project": { "type": "string", "description": "Project id or name" },
        "area": { "type": "string", "description": "Area id or name" },
        "when": {
            "type": "string",
            "enum": ["inbox", "today", "anytime", "someday", "scheduled", "none"]
        },
        "search": { "type": "string" },
        "sort": {
            "type": "string",
            "enum": ["default", "deadline_asc", "deadline_desc"]
        }
    })
}
