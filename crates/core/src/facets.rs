//! Cascading filter options.
//!
//! Every facet is counted against the tasks that pass all *other* active
//! filters, so picking a value never hides its siblings while choices in
//! other facets still narrow what is offered.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::filters::{AssigneeFilter, DueBucket, Facet, TaskFilters, UNASSIGNED};
use crate::model::{Priority, References, Task, TaskStatus};

/// Which tasks facets are computed over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scope {
    /// Everything not in the trash.
    #[default]
    Active,
    Trash,
}

impl Scope {
    fn admits(self, task: &Task) -> bool {
        match self {
            Scope::Active => !task.is_deleted(),
            Scope::Trash => task.is_deleted(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetOption {
    pub value: String,
    pub label: String,
    pub count: usize,
    pub selected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub assignees: Vec<FacetOption>,
    pub statuses: Vec<FacetOption>,
    pub areas: Vec<FacetOption>,
    pub priorities: Vec<FacetOption>,
    pub due: Vec<FacetOption>,
    pub tags: Vec<FacetOption>,
}

impl FilterOptions {
    pub fn facet(&self, facet: Facet) -> &[FacetOption] {
        match facet {
            Facet::Assignee => &self.assignees,
            Facet::Status => &self.statuses,
            Facet::Area => &self.areas,
            Facet::Priority => &self.priorities,
            Facet::Due => &self.due,
            Facet::Tag => &self.tags,
        }
    }

    pub fn option(&self, facet: Facet, value: &str) -> Option<&FacetOption> {
        self.facet(facet).iter().find(|option| option.value == value)
    }
}

pub fn compute_filter_options(
    tasks: &[Task],
    filters: &TaskFilters,
    references: &References,
    today: NaiveDate,
    scope: Scope,
) -> FilterOptions {
    let scoped: Vec<&Task> = tasks.iter().filter(|task| scope.admits(task)).collect();
    let subset = |facet: Facet| -> Vec<&Task> {
        let narrowed = filters.without(facet);
        scoped
            .iter()
            .copied()
            .filter(|task| narrowed.matches(task, today))
            .collect()
    };

    FilterOptions {
        assignees: assignee_options(&subset(Facet::Assignee), filters, references),
        statuses: status_options(&subset(Facet::Status), filters),
        areas: area_options(&subset(Facet::Area), filters, references),
        priorities: priority_options(&subset(Facet::Priority), filters),
        due: due_options(&subset(Facet::Due), filters, today),
        tags: tag_options(&subset(Facet::Tag), filters, references),
    }
}

fn assignee_options(
    tasks: &[&Task],
    filters: &TaskFilters,
    references: &References,
) -> Vec<FacetOption> {
    let mut unassigned = 0usize;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for task in tasks {
        match task.assignee_id.as_deref() {
            Some(id) => *counts.entry(id).or_default() += 1,
            None => unassigned += 1,
        }
    }

    let mut options: Vec<FacetOption> = counts
        .into_iter()
        .map(|(id, count)| FacetOption {
            value: id.to_string(),
            label: references
                .user(id)
                .map(|user| user.name.clone())
                .unwrap_or_else(|| id.to_string()),
            count,
            selected: matches!(&filters.assignee, AssigneeFilter::Specific(selected) if selected == id),
        })
        .collect();
    sort_by_label(&mut options);

    // "Unassigned" leads the list rather than sorting among names.
    if unassigned > 0 {
        options.insert(
            0,
            FacetOption {
                value: UNASSIGNED.to_string(),
                label: "Unassigned".to_string(),
                count: unassigned,
                selected: filters.assignee == AssigneeFilter::Unassigned,
            },
        );
    }
    options
}

fn status_options(tasks: &[&Task], filters: &TaskFilters) -> Vec<FacetOption> {
    TaskStatus::ALL
        .iter()
        .filter_map(|status| {
            let count = tasks.iter().filter(|task| task.status == *status).count();
            (count > 0).then(|| FacetOption {
                value: status.as_str().to_string(),
                label: status.label().to_string(),
                count,
                selected: filters.status == Some(*status),
            })
        })
        .collect()
}

fn priority_options(tasks: &[&Task], filters: &TaskFilters) -> Vec<FacetOption> {
    Priority::ALL
        .iter()
        .filter_map(|priority| {
            let count = tasks
                .iter()
                .filter(|task| task.priority == *priority)
                .count();
            (count > 0).then(|| FacetOption {
                value: priority.as_str().to_string(),
                label: priority.label().to_string(),
                count,
                selected: filters.priority == Some(*priority),
            })
        })
        .collect()
}

/// Buckets overlap (today is also this week), so one task can count in several.
fn due_options(tasks: &[&Task], filters: &TaskFilters, today: NaiveDate) -> Vec<FacetOption> {
    DueBucket::ALL
        .iter()
        .filter_map(|bucket| {
            let count = tasks
                .iter()
                .filter(|task| bucket.matches(task, today))
                .count();
            (count > 0).then(|| FacetOption {
                value: bucket.as_str().to_string(),
                label: bucket.label().to_string(),
                count,
                selected: filters.due == Some(*bucket),
            })
        })
        .collect()
}

fn area_options(
    tasks: &[&Task],
    filters: &TaskFilters,
    references: &References,
) -> Vec<FacetOption> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for task in tasks {
        if let Some(area) = task.area_id.as_deref() {
            *counts.entry(area).or_default() += 1;
        }
    }

    let mut options: Vec<FacetOption> = counts
        .into_iter()
        .map(|(id, count)| FacetOption {
            value: id.to_string(),
            label: references
                .area(id)
                .map(|area| area.name.clone())
                .unwrap_or_else(|| id.to_string()),
            count,
            selected: filters.area.as_deref() == Some(id),
        })
        .collect();
    sort_by_label(&mut options);
    options
}

fn tag_options(tasks: &[&Task], filters: &TaskFilters, references: &References) -> Vec<FacetOption> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for task in tasks {
        for tag in &task.tag_ids {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }

    let mut options: Vec<FacetOption> = counts
        .into_iter()
        .map(|(id, count)| FacetOption {
            value: id.to_string(),
            label: references
                .tag(id)
                .map(|tag| tag.name.clone())
                .unwrap_or_else(|| id.to_string()),
            count,
            selected: filters.tags.iter().any(|selected| selected == id),
        })
        .collect();
    sort_by_label(&mut options);
    options
}

/// Case-insensitive label order; exact label then value break ties so output is deterministic.
fn sort_by_label(options: &mut [FacetOption]) {
    options.sort_by(|a, b| {
        a.label
            .to_lowercase()
            .cmp(&b.label.to_lowercase())
            .then_with(|| a.label.cmp(&b.label))
            .then_with(|| a.value.cmp(&b.value))
    });
}
