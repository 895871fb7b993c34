//! Optimistic task mutations.
//!
//! A [`Mutation`] is built against the list the user is looking at, applied
//! to that list immediately, then committed to the store. If the store write
//! fails the mutation undoes itself: the affected tasks are put back exactly
//! as they were, or for reorders the caller is told to refetch the list.
//! Snapshots only cover the tasks a mutation touches, so mutations on
//! disjoint tasks never undo each other.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use ulid::Ulid;

use crate::model::{Priority, Task, TaskPatch, TaskStatus, WhenType};
use crate::permissions::{Actor, PermissionDenied};
use crate::recurrence::RecurrenceError;
use crate::reorder::{self, ReorderError};
use crate::store::TaskStore;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Permission(#[from] PermissionDenied),
    #[error(transparent)]
    Reorder(#[from] ReorderError),
    #[error(transparent)]
    Recurrence(#[from] RecurrenceError),
    #[error("Failed to {action}: {source}")]
    Remote {
        action: String,
        #[source]
        source: anyhow::Error,
    },
}

impl MutationError {
    /// Message suitable for showing to the person who triggered the change.
    pub fn user_message(&self) -> String {
        match self {
            MutationError::Validation(message) => message.clone(),
            MutationError::Permission(denied) => {
                format!("You don't have permission to {} this task.", denied.action)
            }
            MutationError::Reorder(err) => err.to_string(),
            MutationError::Recurrence(err) => format!("This task's repeat rule is invalid: {err}"),
            MutationError::Remote { action, .. } if action == "reorder" => {
                "Couldn't save the new order. The list has been reloaded.".to_string()
            }
            MutationError::Remote { action, .. } => {
                format!("Couldn't {action} the task. Your change was undone.")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Complete,
    Trash,
    SetPriority(Priority),
    SetWhen {
        when: WhenType,
        date: Option<NaiveDate>,
    },
    Assign(Option<String>),
    MoveToProject(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Complete,
    Reopen,
    MoveStatus(TaskStatus),
    Schedule {
        when: WhenType,
        date: Option<NaiveDate>,
    },
    Reorder,
    Trash,
    Restore,
    Bulk(BulkAction),
}

impl MutationKind {
    /// Verb used in log lines and permission messages.
    pub fn label(&self) -> &'static str {
        match self {
            MutationKind::Complete | MutationKind::Bulk(BulkAction::Complete) => "complete",
            MutationKind::Reopen => "reopen",
            MutationKind::MoveStatus(_) => "move",
            MutationKind::Schedule { .. } | MutationKind::Bulk(BulkAction::SetWhen { .. }) => {
                "schedule"
            }
            MutationKind::Reorder => "reorder",
            MutationKind::Trash | MutationKind::Bulk(BulkAction::Trash) => "trash",
            MutationKind::Restore => "restore",
            MutationKind::Bulk(BulkAction::SetPriority(_)) => "prioritize",
            MutationKind::Bulk(BulkAction::Assign(_)) => "assign",
            MutationKind::Bulk(BulkAction::MoveToProject(_)) => "move",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Put the affected tasks back exactly as they were.
    RestoreSnapshot,
    /// A partial snapshot can't express the list order; reload instead.
    Refetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    Idle,
    Applied,
    Settled,
    RolledBack,
    RefetchRequired,
}

/// A task as it was before the mutation, with its position in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub index: usize,
    pub task: Task,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalChange {
    Replace(Vec<Task>),
    Remove(Vec<String>),
    Resequence(Vec<(String, i64)>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteWrite {
    Update { id: String, patch: TaskPatchSummary },
    SortOrders(Vec<(String, i64)>),
    Insert(Task),
}

/// Serializable wrapper so plans can be logged or printed as JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPatchSummary(pub TaskPatch);

impl Serialize for TaskPatchSummary {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let patch = &self.0;
        let mut fields: Vec<&str> = Vec::new();
        macro_rules! touched {
            ($($field:ident),+) => {
                $( if patch.$field.is_some() { fields.push(stringify!($field)); } )+
            };
        }
        touched!(
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
            deleted_at
        );
        fields.serialize(serializer)
    }
}

/// What a mutation is built against.
pub struct MutationContext<'a> {
    pub tasks: &'a [Task],
    pub actor: &'a Actor,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Mutation {
    pub id: u64,
    pub kind: MutationKind,
    pub before: Vec<Snapshot>,
    pub after: LocalChange,
    pub writes: Vec<RemoteWrite>,
    pub rollback: RollbackPolicy,
    pub state: MutationState,
}

impl Mutation {
    pub fn complete(ctx: &MutationContext<'_>, id: &str) -> Result<Self, MutationError> {
        Self::edit(ctx, MutationKind::Complete, &[id.to_string()], |task, now| {
            complete_task(task, now)
        })
    }

    pub fn reopen(ctx: &MutationContext<'_>, id: &str) -> Result<Self, MutationError> {
        Self::edit(ctx, MutationKind::Reopen, &[id.to_string()], |task, _| {
            reopen_task(task);
            Ok(None)
        })
    }

    /// Kanban column move. Moving into `done` completes the task.
    pub fn move_to_status(
        ctx: &MutationContext<'_>,
        id: &str,
        status: TaskStatus,
    ) -> Result<Self, MutationError> {
        Self::edit(
            ctx,
            MutationKind::MoveStatus(status),
            &[id.to_string()],
            |task, now| match status {
                TaskStatus::Done => complete_task(task, now),
                other => {
                    if task.status == TaskStatus::Done {
                        reopen_task(task);
                    }
                    task.status = other;
                    Ok(None)
                }
            },
        )
    }

    pub fn schedule(
        ctx: &MutationContext<'_>,
        id: &str,
        when: WhenType,
        date: Option<NaiveDate>,
    ) -> Result<Self, MutationError> {
        validate_schedule(when, date)?;
        Self::edit(
            ctx,
            MutationKind::Schedule { when, date },
            &[id.to_string()],
            |task, _| {
                schedule_task(task, when, date);
                Ok(None)
            },
        )
    }

    pub fn trash(ctx: &MutationContext<'_>, ids: &[String]) -> Result<Self, MutationError> {
        Self::edit(ctx, MutationKind::Trash, ids, |task, now| {
            task.deleted_at = Some(now);
            Ok(None)
        })
    }

    pub fn restore(ctx: &MutationContext<'_>, ids: &[String]) -> Result<Self, MutationError> {
        Self::edit(ctx, MutationKind::Restore, ids, |task, _| {
            task.deleted_at = None;
            Ok(None)
        })
    }

    pub fn bulk(
        ctx: &MutationContext<'_>,
        ids: &[String],
        action: BulkAction,
    ) -> Result<Self, MutationError> {
        if let BulkAction::SetWhen { when, date } = &action {
            validate_schedule(*when, *date)?;
        }
        let applied = action.clone();
        Self::edit(ctx, MutationKind::Bulk(action), ids, move |task, now| {
            match &applied {
                BulkAction::Complete => return complete_task(task, now),
                BulkAction::Trash => task.deleted_at = Some(now),
                BulkAction::SetPriority(priority) => task.priority = *priority,
                BulkAction::SetWhen { when, date } => schedule_task(task, *when, *date),
                BulkAction::Assign(user) => task.assignee_id = user.clone(),
                BulkAction::MoveToProject(project) => task.project_id = project.clone(),
            }
            Ok(None)
        })
    }

    /// Move `task_id` to `to_index` within the visible (filtered) sequence.
    pub fn reorder(
        ctx: &MutationContext<'_>,
        visible_ids: &[String],
        task_id: &str,
        to_index: usize,
    ) -> Result<Self, MutationError> {
        let moved = ctx
            .tasks
            .iter()
            .find(|task| task.id == task_id)
            .ok_or_else(|| ReorderError::UnknownTask(task_id.to_string()))?;
        ctx.actor.ensure_can_edit(moved, MutationKind::Reorder.label())?;

        let plan = reorder::reorder(ctx.tasks, visible_ids, task_id, to_index)?;
        let before = ctx
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| plan.sequence.contains(&task.id))
            .map(|(index, task)| Snapshot {
                index,
                task: task.clone(),
            })
            .collect();

        Ok(Self {
            id: 0,
            kind: MutationKind::Reorder,
            before,
            after: LocalChange::Resequence(plan.writes.clone()),
            writes: vec![RemoteWrite::SortOrders(plan.writes)],
            rollback: RollbackPolicy::Refetch,
            state: MutationState::Idle,
        })
    }

    fn edit<F>(
        ctx: &MutationContext<'_>,
        kind: MutationKind,
        ids: &[String],
        mut change: F,
    ) -> Result<Self, MutationError>
    where
        F: FnMut(&mut Task, DateTime<Utc>) -> Result<Option<Task>, MutationError>,
    {
        if ids.is_empty() {
            return Err(MutationError::Validation(
                "Select at least one task first.".to_string(),
            ));
        }

        let mut before = Vec::new();
        for id in ids {
            if before.iter().any(|snapshot: &Snapshot| &snapshot.task.id == id) {
                continue;
            }
            let (index, task) = ctx
                .tasks
                .iter()
                .enumerate()
                .find(|(_, task)| &task.id == id)
                .ok_or_else(|| MutationError::Validation(format!("Task {id} was not found.")))?;
            ctx.actor.ensure_can_edit(task, kind.label())?;
            before.push(Snapshot {
                index,
                task: task.clone(),
            });
        }

        let mut replaced = Vec::with_capacity(before.len());
        let mut writes = Vec::with_capacity(before.len());
        let mut follow_ups = Vec::new();
        for snapshot in &before {
            let mut task = snapshot.task.clone();
            if let Some(next) = change(&mut task, ctx.now)? {
                follow_ups.push(next);
            }
            let patch = TaskPatch::between(&snapshot.task, &task);
            if !patch.is_empty() {
                task.updated_at = ctx.now;
                writes.push(RemoteWrite::Update {
                    id: task.id.clone(),
                    patch: TaskPatchSummary(patch),
                });
            }
            replaced.push(task);
        }
        writes.extend(follow_ups.into_iter().map(RemoteWrite::Insert));

        let after = match kind {
            MutationKind::Trash | MutationKind::Restore | MutationKind::Bulk(BulkAction::Trash) => {
                LocalChange::Remove(replaced.into_iter().map(|task| task.id).collect())
            }
            _ => LocalChange::Replace(replaced),
        };

        Ok(Self {
            id: 0,
            kind,
            before,
            after,
            writes,
            rollback: RollbackPolicy::RestoreSnapshot,
            state: MutationState::Idle,
        })
    }

    pub fn affected_ids(&self) -> Vec<&str> {
        self.before
            .iter()
            .map(|snapshot| snapshot.task.id.as_str())
            .collect()
    }

    /// Tasks created as a side effect, such as the next occurrence of a repeat.
    pub fn follow_ups(&self) -> impl Iterator<Item = &Task> {
        self.writes.iter().filter_map(|write| match write {
            RemoteWrite::Insert(task) => Some(task),
            _ => None,
        })
    }

    /// Reflect the change in the local list.
    pub fn apply(&mut self, tasks: &mut Vec<Task>) {
        if self.state != MutationState::Idle {
            return;
        }
        match &self.after {
            LocalChange::Replace(updated) => {
                for task in updated {
                    if let Some(slot) = tasks.iter_mut().find(|t| t.id == task.id) {
                        *slot = task.clone();
                    }
                }
            }
            LocalChange::Remove(ids) => tasks.retain(|task| !ids.contains(&task.id)),
            LocalChange::Resequence(orders) => reorder::apply_sequence(tasks, orders),
        }
        self.state = MutationState::Applied;
        debug!(
            mutation = self.id,
            kind = self.kind.label(),
            tasks = self.before.len(),
            "applied optimistic change"
        );
    }

    /// Perform the remote writes as one batch.
    pub fn commit(&self, store: &dyn TaskStore) -> Result<()> {
        store.apply_batch(&self.writes)
    }

    pub fn mark_settled(&mut self) {
        if self.state == MutationState::Applied {
            self.state = MutationState::Settled;
        }
    }

    /// Undo the local change after a failed commit.
    pub fn rollback(&mut self, tasks: &mut Vec<Task>) {
        if self.state != MutationState::Applied {
            return;
        }
        match self.rollback {
            RollbackPolicy::Refetch => {
                self.state = MutationState::RefetchRequired;
            }
            RollbackPolicy::RestoreSnapshot => {
                let mut snapshots: Vec<&Snapshot> = self.before.iter().collect();
                snapshots.sort_by_key(|snapshot| snapshot.index);
                for snapshot in snapshots {
                    match tasks.iter_mut().find(|t| t.id == snapshot.task.id) {
                        Some(slot) => *slot = snapshot.task.clone(),
                        None => {
                            let index = snapshot.index.min(tasks.len());
                            tasks.insert(index, snapshot.task.clone());
                        }
                    }
                }
                self.state = MutationState::RolledBack;
            }
        }
    }
}

fn validate_schedule(when: WhenType, date: Option<NaiveDate>) -> Result<(), MutationError> {
    match when {
        WhenType::Logbook => Err(MutationError::Validation(
            "Complete a task to move it to the logbook.".to_string(),
        )),
        WhenType::Scheduled if date.is_none() => Err(MutationError::Validation(
            "Scheduling needs a date.".to_string(),
        )),
        _ => Ok(()),
    }
}

fn schedule_task(task: &mut Task, when: WhenType, date: Option<NaiveDate>) {
    task.when_type = when;
    task.when_date = match when {
        WhenType::Scheduled => date,
        _ => None,
    };
}

/// Mark done and file into the logbook. Returns the next occurrence for
/// repeating tasks.
fn complete_task(task: &mut Task, now: DateTime<Utc>) -> Result<Option<Task>, MutationError> {
    if task.status == TaskStatus::Done && task.completed_at.is_some() {
        return Ok(None);
    }
    task.status = TaskStatus::Done;
    task.completed_at = Some(now);
    task.when_type = WhenType::Logbook;

    let Some(rule) = &task.recurrence else {
        return Ok(None);
    };
    rule.validate()?;

    let anchor = task
        .when_date
        .or_else(|| task.effective_due())
        .unwrap_or_else(|| now.date_naive());
    let Some(next) = rule.next_after(anchor) else {
        return Ok(None);
    };
    let shift = next - anchor;

    let mut follow_up = task.clone();
    follow_up.id = Ulid::new().to_string();
    follow_up.status = TaskStatus::Todo;
    follow_up.when_type = WhenType::Scheduled;
    follow_up.when_date = Some(next);
    follow_up.due_date = task.due_date.map(|date| date + shift);
    follow_up.deadline = task.deadline.map(|date| date + shift);
    follow_up.time_entries.clear();
    follow_up.created_at = now;
    follow_up.updated_at = now;
    follow_up.completed_at = None;
    follow_up.deleted_at = None;
    Ok(Some(follow_up))
}

fn reopen_task(task: &mut Task) {
    task.status = TaskStatus::Todo;
    task.completed_at = None;
    if task.when_type.is_logbook() {
        task.when_type = WhenType::Anytime;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{date, task};
    use crate::permissions::Role;
    use crate::store::testing::MemoryStore;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    fn owner() -> Actor {
        Actor::new("owner", Role::Member)
    }

    fn list() -> Vec<Task> {
        let mut t1 = task("t1");
        t1.status = TaskStatus::Todo;
        let mut t2 = task("t2");
        t2.sort_order = 1;
        let mut t3 = task("t3");
        t3.sort_order = 2;
        vec![t1, t2, t3]
    }

    #[test]
    fn failed_complete_restores_only_its_task() {
        let mut tasks = list();
        let pristine = tasks[0].clone();
        let actor = owner();
        let (mut first, mut second) = {
            let ctx = MutationContext {
                tasks: &tasks,
                actor: &actor,
                now: now(),
            };
            (
                Mutation::complete(&ctx, "t1").unwrap(),
                Mutation::complete(&ctx, "t2").unwrap(),
            )
        };

        first.apply(&mut tasks);
        second.apply(&mut tasks);
        assert_eq!(tasks[0].status, TaskStatus::Done);

        let failing = MemoryStore::failing(list());
        assert!(first.commit(&failing).is_err());
        first.rollback(&mut tasks);

        let healthy = MemoryStore::with_tasks(list());
        second.commit(&healthy).unwrap();
        second.mark_settled();

        assert_eq!(tasks[0], pristine);
        assert_eq!(tasks[1].status, TaskStatus::Done);
        assert_eq!(first.state, MutationState::RolledBack);
        assert_eq!(second.state, MutationState::Settled);
        assert_eq!(
            healthy.get("t2").map(|t| t.when_type),
            Some(WhenType::Logbook)
        );
    }

    #[test]
    fn viewers_cannot_mutate() {
        let tasks = list();
        let viewer = Actor::new("owner", Role::Viewer);
        let ctx = MutationContext {
            tasks: &tasks,
            actor: &viewer,
            now: now(),
        };
        let err = Mutation::complete(&ctx, "t1").unwrap_err();
        assert!(matches!(err, MutationError::Permission(_)));
        assert_eq!(err.user_message(), "You don't have permission to complete this task.");
    }

    #[test]
    fn validation_rejects_empty_and_unknown_selections() {
        let tasks = list();
        let actor = owner();
        let ctx = MutationContext {
            tasks: &tasks,
            actor: &actor,
            now: now(),
        };
        assert!(matches!(
            Mutation::trash(&ctx, &[]),
            Err(MutationError::Validation(_))
        ));
        assert!(matches!(
            Mutation::complete(&ctx, "missing"),
            Err(MutationError::Validation(_))
        ));
        assert!(matches!(
            Mutation::schedule(&ctx, "t1", WhenType::Scheduled, None),
            Err(MutationError::Validation(_))
        ));
    }

    #[test]
    fn trash_removes_locally_and_rollback_reinserts_in_place() {
        let mut tasks = list();
        let original = tasks.clone();
        let actor = owner();
        let mut trash = {
            let ctx = MutationContext {
                tasks: &tasks,
                actor: &actor,
                now: now(),
            };
            Mutation::trash(&ctx, &["t2".to_string(), "t3".to_string()]).unwrap()
        };

        trash.apply(&mut tasks);
        assert_eq!(tasks.len(), 1);

        trash.rollback(&mut tasks);
        assert_eq!(tasks, original);
    }

    #[test]
    fn reorder_failure_requires_refetch() {
        let mut tasks = list();
        let actor = owner();
        let visible: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        let mut reorder = {
            let ctx = MutationContext {
                tasks: &tasks,
                actor: &actor,
                now: now(),
            };
            Mutation::reorder(&ctx, &visible, "t3", 0).unwrap()
        };
        reorder.apply(&mut tasks);
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t3", "t1", "t2"]);

        let failing = MemoryStore::failing(list());
        assert!(reorder.commit(&failing).is_err());
        reorder.rollback(&mut tasks);
        assert_eq!(reorder.state, MutationState::RefetchRequired);
    }

    #[test]
    fn completing_recurring_task_schedules_next_occurrence() {
        let mut tasks = list();
        tasks[0].recurrence = Some("1w".parse().unwrap());
        tasks[0].when_date = Some(date("2024-03-04"));
        tasks[0].deadline = Some(date("2024-03-06"));
        let actor = owner();
        let ctx = MutationContext {
            tasks: &tasks,
            actor: &actor,
            now: now(),
        };

        let mutation = Mutation::complete(&ctx, "t1").unwrap();
        let next: Vec<&Task> = mutation.follow_ups().collect();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].when_type, WhenType::Scheduled);
        assert_eq!(next[0].when_date, Some(date("2024-03-11")));
        assert_eq!(next[0].deadline, Some(date("2024-03-13")));
        assert_eq!(next[0].status, TaskStatus::Todo);
        assert_ne!(next[0].id, "t1");

        let store = MemoryStore::with_tasks(tasks.clone());
        mutation.commit(&store).unwrap();
        assert_eq!(store.tasks.borrow().len(), 4);
    }

    #[test]
    fn moving_out_of_done_reopens() {
        let mut tasks = list();
        tasks[0].status = TaskStatus::Done;
        tasks[0].completed_at = Some(now());
        tasks[0].when_type = WhenType::Logbook;
        let actor = owner();
        let ctx = MutationContext {
            tasks: &tasks,
            actor: &actor,
            now: now(),
        };

        let mutation = Mutation::move_to_status(&ctx, "t1", TaskStatus::Review).unwrap();
        let LocalChange::Replace(updated) = &mutation.after else {
            panic!("expected replace");
        };
        assert_eq!(updated[0].status, TaskStatus::Review);
        assert_eq!(updated[0].completed_at, None);
        assert_eq!(updated[0].when_type, WhenType::Anytime);
    }

    #[test]
    fn bulk_assign_writes_one_patch_per_task() {
        let tasks = list();
        let actor = Actor::new("boss", Role::Admin);
        let ctx = MutationContext {
            tasks: &tasks,
            actor: &actor,
            now: now(),
        };
        let ids = vec!["t1".to_string(), "t3".to_string(), "t1".to_string()];
        let mutation =
            Mutation::bulk(&ctx, &ids, BulkAction::Assign(Some("u7".into()))).unwrap();
        assert_eq!(mutation.affected_ids(), vec!["t1", "t3"]);
        assert_eq!(mutation.writes.len(), 2);
    }
}
