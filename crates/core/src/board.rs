//! View-scoped application state.
//!
//! One [`TaskBoard`] backs one open list: it owns the loaded tasks, the active
//! filters and selection, and runs optimistic mutations against them.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::warn;

use crate::facets::{compute_filter_options, FilterOptions, Scope};
use crate::filters::{filter_tasks, SortOption, TaskFilters};
use crate::model::{References, Task, TaskQuery, View};
use crate::mutation::{Mutation, MutationContext, MutationError, MutationState};
use crate::permissions::Actor;
use crate::realtime::RowEvent;
use crate::telemetry::{Event, Handle};

/// A loaded list plus the reference data needed to label it.
#[derive(Debug, Clone, Serialize)]
pub struct ViewSnapshot {
    pub query: TaskQuery,
    pub tasks: Vec<Task>,
    pub references: References,
}

/// Outcome of finishing a mutation.
#[derive(Debug)]
pub struct Settlement {
    pub mutation_id: u64,
    pub state: MutationState,
    pub error: Option<MutationError>,
}

impl Settlement {
    pub fn needs_refetch(&self) -> bool {
        self.state == MutationState::RefetchRequired
    }
}

#[derive(Debug)]
pub struct TaskBoard {
    query: TaskQuery,
    actor: Actor,
    tasks: Vec<Task>,
    references: References,
    filters: TaskFilters,
    selection: BTreeSet<String>,
    next_mutation_id: u64,
    telemetry: Handle,
}

impl TaskBoard {
    pub fn new(actor: Actor, snapshot: ViewSnapshot) -> Self {
        let mut board = Self {
            query: snapshot.query.clone(),
            actor,
            tasks: Vec::new(),
            references: References::default(),
            filters: TaskFilters::default(),
            selection: BTreeSet::new(),
            next_mutation_id: 1,
            telemetry: Handle::new(),
        };
        board.load(snapshot);
        board
    }

    /// Replace the loaded list. Filters survive; selections of vanished tasks don't.
    pub fn load(&mut self, snapshot: ViewSnapshot) {
        self.query = snapshot.query;
        self.tasks = snapshot.tasks;
        self.references = snapshot.references;
        let tasks = &self.tasks;
        self.selection
            .retain(|id| tasks.iter().any(|task| &task.id == id));
        self.telemetry.record(Event::ViewLoaded {
            view: self.view().as_str().to_string(),
            count: self.tasks.len(),
        });
    }

    pub fn view(&self) -> View {
        self.query.view
    }

    pub fn query(&self) -> &TaskQuery {
        &self.query
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn references(&self) -> &References {
        &self.references
    }

    pub fn telemetry(&self) -> &Handle {
        &self.telemetry
    }

    pub fn filters(&self) -> &TaskFilters {
        &self.filters
    }

    pub fn set_filters(&mut self, filters: TaskFilters) {
        self.filters = filters;
        self.telemetry.record(Event::FiltersChanged(
            self.filters.summary().unwrap_or_else(|| "none".to_string()),
        ));
    }

    pub fn clear_filters(&mut self) {
        self.set_filters(TaskFilters::default());
    }

    /// The loaded list after filtering and sorting.
    pub fn visible(&self, today: NaiveDate) -> Vec<Task> {
        filter_tasks(&self.tasks, &self.filters, today)
    }

    pub fn visible_ids(&self, today: NaiveDate) -> Vec<String> {
        self.visible(today).into_iter().map(|task| task.id).collect()
    }

    /// The visible ids a drag renumbers. Only manual order can be rearranged.
    pub fn reorder_sequence(&self, today: NaiveDate) -> Result<Vec<String>, MutationError> {
        if self.filters.sort != SortOption::Default {
            return Err(MutationError::Validation(
                "Switch back to manual order to rearrange tasks.".to_string(),
            ));
        }
        Ok(self.visible_ids(today))
    }

    pub fn filter_options(&self, today: NaiveDate) -> FilterOptions {
        let scope = if self.view().is_trash() {
            Scope::Trash
        } else {
            Scope::Active
        };
        compute_filter_options(&self.tasks, &self.filters, &self.references, today, scope)
    }

    pub fn toggle_selected(&mut self, id: &str) -> bool {
        if self.selection.remove(id) {
            false
        } else if self.tasks.iter().any(|task| task.id == id) {
            self.selection.insert(id.to_string())
        } else {
            false
        }
    }

    pub fn select_all_visible(&mut self, today: NaiveDate) {
        self.selection = self.visible_ids(today).into_iter().collect();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Selected ids in list order.
    pub fn selected_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|task| self.selection.contains(&task.id))
            .map(|task| task.id.clone())
            .collect()
    }

    pub fn context(&self, now: DateTime<Utc>) -> MutationContext<'_> {
        MutationContext {
            tasks: &self.tasks,
            actor: &self.actor,
            now,
        }
    }

    /// Number the mutation and apply it to the loaded list.
    pub fn begin(&mut self, mut mutation: Mutation) -> Mutation {
        mutation.id = self.next_mutation_id;
        self.next_mutation_id += 1;
        mutation.apply(&mut self.tasks);
        for id in mutation.affected_ids() {
            if !self.tasks.iter().any(|task| task.id == id) {
                self.selection.remove(id);
            }
        }
        self.telemetry.record(Event::MutationApplied {
            id: mutation.id,
            action: mutation.kind.label().to_string(),
        });
        mutation
    }

    /// Finish a mutation with the store's verdict, rolling back on failure.
    pub fn settle(&mut self, mut mutation: Mutation, result: anyhow::Result<()>) -> Settlement {
        let action = mutation.kind.label().to_string();
        match result {
            Ok(()) => {
                mutation.mark_settled();
                let follow_ups: Vec<Task> = mutation
                    .follow_ups()
                    .filter(|task| self.query.matches(task))
                    .filter(|task| !self.tasks.iter().any(|existing| existing.id == task.id))
                    .cloned()
                    .collect();
                for task in follow_ups {
                    self.tasks.insert(0, task);
                }
                self.telemetry.record(Event::MutationSettled {
                    id: mutation.id,
                    action,
                });
                Settlement {
                    mutation_id: mutation.id,
                    state: mutation.state,
                    error: None,
                }
            }
            Err(source) => {
                warn!(
                    mutation = mutation.id,
                    action = action.as_str(),
                    error = %source,
                    "remote write failed; rolling back"
                );
                mutation.rollback(&mut self.tasks);
                let error = MutationError::Remote {
                    action: action.clone(),
                    source,
                };
                self.telemetry.record(Event::MutationRolledBack {
                    id: mutation.id,
                    action,
                    error: error.to_string(),
                });
                if mutation.state == MutationState::RefetchRequired {
                    self.telemetry.record(Event::RefetchRequested {
                        view: self.view().as_str().to_string(),
                    });
                }
                Settlement {
                    mutation_id: mutation.id,
                    state: mutation.state,
                    error: Some(error),
                }
            }
        }
    }

    /// Merge a change pushed by the store.
    ///
    /// Unknown rows that belong to this view are prepended; known rows are
    /// replaced, or dropped once they no longer belong here.
    pub fn apply_remote(&mut self, event: RowEvent) {
        let task = match event {
            RowEvent::Inserted(task) | RowEvent::Updated(task) => task,
        };
        let belongs = self.query.matches(&task);
        match self.tasks.iter().position(|existing| existing.id == task.id) {
            Some(index) if belongs => self.tasks[index] = task,
            Some(index) => {
                self.tasks.remove(index);
                self.selection.remove(&task.id);
            }
            None if belongs => {
                self.telemetry.record(Event::RemoteInsert(task.id.clone()));
                self.tasks.insert(0, task);
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::AssigneeFilter;
    use crate::model::fixtures::{date, task};
    use crate::model::{TaskStatus, WhenType};
    use crate::mutation::BulkAction;
    use crate::permissions::Role;
    use crate::store::testing::MemoryStore;
    use anyhow::anyhow;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()
    }

    fn board() -> TaskBoard {
        let mut t1 = task("t1");
        t1.assignee_id = Some("u1".into());
        let t2 = task("t2");
        let mut t3 = task("t3");
        t3.assignee_id = Some("u1".into());
        TaskBoard::new(
            Actor::new("owner", Role::Member),
            ViewSnapshot {
                query: TaskQuery::for_view(View::Anytime),
                tasks: vec![t1, t2, t3],
                references: References::default(),
            },
        )
    }

    #[test]
    fn settle_failure_rolls_back_and_reports() {
        let mut board = board();
        let before = board.tasks().to_vec();
        let mutation = Mutation::complete(&board.context(now()), "t2").unwrap();
        let mutation = board.begin(mutation);
        assert_eq!(board.tasks()[1].status, TaskStatus::Done);

        let settlement = board.settle(mutation, Err(anyhow!("timeout")));
        assert_eq!(settlement.state, MutationState::RolledBack);
        assert_eq!(board.tasks(), before.as_slice());
        let message = settlement.error.unwrap().user_message();
        assert_eq!(message, "Couldn't complete the task. Your change was undone.");
    }

    fn repeating_board(view: View) -> TaskBoard {
        let mut chore = task("t1");
        chore.recurrence = Some("3d".parse().unwrap());
        TaskBoard::new(
            Actor::new("owner", Role::Member),
            ViewSnapshot {
                query: TaskQuery::for_view(view),
                tasks: vec![chore, task("t2")],
                references: References::default(),
            },
        )
    }

    fn complete_and_commit(board: &mut TaskBoard, id: &str) -> Settlement {
        let mutation = Mutation::complete(&board.context(now()), id).unwrap();
        let mutation = board.begin(mutation);
        let store = MemoryStore::with_tasks(board.tasks().to_vec());
        let result = mutation.commit(&store);
        board.settle(mutation, result)
    }

    #[test]
    fn settled_repeat_shows_next_occurrence_when_it_belongs() {
        let mut board = repeating_board(View::All);
        let settlement = complete_and_commit(&mut board, "t1");
        assert_eq!(settlement.state, MutationState::Settled);

        let tasks = board.tasks();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].title, "Task t1");
        assert_eq!(tasks[0].when_type, WhenType::Scheduled);
        assert_eq!(tasks[0].status, TaskStatus::Todo);
        assert_eq!(tasks[1].id, "t1");
    }

    #[test]
    fn next_occurrence_outside_the_view_is_left_out() {
        let mut board = repeating_board(View::Anytime);
        complete_and_commit(&mut board, "t1");
        let ids: Vec<&str> = board.tasks().iter().map(|task| task.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[test]
    fn mutation_ids_increase() {
        let mut board = board();
        let first = Mutation::complete(&board.context(now()), "t1").unwrap();
        let first = board.begin(first);
        let second = Mutation::complete(&board.context(now()), "t2").unwrap();
        let second = board.begin(second);
        assert_eq!((first.id, second.id), (1, 2));

        let store = MemoryStore::with_tasks(board.tasks().to_vec());
        let result = second.commit(&store);
        let settled = board.settle(second, result);
        assert_eq!(settled.state, MutationState::Settled);
        assert!(!settled.needs_refetch());
    }

    #[test]
    fn deadline_sorted_list_cannot_be_rearranged() {
        let mut board = board();
        board.set_filters(TaskFilters {
            sort: SortOption::DeadlineAsc,
            ..TaskFilters::default()
        });
        let today = date("2024-03-04");
        assert!(matches!(
            board.reorder_sequence(today),
            Err(MutationError::Validation(_))
        ));

        board.clear_filters();
        assert_eq!(board.reorder_sequence(today).unwrap(), vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn reorder_in_filtered_view_then_failure_asks_for_refetch() {
        let mut board = board();
        board.set_filters(TaskFilters {
            assignee: AssigneeFilter::Specific("u1".into()),
            ..TaskFilters::default()
        });
        let today = date("2024-03-04");
        let visible = board.visible_ids(today);
        assert_eq!(visible, vec!["t1", "t3"]);

        let mutation = Mutation::reorder(&board.context(now()), &visible, "t3", 0).unwrap();
        let mutation = board.begin(mutation);
        assert_eq!(board.visible_ids(today), vec!["t3", "t1"]);
        assert_eq!(board.tasks()[1].id, "t2");

        let settlement = board.settle(mutation, Err(anyhow!("conflict")));
        assert!(settlement.needs_refetch());
    }

    #[test]
    fn selection_tracks_list_and_feeds_bulk_actions() {
        let mut board = board();
        assert!(board.toggle_selected("t3"));
        assert!(board.toggle_selected("t1"));
        assert!(!board.toggle_selected("missing"));
        assert_eq!(board.selected_ids(), vec!["t1", "t3"]);

        let ids = board.selected_ids();
        let mutation = Mutation::bulk(&board.context(now()), &ids, BulkAction::Trash).unwrap();
        board.begin(mutation);
        assert!(board.selected_ids().is_empty());
        assert_eq!(board.tasks().len(), 1);
    }

    #[test]
    fn remote_inserts_are_prepended_when_they_belong() {
        let mut board = board();
        let fresh = task("t9");
        board.apply_remote(RowEvent::Inserted(fresh));
        assert_eq!(board.tasks()[0].id, "t9");

        let mut elsewhere = task("t10");
        elsewhere.when_type = WhenType::Someday;
        board.apply_remote(RowEvent::Inserted(elsewhere));
        assert_eq!(board.tasks().len(), 4);

        let mut done = board.tasks()[1].clone();
        done.when_type = WhenType::Logbook;
        board.apply_remote(RowEvent::Updated(done));
        assert_eq!(board.tasks().len(), 3);
    }

    #[test]
    fn trash_view_counts_trashed_tasks() {
        let mut trashed = task("t1");
        trashed.deleted_at = Some(now());
        trashed.tag_ids = vec!["x".into()];
        let board = TaskBoard::new(
            Actor::new("owner", Role::Member),
            ViewSnapshot {
                query: TaskQuery::for_view(View::Trash),
                tasks: vec![trashed],
                references: References::default(),
            },
        );
        let options = board.filter_options(date("2024-03-04"));
        assert_eq!(options.tags.len(), 1);
    }
}
