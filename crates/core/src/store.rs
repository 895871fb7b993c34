use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::model::{
    Area, DeleteResult, Project, References, Tag, Task, TaskPatch, TaskQuery, TimeEntry, User,
};
use crate::mutation::RemoteWrite;

/// Remote task storage as seen by the mutation and service layers.
///
/// Writes are last-write-wins: there is no version check on update.
pub trait TaskStore {
    fn select_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>>;

    fn fetch_task(&self, id: &str) -> Result<Option<Task>>;

    fn insert_task(&self, task: &Task) -> Result<()>;

    /// Apply a partial update; `Ok(None)` when the task does not exist.
    fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>>;

    /// Write a batch of sort orders atomically. Returns the rows touched.
    fn update_sort_orders(&self, orders: &[(String, i64)]) -> Result<usize>;

    /// Perform a mutation's writes in order.
    ///
    /// The default stops at the first failure and keeps earlier writes.
    /// Stores with transactions override it so the batch is all-or-nothing.
    fn apply_batch(&self, writes: &[RemoteWrite]) -> Result<()> {
        for write in writes {
            match write {
                RemoteWrite::Update { id, patch } => {
                    self.update_task(id, &patch.0)?
                        .ok_or_else(|| anyhow!("Task {id} no longer exists"))?;
                }
                RemoteWrite::SortOrders(orders) => {
                    self.update_sort_orders(orders)?;
                }
                RemoteWrite::Insert(task) => self.insert_task(task)?,
            }
        }
        Ok(())
    }

    fn hard_delete(&self, ids: &[String]) -> Result<Vec<DeleteResult>>;

    fn references(&self) -> Result<References>;

    fn insert_user(&self, user: &User) -> Result<()>;

    fn insert_area(&self, area: &Area) -> Result<()>;

    fn insert_project(&self, project: &Project) -> Result<()>;

    fn insert_tag(&self, tag: &Tag) -> Result<()>;

    fn insert_time_entry(&self, entry: &TimeEntry) -> Result<()>;

    /// Close the user's running entry on a task, if any.
    fn stop_time_entry(
        &self,
        task_id: &str,
        user_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<TimeEntry>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};

    use anyhow::{anyhow, Result};
    use chrono::{DateTime, Utc};

    use super::TaskStore;
    use crate::model::{
        Area, DeleteResult, Project, References, Tag, Task, TaskPatch, TaskQuery, TimeEntry, User,
    };

    /// In-memory store whose writes can be made to fail on demand.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub tasks: RefCell<Vec<Task>>,
        pub references: RefCell<References>,
        pub fail_writes: Cell<bool>,
    }

    impl MemoryStore {
        pub(crate) fn with_tasks(tasks: Vec<Task>) -> Self {
            Self {
                tasks: RefCell::new(tasks),
                ..Self::default()
            }
        }

        pub(crate) fn failing(tasks: Vec<Task>) -> Self {
            let store = Self::with_tasks(tasks);
            store.fail_writes.set(true);
            store
        }

        fn check(&self) -> Result<()> {
            if self.fail_writes.get() {
                Err(anyhow!("connection reset by peer"))
            } else {
                Ok(())
            }
        }

        pub(crate) fn get(&self, id: &str) -> Option<Task> {
            self.tasks.borrow().iter().find(|t| t.id == id).cloned()
        }
    }

    impl TaskStore for MemoryStore {
        fn select_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
            let mut tasks: Vec<Task> = self
                .tasks
                .borrow()
                .iter()
                .filter(|task| query.matches(task))
                .cloned()
                .collect();
            tasks.sort_by_key(|task| task.sort_order);
            Ok(tasks)
        }

        fn fetch_task(&self, id: &str) -> Result<Option<Task>> {
            Ok(self.get(id))
        }

        fn insert_task(&self, task: &Task) -> Result<()> {
            self.check()?;
            self.tasks.borrow_mut().push(task.clone());
            Ok(())
        }

        fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>> {
            self.check()?;
            let mut tasks = self.tasks.borrow_mut();
            Ok(tasks.iter_mut().find(|t| t.id == id).map(|task| {
                patch.apply_to(task);
                task.clone()
            }))
        }

        fn update_sort_orders(&self, orders: &[(String, i64)]) -> Result<usize> {
            self.check()?;
            let mut touched = 0;
            for task in self.tasks.borrow_mut().iter_mut() {
                if let Some((_, order)) = orders.iter().find(|(id, _)| *id == task.id) {
                    task.sort_order = *order;
                    touched += 1;
                }
            }
            Ok(touched)
        }

        fn hard_delete(&self, ids: &[String]) -> Result<Vec<DeleteResult>> {
            self.check()?;
            let mut tasks = self.tasks.borrow_mut();
            Ok(ids
                .iter()
                .map(|id| {
                    let before = tasks.len();
                    tasks.retain(|task| &task.id != id);
                    DeleteResult {
                        id: id.clone(),
                        deleted: tasks.len() < before,
                    }
                })
                .collect())
        }

        fn references(&self) -> Result<References> {
            Ok(self.references.borrow().clone())
        }

        fn insert_user(&self, user: &User) -> Result<()> {
            self.references.borrow_mut().users.push(user.clone());
            Ok(())
        }

        fn insert_area(&self, area: &Area) -> Result<()> {
            self.references.borrow_mut().areas.push(area.clone());
            Ok(())
        }

        fn insert_project(&self, project: &Project) -> Result<()> {
            self.references.borrow_mut().projects.push(project.clone());
            Ok(())
        }

        fn insert_tag(&self, tag: &Tag) -> Result<()> {
            self.references.borrow_mut().tags.push(tag.clone());
            Ok(())
        }

        fn insert_time_entry(&self, entry: &TimeEntry) -> Result<()> {
            self.check()?;
            if let Some(task) = self
                .tasks
                .borrow_mut()
                .iter_mut()
                .find(|t| t.id == entry.task_id)
            {
                task.time_entries.push(entry.clone());
            }
            Ok(())
        }

        fn stop_time_entry(
            &self,
            task_id: &str,
            user_id: &str,
            ended_at: DateTime<Utc>,
        ) -> Result<Option<TimeEntry>> {
            self.check()?;
            let mut tasks = self.tasks.borrow_mut();
            let entry = tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .and_then(|task| {
                    task.time_entries
                        .iter_mut()
                        .find(|e| e.user_id == user_id && e.is_running())
                })
                .map(|entry| {
                    entry.ended_at = Some(ended_at);
                    entry.clone()
                });
            Ok(entry)
        }
    }
}
