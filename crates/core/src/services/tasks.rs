use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};
use ulid::Ulid;

use crate::board::{Settlement, TaskBoard, ViewSnapshot};
use crate::capture::CaptureInput;
use crate::config::AppConfig;
use crate::database::Database;
use crate::model::{AddOutcome, DeleteResult, References, Task, TaskQuery, TimeEntry, View};
use crate::mutation::{Mutation, MutationError};
use crate::parser;
use crate::permissions::{Actor, Role};
use crate::realtime::{ChangeFeed, RowFilter, Subscription};
use crate::store::TaskStore;
use crate::trash;

#[derive(Debug, Clone)]
pub struct TasksService {
    config: AppConfig,
    feed: ChangeFeed,
}

impl TasksService {
    pub fn new(config: AppConfig) -> Result<Self> {
        Database::initialize(&config)?;
        Ok(Self {
            config,
            feed: ChangeFeed::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The acting user with the role stored for them; unknown users are members.
    pub fn actor(&self, user_id: &str) -> Result<Actor> {
        let role = self
            .references()?
            .user(user_id)
            .map(|user| user.role)
            .unwrap_or_default();
        Ok(Actor::new(user_id, role))
    }

    pub fn references(&self) -> Result<References> {
        self.open_database()?.references()
    }

    /// The store-side selection for a view as seen by `actor`.
    pub fn query_for(&self, actor: &Actor, view: View) -> TaskQuery {
        let query = TaskQuery::for_view(view);
        if actor.is_admin() {
            query
        } else {
            query.visible_to(actor.user_id.clone())
        }
    }

    pub fn list(&self, query: &TaskQuery) -> Result<ViewSnapshot> {
        let db = self.open_database()?;
        Ok(ViewSnapshot {
            query: query.clone(),
            tasks: db.select_tasks(query)?,
            references: db.references()?,
        })
    }

    pub fn load_board(&self, actor: Actor, view: View) -> Result<TaskBoard> {
        let snapshot = self.list(&self.query_for(&actor, view))?;
        Ok(TaskBoard::new(actor, snapshot))
    }

    pub fn refresh(&self, board: &mut TaskBoard) -> Result<()> {
        let snapshot = self.list(board.query())?;
        board.load(snapshot);
        Ok(())
    }

    pub fn fetch_task(&self, id: &str) -> Result<Option<Task>> {
        self.open_database()?.fetch_task(id)
    }

    /// Create a task from quick-add input, filed according to `view`.
    pub fn capture(
        &self,
        input: CaptureInput,
        actor: &Actor,
        view: View,
        today: NaiveDate,
    ) -> Result<AddOutcome> {
        if actor.role == Role::Viewer {
            bail!("{} is not allowed to create tasks", actor.user_id);
        }
        let db = self.open_database()?;
        let parsed = parser::parse_capture(&input, today)?;
        let prepared = parser::prepare_new_task(parsed, &db.references()?, view.default_when())?;

        for tag in &prepared.new_tags {
            db.insert_tag(tag)?;
        }

        let sort_order = db
            .select_tasks(&TaskQuery::for_view(View::All))?
            .iter()
            .map(|task| task.sort_order)
            .max()
            .map_or(0, |max| max + 1);
        let task = prepared
            .task
            .into_task(&actor.user_id, sort_order, Utc::now());
        db.insert_task(&task)?;

        info!(task = %task.id, when = task.when_type.as_str(), "captured task");
        Ok(AddOutcome {
            id: task.id,
            title: task.title,
            when_type: task.when_type,
            created_tags: prepared.new_tags.into_iter().map(|tag| tag.name).collect(),
        })
    }

    /// Apply, commit and settle a mutation against a loaded board.
    pub fn execute(&self, board: &mut TaskBoard, mutation: Mutation) -> Result<Settlement> {
        let mutation = board.begin(mutation);
        let result = self
            .open_database()
            .and_then(|db| mutation.commit(&db));
        let settlement = board.settle(mutation, result);
        if settlement.needs_refetch() {
            self.refresh(board)?;
        }
        Ok(settlement)
    }

    /// Load `view`, build a mutation against it and execute it.
    pub fn perform<F>(&self, actor: Actor, view: View, build: F) -> Result<Settlement>
    where
        F: FnOnce(&TaskBoard, DateTime<Utc>) -> Result<Mutation, MutationError>,
    {
        let mut board = self.load_board(actor, view)?;
        let mutation = build(&board, Utc::now())?;
        self.execute(&mut board, mutation)
    }

    /// Permanently delete trashed tasks past retention that `actor` may see.
    pub fn empty_trash(&self, actor: &Actor, now: DateTime<Utc>) -> Result<Vec<DeleteResult>> {
        if actor.role == Role::Viewer {
            bail!("{} is not allowed to empty the trash", actor.user_id);
        }
        let db = self.open_database()?;
        let trashed = db.select_tasks(&self.query_for(actor, View::Trash))?;
        let expired = trash::expired_ids(&trashed, actor, now);
        if expired.is_empty() {
            return Ok(Vec::new());
        }
        let results = db.hard_delete(&expired)?;
        info!(
            user = actor.user_id.as_str(),
            purged = results.iter().filter(|r| r.deleted).count(),
            "emptied trash"
        );
        Ok(results)
    }

    /// Change events for rows visible to `actor`.
    pub fn subscribe(&self, actor: &Actor) -> Subscription {
        let filter = if actor.is_admin() {
            RowFilter::All
        } else {
            RowFilter::VisibleTo(actor.user_id.clone())
        };
        self.feed.subscribe(filter)
    }

    pub fn start_timer(
        &self,
        actor: &Actor,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TimeEntry> {
        let db = self.open_database()?;
        let task = db
            .fetch_task(task_id)?
            .with_context(|| format!("Task {task_id} was not found"))?;
        actor.ensure_can_edit(&task, "track time on")?;
        if task
            .time_entries
            .iter()
            .any(|entry| entry.user_id == actor.user_id && entry.is_running())
        {
            bail!("A timer is already running on task {task_id}");
        }

        let entry = TimeEntry {
            id: Ulid::new().to_string(),
            task_id: task_id.to_string(),
            user_id: actor.user_id.clone(),
            started_at: now,
            ended_at: None,
        };
        db.insert_time_entry(&entry)?;
        Ok(entry)
    }

    pub fn stop_timer(
        &self,
        actor: &Actor,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TimeEntry>> {
        let db = self.open_database()?;
        let stopped = db.stop_time_entry(task_id, &actor.user_id, now)?;
        if stopped.is_none() {
            warn!(task = task_id, user = actor.user_id.as_str(), "no running timer to stop");
        }
        Ok(stopped)
    }

    fn open_database(&self) -> Result<Database> {
        Ok(Database::initialize(&self.config)?.with_feed(self.feed.clone()))
    }
}
