use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{named_params, types::Value, Connection, Row, ToSql};

use crate::config::AppConfig;
use crate::model::{
    Area, DeleteResult, Project, QueryOrder, References, Tag, Task, TaskPatch, TaskQuery,
    TimeEntry, User,
};
use crate::mutation::RemoteWrite;
use crate::realtime::{ChangeFeed, RowEvent};
use crate::store::TaskStore;

const TASK_COLUMNS: &str = "id, title, notes, status, priority, when_type, when_date, due_date, \
    deadline, owner_id, assignee_id, project_id, area_id, tag_ids, sort_order, recurrence, \
    created_at, updated_at, completed_at, deleted_at";

const DATE_FORMAT: &str = "%Y-%m-%d";
const SCHEMA_VERSION: &str = "1";

pub struct Database {
    conn: Connection,
    feed: Option<ChangeFeed>,
}

impl Database {
    pub fn initialize(config: &AppConfig) -> Result<Self> {
        let conn = Connection::open(config.db_path()).with_context(|| {
            format!("Failed to open database at {}", config.db_path().display())
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .context("Failed to configure SQLite WAL mode")?;

        let db = Self { conn, feed: None };
        db.apply_migrations()?;
        Ok(db)
    }

    /// Publish inserts and updates made through this connection.
    pub fn with_feed(mut self, feed: ChangeFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    fn publish(&self, event: RowEvent) {
        if let Some(feed) = &self.feed {
            feed.publish(event);
        }
    }

    fn write_task(&self, task: &Task, insert: bool) -> Result<()> {
        let tag_ids = serde_json::to_string(&task.tag_ids)?;
        let recurrence = task.recurrence.as_ref().map(|rule| rule.to_string());
        let sql = if insert {
            "INSERT INTO tasks (
                id, title, notes, status, priority, when_type, when_date, due_date, deadline,
                owner_id, assignee_id, project_id, area_id, tag_ids, sort_order, recurrence,
                created_at, updated_at, completed_at, deleted_at
            ) VALUES (
                :id, :title, :notes, :status, :priority, :when_type, :when_date, :due_date, :deadline,
                :owner_id, :assignee_id, :project_id, :area_id, :tag_ids, :sort_order, :recurrence,
                :created_at, :updated_at, :completed_at, :deleted_at
            )"
        } else {
            "UPDATE tasks SET
                title = :title,
                notes = :notes,
                status = :status,
                priority = :priority,
                when_type = :when_type,
                when_date = :when_date,
                due_date = :due_date,
                deadline = :deadline,
                owner_id = :owner_id,
                assignee_id = :assignee_id,
                project_id = :project_id,
                area_id = :area_id,
                tag_ids = :tag_ids,
                sort_order = :sort_order,
                recurrence = :recurrence,
                created_at = :created_at,
                updated_at = :updated_at,
                completed_at = :completed_at,
                deleted_at = :deleted_at
             WHERE id = :id"
        };

        self.conn.execute(
            sql,
            named_params![
                ":id": &task.id,
                ":title": &task.title,
                ":notes": task.notes.as_deref(),
                ":status": task.status.as_str(),
                ":priority": task.priority.as_str(),
                ":when_type": task.when_type.as_str(),
                ":when_date": format_date(task.when_date),
                ":due_date": format_date(task.due_date),
                ":deadline": format_date(task.deadline),
                ":owner_id": &task.owner_id,
                ":assignee_id": task.assignee_id.as_deref(),
                ":project_id": task.project_id.as_deref(),
                ":area_id": task.area_id.as_deref(),
                ":tag_ids": tag_ids,
                ":sort_order": task.sort_order,
                ":recurrence": recurrence,
                ":created_at": task.created_at.to_rfc3339(),
                ":updated_at": task.updated_at.to_rfc3339(),
                ":completed_at": task.completed_at.map(|dt| dt.to_rfc3339()),
                ":deleted_at": task.deleted_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn patch_task(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>> {
        let mut task = match self.fetch_task(id)? {
            Some(task) => task,
            None => return Ok(None),
        };
        patch.apply_to(&mut task);
        task.updated_at = Utc::now();
        self.write_task(&task, false)
            .with_context(|| format!("Failed to update task {id}"))?;
        Ok(Some(task))
    }

    /// Callers own the surrounding transaction.
    fn write_sort_orders(&self, orders: &[(String, i64)]) -> Result<usize> {
        let updated_at = Utc::now().to_rfc3339();
        let mut touched = 0;
        for (id, order) in orders {
            touched += self.conn.execute(
                "UPDATE tasks SET sort_order = :order, updated_at = :updated WHERE id = :id",
                named_params![":order": order, ":updated": updated_at, ":id": id],
            )?;
        }
        Ok(touched)
    }

    fn publish_orders(&self, orders: &[(String, i64)]) -> Result<()> {
        if self.feed.is_some() {
            for (id, _) in orders {
                if let Some(task) = self.fetch_task(id)? {
                    self.publish(RowEvent::Updated(task));
                }
            }
        }
        Ok(())
    }

    fn load_time_entries(&self, tasks: &mut [Task]) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; tasks.len()].join(",");
        let sql = format!(
            "SELECT id, task_id, user_id, started_at, ended_at FROM time_entries \
             WHERE task_id IN ({placeholders}) ORDER BY started_at ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = tasks.iter().map(|t| &t.id as &dyn ToSql).collect();
        let mut rows = stmt.query(&param_refs[..])?;

        let mut grouped: HashMap<String, Vec<TimeEntry>> = HashMap::new();
        while let Some(row) = rows.next()? {
            let entry = map_time_entry(row)?;
            grouped.entry(entry.task_id.clone()).or_default().push(entry);
        }
        for task in tasks.iter_mut() {
            task.time_entries = grouped.remove(&task.id).unwrap_or_default();
        }
        Ok(())
    }

    fn map_task(&self, row: &Row<'_>) -> Result<Task> {
        let recurrence: Option<String> = row.get(15)?;
        let recurrence = match recurrence {
            Some(raw) if !raw.is_empty() => Some(raw.parse()?),
            _ => None,
        };

        Ok(Task {
            id: row.get(0)?,
            title: row.get(1)?,
            notes: row.get(2)?,
            status: row.get::<_, String>(3)?.parse()?,
            priority: row.get::<_, String>(4)?.parse()?,
            when_type: row.get::<_, String>(5)?.parse()?,
            when_date: parse_date(row.get::<_, Option<String>>(6)?),
            due_date: parse_date(row.get::<_, Option<String>>(7)?),
            deadline: parse_date(row.get::<_, Option<String>>(8)?),
            owner_id: row.get(9)?,
            assignee_id: row.get(10)?,
            project_id: row.get(11)?,
            area_id: row.get(12)?,
            tag_ids: parse_string_list(row.get::<_, Option<String>>(13)?),
            time_entries: Vec::new(),
            sort_order: row.get(14)?,
            recurrence,
            created_at: parse_datetime_required(row.get::<_, String>(16)?)?,
            updated_at: parse_datetime_required(row.get::<_, String>(17)?)?,
            completed_at: parse_datetime(row.get::<_, Option<String>>(18)?),
            deleted_at: parse_datetime(row.get::<_, Option<String>>(19)?),
        })
    }

    fn apply_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT);
             CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'member'
             );
             CREATE TABLE IF NOT EXISTS areas (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                area_id TEXT
             );
             CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL COLLATE NOCASE UNIQUE
             );
             CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                notes TEXT,
                status TEXT NOT NULL DEFAULT 'todo',
                priority TEXT NOT NULL DEFAULT 'none',
                when_type TEXT NOT NULL DEFAULT 'inbox',
                when_date TEXT,
                due_date TEXT,
                deadline TEXT,
                owner_id TEXT NOT NULL,
                assignee_id TEXT,
                project_id TEXT,
                area_id TEXT,
                tag_ids TEXT DEFAULT '[]',
                sort_order INTEGER NOT NULL DEFAULT 0,
                recurrence TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                deleted_at TEXT
             );
             CREATE TABLE IF NOT EXISTS time_entries (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_tasks_when ON tasks(when_type);
             CREATE INDEX IF NOT EXISTS idx_tasks_owner ON tasks(owner_id);
             CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee_id);
             CREATE INDEX IF NOT EXISTS idx_tasks_deleted ON tasks(deleted_at);
             CREATE INDEX IF NOT EXISTS idx_time_entries_task ON time_entries(task_id);
            ",
        )?;
        self.conn
            .execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [SCHEMA_VERSION],
            )
            .context("Failed to record schema version")?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM meta WHERE key = 'schema_version'")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

impl TaskStore for Database {
    fn select_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1");
        let mut values: Vec<Value> = Vec::new();

        if query.view.is_trash() {
            sql.push_str(" AND deleted_at IS NOT NULL");
        } else {
            sql.push_str(" AND deleted_at IS NULL");
        }

        if let Some(when) = query.view.when_type() {
            sql.push_str(" AND when_type = ?");
            values.push(Value::from(when.as_str().to_string()));
        }

        if let Some(user) = &query.visible_to {
            sql.push_str(" AND (owner_id = ? OR assignee_id = ?)");
            values.push(Value::from(user.clone()));
            values.push(Value::from(user.clone()));
        }

        if let Some(project) = &query.project_id {
            sql.push_str(" AND project_id = ?");
            values.push(Value::from(project.clone()));
        }

        if let Some(area) = &query.area_id {
            sql.push_str(" AND area_id = ?");
            values.push(Value::from(area.clone()));
        }

        sql.push_str(build_order_clause(query.order));

        match query.limit {
            Some(limit) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                values.push(Value::from(limit as i64));
                values.push(Value::from(query.offset as i64));
            }
            None if query.offset > 0 => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                values.push(Value::from(query.offset as i64));
            }
            None => {}
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        let mut rows = stmt.query(&param_refs[..])?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(self.map_task(row)?);
        }
        self.load_time_entries(&mut tasks)?;
        Ok(tasks)
    }

    fn fetch_task(&self, id: &str) -> Result<Option<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? LIMIT 1"))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => {
                let mut tasks = vec![self.map_task(row)?];
                self.load_time_entries(&mut tasks)?;
                Ok(tasks.pop())
            }
            None => Ok(None),
        }
    }

    fn insert_task(&self, task: &Task) -> Result<()> {
        self.write_task(task, true)
            .with_context(|| format!("Failed to insert task {}", task.id))?;
        self.publish(RowEvent::Inserted(task.clone()));
        Ok(())
    }

    fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Option<Task>> {
        let task = self.patch_task(id, patch)?;
        if let Some(task) = &task {
            self.publish(RowEvent::Updated(task.clone()));
        }
        Ok(task)
    }

    fn update_sort_orders(&self, orders: &[(String, i64)]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let touched = self.write_sort_orders(orders)?;
        tx.commit().context("Failed to save task order")?;
        self.publish_orders(orders)?;
        Ok(touched)
    }

    fn apply_batch(&self, writes: &[RemoteWrite]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let mut events = Vec::new();
        let mut orders = Vec::new();
        for write in writes {
            match write {
                RemoteWrite::Update { id, patch } => {
                    let task = self
                        .patch_task(id, &patch.0)?
                        .ok_or_else(|| anyhow!("Task {id} no longer exists"))?;
                    events.push(RowEvent::Updated(task));
                }
                RemoteWrite::SortOrders(batch) => {
                    self.write_sort_orders(batch)?;
                    orders.extend(batch.iter().cloned());
                }
                RemoteWrite::Insert(task) => {
                    self.write_task(task, true)
                        .with_context(|| format!("Failed to insert task {}", task.id))?;
                    events.push(RowEvent::Inserted(task.clone()));
                }
            }
        }
        // Dropping `tx` on an early return rolls every write back.
        tx.commit().context("Failed to save changes")?;

        for event in events {
            self.publish(event);
        }
        self.publish_orders(&orders)
    }

    fn hard_delete(&self, ids: &[String]) -> Result<Vec<DeleteResult>> {
        let mut results = Vec::new();
        for id in ids {
            self.conn.execute(
                "DELETE FROM time_entries WHERE task_id = :id",
                named_params![":id": id],
            )?;
            let affected = self
                .conn
                .execute("DELETE FROM tasks WHERE id = :id", named_params![":id": id])?;
            results.push(DeleteResult {
                id: id.to_string(),
                deleted: affected > 0,
            });
        }
        Ok(results)
    }

    fn references(&self) -> Result<References> {
        let mut users = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, role FROM users ORDER BY name COLLATE NOCASE")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            users.push(User {
                id: row.get(0)?,
                name: row.get(1)?,
                role: row.get::<_, String>(2)?.parse()?,
            });
        }

        let mut areas = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM areas ORDER BY name COLLATE NOCASE")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            areas.push(Area {
                id: row.get(0)?,
                name: row.get(1)?,
            });
        }

        let mut projects = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, area_id FROM projects ORDER BY name COLLATE NOCASE")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            projects.push(Project {
                id: row.get(0)?,
                name: row.get(1)?,
                area_id: row.get(2)?,
            });
        }

        let mut tags = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM tags ORDER BY name COLLATE NOCASE")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            tags.push(Tag {
                id: row.get(0)?,
                name: row.get(1)?,
            });
        }

        Ok(References {
            users,
            areas,
            projects,
            tags,
        })
    }

    fn insert_user(&self, user: &User) -> Result<()> {
        self.conn.execute(
            "INSERT INTO users (id, name, role) VALUES (:id, :name, :role)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, role = excluded.role",
            named_params![":id": &user.id, ":name": &user.name, ":role": user.role.as_str()],
        )?;
        Ok(())
    }

    fn insert_area(&self, area: &Area) -> Result<()> {
        self.conn.execute(
            "INSERT INTO areas (id, name) VALUES (:id, :name)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            named_params![":id": &area.id, ":name": &area.name],
        )?;
        Ok(())
    }

    fn insert_project(&self, project: &Project) -> Result<()> {
        self.conn.execute(
            "INSERT INTO projects (id, name, area_id) VALUES (:id, :name, :area_id)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, area_id = excluded.area_id",
            named_params![
                ":id": &project.id,
                ":name": &project.name,
                ":area_id": project.area_id.as_deref(),
            ],
        )?;
        Ok(())
    }

    fn insert_tag(&self, tag: &Tag) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO tags (id, name) VALUES (:id, :name)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                named_params![":id": &tag.id, ":name": &tag.name],
            )
            .with_context(|| format!("Failed to create tag '{}'", tag.name))?;
        Ok(())
    }

    fn insert_time_entry(&self, entry: &TimeEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO time_entries (id, task_id, user_id, started_at, ended_at)
             VALUES (:id, :task_id, :user_id, :started_at, :ended_at)",
            named_params![
                ":id": &entry.id,
                ":task_id": &entry.task_id,
                ":user_id": &entry.user_id,
                ":started_at": entry.started_at.to_rfc3339(),
                ":ended_at": entry.ended_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn stop_time_entry(
        &self,
        task_id: &str,
        user_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<TimeEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, user_id, started_at, ended_at FROM time_entries
             WHERE task_id = ? AND user_id = ? AND ended_at IS NULL
             ORDER BY started_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([task_id, user_id])?;
        let mut entry = match rows.next()? {
            Some(row) => map_time_entry(row)?,
            None => return Ok(None),
        };
        entry.ended_at = Some(ended_at);
        self.conn.execute(
            "UPDATE time_entries SET ended_at = :ended WHERE id = :id",
            named_params![":ended": ended_at.to_rfc3339(), ":id": &entry.id],
        )?;
        Ok(Some(entry))
    }
}

fn map_time_entry(row: &Row<'_>) -> Result<TimeEntry> {
    Ok(TimeEntry {
        id: row.get(0)?,
        task_id: row.get(1)?,
        user_id: row.get(2)?,
        started_at: parse_datetime_required(row.get::<_, String>(3)?)?,
        ended_at: parse_datetime(row.get::<_, Option<String>>(4)?),
    })
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).ok())
}

fn parse_string_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok())
        .unwrap_or_default()
}

fn parse_datetime(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_datetime_required(raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow!("Failed to parse timestamp '{}': {}", raw, e))
}

fn build_order_clause(order: QueryOrder) -> &'static str {
    match order {
        QueryOrder::SortOrder => " ORDER BY sort_order ASC, created_at ASC",
        QueryOrder::WhenDate => {
            " ORDER BY when_date IS NULL, when_date ASC, sort_order ASC, created_at ASC"
        }
        QueryOrder::CompletedDesc => " ORDER BY completed_at DESC, updated_at DESC",
        QueryOrder::DeletedDesc => " ORDER BY deleted_at DESC",
    }
}
