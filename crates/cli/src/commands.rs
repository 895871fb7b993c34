use std::fmt;
use std::io::Write;

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use serde_json::json;

use crate::cli::{
    AddArgs, BulkArgs, CliCommand, ListArgs, MoveArgs, ReorderArgs, ScheduleArgs, TaskIdArgs,
    TaskIdsArgs, TimerCommand,
};
use crate::config::AppConfig;
use crate::core::facets::FilterOptions;
use crate::core::filters::{local_today, Facet};
use crate::core::mutation::{BulkAction, Mutation, MutationError};
use crate::core::{Settlement, TaskBoard, TasksService};
use crate::model::{DeleteResult, References, Task, View, WhenType};
use crate::parser;

pub fn execute<W: Write>(
    config: &AppConfig,
    user: &str,
    command: CliCommand,
    mut writer: W,
) -> Result<()> {
    let service = TasksService::new(config.clone())?;
    let session = Session {
        service: &service,
        user,
        today: local_today(),
    };
    match command {
        CliCommand::List(args) => session.list(&args, &mut writer),
        CliCommand::Options(args) => session.options(&args, &mut writer),
        CliCommand::Add(args) => session.add(args, &mut writer),
        CliCommand::Complete(TaskIdArgs { id }) => {
            let settlement = session.perform(View::All, |board, now| {
                Mutation::complete(&board.context(now), &id)
            })?;
            report(settlement, SummaryLine::changed("Completed", 1), &mut writer)
        }
        CliCommand::Reopen(TaskIdArgs { id }) => {
            let settlement = session.perform(View::All, |board, now| {
                Mutation::reopen(&board.context(now), &id)
            })?;
            report(settlement, SummaryLine::changed("Reopened", 1), &mut writer)
        }
        CliCommand::Move(args) => session.move_status(&args, &mut writer),
        CliCommand::Schedule(args) => session.schedule(&args, &mut writer),
        CliCommand::Bulk(args) => session.bulk(args, &mut writer),
        CliCommand::Reorder(args) => session.reorder(&args, &mut writer),
        CliCommand::Trash(TaskIdsArgs { ids }) => {
            let count = ids.len();
            let settlement = session.perform(View::All, |board, now| {
                Mutation::trash(&board.context(now), &ids)
            })?;
            report(settlement, SummaryLine::changed("Trashed", count), &mut writer)
        }
        CliCommand::Restore(TaskIdsArgs { ids }) => {
            let count = ids.len();
            let settlement = session.perform(View::Trash, |board, now| {
                Mutation::restore(&board.context(now), &ids)
            })?;
            report(settlement, SummaryLine::changed("Restored", count), &mut writer)
        }
        CliCommand::EmptyTrash => session.empty_trash(&mut writer),
        CliCommand::Timer(timer) => session.timer(timer, &mut writer),
        CliCommand::Mcp => Err(anyhow!("launch the tool server directly")),
    }
}

struct Session<'a> {
    service: &'a TasksService,
    user: &'a str,
    today: NaiveDate,
}

impl Session<'_> {
    fn board(&self, view: View) -> Result<TaskBoard> {
        let actor = self.service.actor(self.user)?;
        self.service.load_board(actor, view)
    }

    fn filtered_board(&self, args: &crate::cli::FilterArgs) -> Result<TaskBoard> {
        let mut board = self.board(args.view)?;
        let filters = args.to_filters(board.references())?;
        board.set_filters(filters);
        Ok(board)
    }

    fn perform<F>(&self, view: View, build: F) -> Result<Settlement>
    where
        F: FnOnce(&TaskBoard, chrono::DateTime<Utc>) -> Result<Mutation, MutationError>,
    {
        let actor = self.service.actor(self.user)?;
        self.service.perform(actor, view, build)
    }

    fn list<W: Write>(&self, args: &ListArgs, mut writer: W) -> Result<()> {
        let board = self.filtered_board(&args.filters)?;
        let tasks = board.visible(self.today);

        if args.json {
            let payload = json!({
                "view": board.view(),
                "filters": board.filters(),
                "tasks": tasks,
            });
            serde_json::to_writer_pretty(&mut writer, &payload)?;
            writeln!(writer)?;
            return Ok(());
        }

        for task in &tasks {
            writeln!(writer, "{}", TaskLine::new(task, board.references()))?;
        }
        let filters = board
            .filters()
            .summary()
            .map(|summary| format!(" [{summary}]"))
            .unwrap_or_default();
        writeln!(
            writer,
            "{} of {} task{} in {}{}",
            tasks.len(),
            board.tasks().len(),
            plural(board.tasks().len()),
            board.view(),
            filters
        )?;
        Ok(())
    }

    fn options<W: Write>(&self, args: &ListArgs, mut writer: W) -> Result<()> {
        let board = self.filtered_board(&args.filters)?;
        let options = board.filter_options(self.today);

        if args.json {
            serde_json::to_writer_pretty(&mut writer, &options)?;
            writeln!(writer)?;
            return Ok(());
        }
        write_options(&options, &mut writer)
    }

    fn add<W: Write>(&self, args: AddArgs, mut writer: W) -> Result<()> {
        let actor = self.service.actor(self.user)?;
        let view = args.view;
        let outcome = self
            .service
            .capture(args.into(), &actor, view, self.today)?;
        writeln!(
            writer,
            "Added {}: {} ({})",
            outcome.id, outcome.title, outcome.when_type
        )?;
        if !outcome.created_tags.is_empty() {
            writeln!(writer, "New tags: {}", outcome.created_tags.join(", "))?;
        }
        Ok(())
    }

    fn move_status<W: Write>(&self, args: &MoveArgs, writer: W) -> Result<()> {
        let settlement = self.perform(View::All, |board, now| {
            Mutation::move_to_status(&board.context(now), &args.id, args.status)
        })?;
        let verb = format!("Moved to {}", args.status.label());
        report(settlement, SummaryLine::changed(verb, 1), writer)
    }

    fn schedule<W: Write>(&self, args: &ScheduleArgs, writer: W) -> Result<()> {
        let date = self.parse_date(args.date.as_deref())?;
        let settlement = self.perform(View::All, |board, now| {
            Mutation::schedule(&board.context(now), &args.id, args.when, date)
        })?;
        report(settlement, SummaryLine::changed("Scheduled", 1), writer)
    }

    fn bulk<W: Write>(&self, args: BulkArgs, writer: W) -> Result<()> {
        let date = self.parse_date(args.date.as_deref())?;
        let count = args.ids.len();
        let ids = args.ids.clone();
        let settlement = self.perform(View::All, |board, now| {
            let action = bulk_action(&args, date, board.references())?;
            Mutation::bulk(&board.context(now), &ids, action)
        })?;
        report(settlement, SummaryLine::changed("Updated", count), writer)
    }

    fn reorder<W: Write>(&self, args: &ReorderArgs, writer: W) -> Result<()> {
        let mut board = self.filtered_board(&args.filters)?;
        let visible = board.reorder_sequence(self.today)?;
        let mutation = Mutation::reorder(
            &board.context(Utc::now()),
            &visible,
            &args.id,
            args.to_index,
        )?;
        let settlement = self.service.execute(&mut board, mutation)?;
        report(settlement, SummaryLine::changed("Reordered", 1), writer)
    }

    fn empty_trash<W: Write>(&self, mut writer: W) -> Result<()> {
        let actor = self.service.actor(self.user)?;
        let results = self.service.empty_trash(&actor, Utc::now())?;
        PurgeSummary::from_results(&results).write_to(&mut writer)
    }

    fn timer<W: Write>(&self, command: TimerCommand, mut writer: W) -> Result<()> {
        let actor = self.service.actor(self.user)?;
        let now = Utc::now();
        match command {
            TimerCommand::Start(TaskIdArgs { id }) => {
                self.service.start_timer(&actor, &id, now)?;
                writeln!(writer, "Started timer on {id}")?;
            }
            TimerCommand::Stop(TaskIdArgs { id }) => {
                match self.service.stop_timer(&actor, &id, now)? {
                    Some(entry) => writeln!(
                        writer,
                        "Stopped timer on {id} after {} minute{}",
                        entry.minutes(now),
                        plural(entry.minutes(now) as usize)
                    )?,
                    None => writeln!(writer, "No running timer on {id}")?,
                }
            }
        }
        Ok(())
    }

    fn parse_date(&self, spec: Option<&str>) -> Result<Option<NaiveDate>> {
        spec.map(|spec| parser::parse_date_spec(spec, self.today))
            .transpose()
    }
}

fn bulk_action(
    args: &BulkArgs,
    date: Option<NaiveDate>,
    references: &References,
) -> Result<BulkAction, MutationError> {
    if args.complete {
        return Ok(BulkAction::Complete);
    }
    if args.trash {
        return Ok(BulkAction::Trash);
    }
    if let Some(priority) = args.priority {
        return Ok(BulkAction::SetPriority(priority));
    }
    if let Some(when) = args.when {
        return Ok(BulkAction::SetWhen { when, date });
    }
    if args.unassign {
        return Ok(BulkAction::Assign(None));
    }
    if let Some(handle) = &args.assign {
        let user = references
            .user_by_handle(handle)
            .ok_or_else(|| MutationError::Validation(format!("Unknown user '{handle}'")))?;
        return Ok(BulkAction::Assign(Some(user.id.clone())));
    }
    if args.no_project {
        return Ok(BulkAction::MoveToProject(None));
    }
    if let Some(name) = &args.project {
        let project = references
            .project_by_name(name)
            .ok_or_else(|| MutationError::Validation(format!("Unknown project '{name}'")))?;
        return Ok(BulkAction::MoveToProject(Some(project.id.clone())));
    }
    Err(MutationError::Validation("Nothing to change".to_string()))
}

fn report<W: Write>(settlement: Settlement, summary: SummaryLine, mut writer: W) -> Result<()> {
    match settlement.error {
        None => {
            writeln!(writer, "{summary}")?;
            Ok(())
        }
        Some(err) => {
            let message = err.user_message();
            Err(anyhow::Error::new(err).context(message))
        }
    }
}

fn write_options<W: Write>(options: &FilterOptions, mut writer: W) -> Result<()> {
    for facet in Facet::ALL {
        let values = options.facet(facet);
        if values.is_empty() {
            continue;
        }
        writeln!(writer, "{}", facet.title())?;
        for option in values {
            writeln!(
                writer,
                "  [{}] {} ({})",
                if option.selected { "x" } else { " " },
                option.label,
                option.count
            )?;
        }
    }
    Ok(())
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

struct TaskLine<'a> {
    task: &'a Task,
    references: &'a References,
}

impl<'a> TaskLine<'a> {
    fn new(task: &'a Task, references: &'a References) -> Self {
        Self { task, references }
    }
}

impl fmt::Display for TaskLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let task = self.task;
        write!(f, "{}  {:<11} {}", task.id, task.status.as_str(), task.title)?;
        if task.when_type == WhenType::Scheduled {
            if let Some(date) = task.when_date {
                write!(f, "  when:{date}")?;
            }
        }
        if let Some(due) = task.due_date {
            write!(f, "  due:{due}")?;
        }
        if let Some(deadline) = task.deadline {
            write!(f, "  deadline:{deadline}")?;
        }
        if let Some(assignee) = &task.assignee_id {
            let name = self
                .references
                .user(assignee)
                .map(|user| user.name.as_str())
                .unwrap_or(assignee);
            write!(f, "  @{name}")?;
        }
        for tag in &task.tag_ids {
            if let Some(tag) = self.references.tag(tag) {
                write!(f, " #{}", tag.name)?;
            }
        }
        Ok(())
    }
}

struct PurgeSummary {
    purged: usize,
    missing: Vec<String>,
}

impl PurgeSummary {
    fn from_results(results: &[DeleteResult]) -> Self {
        let mut purged = 0usize;
        let mut missing = Vec::new();
        for result in results {
            if result.deleted {
                purged += 1;
            } else {
                missing.push(result.id.clone());
            }
        }
        Self { purged, missing }
    }

    fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "{}", SummaryLine::changed("Purged", self.purged))?;
        if !self.missing.is_empty() {
            writeln!(writer, "Already gone: {}", self.missing.join(", "))?;
        }
        Ok(())
    }
}

enum SummaryLine {
    Changed { verb: String, count: usize },
    Unchanged(String),
}

impl SummaryLine {
    fn changed(verb: impl Into<String>, count: usize) -> Self {
        let verb = verb.into();
        if count > 0 {
            SummaryLine::Changed { verb, count }
        } else {
            SummaryLine::Unchanged(verb)
        }
    }
}

impl fmt::Display for SummaryLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryLine::Changed { verb, count } => {
                write!(f, "{} {} task{}", verb, count, plural(*count))
            }
            SummaryLine::Unchanged(verb) => write!(f, "{} no tasks", verb),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureInput;
    use crate::cli::{FilterArgs, ListArgs};
    use crate::core::{Actor, Role};
    use crate::model::TaskStatus;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const USER: &str = "ada";

    fn temp_config() -> (AppConfig, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let config = AppConfig::from_data_dir(dir.path().to_path_buf()).expect("config");
        (config, dir)
    }

    fn seed_task(config: &AppConfig, text: &str, view: View) -> String {
        let service = TasksService::new(config.clone()).expect("service");
        service
            .capture(
                CaptureInput::from_text(text),
                &Actor::new(USER, Role::Member),
                view,
                local_today(),
            )
            .expect("capture")
            .id
    }

    fn run(config: &AppConfig, command: CliCommand) -> String {
        let mut output = Vec::new();
        execute(config, USER, command, &mut output).expect("execute");
        String::from_utf8(output).expect("utf8")
    }

    fn list_args(view: View) -> ListArgs {
        ListArgs {
            filters: FilterArgs {
                view,
                ..FilterArgs::default()
            },
            json: false,
        }
    }

    #[test]
    fn list_reports_visible_and_loaded_counts() {
        let (config, _dir) = temp_config();
        seed_task(&config, "Draft plan #q3", View::Anytime);
        seed_task(&config, "Ship feature", View::Anytime);

        let mut args = list_args(View::Anytime);
        args.filters.tag = vec!["q3".into()];
        let output = run(&config, CliCommand::List(args));

        assert!(output.contains("Draft plan"));
        assert!(!output.contains("Ship feature"));
        assert!(output.contains("1 of 2 tasks in anytime [tag:#"));
    }

    #[test]
    fn list_json_contains_tasks() {
        let (config, _dir) = temp_config();
        let id = seed_task(&config, "Call plumber", View::Today);
        let mut args = list_args(View::Today);
        args.json = true;

        let output = run(&config, CliCommand::List(args));
        let payload: serde_json::Value = serde_json::from_str(&output).expect("json");
        assert_eq!(payload["view"], "today");
        assert_eq!(payload["tasks"][0]["id"].as_str(), Some(id.as_str()));
    }

    #[test]
    fn options_show_counts_per_facet() {
        let (config, _dir) = temp_config();
        seed_task(&config, "One p:high", View::Anytime);
        seed_task(&config, "Two", View::Anytime);

        let output = run(&config, CliCommand::Options(list_args(View::Anytime)));
        assert!(output.contains("Priority"));
        assert!(output.contains("[ ] High (1)"));
        assert!(output.contains("[ ] No priority (1)"));
    }

    #[test]
    fn complete_then_reopen() {
        let (config, _dir) = temp_config();
        let id = seed_task(&config, "Review budget", View::Anytime);

        let output = run(&config, CliCommand::Complete(TaskIdArgs { id: id.clone() }));
        assert_eq!(output.trim(), "Completed 1 task");

        let service = TasksService::new(config.clone()).expect("service");
        let task = service.fetch_task(&id).expect("fetch").expect("task");
        assert_eq!(task.status, TaskStatus::Done);

        run(&config, CliCommand::Reopen(TaskIdArgs { id: id.clone() }));
        let task = service.fetch_task(&id).expect("fetch").expect("task");
        assert_eq!(task.status, TaskStatus::Todo);
    }

    #[test]
    fn unknown_task_is_an_error() {
        let (config, _dir) = temp_config();
        let mut output = Vec::new();
        let result = execute(
            &config,
            USER,
            CliCommand::Complete(TaskIdArgs {
                id: "missing".into(),
            }),
            &mut output,
        );
        assert!(result.is_err());
        assert!(output.is_empty());
    }

    #[test]
    fn reorder_moves_within_filtered_list() {
        let (config, _dir) = temp_config();
        let first = seed_task(&config, "First", View::Today);
        seed_task(&config, "Second", View::Today);
        let third = seed_task(&config, "Third", View::Today);

        run(
            &config,
            CliCommand::Reorder(ReorderArgs {
                id: third.clone(),
                to_index: 0,
                filters: FilterArgs {
                    view: View::Today,
                    ..FilterArgs::default()
                },
            }),
        );

        let service = TasksService::new(config.clone()).expect("service");
        let board = service
            .load_board(Actor::new(USER, Role::Member), View::Today)
            .expect("board");
        let order: Vec<&str> = board.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order[0], third.as_str());
        assert_eq!(order[1], first.as_str());
    }

    #[test]
    fn trash_restore_and_empty() {
        let (config, _dir) = temp_config();
        let id = seed_task(&config, "Junk", View::Inbox);

        let output = run(&config, CliCommand::Trash(TaskIdsArgs { ids: vec![id.clone()] }));
        assert_eq!(output.trim(), "Trashed 1 task");

        let output = run(&config, CliCommand::EmptyTrash);
        assert_eq!(output.trim(), "Purged no tasks");

        let output = run(&config, CliCommand::Restore(TaskIdsArgs { ids: vec![id] }));
        assert_eq!(output.trim(), "Restored 1 task");
    }

    #[test]
    fn bulk_sets_priority() {
        let (config, _dir) = temp_config();
        let a = seed_task(&config, "A", View::Anytime);
        let b = seed_task(&config, "B", View::Anytime);

        let args = BulkArgs {
            ids: vec![a.clone(), b],
            complete: false,
            trash: false,
            priority: Some(crate::model::Priority::High),
            when: None,
            date: None,
            assign: None,
            unassign: false,
            project: None,
            no_project: false,
        };
        let output = run(&config, CliCommand::Bulk(args));
        assert_eq!(output.trim(), "Updated 2 tasks");

        let service = TasksService::new(config.clone()).expect("service");
        let task = service.fetch_task(&a).expect("fetch").expect("task");
        assert_eq!(task.priority, crate::model::Priority::High);
    }

    #[test]
    fn summary_line_formats() {
        assert_eq!(SummaryLine::changed("Trashed", 3).to_string(), "Trashed 3 tasks");
        assert_eq!(SummaryLine::changed("Purged", 0).to_string(), "Purged no tasks");
    }
}
