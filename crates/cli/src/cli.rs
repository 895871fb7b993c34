use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand};

use crate::capture::CaptureInput;
use crate::core::filters::{AssigneeFilter, DueBucket, SortOption, TaskFilters};
use crate::model::{Priority, References, TaskStatus, View, WhenType};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskdeck",
    version,
    about = "Shared task lists with filters, facets and undoable edits.",
    after_help = "Examples:\n  taskdeck add Review budget +finance #q3 due:fri\n  taskdeck list --view today --priority high\n  taskdeck options --view anytime --tag q3\n  taskdeck reorder 01HX... 0 --view today\n  taskdeck mcp --log debug"
)]
pub struct Cli {
    /// Override the data directory (defaults to platform-specific app dir)
    #[arg(long, value_name = "PATH", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Act as this user (defaults to $TASKDECK_USER, then "local")
    #[arg(long, value_name = "ID", global = true)]
    pub user: Option<String>,

    /// Override the tracing filter (e.g. "info", "debug", or full directives)
    #[arg(long = "log", value_name = "DIRECTIVE", global = true)]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// List the tasks of a view after filtering (default command)
    List(ListArgs),
    /// Show every filter value with how many tasks it would leave
    Options(ListArgs),
    /// Capture a task with optional inline tokens
    Add(AddArgs),
    /// Mark a task done (repeating tasks get their next occurrence)
    Complete(TaskIdArgs),
    /// Put a completed task back on the list
    Reopen(TaskIdArgs),
    /// Move a task to another status column
    Move(MoveArgs),
    /// Plan a task for a bucket or date
    Schedule(ScheduleArgs),
    /// Change several tasks at once
    Bulk(BulkArgs),
    /// Move a task to a new position within the filtered list
    Reorder(ReorderArgs),
    /// Move tasks to the trash
    Trash(TaskIdsArgs),
    /// Bring tasks back from the trash
    Restore(TaskIdsArgs),
    /// Permanently delete trashed tasks past the retention window
    EmptyTrash,
    /// Start or stop tracking time on a task
    #[command(subcommand)]
    Timer(TimerCommand),
    /// Run the Model Context Protocol server over stdio
    Mcp,
}

impl Default for CliCommand {
    fn default() -> Self {
        CliCommand::List(ListArgs::default())
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    #[command(flatten)]
    pub filters: FilterArgs,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// View selection plus the client-side filters applied on top of it.
#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    #[arg(long, value_enum, default_value_t = View::Inbox)]
    pub view: View,

    #[arg(long, value_enum)]
    pub status: Option<TaskStatus>,

    /// User id or name, or "unassigned"
    #[arg(long)]
    pub assignee: Option<String>,

    /// today, this_week, this_month, overdue or no_date
    #[arg(long)]
    pub due: Option<DueBucket>,

    #[arg(long, value_enum)]
    pub priority: Option<Priority>,

    /// Tag names (comma-separated or repeated; a task needs any one of them)
    #[arg(long, value_delimiter = ',', action = ArgAction::Append)]
    pub tag: Vec<String>,

    /// Project name
    #[arg(long)]
    pub project: Option<String>,

    /// Area name
    #[arg(long)]
    pub area: Option<String>,

    #[arg(long, value_enum)]
    pub when: Option<WhenType>,

    /// Case-insensitive match on title and notes
    #[arg(long)]
    pub search: Option<String>,

    /// default, deadline_asc or deadline_desc
    #[arg(long, default_value = "default")]
    pub sort: SortOption,
}

impl Default for FilterArgs {
    fn default() -> Self {
        Self {
            view: View::Inbox,
            status: None,
            assignee: None,
            due: None,
            priority: None,
            tag: Vec::new(),
            project: None,
            area: None,
            when: None,
            search: None,
            sort: SortOption::Default,
        }
    }
}

impl FilterArgs {
    /// Resolve names against the loaded reference data.
    pub fn to_filters(&self, references: &References) -> Result<TaskFilters> {
        let assignee = match self.assignee.as_deref().map(str::trim) {
            None | Some("") => AssigneeFilter::Any,
            Some(value) => {
                let id = references
                    .user_by_handle(value)
                    .map(|user| user.id.as_str())
                    .unwrap_or(value);
                AssigneeFilter::from_ids(&[id])
            }
        };

        let tags = self
            .tag
            .iter()
            .map(|name| name.trim().trim_start_matches('#'))
            .filter(|name| !name.is_empty())
            .map(|name| {
                references
                    .tag_by_name(name)
                    .map(|tag| tag.id.clone())
                    .ok_or_else(|| anyhow!("Unknown tag '{}'", name))
            })
            .collect::<Result<Vec<_>>>()?;

        let project = self
            .project
            .as_deref()
            .map(|name| {
                references
                    .project_by_name(name)
                    .map(|project| project.id.clone())
                    .ok_or_else(|| anyhow!("Unknown project '{}'", name))
            })
            .transpose()?;

        let area = self
            .area
            .as_deref()
            .map(|name| {
                references
                    .area_by_name(name)
                    .map(|area| area.id.clone())
                    .ok_or_else(|| anyhow!("Unknown area '{}'", name))
            })
            .transpose()?;

        Ok(TaskFilters {
            status: self.status,
            assignee,
            due: self.due,
            priority: self.priority,
            tags,
            project,
            area,
            when: self.when,
            search: self.search.clone(),
            sort: self.sort,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Task title with optional inline tokens (@user, +project, #tag, due:, deadline:, when:, p:, every:)
    #[arg(value_name = "TEXT", required = true)]
    pub text: Vec<String>,

    /// File the task as if it were created in this view
    #[arg(long, value_enum, default_value_t = View::Inbox)]
    pub view: View,

    /// Optional detailed notes
    #[arg(long)]
    pub notes: Option<String>,

    /// Explicitly set the project (overrides inline +project token)
    #[arg(long)]
    pub project: Option<String>,

    #[arg(long)]
    pub area: Option<String>,

    /// Assign to a user id or name (overrides inline @user token)
    #[arg(long)]
    pub assignee: Option<String>,

    /// Set status explicitly (defaults to todo)
    #[arg(long, value_enum)]
    pub status: Option<TaskStatus>,

    #[arg(long, value_enum)]
    pub priority: Option<Priority>,

    /// Add tags (comma-separated or repeated flag; '#' prefix optional)
    #[arg(long, value_delimiter = ',', action = ArgAction::Append)]
    pub tag: Vec<String>,

    /// Planning bucket or date (today, someday, +3d, 2024-12-24)
    #[arg(long, value_name = "WHEN")]
    pub when: Option<String>,

    /// Set due date (ISO e.g. 2023-12-24, today, +3d, mon)
    #[arg(long, value_name = "DATE")]
    pub due: Option<String>,

    #[arg(long, value_name = "DATE")]
    pub deadline: Option<String>,

    /// Repeat rule such as 3d, 2w or 1m
    #[arg(long, value_name = "RULE")]
    pub every: Option<String>,
}

impl From<AddArgs> for CaptureInput {
    fn from(args: AddArgs) -> Self {
        CaptureInput {
            text: args.text,
            notes: args.notes,
            project: args.project,
            area: args.area,
            assignee: args.assignee,
            status: args.status,
            priority: args.priority,
            tags: args.tag,
            when: args.when,
            due: args.due,
            deadline: args.deadline,
            every: args.every,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct TaskIdArgs {
    #[arg(value_name = "ID")]
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct TaskIdsArgs {
    #[arg(value_name = "ID", required = true)]
    pub ids: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct MoveArgs {
    #[arg(value_name = "ID")]
    pub id: String,

    #[arg(value_enum, value_name = "STATUS")]
    pub status: TaskStatus,
}

#[derive(Args, Debug, Clone)]
pub struct ScheduleArgs {
    #[arg(value_name = "ID")]
    pub id: String,

    #[arg(value_enum, value_name = "WHEN")]
    pub when: WhenType,

    /// Required for `scheduled` (ISO, +Nd, tomorrow, weekday)
    #[arg(long, value_name = "DATE")]
    pub date: Option<String>,
}

#[derive(Args, Debug, Clone)]
#[command(group(
    ArgGroup::new("change")
        .required(true)
        .args(["complete", "trash", "priority", "when", "assign", "unassign", "project", "no_project"])
))]
pub struct BulkArgs {
    #[arg(value_name = "ID", required = true)]
    pub ids: Vec<String>,

    #[arg(long)]
    pub complete: bool,

    #[arg(long)]
    pub trash: bool,

    #[arg(long, value_enum)]
    pub priority: Option<Priority>,

    #[arg(long, value_enum)]
    pub when: Option<WhenType>,

    /// Date for `--when scheduled`
    #[arg(long, value_name = "DATE", requires = "when")]
    pub date: Option<String>,

    /// User id or name
    #[arg(long, value_name = "USER")]
    pub assign: Option<String>,

    #[arg(long)]
    pub unassign: bool,

    /// Project name
    #[arg(long)]
    pub project: Option<String>,

    #[arg(long)]
    pub no_project: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ReorderArgs {
    #[arg(value_name = "ID")]
    pub id: String,

    /// Zero-based position within the filtered list
    #[arg(value_name = "INDEX")]
    pub to_index: usize,

    #[command(flatten)]
    pub filters: FilterArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TimerCommand {
    Start(TaskIdArgs),
    Stop(TaskIdArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Project, Tag, User};
    use crate::core::Role;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn references() -> References {
        References {
            users: vec![User {
                id: "u1".into(),
                name: "Ada".into(),
                role: Role::Member,
            }],
            areas: Vec::new(),
            projects: vec![Project {
                id: "p1".into(),
                name: "Garden".into(),
                area_id: None,
            }],
            tags: vec![Tag {
                id: "t-q3".into(),
                name: "q3".into(),
            }],
        }
    }

    #[test]
    fn parses_list_filters() {
        let cli = Cli::parse_from([
            "taskdeck",
            "list",
            "--view",
            "today",
            "--priority",
            "high",
            "--tag",
            "q3",
            "--due",
            "this_week",
            "--sort",
            "deadline_asc",
            "--json",
        ]);
        let Some(CliCommand::List(args)) = cli.command else {
            panic!("expected list command");
        };
        assert!(args.json);
        assert_eq!(args.filters.view, View::Today);
        assert_eq!(args.filters.priority, Some(Priority::High));
        assert_eq!(args.filters.due, Some(DueBucket::ThisWeek));
        assert_eq!(args.filters.sort, SortOption::DeadlineAsc);
    }

    #[rstest]
    #[case(&["taskdeck"], None)]
    #[case(&["taskdeck", "list", "--view", "upcoming"], Some(View::Upcoming))]
    #[case(&["taskdeck", "options", "--view", "trash"], Some(View::Trash))]
    #[case(&["taskdeck", "--user", "ada", "list"], Some(View::Inbox))]
    fn view_flag_per_command(#[case] argv: &[&str], #[case] expected: Option<View>) {
        let cli = Cli::parse_from(argv);
        let view = match cli.command {
            Some(CliCommand::List(args)) | Some(CliCommand::Options(args)) => Some(args.filters.view),
            _ => None,
        };
        assert_eq!(view, expected);
    }

    #[test]
    fn filter_names_resolve_to_ids() {
        let args = FilterArgs {
            assignee: Some("ada".into()),
            tag: vec!["#Q3".into()],
            project: Some("garden".into()),
            ..FilterArgs::default()
        };
        let filters = args.to_filters(&references()).expect("filters");
        assert_eq!(filters.assignee, AssigneeFilter::Specific("u1".into()));
        assert_eq!(filters.tags, vec!["t-q3".to_string()]);
        assert_eq!(filters.project.as_deref(), Some("p1"));
    }

    #[test]
    fn unassigned_and_unknown_names() {
        let args = FilterArgs {
            assignee: Some("unassigned".into()),
            ..FilterArgs::default()
        };
        assert_eq!(
            args.to_filters(&references()).expect("filters").assignee,
            AssigneeFilter::Unassigned
        );

        let args = FilterArgs {
            tag: vec!["nope".into()],
            ..FilterArgs::default()
        };
        assert!(args.to_filters(&references()).is_err());
    }

    #[test]
    fn bulk_requires_a_change() {
        assert!(Cli::try_parse_from(["taskdeck", "bulk", "a", "b"]).is_err());
        let cli = Cli::try_parse_from(["taskdeck", "bulk", "a", "--priority", "low"])
            .expect("bulk parses");
        assert!(matches!(cli.command, Some(CliCommand::Bulk(_))));
    }
}
