mod capture;
mod filters;
mod list;
mod options;
mod reorder;
mod schedule;
mod status;
mod trash;
mod util;

use std::sync::Arc;

use pmcp::ServerBuilder;

pub use util::Session;

#[cfg(test)]
pub(crate) use util::test_session;

pub const TOOL_NAMES: [&str; 8] = [
    "list_tasks",
    "filter_options",
    "capture_task",
    "set_task_status",
    "schedule_task",
    "reorder_task",
    "trash_tasks",
    "empty_trash",
];

pub fn register(builder: ServerBuilder, session: Arc<Session>) -> ServerBuilder {
    builder
        .tool("list_tasks", list::ListTasksTool::new(session.clone()))
        .tool(
            "filter_options",
            options::FilterOptionsTool::new(session.clone()),
        )
        .tool(
            "capture_task",
            capture::CaptureTaskTool::new(session.clone()),
        )
        .tool(
            "set_task_status",
            status::SetTaskStatusTool::new(session.clone()),
        )
        .tool(
            "schedule_task",
            schedule::ScheduleTaskTool::new(session.clone()),
        )
        .tool(
            "reorder_task",
            reorder::ReorderTaskTool::new(session.clone()),
        )
        .tool("trash_tasks", trash::TrashTasksTool::new(session.clone()))
        .tool("empty_trash", trash::EmptyTrashTool::new(session))
}
