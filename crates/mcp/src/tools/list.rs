use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use pmcp::{RequestHandlerExtra, Result as McpResult, ToolHandler};
use serde_json::{json, Value};
use taskdeck_core::TaskBoard;

use super::filters::{view_properties, ViewArgs};
use super::util::{internal_error, validation_error, with_session, Session};

pub struct ListTasksTool {
    session: Arc<Session>,
}

impl ListTasksTool {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ToolHandler for ListTasksTool {
    async fn handle(&self, args: Value, _extra: RequestHandlerExtra) -> McpResult<Value> {
        let parsed: ViewArgs = serde_json::from_value(args).map_err(validation_error)?;
        let view = parsed.view().map_err(validation_error)?;

        let board = with_session(self.session.clone(), move |session| {
            session.service.load_board(session.actor()?, view)
        })
        .await
        .map_err(internal_error)?;

        build_list_response(board, &parsed, self.session.today())
    }

    fn metadata(&self) -> Option<pmcp::types::ToolInfo> {
        Some(pmcp::types::ToolInfo {
            name: "list_tasks".to_string(),
            description: Some(
                "List the tasks of a view, narrowed and sorted by optional filters".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": view_properties()
            }),
        })
    }
}

fn build_list_response(
    mut board: TaskBoard,
    args: &ViewArgs,
    today: NaiveDate,
) -> McpResult<Value> {
    let filters = args
        .to_filters(board.references())
        .map_err(validation_error)?;
    board.set_filters(filters);
    let tasks = board.visible(today);

    Ok(json!({
        "view": board.view(),
        "total": board.tasks().len(),
        "filters": board.filters(),
        "summary": board.filters().summary(),
        "tasks": tasks,
        "references": board.references(),
    }))
}
