use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use pmcp::{RequestHandlerExtra, Result as McpResult, ToolHandler};
use serde::Deserialize;
use serde_json::{json, Value};
use taskdeck_core::mutation::Mutation;

use super::filters::{view_properties, ViewArgs};
use super::util::{settlement_json, validation_error, with_session, Session};

pub struct ReorderTaskTool {
    session: Arc<Session>,
}

impl ReorderTaskTool {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReorderTaskArgs {
    id: String,
    to_index: usize,
    #[serde(flatten)]
    list: ViewArgs,
}

#[async_trait]
impl ToolHandler for ReorderTaskTool {
    async fn handle(&self, args: Value, _extra: RequestHandlerExtra) -> McpResult<Value> {
        let parsed: ReorderTaskArgs = serde_json::from_value(args).map_err(validation_error)?;
        let view = parsed.list.view().map_err(validation_error)?;

        let response = with_session(self.session.clone(), move |session| {
            let service = &session.service;
            let mut board = service.load_board(session.actor()?, view)?;
            let filters = parsed.list.to_filters(board.references())?;
            board.set_filters(filters);

            let today = session.today();
            let visible = board.reorder_sequence(today)?;
            let mutation = Mutation::reorder(
                &board.context(Utc::now()),
                &visible,
                &parsed.id,
                parsed.to_index,
            )
            .context("cannot reorder")?;
            let settlement = service.execute(&mut board, mutation)?;

            let mut response = settlement_json(&parsed.id, &settlement);
            response["order"] = json!(board.visible_ids(today));
            Ok(response)
        })
        .await
        .map_err(validation_error)?;

        Ok(response)
    }

    fn metadata(&self) -> Option<pmcp::types::ToolInfo> {
        let mut properties = view_properties();
        properties["id"] = json!({ "type": "string" });
        properties["toIndex"] = json!({
            "type": "integer",
            "minimum": 0,
            "description": "Target position within the filtered list"
        });
        Some(pmcp::types::ToolInfo {
            name: "reorder_task".to_string(),
            description: Some(
                "Move a task within a filtered list; only the visible tasks are renumbered"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "required": ["id", "toIndex"],
                "properties": properties
            }),
        })
    }
}
