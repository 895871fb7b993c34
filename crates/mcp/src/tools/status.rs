use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use pmcp::{RequestHandlerExtra, Result as McpResult, ToolHandler};
use serde::Deserialize;
use serde_json::{json, Value};
use taskdeck_core::model::{TaskStatus, View};
use taskdeck_core::mutation::Mutation;

use super::util::{
    internal_error, rejected_json, settlement_json, validation_error, with_session, Session,
};

pub struct SetTaskStatusTool {
    session: Arc<Session>,
}

impl SetTaskStatusTool {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StatusAction {
    Complete,
    Reopen,
    Move,
}

#[derive(Debug, Clone, Copy)]
enum Change {
    Complete,
    Reopen,
    Move(TaskStatus),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetStatusArgs {
    action: StatusAction,
    ids: Vec<String>,
    status: Option<String>,
}

#[async_trait]
impl ToolHandler for SetTaskStatusTool {
    async fn handle(&self, args: Value, _extra: RequestHandlerExtra) -> McpResult<Value> {
        let parsed: SetStatusArgs = serde_json::from_value(args).map_err(validation_error)?;

        if parsed.ids.is_empty() {
            return Err(validation_error("ids must contain at least one task id"));
        }
        let change = match (parsed.action, parsed.status.as_deref()) {
            (StatusAction::Complete, _) => Change::Complete,
            (StatusAction::Reopen, _) => Change::Reopen,
            (StatusAction::Move, Some(status)) => {
                Change::Move(TaskStatus::from_str(status).map_err(validation_error)?)
            }
            (StatusAction::Move, None) => {
                return Err(validation_error("status is required for the move action"))
            }
        };

        let ids = parsed.ids;
        let updates = with_session(self.session.clone(), move |session| {
            let actor = session.actor()?;
            let mut updates = Vec::with_capacity(ids.len());
            for id in &ids {
                let result = session
                    .service
                    .perform(actor.clone(), View::All, |board, now| {
                        let ctx = board.context(now);
                        match change {
                            Change::Complete => Mutation::complete(&ctx, id),
                            Change::Reopen => Mutation::reopen(&ctx, id),
                            Change::Move(status) => Mutation::move_to_status(&ctx, id, status),
                        }
                    });
                updates.push(match result {
                    Ok(settlement) => settlement_json(id, &settlement),
                    Err(err) => rejected_json(id, &err),
                });
            }
            Ok(updates)
        })
        .await
        .map_err(internal_error)?;

        Ok(json!({ "updates": updates }))
    }

    fn metadata(&self) -> Option<pmcp::types::ToolInfo> {
        Some(pmcp::types::ToolInfo {
            name: "set_task_status".to_string(),
            description: Some(
                "Complete, reopen or move tasks between status columns. Failed writes are undone and reported per task"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "required": ["action", "ids"],
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["complete", "reopen", "move"]
                    },
                    "ids": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1
                    },
                    "status": {
                        "type": "string",
                        "enum": ["backlog", "todo", "in_progress", "review", "done", "canceled"],
                        "description": "Target column for the move action"
                    }
                }
            }),
        })
    }
}
