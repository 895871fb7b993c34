use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pmcp::{RequestHandlerExtra, Result as McpResult, ToolHandler};
use serde::Deserialize;
use serde_json::{json, Value};
use taskdeck_core::model::View;
use taskdeck_core::mutation::Mutation;
use taskdeck_core::trash;

use super::util::{internal_error, settlement_json, validation_error, with_session, Session};

pub struct TrashTasksTool {
    session: Arc<Session>,
}

impl TrashTasksTool {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrashTasksArgs {
    ids: Vec<String>,
    #[serde(default)]
    restore: bool,
}

#[async_trait]
impl ToolHandler for TrashTasksTool {
    async fn handle(&self, args: Value, _extra: RequestHandlerExtra) -> McpResult<Value> {
        let parsed: TrashTasksArgs = serde_json::from_value(args).map_err(validation_error)?;
        if parsed.ids.is_empty() {
            return Err(validation_error("ids must contain at least one task id"));
        }

        let restore = parsed.restore;
        let ids = parsed.ids;
        with_session(self.session.clone(), move |session| {
            let view = if restore { View::Trash } else { View::All };
            let settlement = session
                .service
                .perform(session.actor()?, view, |board, now| {
                    let ctx = board.context(now);
                    if restore {
                        Mutation::restore(&ctx, &ids)
                    } else {
                        Mutation::trash(&ctx, &ids)
                    }
                })?;
            Ok(settlement_json(&ids, &settlement))
        })
        .await
        .map_err(validation_error)
    }

    fn metadata(&self) -> Option<pmcp::types::ToolInfo> {
        Some(pmcp::types::ToolInfo {
            name: "trash_tasks".to_string(),
            description: Some(format!(
                "Move tasks to the trash (kept {} days) or restore them",
                trash::RETENTION_DAYS
            )),
            input_schema: json!({
                "type": "object",
                "required": ["ids"],
                "properties": {
                    "ids": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1
                    },
                    "restore": {
                        "type": "boolean",
                        "description": "Bring the tasks back instead of trashing them"
                    }
                }
            }),
        })
    }
}

pub struct EmptyTrashTool {
    session: Arc<Session>,
}

impl EmptyTrashTool {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ToolHandler for EmptyTrashTool {
    async fn handle(&self, _args: Value, _extra: RequestHandlerExtra) -> McpResult<Value> {
        let results = with_session(self.session.clone(), |session| {
            session.service.empty_trash(&session.actor()?, Utc::now())
        })
        .await
        .map_err(internal_error)?;

        let purged: Vec<&str> = results
            .iter()
            .filter(|result| result.deleted)
            .map(|result| result.id.as_str())
            .collect();
        Ok(json!({ "purged": purged, "count": purged.len() }))
    }

    fn metadata(&self) -> Option<pmcp::types::ToolInfo> {
        Some(pmcp::types::ToolInfo {
            name: "empty_trash".to_string(),
            description: Some(format!(
                "Permanently delete trashed tasks older than {} days",
                trash::RETENTION_DAYS
            )),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        })
    }
}
