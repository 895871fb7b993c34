use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use pmcp::{RequestHandlerExtra, Result as McpResult, ToolHandler};
use serde::Deserialize;
use serde_json::{json, Value};
use taskdeck_core::model::{View, WhenType};
use taskdeck_core::mutation::Mutation;
use taskdeck_core::parser::parse_date_spec;

use super::util::{settlement_json, validation_error, with_session, Session};

pub struct ScheduleTaskTool {
    session: Arc<Session>,
}

impl ScheduleTaskTool {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleTaskArgs {
    id: String,
    when: String,
    date: Option<String>,
}

#[async_trait]
impl ToolHandler for ScheduleTaskTool {
    async fn handle(&self, args: Value, _extra: RequestHandlerExtra) -> McpResult<Value> {
        let parsed: ScheduleTaskArgs = serde_json::from_value(args).map_err(validation_error)?;

        let when = WhenType::from_str(&parsed.when).map_err(validation_error)?;
        let date = parsed
            .date
            .as_deref()
            .map(|spec| parse_date_spec(spec, self.session.today()))
            .transpose()
            .map_err(validation_error)?;

        let id = parsed.id;
        let settlement = with_session(self.session.clone(), move |session| {
            let settlement = session
                .service
                .perform(session.actor()?, View::All, |board, now| {
                    Mutation::schedule(&board.context(now), &id, when, date)
                })?;
            Ok(settlement_json(&id, &settlement))
        })
        .await
        .map_err(validation_error)?;

        Ok(settlement)
    }

    fn metadata(&self) -> Option<pmcp::types::ToolInfo> {
        Some(pmcp::types::ToolInfo {
            name: "schedule_task".to_string(),
            description: Some("Move a task to a planning bucket or a scheduled date".to_string()),
            input_schema: json!({
                "type": "object",
                "required": ["id", "when"],
                "properties": {
                    "id": { "type": "string" },
                    "when": {
                        "type": "string",
                        "enum": ["inbox", "today", "anytime", "someday", "scheduled"]
                    },
                    "date": {
                        "type": "string",
                        "description": "Required for scheduled: ISO date, +Nd, tomorrow or a weekday"
                    }
                }
            }),
        })
    }
}
