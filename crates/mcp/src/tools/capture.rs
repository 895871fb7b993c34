use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use pmcp::{RequestHandlerExtra, Result as McpResult, ToolHandler};
use serde::Deserialize;
use serde_json::{json, Value};
use taskdeck_core::capture::CaptureInput;
use taskdeck_core::model::{Priority, TaskStatus, View};

use super::util::{internal_error, validation_error, with_session, Session};

pub struct CaptureTaskTool {
    session: Arc<Session>,
}

impl CaptureTaskTool {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptureTaskArgs {
    text: String,
    view: Option<String>,
    notes: Option<String>,
    project: Option<String>,
    area: Option<String>,
    assignee: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    tags: Option<Vec<String>>,
    when: Option<String>,
    due: Option<String>,
    deadline: Option<String>,
    every: Option<String>,
}

impl CaptureTaskArgs {
    fn into_input(self) -> Result<(CaptureInput, View)> {
        let view = match self.view.as_deref() {
            Some(view) => View::from_str(view)?,
            None => View::Inbox,
        };
        let input = CaptureInput {
            text: tokenize(&self.text),
            notes: self.notes,
            project: self.project,
            area: self.area,
            assignee: self.assignee,
            status: self.status.as_deref().map(TaskStatus::from_str).transpose()?,
            priority: self.priority.as_deref().map(Priority::from_str).transpose()?,
            tags: normalize_list(self.tags),
            when: self.when,
            due: self.due,
            deadline: self.deadline,
            every: self.every,
        };
        Ok((input, view))
    }
}

#[async_trait]
impl ToolHandler for CaptureTaskTool {
    async fn handle(&self, args: Value, _extra: RequestHandlerExtra) -> McpResult<Value> {
        let parsed: CaptureTaskArgs = serde_json::from_value(args).map_err(validation_error)?;
        let (input, view) = parsed.into_input().map_err(validation_error)?;

        let outcome = with_session(self.session.clone(), move |session| {
            let actor = session.actor()?;
            session
                .service
                .capture(input, &actor, view, session.today())
        })
        .await
        .map_err(validation_error)?;

        serde_json::to_value(outcome).map_err(internal_error)
    }

    fn metadata(&self) -> Option<pmcp::types::ToolInfo> {
        Some(pmcp::types::ToolInfo {
            name: "capture_task".to_string(),
            description: Some(
                "Capture a task using the same fields and inline tokens as the CLI".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "required": ["text"],
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "Task text with optional @user, +project, #tag, due:, deadline:, when:, p:, every: tokens"
                    },
                    "view": {
                        "type": "string",
                        "enum": ["inbox", "today", "upcoming", "anytime", "someday"],
                        "description": "File the task as if created in this view"
                    },
                    "notes": { "type": "string" },
                    "project": { "type": "string" },
                    "area": { "type": "string" },
                    "assignee": { "type": "string", "description": "User id or name" },
                    "status": {
                        "type": "string",
                        "enum": ["backlog", "todo", "in_progress", "review", "done", "canceled"]
                    },
                    "priority": { "type": "string", "enum": ["high", "low", "none"] },
                    "tags": {
                        "type": "array",
                        "items": { "type": "string" }
                    },
                    "when": { "type": "string", "description": "Bucket or date, e.g. today, someday, +3d" },
                    "due": { "type": "string", "description": "ISO date or relative spec" },
                    "deadline": { "type": "string", "description": "ISO date or relative spec" },
                    "every": { "type": "string", "description": "Repeat rule such as 3d, 2w, 1m" }
                }
            }),
        })
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|part| part.to_string())
        .collect::<Vec<_>>()
}

fn normalize_list(list: Option<Vec<String>>) -> Vec<String> {
    list.unwrap_or_default()
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::tools::util::{test_extra, test_session};

    #[tokio::test]
    async fn capture_creates_task() {
        let (session, _dir) = test_session();
        let tool = CaptureTaskTool::new(session.clone());

        let response = tool
            .handle(
                json!({
                    "text": "Write integration tests #dev",
                    "view": "today",
                    "notes": "Cover tool flow"
                }),
                test_extra(),
            )
            .await
            .expect("capture result");

        assert_eq!(response["title"].as_str(), Some("Write integration tests"));
        assert_eq!(response["when_type"].as_str(), Some("today"));
        assert_eq!(response["created_tags"][0].as_str(), Some("dev"));

        let id = response["id"].as_str().expect("id");
        let task = session
            .service
            .fetch_task(id)
            .expect("fetch")
            .expect("stored");
        assert_eq!(task.owner_id, "ada");
        assert_eq!(task.notes.as_deref(), Some("Cover tool flow"));
    }

    #[tokio::test]
    async fn unknown_project_is_rejected() {
        let (session, _dir) = test_session();
        let tool = CaptureTaskTool::new(session);
        let result = tool
            .handle(
                json!({ "text": "Plant tulips", "project": "Garden" }),
                test_extra(),
            )
            .await;
        assert!(result.is_err());
    }
}
