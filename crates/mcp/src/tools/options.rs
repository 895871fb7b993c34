use std::sync::Arc;

use async_trait::async_trait;
use pmcp::{RequestHandlerExtra, Result as McpResult, ToolHandler};
use serde_json::{json, Value};

use super::filters::{view_properties, ViewArgs};
use super::util::{internal_error, validation_error, with_session, Session};

pub struct FilterOptionsTool {
    session: Arc<Session>,
}

impl FilterOptionsTool {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ToolHandler for FilterOptionsTool {
    async fn handle(&self, args: Value, _extra: RequestHandlerExtra) -> McpResult<Value> {
        let parsed: ViewArgs = serde_json::from_value(args).map_err(validation_error)?;
        let view = parsed.view().map_err(validation_error)?;

        let mut board = with_session(self.session.clone(), move |session| {
            session.service.load_board(session.actor()?, view)
        })
        .await
        .map_err(internal_error)?;

        let filters = parsed
            .to_filters(board.references())
            .map_err(validation_error)?;
        board.set_filters(filters);
        let options = board.filter_options(self.session.today());
        serde_json::to_value(options).map_err(internal_error)
    }

    fn metadata(&self) -> Option<pmcp::types::ToolInfo> {
        Some(pmcp::types::ToolInfo {
            name: "filter_options".to_string(),
            description: Some(
                "Count how many tasks each filter value would leave, given the other active filters"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": view_properties()
            }),
        })
    }
}
