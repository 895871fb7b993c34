use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};
use taskdeck_core::filters::local_today;
use taskdeck_core::permissions::Actor;
use taskdeck_core::services::TasksService;
use taskdeck_core::Settlement;

/// The service plus the user every tool call acts as.
#[derive(Debug)]
pub struct Session {
    pub service: TasksService,
    pub user: String,
}

impl Session {
    pub fn new(service: TasksService, user: impl Into<String>) -> Self {
        Self {
            service,
            user: user.into(),
        }
    }

    pub fn actor(&self) -> Result<Actor> {
        self.service.actor(&self.user)
    }

    /// Same calendar date the CLI works from.
    pub fn today(&self) -> NaiveDate {
        local_today()
    }
}

pub async fn with_session<T, F>(session: Arc<Session>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Session) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(session.as_ref()))
        .await
        .map_err(|err| anyhow!("blocking task failed: {}", err))?
}

/// Settlement as reported to clients; failures carry the user-facing message.
/// `id` is a single task id or the list a batch mutation covered.
pub fn settlement_json(id: impl Serialize, settlement: &Settlement) -> Value {
    json!({
        "id": id,
        "mutation": settlement.mutation_id,
        "state": settlement.state,
        "error": settlement.error.as_ref().map(|err| err.user_message()),
    })
}

/// A mutation that never ran, e.g. because its task was not found.
pub fn rejected_json(id: &str, err: &anyhow::Error) -> Value {
    json!({
        "id": id,
        "state": "rejected",
        "error": err.to_string(),
    })
}

pub fn validation_error(err: impl std::fmt::Display) -> pmcp::Error {
    pmcp::Error::validation(err.to_string())
}

pub fn internal_error(err: impl Into<anyhow::Error>) -> pmcp::Error {
    pmcp::Error::internal(err.into().to_string())
}

#[cfg(test)]
pub(crate) fn test_session() -> (Arc<Session>, tempfile::TempDir) {
    use taskdeck_core::config::AppConfig;

    let dir = tempfile::TempDir::new().expect("temp dir");
    let config = AppConfig::from_data_dir(dir.path().to_path_buf()).expect("config");
    let service = TasksService::new(config).expect("service");
    (Arc::new(Session::new(service, "ada")), dir)
}

#[cfg(test)]
pub(crate) fn seed_task(session: &Session, text: &str, view: taskdeck_core::View) -> String {
    use taskdeck_core::CaptureInput;

    let actor = session.actor().expect("actor");
    session
        .service
        .capture(
            CaptureInput::from_text(text),
            &actor,
            view,
            session.today(),
        )
        .expect("capture")
        .id
}

#[cfg(test)]
pub(crate) fn test_extra() -> pmcp::RequestHandlerExtra {
    pmcp::RequestHandlerExtra::new(
        "test-request".to_string(),
        tokio_util::sync::CancellationToken::new(),
    )
}
