mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use pmcp::types::capabilities::ServerCapabilities;
use pmcp::Server;
use taskdeck_core::config::{resolve_user, AppConfig};
use taskdeck_core::services::TasksService;
use tracing::info;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::tools::Session;

/// Runtime configuration for the taskdeck MCP server.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub data_dir: Option<PathBuf>,
    pub log_filter: Option<String>,
    /// Every tool call acts as this user.
    pub user: Option<String>,
}

/// Launch the MCP server using the provided configuration.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    init_tracing(config.log_filter.clone())?;

    let app_config =
        AppConfig::discover(config.data_dir.clone()).context("failed to resolve data directory")?;
    let tasks_service =
        TasksService::new(app_config.clone()).context("failed to initialize task service")?;
    let user = resolve_user(config.user.clone());

    let server = build_server(Arc::new(Session::new(tasks_service, user.clone())))
        .context("failed to build MCP server")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %app_config.data_dir().display(),
        user = user.as_str(),
        tools = tools::TOOL_NAMES.join(", ").as_str(),
        "starting taskdeck-mcp"
    );

    server
        .run_stdio()
        .await
        .map_err(|err| anyhow::anyhow!("MCP server error: {}", err))
}

/// Run the MCP server by creating an internal Tokio runtime.
pub fn run_server_blocking(config: ServerConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run_server(config))
}

/// Stdout carries the protocol, so logs always go to stderr.
fn init_tracing(filter: Option<String>) -> Result<()> {
    let filter = filter.unwrap_or_else(|| "info".to_string());
    let directive: Directive = filter.parse()?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
    Ok(())
}

fn build_server(session: Arc<Session>) -> Result<Server> {
    let builder = Server::builder()
        .name("taskdeck-mcp")
        .version(env!("CARGO_PKG_VERSION"))
        .capabilities(ServerCapabilities::tools_only());

    let builder = tools::register(builder, session);
    builder
        .build()
        .map_err(|err| anyhow::anyhow!(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_builds_with_every_tool() {
        let (session, _dir) = tools::test_session();
        assert!(build_server(session).is_ok());
        assert_eq!(tools::TOOL_NAMES.len(), 8);
    }

    #[test]
    fn rejects_malformed_log_directive() {
        assert!(init_tracing(Some("taskdeck=loud".to_string())).is_err());
    }
}
