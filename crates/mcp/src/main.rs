use std::path::PathBuf;

use clap::Parser;
use taskdeck_mcp::{run_server, ServerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "taskdeck-mcp",
    version,
    about = "Model Context Protocol server for taskdeck"
)]
struct Args {
    /// Override the taskdeck data directory (defaults to the same resolution as the CLI)
    #[arg(long = "data-dir", value_name = "PATH")]
    data_dir: Option<PathBuf>,

    /// Override the tracing filter (e.g. "info", "debug", or full directives)
    #[arg(long = "log", value_name = "DIRECTIVE")]
    log_filter: Option<String>,

    /// Act as this user (defaults to $TASKDECK_USER, then "local")
    #[arg(long, value_name = "ID")]
    user: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ServerConfig {
        data_dir: args.data_dir,
        log_filter: args.log_filter,
        user: args.user,
    };

    run_server(config).await
}
