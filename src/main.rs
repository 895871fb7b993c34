use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = taskdeck::cli::Cli::parse();

    match cli.command.clone().unwrap_or_default() {
        taskdeck::cli::CliCommand::Mcp => {
            let config = taskdeck::mcp::ServerConfig {
                data_dir: cli.data_dir.clone(),
                log_filter: cli.log_filter.clone(),
                user: cli.user.clone(),
            };
            taskdeck::mcp::run_server_blocking(config)?;
        }
        command => {
            taskdeck::logging::init(cli.log_filter.as_deref())?;
            let config = taskdeck::config::from_cli(&cli)?;
            let user = taskdeck::config::user_from_cli(&cli);
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            taskdeck::commands::execute(&config, &user, command, &mut handle)?;
        }
    }

    Ok(())
}
