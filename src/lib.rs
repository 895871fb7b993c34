pub use taskdeck_cli::cli;
pub use taskdeck_cli::commands;
pub use taskdeck_cli::config;
pub use taskdeck_cli::logging;
pub use taskdeck_cli::AppConfig;

pub use taskdeck_core as core;
pub use taskdeck_core::capture;
pub use taskdeck_core::database as db;
pub use taskdeck_core::model;
pub use taskdeck_core::parser;

pub use taskdeck_mcp as mcp;
