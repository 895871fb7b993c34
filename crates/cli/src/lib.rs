pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;

pub use taskdeck_core as core;
pub use taskdeck_core::capture;
pub use taskdeck_core::database as db;
pub use taskdeck_core::model;
pub use taskdeck_core::parser;

pub use taskdeck_core::AppConfig;
