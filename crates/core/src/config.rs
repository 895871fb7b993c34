use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs};
use once_cell::sync::Lazy;
use tracing::debug;

const DATABASE_FILE: &str = "taskdeck.sqlite3";
const ENV_DATA_DIR: &str = "TASKDECK_DATA_DIR";
const ENV_USER: &str = "TASKDECK_USER";
const HIDDEN_DIR: &str = ".taskdeck";
pub const DEFAULT_USER: &str = "local";

static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
    Lazy::new(|| ProjectDirs::from("dev", "taskdeck", "taskdeck"));

/// Where the data directory was resolved from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirSource {
    Explicit,
    Environment,
    DevTree,
    Platform,
    Home,
    WorkingDir,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    data_dir: PathBuf,
    db_path: PathBuf,
    source: DirSource,
}

impl AppConfig {
    /// Resolve the data directory (override, `TASKDECK_DATA_DIR`, the dev tree
    /// in debug builds, platform dirs, then `~/.taskdeck`) and create it.
    pub fn discover(data_dir_override: Option<PathBuf>) -> Result<Self> {
        let (data_dir, source) = resolve_data_dir(data_dir_override)?;
        fs::create_dir_all(&data_dir).with_context(|| {
            format!("Failed to create data directory at {}", data_dir.display())
        })?;
        debug!(dir = %data_dir.display(), ?source, "resolved data directory");
        Ok(Self::with_source(data_dir, source))
    }

    /// Use `data_dir` as is; the caller owns its creation.
    pub fn from_data_dir(data_dir: PathBuf) -> Result<Self> {
        Ok(Self::with_source(data_dir, DirSource::Explicit))
    }

    fn with_source(data_dir: PathBuf, source: DirSource) -> Self {
        Self {
            db_path: data_dir.join(DATABASE_FILE),
            data_dir,
            source,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn source(&self) -> DirSource {
        self.source
    }
}

/// The user requests are made as: explicit flag, then `TASKDECK_USER`, then `local`.
pub fn resolve_user(user_override: Option<String>) -> String {
    user_override
        .or_else(|| env::var(ENV_USER).ok())
        .map(|user| user.trim().to_string())
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| DEFAULT_USER.to_string())
}

fn resolve_data_dir(data_dir_override: Option<PathBuf>) -> Result<(PathBuf, DirSource)> {
    if let Some(dir) = data_dir_override {
        return Ok((dir, DirSource::Explicit));
    }

    if let Some(dir) = env::var_os(ENV_DATA_DIR).filter(|value| !value.is_empty()) {
        return Ok((PathBuf::from(dir), DirSource::Environment));
    }

    // Debug builds keep their data next to the workspace.
    if cfg!(debug_assertions) {
        let dev_dir = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("tmp")
            .join("dev-taskdeck");
        return Ok((dev_dir, DirSource::DevTree));
    }

    if let Some(project) = PROJECT_DIRS.as_ref() {
        return Ok((project.data_dir().to_path_buf(), DirSource::Platform));
    }

    if let Some(base) = BaseDirs::new() {
        return Ok((base.home_dir().join(HIDDEN_DIR), DirSource::Home));
    }

    let cwd = env::current_dir().context("Failed to read the working directory")?;
    Ok((cwd.join(HIDDEN_DIR), DirSource::WorkingDir))
}
