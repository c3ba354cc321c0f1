use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

use super::DatabaseLocation;

const ORGANIZATION: &str = "";

const APPLICATION: &str = "morango-sync";

fn project_dirs() -> Result<ProjectDirs, anyhow::Error> {
    ProjectDirs::from("", ORGANIZATION, APPLICATION)
        .ok_or_else(|| anyhow::anyhow!("could not resolve the user's home directory"))
}

pub const CONFIG_FILE: &str = "morango-sync.toml";

pub const DATABASE_FILE: &str = "morango-sync.db";

pub fn config_path() -> Result<PathBuf, anyhow::Error> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE))
}

pub fn database_location() -> DatabaseLocation {
    match project_dirs() {
        Ok(dirs) => DatabaseLocation::Sqlite(dirs.data_dir().join(DATABASE_FILE)),
        Err(_) => DatabaseLocation::Ephemeral,
    }
}

pub const fn chunk_size() -> u32 {
    500
}

pub const fn serialize_before_queuing() -> bool {
    true
}

pub const fn request_timeout() -> Duration {
    Duration::from_secs(3)
}

pub const fn max_retries() -> u32 {
    5
}
