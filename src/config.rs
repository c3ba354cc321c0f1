//! Configuration, loaded from TOML the way the teacher's `config::customer::Config` is
//! (`SPEC_FULL.md` §1.3).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod defaults;

/// Where the core's own bookkeeping database lives. The teacher's `Postgres(Uri)` variant is
/// dropped — nothing in this client needs a shared server-side database (see `DESIGN.md`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseLocation {
    Ephemeral,
    Sqlite(PathBuf),
}

impl DatabaseLocation {
    pub fn relative_to(self, path: impl AsRef<Path>) -> Self {
        if let DatabaseLocation::Sqlite(db_path) = self {
            DatabaseLocation::Sqlite(path.as_ref().join(db_path))
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
#[non_exhaustive]
pub struct Config {
    #[serde(default = "defaults::database_location")]
    pub database: DatabaseLocation,
    pub profile: String,
    pub peer_url: url::Url,
    #[serde(default = "defaults::chunk_size")]
    pub chunk_size: u32,
    #[serde(default = "defaults::serialize_before_queuing")]
    pub serialize_before_queuing: bool,
    #[serde(with = "humantime_serde", default = "defaults::request_timeout")]
    pub request_timeout: Duration,
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub basic_auth: Option<(String, String)>,
}

impl Config {
    pub async fn load(config_path: impl AsRef<Path>) -> Result<Config, anyhow::Error> {
        let mut config: Config = toml::from_str(&tokio::fs::read_to_string(&config_path).await?)?;

        let config_dir = config_path
            .as_ref()
            .parent()
            .expect("sync client configuration path must exist in some parent directory");
        config.database = config.database.relative_to(config_dir);

        if config.chunk_size == 0 || config.chunk_size % 100 != 0 {
            anyhow::bail!("chunk_size must be a positive multiple of 100");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_location_relative_to_only_rewrites_sqlite() {
        let ephemeral = DatabaseLocation::Ephemeral.relative_to("/etc/morango-sync");
        assert!(matches!(ephemeral, DatabaseLocation::Ephemeral));

        let sqlite = DatabaseLocation::Sqlite(PathBuf::from("sync.db")).relative_to("/etc/morango-sync");
        assert_eq!(
            sqlite,
            DatabaseLocation::Sqlite(PathBuf::from("/etc/morango-sync/sync.db"))
        );
    }
}
