//! Resolution of the database path and client configuration.

use std::env;
use std::path::{Path, PathBuf};

use fieldsync_core::config::ClientConfig;

use crate::error::CliError;

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("FIELDSYNC_DB_PATH").map(PathBuf::from))
    {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("fieldsync").join("fieldsync.db"))
        .ok_or_else(|| CliError::Config("failed to resolve data directory".to_string()))
}

pub fn resolve_config_path(cli_config: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_config.or_else(|| env::var_os("FIELDSYNC_CONFIG").map(PathBuf::from)) {
        return Ok(path);
    }
    default_config_path()
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("fieldsync").join("config.json"))
        .ok_or_else(|| CliError::Config("failed to resolve config directory".to_string()))
}

/// Config file contents with `FIELDSYNC_*` environment overrides applied.
pub fn load_client_config(path: &Path) -> Result<ClientConfig, CliError> {
    Ok(ClientConfig::load(path)?.with_env_overrides())
}
