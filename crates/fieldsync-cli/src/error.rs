use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Set remote_url and api_key in the config file, or set FIELDSYNC_REMOTE_URL and FIELDSYNC_API_KEY."
    )]
    SyncNotConfigured,
}
