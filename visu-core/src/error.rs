use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum VisuError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
