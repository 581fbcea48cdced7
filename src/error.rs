use thiserror::Error;

#[derive(Error, Debug)]
#[allow(dead_code)]
pub enum DiagError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] std::io::Error),

    #[error("corrupt document: {0}")]
    CorruptDocument(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),
}
