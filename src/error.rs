use thiserror::Error;

/// Problems with the configuration file or a setting read from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("`delete_after_days` must be a non-negative integer, got {0}")]
    InvalidPrunable(String),
    #[error("no webhook profiles configured")]
    NoProfiles,
    #[error("webhook profile `{0}` is defined more than once")]
    DuplicateProfile(String),
    #[error("unknown webhook profile `{0}`")]
    UnknownProfile(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to write blob `{path}`: {source}")]
    BlobWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read upload `{name}`: {source}")]
    UploadRead {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to delete blob `{path}`: {source}")]
    BlobDelete {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("record store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialize webhook calls: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("webhook call not found: {0}")]
    NotFound(String),
}

/// Why a capture produced no record.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to store attachments: {0}")]
    Attachments(#[source] StorageError),
    #[error("failed to create webhook call: {0}")]
    Create(#[source] StorageError),
}
