use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("workshop page request failed: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },
}

#[derive(Debug, Error)]
pub enum SteamCmdError {
    #[error("failed to download steamcmd archive: {source}")]
    Download {
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to save steamcmd archive to {path:?}: {source}")]
    SaveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to extract steamcmd archive {path:?}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("steamcmd executable not found at {0:?} after extraction")]
    NotFoundAfterExtract(PathBuf),
    #[error("io error while installing steamcmd: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("descriptor file missing at {0:?}")]
    DescriptorMissing(PathBuf),
    #[error("failed to read descriptor {path:?}: {source}")]
    DescriptorRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse descriptor {path:?}: {source}")]
    DescriptorParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unrecognized content type {0:?} in descriptor")]
    UnrecognizedType(String),
    #[error("failed to create destination directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid workshop id: {0}")]
    InvalidWorkshopId(String),
    #[error("workshop id not found or page incomplete: {0}")]
    UnknownWorkshopId(String),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("a download session is already active")]
    SessionActive,
    #[error("no destination folder configured")]
    MissingDestination,
    #[error("steamcmd not installed at {0:?}")]
    SteamCmdMissing(PathBuf),
    #[error("failed to spawn steamcmd process: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },
    #[error("steamcmd exited with status {status:?}: {output}")]
    CommandFailed { status: Option<i32>, output: String },
    #[error("download canceled")]
    Canceled,
    #[error(transparent)]
    Relocate(#[from] RelocateError),
    #[error("io error: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
    #[error("command execution error: {source}")]
    Join {
        #[source]
        source: tokio::task::JoinError,
    },
}

#[derive(Debug, Error)]
pub enum WorkshopError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    SteamCmd(#[from] SteamCmdError),
    #[error(transparent)]
    Relocate(#[from] RelocateError),
    #[error(transparent)]
    Download(#[from] DownloadError),
}

pub type Result<T> = std::result::Result<T, WorkshopError>;
