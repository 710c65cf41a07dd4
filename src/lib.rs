pub mod config;
pub mod download;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod progress;
pub mod relocate;
pub mod steamcmd;
pub mod units;

pub use config::{Config, Settings, CONFIG_FILE_NAME};
pub use download::{
    DownloadRequest, DownloadSummary, SessionEvent, SessionHandle, SessionStatus, WorkshopId,
    WorkshopService,
};
pub use error::{
    ConfigError, DownloadError, LookupError, RelocateError, SteamCmdError, WorkshopError,
};
pub use logging::{LogManager, LogManagerBuilder};
pub use metadata::{Lookup, MetadataClient, WorkshopItem};
pub use progress::ProgressSnapshot;
pub use relocate::{ContentDescriptor, ContentType, RelocateReport};

pub type Result<T> = std::result::Result<T, WorkshopError>;
