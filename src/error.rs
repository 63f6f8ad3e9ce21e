use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Malformed event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(
        "Database schema version {found} is newer than supported version {supported}. Upgrade envirotrack or use --db to pick another file"
    )]
    SchemaVersion { found: i32, supported: i32 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No profile configured for platform '{0}'")]
    UnknownPlatform(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_ARGUMENTS: i32 = 2;
    pub const CONFIG_ERROR: i32 = 3;
    pub const DATABASE_ERROR: i32 = 6;
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Database(_) | Error::Storage(_) | Error::SchemaVersion { .. } => {
                exit_code::DATABASE_ERROR
            }
            Error::Config(_) | Error::UnknownPlatform(_) => exit_code::CONFIG_ERROR,
            Error::InvalidArgument(_) | Error::Json(_) => exit_code::INVALID_ARGUMENTS,
            Error::Io(_) => exit_code::GENERAL_ERROR,
        }
    }
}
