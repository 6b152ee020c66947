use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("No YYYY-MM-DD date found in file name: {file_name}")]
    DateNotFound { file_name: String },

    #[error("Unable to read raster {path:?}: {reason}")]
    RasterRead { path: PathBuf, reason: String },

    #[error("Item {id} from {path:?} duplicates an item already in the collection")]
    DuplicateItem { id: String, path: PathBuf },

    #[error("Remote job failed: {0}")]
    RemoteJob(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid selection file: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Unable to serialize selection: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),
}

impl CatalogError {
    pub fn raster_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::RasterRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
