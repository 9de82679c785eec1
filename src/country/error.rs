//! Terminal outcomes of a country data server.

use std::path::PathBuf;

use thiserror::Error;

use super::Substatus;

/// A startup failure that leaves the country's record crashed.
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    #[error("country file error: {0}")]
    CountryFile(String),

    #[error("cached country file error: {0}")]
    FcpCountryFile(String),

    #[error("zip error in {path}: {reason}")]
    CountryZipFile { path: PathBuf, reason: String },

    #[error("retry limit exceeded downloading {code}.{ext}")]
    RetryLimitExceeded { code: String, ext: String },

    #[error("{0}")]
    Other(String),
}

impl ServerError {
    /// Substatus tag recorded on the crashed country.
    pub fn substatus(&self) -> Substatus {
        match self {
            ServerError::CountryFile(_) => Substatus::CountryFileError,
            ServerError::FcpCountryFile(_) => Substatus::FcpCountryFileError,
            ServerError::CountryZipFile { .. } => Substatus::CountryZipFileError,
            ServerError::RetryLimitExceeded { .. } => Substatus::RetryLimitExceeded,
            ServerError::Other(reason) => Substatus::Other(reason.clone()),
        }
    }
}

/// Why a data server task ended.
#[derive(Debug, Clone)]
pub enum ExitReason {
    /// Orderly shutdown.
    Stopped,
    /// The filtered record set came out empty. Normal for some countries.
    NoCities,
    /// Startup failed.
    Failed(ServerError),
}
