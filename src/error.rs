//! Client I/O Error Types

use thiserror::Error;

use crate::inode::HandleType;

/// Result type alias for client I/O operations
pub type Result<T> = std::result::Result<T, Error>;

/// Client I/O error types
#[derive(Error, Debug)]
pub enum Error {
    // Remote outcomes
    #[error("Path does not exist: {0}")]
    PathNotExists(String),

    #[error("Not owner of entry: {0}")]
    NotOwner(String),

    #[error("Resource in use")]
    InUse,

    #[error("No space left on storage target")]
    NoSpace,

    #[error("Bad address")]
    AddressFault,

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("Internal error: {0}")]
    Internal(String),

    // Handle bookkeeping
    #[error("{0:?} handle released without a matching reference")]
    HandleNotReferenced(HandleType),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is transient and the operation may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Communication(_) | Error::Interrupted)
    }

    /// Convert to a POSIX errno for the VFS boundary
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Error::PathNotExists(_) => libc::ENOENT,
            Error::NotOwner(_) => libc::EPERM,
            Error::InUse => libc::EBUSY,
            Error::NoSpace => libc::ENOSPC,
            Error::AddressFault => libc::EFAULT,
            Error::Communication(_) => libc::ECOMM,
            Error::Interrupted => libc::EINTR,
            Error::Internal(_) | Error::HandleNotReferenced(_) => libc::EREMOTEIO,
            Error::Config(_) | Error::ConfigParse(_) => libc::EINVAL,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}
