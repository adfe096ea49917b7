use std::{io, path::PathBuf};

use nix::errno::Errno;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Result type for layer access operations.
pub type Result<T> = std::result::Result<T, LayerError>;

/// Errors returned by a layer data source.
///
/// Every variant maps back to an errno through [`LayerError::raw_os_error`] so the protocol
/// bridge can answer the guest with the matching error code.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    /// The entry does not exist.
    #[error("no such file or directory")]
    NotFound,

    /// The caller is not allowed to access the entry (`EACCES`). `EPERM` is passed through as
    /// [`LayerError::Io`] so it keeps its own errno.
    #[error("permission denied")]
    PermissionDenied,

    /// A directory was expected.
    #[error("not a directory")]
    NotADirectory,

    /// The layer root could not be canonicalized.
    #[error("cannot resolve path {}: {source}", path.display())]
    PathResolution {
        /// The path as given by the caller.
        path: PathBuf,

        /// The underlying failure.
        #[source]
        source: io::Error,
    },

    /// The override attribute is present but does not hold a `uid:gid:mode` record.
    #[error("malformed override record: {0:?}")]
    MalformedOverride(String),

    /// Any other storage error, passed through unchanged.
    #[error(transparent)]
    Io(io::Error),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerError {
    /// Returns the errno equivalent of this error.
    pub fn raw_os_error(&self) -> i32 {
        match self {
            LayerError::NotFound => libc::ENOENT,
            LayerError::PermissionDenied => libc::EACCES,
            LayerError::NotADirectory => libc::ENOTDIR,
            LayerError::PathResolution { source, .. } => {
                source.raw_os_error().unwrap_or(libc::ENOENT)
            }
            LayerError::MalformedOverride(_) => libc::EINVAL,
            LayerError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<io::Error> for LayerError {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error().map(Errno::from_raw) {
            Some(Errno::ENOENT) => LayerError::NotFound,
            Some(Errno::EACCES) => LayerError::PermissionDenied,
            Some(Errno::ENOTDIR) => LayerError::NotADirectory,
            _ => LayerError::Io(err),
        }
    }
}

impl From<LayerError> for io::Error {
    fn from(err: LayerError) -> Self {
        match err {
            LayerError::Io(e) => e,
            other => io::Error::from_raw_os_error(other.raw_os_error()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
