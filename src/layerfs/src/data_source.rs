//! The capability set an overlay engine uses to read a single layer.
//!
//! A data source hides how a layer is reached. The engine only ever hands it paths relative to the
//! layer root and gets back owned descriptors, stat results and directory streams.

use std::{ffi::CStr, fs::File, io, os::fd::BorrowedFd};

use crate::{
    config::Config,
    dir::DirEntry,
    error::{LayerError, Result},
    stat::{Stat, StatMask},
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Reply to a `getxattr` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetxattrReply {
    /// The value of the attribute, when the caller passed a non-zero size.
    Value(Vec<u8>),

    /// The size of the value, when the caller passed a size of 0.
    Count(u32),
}

/// Reply to a `listxattr` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListxattrReply {
    /// NUL separated attribute names, when the caller passed a non-zero size.
    Names(Vec<u8>),

    /// The size of the name list, when the caller passed a size of 0.
    Count(u32),
}

/// A forward-only stream of directory entries.
pub trait DirStream: Send {
    /// Returns the next entry, or `None` once the stream is exhausted.
    fn next_entry(&mut self) -> io::Result<Option<DirEntry>>;

    /// Releases the stream and its descriptor.
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Object-safe access to one storage layer.
///
/// Implementations for other access modes only need to provide the required methods; the optional
/// ones return `ENOSYS` by default.
#[allow(unused_variables)]
pub trait DataSource: Send + Sync {
    /// Number of logical layers the source at `config.layer` provides.
    fn num_of_layers(config: &Config) -> Result<usize>
    where
        Self: Sized;

    /// Loads the layer described by `config`.
    fn load(config: &Config) -> Result<Self>
    where
        Self: Sized;

    /// Releases the resources held by the layer.
    fn cleanup(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    /// Whether `path` exists, without following a trailing symlink.
    fn file_exists(&self, path: &CStr) -> Result<bool>;

    /// Stats `path` relative to the layer root. `flags` takes `AT_*` flags such as
    /// `AT_SYMLINK_NOFOLLOW`.
    fn statat(&self, path: &CStr, flags: i32, mask: StatMask) -> Result<Stat>;

    /// Stats an already open descriptor that refers to `path`.
    fn fstat(&self, fd: BorrowedFd<'_>, path: &CStr, mask: StatMask) -> Result<Stat>;

    /// Opens the directory at `path` for reading.
    fn opendir(&self, path: &CStr) -> Result<Box<dyn DirStream>>;

    /// Closes a stream returned by [`DataSource::opendir`].
    fn closedir(&self, dir: Box<dyn DirStream>) -> Result<()> {
        dir.close().map_err(LayerError::from)
    }

    /// Opens `path` relative to the layer root.
    fn openat(&self, path: &CStr, flags: i32, mode: libc::mode_t) -> Result<File>;

    /// Reads the target of the symlink at `path` into `buf`, returning the number of bytes written.
    /// The target is truncated to the buffer size and is not NUL terminated.
    fn readlinkat(&self, path: &CStr, buf: &mut [u8]) -> Result<usize> {
        Err(enosys())
    }

    /// Reads the extended attribute `name` of `path`. A `size` of 0 asks for the value size only.
    fn getxattr(&self, path: &CStr, name: &CStr, size: u32) -> Result<GetxattrReply> {
        Err(enosys())
    }

    /// Lists the extended attributes of `path`. A `size` of 0 asks for the list size only.
    fn listxattr(&self, path: &CStr, size: u32) -> Result<ListxattrReply> {
        Err(enosys())
    }

    /// Whether the engine must still apply its own uid/gid remapping to this layer.
    fn must_be_remapped(&self) -> bool {
        true
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn enosys() -> LayerError {
    LayerError::Io(io::Error::from_raw_os_error(libc::ENOSYS))
}
