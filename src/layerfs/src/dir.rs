use std::{
    ffi::CStr,
    fs::File,
    io,
    mem::ManuallyDrop,
    os::fd::{AsRawFd, IntoRawFd},
    ptr::NonNull,
};

use nix::errno::Errno;

use crate::data_source::DirStream;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A single directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Inode number as reported by the storage.
    pub ino: u64,

    /// Opaque stream position of the next entry.
    pub offset: u64,

    /// The `DT_*` type of the entry, `DT_UNKNOWN` when the storage doesn't report it.
    pub type_: u8,

    /// Entry name, without a trailing NUL.
    pub name: Vec<u8>,
}

/// A directory stream over an open directory of a layer.
///
/// The stream owns its descriptor; both are released by [`DirStream::close`] or on drop.
#[derive(Debug)]
pub struct Dir {
    stream: NonNull<libc::DIR>,
}

// The stream is only touched through `&mut self`, so moving it to another thread is fine. It is
// not `Sync`: a directory stream has a single reader.
unsafe impl Send for Dir {}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Dir {
    /// Turns an open directory into a stream. On failure the directory is closed.
    pub fn from_file(file: File) -> io::Result<Self> {
        // Safe because fdopendir only takes ownership of the fd when it succeeds.
        let stream = unsafe { libc::fdopendir(file.as_raw_fd()) };
        let Some(stream) = NonNull::new(stream) else {
            return Err(io::Error::last_os_error());
        };

        // The stream owns the fd now.
        let _ = file.into_raw_fd();

        Ok(Dir { stream })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl DirStream for Dir {
    fn next_entry(&mut self) -> io::Result<Option<DirEntry>> {
        // readdir only reports errors through errno, and returns NULL at the end of the stream
        // without touching it.
        Errno::clear();

        // Safe because `stream` is a valid open stream owned by us.
        let dirent = unsafe { libc::readdir64(self.stream.as_ptr()) };
        if dirent.is_null() {
            return match Errno::last() {
                Errno::UnknownErrno => Ok(None),
                errno => Err(io::Error::from_raw_os_error(errno as i32)),
            };
        }

        // Safe because readdir returned a valid entry that lives until the next call on the stream.
        let dirent = unsafe { &*dirent };
        let name = unsafe { CStr::from_ptr(dirent.d_name.as_ptr()) };

        Ok(Some(DirEntry {
            ino: dirent.d_ino,
            offset: dirent.d_off as u64,
            type_: dirent.d_type,
            name: name.to_bytes().to_vec(),
        }))
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        let this = ManuallyDrop::new(*self);
        let stream = this.stream;

        // Safe because we own the stream and it is not used after this.
        let res = unsafe { libc::closedir(stream.as_ptr()) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

impl Drop for Dir {
    fn drop(&mut self) {
        // Safe because we own the stream and it is not used after this.
        let res = unsafe { libc::closedir(self.stream.as_ptr()) };
        if res < 0 {
            log::error!(
                "failed to close directory stream: {}",
                io::Error::last_os_error()
            );
        }
    }
}
