//! Extended attribute syscalls on either form of [`FileOrPath`].
//!
//! The `f*xattr` calls don't work on symlinks opened with `O_PATH`, so entries that could not be
//! opened as a descriptor go through the `l*xattr` family, which does not follow a trailing
//! symlink.

use std::{ffi::CStr, io, os::fd::AsRawFd};

use crate::resolve::FileOrPath;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads the attribute `name` into `buf`. An empty `buf` asks for the value size.
pub(crate) fn getxattr(target: &FileOrPath, name: &CStr, buf: &mut [u8]) -> io::Result<usize> {
    let res = match target {
        // Safe because this will only modify the contents of `buf`.
        FileOrPath::File(file) => unsafe {
            libc::fgetxattr(
                file.as_raw_fd(),
                name.as_ptr(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        },
        // Safe because this will only modify the contents of `buf`.
        FileOrPath::Path(path) => unsafe {
            libc::lgetxattr(
                path.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        },
    };

    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(res as usize)
}

/// Reads the NUL separated attribute names into `buf`. An empty `buf` asks for the list size.
pub(crate) fn listxattr(target: &FileOrPath, buf: &mut [u8]) -> io::Result<usize> {
    let res = match target {
        // Safe because this will only modify the contents of `buf`.
        FileOrPath::File(file) => unsafe {
            libc::flistxattr(
                file.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
            )
        },
        // Safe because this will only modify the contents of `buf`.
        FileOrPath::Path(path) => unsafe {
            libc::llistxattr(
                path.as_ptr(),
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
            )
        },
    };

    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(res as usize)
}

/// Reads the attribute `name` straight from a descriptor.
pub(crate) fn fgetxattr(fd: &impl AsRawFd, name: &CStr, buf: &mut [u8]) -> io::Result<usize> {
    // Safe because this will only modify the contents of `buf`.
    let res = unsafe {
        libc::fgetxattr(
            fd.as_raw_fd(),
            name.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };

    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(res as usize)
}
