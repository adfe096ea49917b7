//! Opening entries relative to a layer root, with a path fallback for entries that cannot be
//! opened as a plain descriptor.

use std::{
    ffi::{CStr, CString},
    fs::File,
    io,
    os::{
        fd::{AsRawFd, FromRawFd, RawFd},
        unix::ffi::OsStrExt,
    },
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use nix::errno::Errno;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Resolve the path as if the directory fd were the root of the filesystem.
const RESOLVE_IN_ROOT: u64 = 0x10;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Represents either an open file or the absolute path of an entry that could not be opened.
#[derive(Debug)]
pub enum FileOrPath {
    /// An open descriptor, closed when dropped.
    File(File),

    /// The layer root joined with the relative path.
    Path(CString),
}

/// How a failed `openat2(2)` call should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Openat2Fallback {
    /// The kernel does not implement `openat2`; use `openat` from now on.
    Disable,

    /// This call was refused but others may succeed; use `openat` for it only.
    Once,

    /// A real failure of the open itself.
    None,
}

/// Argument block of `openat2(2)`.
#[repr(C)]
struct OpenHow {
    flags: u64,
    mode: u64,
    resolve: u64,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Calls `f` until it stops failing with `EINTR`.
pub(crate) fn retry_eintr<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match f() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            res => return res,
        }
    }
}

/// Classifies an `openat2(2)` failure.
pub(crate) fn openat2_fallback(err: &io::Error) -> Openat2Fallback {
    match err.raw_os_error().map(Errno::from_raw) {
        Some(Errno::ENOSYS) => Openat2Fallback::Disable,
        // Older seccomp profiles deny unknown syscalls with EPERM.
        Some(Errno::EINVAL) | Some(Errno::EPERM) => Openat2Fallback::Once,
        _ => Openat2Fallback::None,
    }
}

/// Opens `path` relative to `dirfd`, confined to `dirfd` when `openat2` is usable.
///
/// `openat2_supported` is cleared the first time the kernel reports `ENOSYS`, after which only
/// plain `openat` is used.
pub(crate) fn safe_openat(
    dirfd: RawFd,
    path: &CStr,
    flags: i32,
    mode: libc::mode_t,
    openat2_supported: &AtomicBool,
) -> io::Result<File> {
    if openat2_supported.load(Ordering::Relaxed) {
        // openat2 rejects a mode unless the call can create a file.
        let creates = flags & libc::O_CREAT != 0 || flags & libc::O_TMPFILE == libc::O_TMPFILE;
        let how = OpenHow {
            flags: flags as u64,
            mode: if creates { mode as u64 } else { 0 },
            resolve: RESOLVE_IN_ROOT,
        };

        // Safe because the kernel only reads `how` and we check the return value.
        let fd = unsafe {
            libc::syscall(
                libc::SYS_openat2,
                dirfd,
                path.as_ptr(),
                &how as *const OpenHow,
                std::mem::size_of::<OpenHow>(),
            )
        };
        if fd >= 0 {
            // Safe because we just opened this fd.
            return Ok(unsafe { File::from_raw_fd(fd as RawFd) });
        }

        let err = io::Error::last_os_error();
        match openat2_fallback(&err) {
            Openat2Fallback::Disable => {
                log::debug!("openat2 is not supported, falling back to openat");
                openat2_supported.store(false, Ordering::Relaxed);
            }
            Openat2Fallback::Once => {}
            Openat2Fallback::None => return Err(err),
        }
    }

    // Safe because this doesn't modify any memory and we check the return value.
    let fd = unsafe { libc::openat(dirfd, path.as_ptr(), flags, mode as libc::c_uint) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    // Safe because we just opened this fd.
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Joins the layer root and a relative path into a C string.
pub(crate) fn full_path(root: &Path, path: &CStr) -> io::Result<CString> {
    let mut full = root.as_os_str().as_bytes().to_vec();
    if !path.to_bytes().is_empty() {
        full.push(b'/');
        full.extend_from_slice(path.to_bytes());
    }

    CString::new(full).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

/// Opens `path` read-only relative to `root`, or returns its full path when it can't be opened.
///
/// Symlinks (`ELOOP` under `O_NOFOLLOW`), directories refused by `flags` (`EISDIR`) and special
/// files without a backing device (`ENXIO`) are returned as [`FileOrPath::Path`] so the `l*`
/// family of syscalls can be used on them.
pub(crate) fn open_file_or_path(
    root: &File,
    root_path: &Path,
    path: &CStr,
    flags: i32,
    openat2_supported: &AtomicBool,
) -> io::Result<FileOrPath> {
    let flags = libc::O_RDONLY | libc::O_NONBLOCK | libc::O_NOFOLLOW | libc::O_CLOEXEC | flags;
    let res = retry_eintr(|| safe_openat(root.as_raw_fd(), path, flags, 0, openat2_supported));

    match res {
        Ok(file) => Ok(FileOrPath::File(file)),
        Err(e)
            if matches!(
                e.raw_os_error().map(Errno::from_raw),
                Some(Errno::ELOOP) | Some(Errno::EISDIR) | Some(Errno::ENXIO)
            ) =>
        {
            Ok(FileOrPath::Path(full_path(root_path, path)?))
        }
        Err(e) => Err(e),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
