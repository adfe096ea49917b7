use std::{
    ffi::{CStr, CString},
    fs::File,
    io,
    os::{
        fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd},
        unix::ffi::OsStrExt,
    },
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use nix::errno::Errno;

use crate::{
    config::Config,
    data_source::{DataSource, DirStream, GetxattrReply, ListxattrReply},
    dir::Dir,
    error::{LayerError, Result},
    override_stat::{OverrideKind, OverrideRecord, OVERRIDE_VALUE_MAX},
    resolve::{self, FileOrPath},
    stat::{self, Stat, StatMask},
    xattr,
};

//--------------------------------------------------------------------------------------------------
// Modules
//--------------------------------------------------------------------------------------------------

#[path = "tests/direct/mod.rs"]
#[cfg(test)]
mod tests;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A layer backed by a directory that is accessed directly through the host filesystem.
///
/// All paths handed to a `DirectLayer` are relative to its root. Every operation opens its own
/// transient descriptor relative to the root descriptor, so a layer can be shared between threads.
///
/// ## Owner and permission overrides
///
/// When the layer root carries an override attribute (see [`OverrideKind`]), every entry's stat is
/// patched with the `uid:gid:mode` record stored in the same attribute on that entry. The
/// privileged attribute is probed first and wins; the unprivileged one is only looked for when the
/// privileged one is absent. A layer carrying neither reports the storage's ownership as is and
/// [`DataSource::must_be_remapped`] returns `true`.
#[derive(Debug)]
pub struct DirectLayer {
    /// Canonical path of the layer root.
    path: PathBuf,

    /// The layer root, opened as a directory.
    root: File,

    /// The override attribute detected on the root, if any.
    override_kind: Option<OverrideKind>,

    /// Cleared the first time the kernel reports that `statx` is not implemented.
    statx_supported: AtomicBool,

    /// Cleared the first time the kernel reports that `openat2` is not implemented.
    openat2_supported: AtomicBool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DirectLayer {
    /// Returns the canonical path of the layer root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the layer root descriptor.
    pub fn root(&self) -> BorrowedFd<'_> {
        self.root.as_fd()
    }

    /// Returns the override attribute this layer uses, if any.
    pub fn override_kind(&self) -> Option<OverrideKind> {
        self.override_kind
    }

    /// Whether the layer root carries the unprivileged override attribute.
    pub fn has_stat_override(&self) -> bool {
        self.override_kind == Some(OverrideKind::Unprivileged)
    }

    /// Whether the layer root carries the privileged override attribute.
    pub fn has_privileged_stat_override(&self) -> bool {
        self.override_kind == Some(OverrideKind::Privileged)
    }

    /// Opens the canonical root as a directory.
    fn open_root(path: &Path) -> io::Result<File> {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| einval())?;

        resolve::retry_eintr(|| {
            // Safe because this doesn't modify any memory and we check the return value.
            let fd = unsafe {
                libc::open(
                    c_path.as_ptr(),
                    libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
                )
            };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }

            // Safe because we just opened this fd.
            Ok(unsafe { File::from_raw_fd(fd) })
        })
    }

    /// Looks for the override attributes on the layer root, privileged first.
    fn probe_override(root: &File) -> Option<OverrideKind> {
        let mut buf = [0u8; OVERRIDE_VALUE_MAX + 1];

        [OverrideKind::Privileged, OverrideKind::Unprivileged]
            .into_iter()
            .find(|kind| match xattr::fgetxattr(root, kind.xattr_name(), &mut buf) {
                Ok(_) => true,
                Err(e) => {
                    log::trace!("no {:?} override on layer root: {}", kind, e);
                    false
                }
            })
    }

    /// Opens `path` read-only relative to the root, or returns its full path when it can't be
    /// opened (symlinks, sockets and the like). The returned descriptor is owned by the caller.
    pub fn open_file_or_path(&self, path: &CStr) -> Result<FileOrPath> {
        Ok(self.resolve(path)?)
    }

    fn resolve(&self, path: &CStr) -> io::Result<FileOrPath> {
        resolve::open_file_or_path(&self.root, &self.path, path, 0, &self.openat2_supported)
    }

    /// Runs `rich` while `statx` is usable and `fallback` once it is known not to be.
    fn tiered_stat(
        &self,
        rich: impl FnOnce() -> io::Result<Stat>,
        fallback: impl FnOnce() -> io::Result<Stat>,
    ) -> io::Result<Stat> {
        if self.statx_supported.load(Ordering::Relaxed) {
            match rich() {
                Err(e) if stat::is_unsupported(&e) => {
                    log::debug!("statx is not supported, falling back to fstat");
                    self.statx_supported.store(false, Ordering::Relaxed);
                }
                res => return res,
            }
        }

        fallback()
    }

    /// Patches `st` with the override record of the entry, read through `fd` when there is one.
    ///
    /// A missing attribute leaves `st` untouched. A malformed one fails the whole stat.
    fn override_stat(&self, fd: Option<BorrowedFd<'_>>, path: &CStr, st: &mut Stat) -> Result<()> {
        let Some(kind) = self.override_kind else {
            return Ok(());
        };

        let name = kind.xattr_name();
        let mut buf = [0u8; OVERRIDE_VALUE_MAX];

        let res = match fd {
            // O_PATH descriptors can't serve xattr calls.
            Some(fd) => match xattr::fgetxattr(&fd, name, &mut buf) {
                Err(e) if e.raw_os_error() == Some(libc::EBADF) => {
                    self.getxattr_by_path(path, name, &mut buf)
                }
                res => res,
            },
            None => self.getxattr_by_path(path, name, &mut buf),
        };

        let len = match res {
            Ok(len) => len,
            Err(e) => {
                return match e.raw_os_error().map(Errno::from_raw) {
                    Some(Errno::ENODATA) => Ok(()),
                    Some(Errno::ERANGE) => Err(LayerError::MalformedOverride(format!(
                        "value of {} is longer than {} bytes",
                        name.to_string_lossy(),
                        OVERRIDE_VALUE_MAX
                    ))),
                    _ => Err(e.into()),
                };
            }
        };

        OverrideRecord::decode(&buf[..len])?.apply(st);
        Ok(())
    }

    fn getxattr_by_path(&self, path: &CStr, name: &CStr, buf: &mut [u8]) -> io::Result<usize> {
        let target = self.resolve(path)?;
        xattr::getxattr(&target, name, buf)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns an "invalid argument" error
fn einval() -> io::Error {
    io::Error::from_raw_os_error(libc::EINVAL)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl DataSource for DirectLayer {
    fn num_of_layers(_config: &Config) -> Result<usize> {
        Ok(1)
    }

    fn load(config: &Config) -> Result<Self> {
        let path = std::fs::canonicalize(&config.layer).map_err(|source| {
            log::error!("cannot resolve path {}: {}", config.layer.display(), source);
            LayerError::PathResolution {
                path: config.layer.clone(),
                source,
            }
        })?;

        let root = Self::open_root(&path).map_err(|e| {
            log::error!("cannot open layer root {}: {}", path.display(), e);
            LayerError::from(e)
        })?;

        let override_kind = Self::probe_override(&root);
        log::debug!(
            "loaded layer {} (override: {:?})",
            path.display(),
            override_kind
        );

        Ok(DirectLayer {
            path,
            root,
            override_kind,
            statx_supported: AtomicBool::new(config.statx),
            openat2_supported: AtomicBool::new(config.resolve_in_root),
        })
    }

    fn cleanup(self: Box<Self>) -> Result<()> {
        let DirectLayer { root, .. } = *self;
        let fd = root.into_raw_fd();

        // Safe because we own the fd and it is not used after this.
        let res = unsafe { libc::close(fd) };
        if res < 0 {
            return Err(io::Error::last_os_error().into());
        }

        Ok(())
    }

    fn file_exists(&self, path: &CStr) -> Result<bool> {
        // Safe because this doesn't modify any memory and we check the return value.
        let res = unsafe {
            libc::faccessat(
                self.root.as_raw_fd(),
                path.as_ptr(),
                libc::F_OK,
                libc::AT_SYMLINK_NOFOLLOW | libc::AT_EACCESS,
            )
        };

        let res = if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINVAL) {
                // Older kernels reject the flags, a stat answers the same question.
                stat::fstatat(self.root.as_raw_fd(), path, libc::AT_SYMLINK_NOFOLLOW).map(|_| ())
            } else {
                Err(err)
            }
        } else {
            Ok(())
        };

        match res {
            Ok(()) => Ok(true),
            Err(e)
                if matches!(
                    e.raw_os_error().map(Errno::from_raw),
                    Some(Errno::ENOENT) | Some(Errno::ENOTDIR)
                ) =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn statat(&self, path: &CStr, flags: i32, mask: StatMask) -> Result<Stat> {
        let dirfd = self.root.as_raw_fd();
        let mut st = self.tiered_stat(
            || stat::statx(dirfd, path, flags, mask),
            || stat::fstatat(dirfd, path, flags),
        )?;

        self.override_stat(None, path, &mut st)?;
        Ok(st)
    }

    fn fstat(&self, fd: BorrowedFd<'_>, path: &CStr, mask: StatMask) -> Result<Stat> {
        let raw_fd = fd.as_raw_fd();
        let mut st = self.tiered_stat(
            || stat::statx(raw_fd, c"", libc::AT_EMPTY_PATH, mask),
            || stat::fstat(raw_fd),
        )?;

        self.override_stat(Some(fd), path, &mut st)?;
        Ok(st)
    }

    fn opendir(&self, path: &CStr) -> Result<Box<dyn DirStream>> {
        let file = resolve::retry_eintr(|| {
            resolve::safe_openat(
                self.root.as_raw_fd(),
                path,
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
                0,
                &self.openat2_supported,
            )
        })?;

        Ok(Box::new(Dir::from_file(file)?))
    }

    fn openat(&self, path: &CStr, flags: i32, mode: libc::mode_t) -> Result<File> {
        let file = resolve::retry_eintr(|| {
            resolve::safe_openat(
                self.root.as_raw_fd(),
                path,
                flags | libc::O_CLOEXEC,
                mode,
                &self.openat2_supported,
            )
        })?;

        Ok(file)
    }

    fn readlinkat(&self, path: &CStr, buf: &mut [u8]) -> Result<usize> {
        let len = resolve::retry_eintr(|| {
            // Safe because this will only modify the contents of `buf` and we check the return value.
            let res = unsafe {
                libc::readlinkat(
                    self.root.as_raw_fd(),
                    path.as_ptr(),
                    buf.as_mut_ptr() as *mut libc::c_char,
                    buf.len(),
                )
            };
            if res < 0 {
                return Err(io::Error::last_os_error());
            }

            Ok(res as usize)
        })?;

        Ok(len)
    }

    fn getxattr(&self, path: &CStr, name: &CStr, size: u32) -> Result<GetxattrReply> {
        let mut buf = vec![0; size as usize];
        let target = self.open_file_or_path(path)?;
        let len = xattr::getxattr(&target, name, &mut buf)?;

        if size == 0 {
            Ok(GetxattrReply::Count(len as u32))
        } else {
            // Truncate the buffer to the actual length of the value
            buf.truncate(len);
            Ok(GetxattrReply::Value(buf))
        }
    }

    fn listxattr(&self, path: &CStr, size: u32) -> Result<ListxattrReply> {
        let mut buf = vec![0; size as usize];
        let target = self.open_file_or_path(path)?;
        let len = xattr::listxattr(&target, &mut buf)?;

        if size == 0 {
            Ok(ListxattrReply::Count(len as u32))
        } else {
            // Truncate the buffer to the actual length of the list
            buf.truncate(len);
            Ok(ListxattrReply::Names(buf))
        }
    }

    fn must_be_remapped(&self) -> bool {
        self.override_kind.is_none()
    }
}
