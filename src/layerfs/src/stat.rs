//! Stat results and the raw metadata syscalls behind them.
//!
//! Two tiers are provided: `statx(2)`, which takes a field mask and can skip synchronizing with
//! remote storage, and the conventional `fstat64`/`fstatat64` pair used when the running kernel
//! does not implement `statx`. Callers decide which tier to use; this module only performs the
//! calls and converts both kernel records into a single [`Stat`].

use std::{
    ffi::CStr,
    io,
    mem::MaybeUninit,
    os::fd::RawFd,
};

use bitflags::bitflags;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

bitflags! {
    /// Fields a caller needs from a metadata query. Mirrors the `STATX_*` selectors.
    pub struct StatMask: u32 {
        const TYPE = libc::STATX_TYPE;
        const MODE = libc::STATX_MODE;
        const NLINK = libc::STATX_NLINK;
        const UID = libc::STATX_UID;
        const GID = libc::STATX_GID;
        const ATIME = libc::STATX_ATIME;
        const MTIME = libc::STATX_MTIME;
        const CTIME = libc::STATX_CTIME;
        const INO = libc::STATX_INO;
        const SIZE = libc::STATX_SIZE;
        const BLOCKS = libc::STATX_BLOCKS;
        const BASIC_STATS = libc::STATX_BASIC_STATS;
    }
}

/// A point in time as stored in an inode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timespec {
    /// Seconds since the epoch.
    pub sec: i64,

    /// Nanoseconds within the second.
    pub nsec: i64,
}

/// File metadata as seen through a layer.
///
/// A `Stat` is built fresh for every query. Fields not requested through [`StatMask`] may be
/// zero when the kernel chose not to fill them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Device containing the entry.
    pub dev: u64,

    /// Inode number.
    pub ino: u64,

    /// File type and permission bits.
    pub mode: u32,

    /// Number of hard links.
    pub nlink: u64,

    /// Owner id.
    pub uid: u32,

    /// Group id.
    pub gid: u32,

    /// Device id, for special files.
    pub rdev: u64,

    /// Size in bytes.
    pub size: i64,

    /// Preferred I/O block size.
    pub blksize: i64,

    /// Number of 512 byte blocks allocated.
    pub blocks: i64,

    /// Last access time.
    pub atime: Timespec,

    /// Last modification time.
    pub mtime: Timespec,

    /// Last status change time.
    pub ctime: Timespec,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Stat {
    /// Returns the file type bits of `mode`.
    pub fn file_type(&self) -> u32 {
        self.mode & libc::S_IFMT
    }

    /// Returns the permission bits of `mode`, including setuid, setgid and sticky.
    pub fn permissions(&self) -> u32 {
        self.mode & !libc::S_IFMT
    }

    /// Whether this is a directory.
    pub fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR
    }

    /// Whether this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.file_type() == libc::S_IFLNK
    }
}

impl Default for StatMask {
    fn default() -> Self {
        StatMask::BASIC_STATS
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Performs a `statx` relative to `dirfd` without synchronizing with remote storage.
///
/// An empty `path` together with `AT_EMPTY_PATH` in `flags` queries `dirfd` itself.
pub(crate) fn statx(dirfd: RawFd, path: &CStr, flags: i32, mask: StatMask) -> io::Result<Stat> {
    let mut stx = MaybeUninit::<libc::statx>::zeroed();

    // Safe because this only writes into `stx` and we check the return value.
    let res = unsafe {
        libc::statx(
            dirfd,
            path.as_ptr(),
            libc::AT_STATX_DONT_SYNC | flags,
            mask.bits(),
            stx.as_mut_ptr(),
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    // Safe because the kernel guarantees that the struct is now fully initialized.
    Ok(Stat::from(unsafe { stx.assume_init() }))
}

/// Performs a conventional `fstat64` on an open descriptor.
pub(crate) fn fstat(fd: RawFd) -> io::Result<Stat> {
    let mut st = MaybeUninit::<libc::stat64>::zeroed();

    // Safe because this only writes into `st` and we check the return value.
    let res = unsafe { libc::fstat64(fd, st.as_mut_ptr()) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(Stat::from(unsafe { st.assume_init() }))
}

/// Performs a conventional `fstatat64` relative to `dirfd`.
pub(crate) fn fstatat(dirfd: RawFd, path: &CStr, flags: i32) -> io::Result<Stat> {
    let mut st = MaybeUninit::<libc::stat64>::zeroed();

    // Safe because this only writes into `st` and we check the return value.
    let res = unsafe { libc::fstatat64(dirfd, path.as_ptr(), st.as_mut_ptr(), flags) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(Stat::from(unsafe { st.assume_init() }))
}

/// Whether `err` means the kernel does not implement the requested syscall.
pub(crate) fn is_unsupported(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOSYS)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<libc::statx> for Stat {
    fn from(stx: libc::statx) -> Self {
        Stat {
            dev: libc::makedev(stx.stx_dev_major, stx.stx_dev_minor) as _,
            ino: stx.stx_ino,
            mode: stx.stx_mode as _,
            nlink: stx.stx_nlink as _,
            uid: stx.stx_uid,
            gid: stx.stx_gid,
            rdev: libc::makedev(stx.stx_rdev_major, stx.stx_rdev_minor) as _,
            size: stx.stx_size as _,
            blksize: stx.stx_blksize as _,
            blocks: stx.stx_blocks as _,
            atime: Timespec {
                sec: stx.stx_atime.tv_sec,
                nsec: stx.stx_atime.tv_nsec as _,
            },
            mtime: Timespec {
                sec: stx.stx_mtime.tv_sec,
                nsec: stx.stx_mtime.tv_nsec as _,
            },
            ctime: Timespec {
                sec: stx.stx_ctime.tv_sec,
                nsec: stx.stx_ctime.tv_nsec as _,
            },
        }
    }
}

impl From<libc::stat64> for Stat {
    fn from(st: libc::stat64) -> Self {
        Stat {
            dev: st.st_dev as _,
            ino: st.st_ino as _,
            mode: st.st_mode as _,
            nlink: st.st_nlink as _,
            uid: st.st_uid,
            gid: st.st_gid,
            rdev: st.st_rdev as _,
            size: st.st_size as _,
            blksize: st.st_blksize as _,
            blocks: st.st_blocks as _,
            atime: Timespec {
                sec: st.st_atime as _,
                nsec: st.st_atime_nsec as _,
            },
            mtime: Timespec {
                sec: st.st_mtime as _,
                nsec: st.st_mtime_nsec as _,
            },
            ctime: Timespec {
                sec: st.st_ctime as _,
                nsec: st.st_ctime_nsec as _,
            },
        }
    }
}

impl From<Stat> for libc::stat64 {
    fn from(stat: Stat) -> Self {
        // stat64 may contain padding and reserved fields depending on the architecture, so start
        // from a zeroed struct and set what we have.
        let mut st = unsafe { MaybeUninit::<libc::stat64>::zeroed().assume_init() };

        st.st_dev = stat.dev as _;
        st.st_ino = stat.ino as _;
        st.st_mode = stat.mode as _;
        st.st_nlink = stat.nlink as _;
        st.st_uid = stat.uid;
        st.st_gid = stat.gid;
        st.st_rdev = stat.rdev as _;
        st.st_size = stat.size as _;
        st.st_blksize = stat.blksize as _;
        st.st_blocks = stat.blocks as _;
        st.st_atime = stat.atime.sec as _;
        st.st_atime_nsec = stat.atime.nsec as _;
        st.st_mtime = stat.mtime.sec as _;
        st.st_mtime_nsec = stat.mtime.nsec as _;
        st.st_ctime = stat.ctime.sec as _;
        st.st_ctime_nsec = stat.ctime.nsec as _;

        st
    }
}
