//! Layer access for overlay filesystems.
//!
//! An overlay engine merges several directory trees ("layers"). This crate provides the piece that
//! reads a single layer: metadata, directory entries, symlink targets and extended attributes,
//! through the [`DataSource`] trait. [`DirectLayer`] implements it on top of a host directory:
//!
//! - entries are opened relative to the layer root, and entries that can't be opened as a plain
//!   descriptor (symlinks, sockets) are handled by path instead;
//! - metadata comes from `statx(2)` with a field mask, or from `fstat(2)` on kernels without it;
//! - ownership and permissions can be overridden per entry with a `uid:gid:mode` record kept in an
//!   extended attribute, for layers that can't store them for real.
//!
//! ```rust,no_run
//! use layerfs::{Config, DataSource, DirectLayer, StatMask};
//!
//! let layer = DirectLayer::load(&Config {
//!     layer: "/var/lib/layers/base".into(),
//!     ..Default::default()
//! })?;
//!
//! let st = layer.statat(c"etc/passwd", libc::AT_SYMLINK_NOFOLLOW, StatMask::BASIC_STATS)?;
//! println!("owner {} mode {:o}", st.uid, st.mode);
//! # Ok::<(), layerfs::LayerError>(())
//! ```

mod config;
mod data_source;
mod dir;
mod direct;
mod error;
mod override_stat;
mod resolve;
mod stat;
mod xattr;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use config::Config;
pub use data_source::{DataSource, DirStream, GetxattrReply, ListxattrReply};
pub use dir::{Dir, DirEntry};
pub use direct::DirectLayer;
pub use error::{LayerError, Result};
pub use override_stat::{
    OverrideKind, OverrideRecord, XATTR_OVERRIDE_STAT, XATTR_PRIVILEGED_OVERRIDE_STAT,
};
pub use resolve::FileOrPath;
pub use stat::{Stat, StatMask, Timespec};
