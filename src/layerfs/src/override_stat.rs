//! Owner and permission overrides stored in extended attributes.
//!
//! A layer that cannot physically store ownership (for example one populated by an unprivileged
//! user) records the intended owner, group and permission bits of each entry as
//! `"<uid>:<gid>:<mode-octal>"` in an extended attribute. When a stat is served the record replaces
//! what the storage reports, keeping only the file type from the physical entry.

use std::{ffi::CStr, fmt};

use crate::{
    error::{LayerError, Result},
    stat::Stat,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Override attribute that only privileged processes can write.
pub const XATTR_PRIVILEGED_OVERRIDE_STAT: &CStr = c"security.fuseoverlayfs.override_stat";

/// Override attribute in the user namespace.
pub const XATTR_OVERRIDE_STAT: &CStr = c"user.fuseoverlayfs.override_stat";

/// Largest attribute value we are willing to read. A well-formed record is far shorter.
pub(crate) const OVERRIDE_VALUE_MAX: usize = 63;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Which override attribute a layer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    /// `security.fuseoverlayfs.override_stat`
    Privileged,

    /// `user.fuseoverlayfs.override_stat`
    Unprivileged,
}

/// A decoded override record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideRecord {
    /// Owner id to report.
    pub uid: u32,

    /// Group id to report.
    pub gid: u32,

    /// Permission bits to report. File type bits, if any, are ignored.
    pub mode: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OverrideKind {
    /// Returns the extended attribute name holding records of this kind.
    pub fn xattr_name(self) -> &'static CStr {
        match self {
            OverrideKind::Privileged => XATTR_PRIVILEGED_OVERRIDE_STAT,
            OverrideKind::Unprivileged => XATTR_OVERRIDE_STAT,
        }
    }
}

impl OverrideRecord {
    /// Parses the raw attribute value `uid:gid:mode`, with `uid` and `gid` in decimal and `mode` in
    /// octal. Trailing NUL bytes and whitespace are tolerated.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let malformed = || LayerError::MalformedOverride(String::from_utf8_lossy(raw).into_owned());

        let text = std::str::from_utf8(raw).map_err(|_| malformed())?;
        let text = text.trim_end_matches(|c: char| c == '\0' || c.is_ascii_whitespace());

        let mut fields = text.split(':');
        let (Some(uid), Some(gid), Some(mode), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed());
        };

        // from_str_radix accepts a leading '+', which the record format does not.
        let parse = |field: &str, radix| {
            if field.starts_with('+') {
                return None;
            }
            u32::from_str_radix(field, radix).ok()
        };

        match (parse(uid, 10), parse(gid, 10), parse(mode, 8)) {
            (Some(uid), Some(gid), Some(mode)) => Ok(OverrideRecord { uid, gid, mode }),
            _ => Err(malformed()),
        }
    }

    /// Returns the attribute value for this record.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Replaces owner, group and permission bits of `st` with the record's values.
    pub fn apply(&self, st: &mut Stat) {
        st.uid = self.uid;
        st.gid = self.gid;
        st.mode = st.file_type() | (self.mode & !libc::S_IFMT);
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for OverrideRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{:o}", self.uid, self.gid, self.mode)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
