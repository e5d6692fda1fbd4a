#![forbid(unsafe_code)]
//! Error types for the e2fs engine.
//!
//! Defines `Ext2Error` and a `Result<T>` alias used throughout the workspace.
//! Includes errno mappings for the negative-errno VFS surface.

use thiserror::Error;

/// Unified error type for all e2fs operations.
#[derive(Debug, Error)]
pub enum Ext2Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid superblock: {0}")]
    InvalidSuperblock(String),

    #[error("corrupt metadata at block {block}: {detail}")]
    Corrupt { block: u64, detail: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no space left on device")]
    NoSpace,

    #[error("file exists")]
    Exists,

    #[error("is a directory")]
    IsDirectory,

    #[error("not a directory")]
    NotDirectory,

    #[error("name too long")]
    NameTooLong,

    #[error("file too large for direct block pointers")]
    FileTooBig,

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl Ext2Error {
    /// Convert this error into a POSIX errno for the negative-errno surface.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::InvalidSuperblock(_) => libc::EINVAL,
            Self::Corrupt { .. } => libc::EIO,
            Self::NotFound(_) => libc::ENOENT,
            Self::NoSpace => libc::ENOSPC,
            Self::Exists => libc::EEXIST,
            Self::IsDirectory => libc::EISDIR,
            Self::NotDirectory => libc::ENOTDIR,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::FileTooBig => libc::EFBIG,
            Self::Unsupported(_) => libc::EOPNOTSUPP,
        }
    }
}

/// Result alias using `Ext2Error`.
pub type Result<T> = std::result::Result<T, Ext2Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(Ext2Error::NoSpace.to_errno(), libc::ENOSPC);
        assert_eq!(Ext2Error::Exists.to_errno(), libc::EEXIST);
        assert_eq!(Ext2Error::IsDirectory.to_errno(), libc::EISDIR);
        assert_eq!(Ext2Error::FileTooBig.to_errno(), libc::EFBIG);
        assert_eq!(
            Ext2Error::Corrupt {
                block: 7,
                detail: "bad rec_len".into()
            }
            .to_errno(),
            libc::EIO
        );
    }

    #[test]
    fn io_error_preserves_raw_errno() {
        let err = Ext2Error::from(std::io::Error::from_raw_os_error(libc::ENOENT));
        assert_eq!(err.to_errno(), libc::ENOENT);
    }
}
