#![forbid(unsafe_code)]
//! Bit-exact codecs for the ext2 revision-1 on-disk format.
//!
//! Parsers validate structure and report [`ParseError`]; writers patch only
//! the fields this engine models, so unmodelled bytes (OS-dependent inode
//! areas, superblock identity fields) survive read-modify-write cycles.

mod dir;
mod group_desc;
mod inode;
mod superblock;

pub use dir::{parse_entries, record_len, serialize_entries, walk_entries, DirEntry};
pub use group_desc::GroupDesc;
pub use inode::RawInode;
pub use superblock::Superblock;

use serde::{Deserialize, Serialize};

/// Directory-entry file type byte (`EXT2_FT_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FileType {
    Unknown = 0,
    RegFile = 1,
    Dir = 2,
    Chrdev = 3,
    Blkdev = 4,
    Fifo = 5,
    Sock = 6,
    Symlink = 7,
}

impl FileType {
    #[must_use]
    pub fn from_raw(val: u8) -> Self {
        match val {
            1 => Self::RegFile,
            2 => Self::Dir,
            3 => Self::Chrdev,
            4 => Self::Blkdev,
            5 => Self::Fifo,
            6 => Self::Sock,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }

    /// Directory-entry type byte for a new inode's mode.
    #[must_use]
    pub fn from_mode(mode: u16) -> Self {
        if e2fs_types::is_regular_file(mode) {
            Self::RegFile
        } else if e2fs_types::is_directory(mode) {
            Self::Dir
        } else if e2fs_types::is_character_device(mode) {
            Self::Chrdev
        } else if e2fs_types::is_block_device(mode) {
            Self::Blkdev
        } else if e2fs_types::is_fifo(mode) {
            Self::Fifo
        } else if e2fs_types::is_socket(mode) {
            Self::Sock
        } else if e2fs_types::is_symlink(mode) {
            Self::Symlink
        } else {
            Self::Unknown
        }
    }
}
