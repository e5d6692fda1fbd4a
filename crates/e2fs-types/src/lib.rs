#![forbid(unsafe_code)]
//! Identifier newtypes and on-disk field helpers shared across the workspace.
//!
//! Everything on disk is little-endian; the `read_le_*`/`write_le_*` helpers
//! bounds-check every access and report failures through [`ParseError`]
//! instead of panicking.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Device sector size fixed by the block-device contract.
pub const SECTOR_SIZE: usize = 512;

/// The superblock always lives at byte offset 1024, regardless of block size.
pub const SUPERBLOCK_OFFSET: usize = 1024;
pub const SUPERBLOCK_SIZE: usize = 1024;
pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

/// Size of one block-group descriptor on disk.
pub const GROUP_DESC_SIZE: usize = 32;

/// Number of direct block pointers in `i_block`.
pub const NDIR_BLOCKS: usize = 12;
/// `i_block` slot of the single-indirect pointer.
pub const IND_BLOCK: usize = 12;
/// `i_block` slot of the double-indirect pointer.
pub const DIND_BLOCK: usize = 13;
/// `i_block` slot of the triple-indirect pointer.
pub const TIND_BLOCK: usize = 14;
/// Total `i_block` slots (12 direct + 3 indirect).
pub const N_BLOCKS: usize = 15;

/// Symlink targets shorter than this are stored inline in `i_block`.
pub const INLINE_SYMLINK_MAX: usize = 60;

/// First non-reserved inode on revision-0 filesystems.
pub const FIRST_INO_REV0: u32 = 11;

/// Longest directory-entry name (`name_len` is a u8, capped by convention).
pub const NAME_MAX: usize = 255;

/// Physical block number on the filesystem (32-bit in ext2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockIndex(pub u32);

/// 1-based inode index within a filesystem. Root is 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeIndex(pub u32);

impl InodeIndex {
    pub const ROOT: Self = Self(2);
}

/// 1-based block-group index, matching the on-disk BGDT addressing used by
/// the inode location math (`group = (ino - 1) / inodes_per_group + 1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupIndex(pub u32);

/// Process-unique identifier of a mounted filesystem instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FsId(pub u32);

/// Fully-qualified inode identity: which filesystem, which inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InodeId {
    pub fs: FsId,
    pub index: InodeIndex,
}

impl InodeId {
    #[must_use]
    pub fn new(fs: FsId, index: InodeIndex) -> Self {
        Self { fs, index }
    }
}

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fs.0, self.index.0)
    }
}

// ── POSIX file mode constants ───────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Named pipe (FIFO).
pub const S_IFIFO: u16 = 0o010_000;
/// Character device.
pub const S_IFCHR: u16 = 0o020_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Block device.
pub const S_IFBLK: u16 = 0o060_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0o120_000;
/// Socket.
pub const S_IFSOCK: u16 = 0o140_000;

#[must_use]
pub fn is_directory(mode: u16) -> bool {
    mode & S_IFMT == S_IFDIR
}

#[must_use]
pub fn is_regular_file(mode: u16) -> bool {
    mode & S_IFMT == S_IFREG
}

#[must_use]
pub fn is_symlink(mode: u16) -> bool {
    mode & S_IFMT == S_IFLNK
}

#[must_use]
pub fn is_block_device(mode: u16) -> bool {
    mode & S_IFMT == S_IFBLK
}

#[must_use]
pub fn is_character_device(mode: u16) -> bool {
    mode & S_IFMT == S_IFCHR
}

#[must_use]
pub fn is_fifo(mode: u16) -> bool {
    mode & S_IFMT == S_IFIFO
}

#[must_use]
pub fn is_socket(mode: u16) -> bool {
    mode & S_IFMT == S_IFSOCK
}

// ── Geometry math ───────────────────────────────────────────────────────────

/// Block size from the superblock's `s_log_block_size` shift.
///
/// Returns `None` when the shift would overflow; callers additionally
/// restrict the result to 1024/2048/4096.
#[must_use]
pub fn block_size_from_log(log_block_size: u32) -> Option<u32> {
    let shift = 10_u32.checked_add(log_block_size)?;
    1_u32.checked_shl(shift)
}

/// Block group holding an inode (1-based, like the on-disk BGDT walk).
#[must_use]
pub fn group_for_inode(ino: InodeIndex, inodes_per_group: u32) -> GroupIndex {
    GroupIndex((ino.0.saturating_sub(1)) / inodes_per_group + 1)
}

/// Index of an inode within its group's inode table and bitmap.
#[must_use]
pub fn inode_index_in_group(ino: InodeIndex, inodes_per_group: u32) -> u32 {
    (ino.0.saturating_sub(1)) % inodes_per_group
}

/// Round `value` up to the next multiple of 4 (directory record alignment).
#[must_use]
pub fn align4(value: usize) -> usize {
    (value + 3) & !3
}

/// `ceil(a / b)` for block math; `b` must be non-zero.
#[must_use]
pub fn ceil_div(a: u64, b: u64) -> u64 {
    a.div_ceil(b)
}

// ── Bounds-checked little-endian field access ───────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u32, actual: u32 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn write_le_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn write_le_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
