use e2fs_types::{
    read_le_u16, read_le_u32, write_le_u16, write_le_u32, ParseError, INLINE_SYMLINK_MAX, N_BLOCKS,
};
use serde::{Deserialize, Serialize};

/// On-disk inode record, restricted to the base-128-byte fields this engine
/// models. `blocks` counts 512-byte sectors, not filesystem blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInode {
    pub mode: u16,
    pub uid: u16,
    pub gid: u16,
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub links_count: u16,
    pub blocks: u32,
    pub flags: u32,
    /// `i_block[0..11]` direct, `[12]` single-, `[13]` double-, `[14]`
    /// triple-indirect. Doubles as inline storage for short symlinks and the
    /// device number of block/character special files.
    pub block_ptrs: [u32; N_BLOCKS],
}

impl RawInode {
    /// A zeroed inode record (the starting point for `create`).
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            ctime: 0,
            mtime: 0,
            dtime: 0,
            links_count: 0,
            blocks: 0,
            flags: 0,
            block_ptrs: [0; N_BLOCKS],
        }
    }

    /// Parse an inode record. Requires at least the 128-byte base area.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < 128 {
            return Err(ParseError::InsufficientData {
                needed: 128,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mut block_ptrs = [0_u32; N_BLOCKS];
        for (i, ptr) in block_ptrs.iter_mut().enumerate() {
            *ptr = read_le_u32(bytes, 0x28 + i * 4)?;
        }

        Ok(Self {
            mode: read_le_u16(bytes, 0x00)?,
            uid: read_le_u16(bytes, 0x02)?,
            size: read_le_u32(bytes, 0x04)?,
            atime: read_le_u32(bytes, 0x08)?,
            ctime: read_le_u32(bytes, 0x0C)?,
            mtime: read_le_u32(bytes, 0x10)?,
            dtime: read_le_u32(bytes, 0x14)?,
            gid: read_le_u16(bytes, 0x18)?,
            links_count: read_le_u16(bytes, 0x1A)?,
            blocks: read_le_u32(bytes, 0x1C)?,
            flags: read_le_u32(bytes, 0x20)?,
            block_ptrs,
        })
    }

    /// Patch the modelled fields into an existing inode record.
    ///
    /// `out` is the record's current bytes from its containing block; the
    /// OS-dependent areas (`i_osd1`, `i_generation`, ACL words, `i_osd2`) are
    /// left untouched so a read-modify-write cycle preserves them.
    pub fn write_into(&self, out: &mut [u8]) {
        write_le_u16(out, 0x00, self.mode);
        write_le_u16(out, 0x02, self.uid);
        write_le_u32(out, 0x04, self.size);
        write_le_u32(out, 0x08, self.atime);
        write_le_u32(out, 0x0C, self.ctime);
        write_le_u32(out, 0x10, self.mtime);
        write_le_u32(out, 0x14, self.dtime);
        write_le_u16(out, 0x18, self.gid);
        write_le_u16(out, 0x1A, self.links_count);
        write_le_u32(out, 0x1C, self.blocks);
        write_le_u32(out, 0x20, self.flags);
        for (i, ptr) in self.block_ptrs.iter().enumerate() {
            write_le_u32(out, 0x28 + i * 4, *ptr);
        }
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        e2fs_types::is_directory(self.mode)
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        e2fs_types::is_symlink(self.mode)
    }

    /// Whether the symlink target is stored inline in the `i_block` area.
    #[must_use]
    pub fn has_inline_symlink(&self) -> bool {
        self.is_symlink() && (self.size as usize) < INLINE_SYMLINK_MAX
    }

    /// The raw 60 bytes of the `i_block` area, reassembled little-endian.
    ///
    /// Short symlink targets live here instead of in data blocks.
    #[must_use]
    pub fn inline_bytes(&self) -> [u8; INLINE_SYMLINK_MAX] {
        let mut out = [0_u8; INLINE_SYMLINK_MAX];
        for (i, ptr) in self.block_ptrs.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&ptr.to_le_bytes());
        }
        out
    }

    /// Device number for block/character special files (`i_block[0]`).
    #[must_use]
    pub fn device_number(&self) -> u32 {
        self.block_ptrs[0]
    }
}
