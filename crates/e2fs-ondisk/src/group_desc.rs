use e2fs_types::{
    read_le_u16, read_le_u32, write_le_u16, write_le_u32, BlockIndex, ParseError, GROUP_DESC_SIZE,
};
use serde::{Deserialize, Serialize};

/// One 32-byte block-group descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDesc {
    pub block_bitmap: BlockIndex,
    pub inode_bitmap: BlockIndex,
    pub inode_table: BlockIndex,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl GroupDesc {
    /// Parse one descriptor from its 32-byte on-disk record.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < GROUP_DESC_SIZE {
            return Err(ParseError::InsufficientData {
                needed: GROUP_DESC_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            block_bitmap: BlockIndex(read_le_u32(bytes, 0x00)?),
            inode_bitmap: BlockIndex(read_le_u32(bytes, 0x04)?),
            inode_table: BlockIndex(read_le_u32(bytes, 0x08)?),
            free_blocks_count: read_le_u16(bytes, 0x0C)?,
            free_inodes_count: read_le_u16(bytes, 0x0E)?,
            used_dirs_count: read_le_u16(bytes, 0x10)?,
        })
    }

    /// Write this descriptor into its 32-byte slot in a retained BGDT image.
    ///
    /// Bytes past `bg_used_dirs_count` (padding, reserved) are left untouched.
    pub fn write_into(&self, out: &mut [u8]) {
        write_le_u32(out, 0x00, self.block_bitmap.0);
        write_le_u32(out, 0x04, self.inode_bitmap.0);
        write_le_u32(out, 0x08, self.inode_table.0);
        write_le_u16(out, 0x0C, self.free_blocks_count);
        write_le_u16(out, 0x0E, self.free_inodes_count);
        write_le_u16(out, 0x10, self.used_dirs_count);
    }
}
