use e2fs_types::{
    block_size_from_log, read_le_u16, read_le_u32, write_le_u32, BlockIndex, ParseError,
    EXT2_SUPER_MAGIC, FIRST_INO_REV0, SUPERBLOCK_SIZE,
};
use serde::{Deserialize, Serialize};

const OFF_FREE_BLOCKS_COUNT: usize = 0x0C;
const OFF_FREE_INODES_COUNT: usize = 0x10;

/// Parsed ext2 superblock, restricted to the fields this engine consumes.
///
/// The raw 1024-byte image is retained by the caller; [`Superblock::patch_counts`]
/// writes the mutable counters back into it so identity fields (uuid, volume
/// name, mount bookkeeping) are preserved bit-exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub rev_level: u32,
    pub first_ino: u32,
    pub inode_size: u16,
    pub magic: u16,
}

impl Superblock {
    /// Parse a 1024-byte superblock region.
    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_le_u16(region, 0x38)?;
        if magic != EXT2_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u32::from(EXT2_SUPER_MAGIC),
                actual: u32::from(magic),
            });
        }

        let log_block_size = read_le_u32(region, 0x18)?;
        let Some(block_size) = block_size_from_log(log_block_size) else {
            return Err(ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "invalid shift",
            });
        };
        if !matches!(block_size, 1024 | 2048 | 4096) {
            return Err(ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "unsupported block size",
            });
        }

        let rev_level = read_le_u32(region, 0x4C)?;
        let (first_ino, inode_size) = if rev_level == 0 {
            (FIRST_INO_REV0, 128)
        } else {
            (read_le_u32(region, 0x54)?, read_le_u16(region, 0x58)?)
        };

        Ok(Self {
            inodes_count: read_le_u32(region, 0x00)?,
            blocks_count: read_le_u32(region, 0x04)?,
            free_blocks_count: read_le_u32(region, OFF_FREE_BLOCKS_COUNT)?,
            free_inodes_count: read_le_u32(region, OFF_FREE_INODES_COUNT)?,
            first_data_block: read_le_u32(region, 0x14)?,
            block_size,
            blocks_per_group: read_le_u32(region, 0x20)?,
            inodes_per_group: read_le_u32(region, 0x28)?,
            rev_level,
            first_ino,
            inode_size,
            magic,
        })
    }

    /// Validate geometry constraints before the filesystem is used.
    pub fn validate_geometry(&self) -> Result<(), ParseError> {
        if self.blocks_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "s_blocks_per_group",
                reason: "cannot be zero",
            });
        }
        if self.inodes_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "s_inodes_per_group",
                reason: "cannot be zero",
            });
        }
        if self.inode_size < 128 {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "must be >= 128",
            });
        }
        if !self.inode_size.is_power_of_two() {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "must be a power of two",
            });
        }
        Ok(())
    }

    /// Write the mutable free counters into a retained superblock image.
    pub fn patch_counts(&self, region: &mut [u8]) {
        write_le_u32(region, OFF_FREE_BLOCKS_COUNT, self.free_blocks_count);
        write_le_u32(region, OFF_FREE_INODES_COUNT, self.free_inodes_count);
    }

    /// Number of block groups: `ceil(blocks_count / blocks_per_group)`.
    #[must_use]
    pub fn block_group_count(&self) -> u32 {
        u32::try_from(e2fs_types::ceil_div(
            u64::from(self.blocks_count),
            u64::from(self.blocks_per_group),
        ))
        .unwrap_or(u32::MAX)
    }

    /// On-disk inode records per filesystem block.
    #[must_use]
    pub fn inodes_per_block(&self) -> u32 {
        self.block_size / u32::from(self.inode_size)
    }

    /// First block of the block-group descriptor table.
    #[must_use]
    pub fn bgdt_first_block(&self) -> BlockIndex {
        if self.block_size == 1024 {
            BlockIndex(2)
        } else {
            BlockIndex(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2fs_types::write_le_u16;

    fn synthetic_region() -> Vec<u8> {
        let mut region = vec![0_u8; SUPERBLOCK_SIZE];
        write_le_u32(&mut region, 0x00, 8192); // inodes_count
        write_le_u32(&mut region, 0x04, 2048); // blocks_count
        write_le_u32(&mut region, 0x0C, 1000); // free_blocks_count
        write_le_u32(&mut region, 0x10, 8180); // free_inodes_count
        write_le_u32(&mut region, 0x14, 1); // first_data_block
        write_le_u32(&mut region, 0x18, 0); // log_block_size -> 1024
        write_le_u32(&mut region, 0x20, 8192); // blocks_per_group
        write_le_u32(&mut region, 0x28, 8192); // inodes_per_group
        write_le_u16(&mut region, 0x38, EXT2_SUPER_MAGIC);
        write_le_u32(&mut region, 0x4C, 1); // rev_level
        write_le_u32(&mut region, 0x54, 11); // first_ino
        write_le_u16(&mut region, 0x58, 128); // inode_size
        region
    }

    #[test]
    fn parse_synthetic_superblock() {
        let sb = Superblock::parse(&synthetic_region()).unwrap();
        assert_eq!(sb.magic, EXT2_SUPER_MAGIC);
        assert_eq!(sb.block_size, 1024);
        assert_eq!(sb.inodes_count, 8192);
        assert_eq!(sb.blocks_count, 2048);
        assert_eq!(sb.free_inodes_count, 8180);
        assert_eq!(sb.first_ino, 11);
        assert_eq!(sb.inode_size, 128);
        assert_eq!(sb.block_group_count(), 1);
        assert_eq!(sb.inodes_per_block(), 8);
        assert_eq!(sb.bgdt_first_block(), BlockIndex(2));
        sb.validate_geometry().unwrap();
    }

    #[test]
    fn parse_rejects_bad_magic() {
        let mut region = synthetic_region();
        write_le_u16(&mut region, 0x38, 0xBEEF);
        assert!(matches!(
            Superblock::parse(&region),
            Err(ParseError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn parse_rejects_oversized_block_shift() {
        let mut region = synthetic_region();
        write_le_u32(&mut region, 0x18, 3); // 8192-byte blocks unsupported
        assert!(Superblock::parse(&region).is_err());
    }

    #[test]
    fn rev0_defaults() {
        let mut region = synthetic_region();
        write_le_u32(&mut region, 0x4C, 0);
        // Garbage in the rev1-only fields must be ignored.
        write_le_u32(&mut region, 0x54, 9999);
        write_le_u16(&mut region, 0x58, 7);
        let sb = Superblock::parse(&region).unwrap();
        assert_eq!(sb.first_ino, FIRST_INO_REV0);
        assert_eq!(sb.inode_size, 128);
    }

    #[test]
    fn patch_counts_preserves_other_bytes() {
        let mut region = synthetic_region();
        region[0x68] = 0xAA; // uuid-area byte, unmodelled

        let mut sb = Superblock::parse(&region).unwrap();
        sb.free_blocks_count -= 1;
        sb.free_inodes_count -= 1;
        sb.patch_counts(&mut region);

        let reparsed = Superblock::parse(&region).unwrap();
        assert_eq!(reparsed.free_blocks_count, 999);
        assert_eq!(reparsed.free_inodes_count, 8179);
        assert_eq!(region[0x68], 0xAA);
    }

    #[test]
    fn bgdt_first_block_by_block_size() {
        let mut region = synthetic_region();
        write_le_u32(&mut region, 0x18, 2); // 4096
        let sb = Superblock::parse(&region).unwrap();
        assert_eq!(sb.bgdt_first_block(), BlockIndex(1));
    }
}
