//! Synthetic ext2 image builder for the integration tests.
//!
//! Produces a formatted single-group image with 1024-byte blocks: boot block,
//! superblock, BGDT, one block bitmap, one inode bitmap, the inode table, and
//! a root directory holding `.` and `..`. Extra inodes and data blocks can be
//! fabricated before the superblock counters are finalized.
#![allow(dead_code)]

use e2fs_ondisk::{serialize_entries, DirEntry, FileType, RawInode};
use e2fs_types::{write_le_u16, write_le_u32, EXT2_SUPER_MAGIC, S_IFDIR, S_IFLNK, S_IFREG};

pub const BLOCK_SIZE: u32 = 1024;
pub const BLOCKS_COUNT: u32 = 2048;
pub const INODES_PER_GROUP: u32 = 8192;
pub const INODE_SIZE: u32 = 128;
pub const FIRST_INO: u32 = 11;

pub const SUPERBLOCK_BLOCK: u32 = 1;
pub const BGDT_BLOCK: u32 = 2;
pub const BLOCK_BITMAP_BLOCK: u32 = 3;
pub const INODE_BITMAP_BLOCK: u32 = 4;
pub const INODE_TABLE_BLOCK: u32 = 5;
pub const INODE_TABLE_BLOCKS: u32 = INODES_PER_GROUP * INODE_SIZE / BLOCK_SIZE;
pub const ROOT_DIR_BLOCK: u32 = INODE_TABLE_BLOCK + INODE_TABLE_BLOCKS;
pub const FIRST_FREE_BLOCK: u32 = ROOT_DIR_BLOCK + 1;

pub struct ImageBuilder {
    image: Vec<u8>,
    used_dirs: u16,
    next_data_block: u32,
}

impl ImageBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            image: vec![0_u8; (BLOCKS_COUNT * BLOCK_SIZE) as usize],
            used_dirs: 1,
            next_data_block: FIRST_FREE_BLOCK,
        };

        // Metadata blocks through the root directory block are in use.
        for block in SUPERBLOCK_BLOCK..=ROOT_DIR_BLOCK {
            builder.mark_block_used(block);
        }
        // Bits past the end of the device are never allocatable.
        for bit in (BLOCKS_COUNT - 1)..INODES_PER_GROUP {
            builder.set_bitmap_bit(BLOCK_BITMAP_BLOCK, bit);
        }
        // Reserved inodes 1..=10.
        for ino in 1..FIRST_INO {
            builder.mark_inode_used(ino);
        }

        // Root directory: inode 2, one block of `.` and `..`.
        let mut root = RawInode::zeroed();
        root.mode = S_IFDIR | 0o755;
        root.size = BLOCK_SIZE;
        root.links_count = 2;
        root.blocks = BLOCK_SIZE / 512;
        root.atime = 1_700_000_000;
        root.ctime = 1_700_000_000;
        root.mtime = 1_700_000_000;
        root.block_ptrs[0] = ROOT_DIR_BLOCK;
        builder.write_inode(2, &root);

        let entries = vec![
            DirEntry::new(&b"."[..], 2, FileType::Dir),
            DirEntry::new(&b".."[..], 2, FileType::Dir),
        ];
        let data = serialize_entries(&entries, BLOCK_SIZE as usize).expect("root dir serializes");
        builder.write_block(ROOT_DIR_BLOCK, &data);

        builder
    }

    fn set_bitmap_bit(&mut self, bitmap_block: u32, bit: u32) {
        let byte = (bitmap_block * BLOCK_SIZE + bit / 8) as usize;
        self.image[byte] |= 1 << (bit % 8);
    }

    pub fn mark_block_used(&mut self, block: u32) {
        // first_data_block is 1: bit 0 of the block bitmap is block 1.
        self.set_bitmap_bit(BLOCK_BITMAP_BLOCK, block - 1);
    }

    pub fn mark_inode_used(&mut self, ino: u32) {
        self.set_bitmap_bit(INODE_BITMAP_BLOCK, ino - 1);
    }

    pub fn write_block(&mut self, block: u32, data: &[u8]) {
        let offset = (block * BLOCK_SIZE) as usize;
        self.image[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn write_inode(&mut self, ino: u32, raw: &RawInode) {
        let offset = (INODE_TABLE_BLOCK * BLOCK_SIZE + (ino - 1) * INODE_SIZE) as usize;
        raw.write_into(&mut self.image[offset..offset + INODE_SIZE as usize]);
    }

    /// Claim `count` consecutive data blocks, marking them used.
    pub fn take_data_blocks(&mut self, count: u32) -> Vec<u32> {
        let blocks: Vec<u32> = (self.next_data_block..self.next_data_block + count).collect();
        assert!(
            *blocks.last().unwrap_or(&0) < BLOCKS_COUNT,
            "image out of data blocks"
        );
        for block in &blocks {
            self.mark_block_used(*block);
        }
        self.next_data_block += count;
        blocks
    }

    /// Fabricate a 13-block regular file: 12 direct blocks plus one reached
    /// through a single-indirect block. Data block `i` is filled with byte
    /// `i`. Returns the data block numbers.
    pub fn add_thirteen_block_file(&mut self, ino: u32) -> Vec<u32> {
        let data_blocks = self.take_data_blocks(13);
        let indirect_block = self.take_data_blocks(1)[0];

        for (i, block) in data_blocks.iter().enumerate() {
            self.write_block(*block, &vec![i as u8; BLOCK_SIZE as usize]);
        }

        let mut indirect = vec![0_u8; BLOCK_SIZE as usize];
        write_le_u32(&mut indirect, 0, data_blocks[12]);
        self.write_block(indirect_block, &indirect);

        let mut raw = RawInode::zeroed();
        raw.mode = S_IFREG | 0o644;
        raw.size = 13 * BLOCK_SIZE;
        raw.links_count = 1;
        raw.blocks = 13 * (BLOCK_SIZE / 512);
        for (slot, block) in raw.block_ptrs[..12].iter_mut().zip(&data_blocks) {
            *slot = *block;
        }
        raw.block_ptrs[12] = indirect_block;
        self.write_inode(ino, &raw);
        self.mark_inode_used(ino);

        data_blocks
    }

    /// Fabricate a short symlink stored inline in the `i_block` area.
    pub fn add_inline_symlink(&mut self, ino: u32, target: &[u8]) {
        assert!(target.len() < 60);
        let mut inline = [0_u8; 60];
        inline[..target.len()].copy_from_slice(target);

        let mut raw = RawInode::zeroed();
        raw.mode = S_IFLNK | 0o777;
        raw.size = target.len() as u32;
        raw.links_count = 1;
        for (i, slot) in raw.block_ptrs.iter_mut().enumerate() {
            *slot = u32::from_le_bytes(inline[i * 4..i * 4 + 4].try_into().unwrap());
        }
        self.write_inode(ino, &raw);
        self.mark_inode_used(ino);
    }

    /// Write superblock and BGDT with counters recounted from the bitmaps,
    /// and return the finished image.
    pub fn finish(mut self) -> Vec<u8> {
        let free_blocks = self.count_clear_bits(BLOCK_BITMAP_BLOCK, INODES_PER_GROUP);
        let free_inodes = self.count_clear_bits(INODE_BITMAP_BLOCK, INODES_PER_GROUP);

        let sb_off = (SUPERBLOCK_BLOCK * BLOCK_SIZE) as usize;
        let sb = &mut self.image[sb_off..sb_off + 1024];
        write_le_u32(sb, 0x00, INODES_PER_GROUP); // inodes_count
        write_le_u32(sb, 0x04, BLOCKS_COUNT);
        write_le_u32(sb, 0x0C, free_blocks);
        write_le_u32(sb, 0x10, free_inodes);
        write_le_u32(sb, 0x14, 1); // first_data_block
        write_le_u32(sb, 0x18, 0); // log_block_size -> 1024
        write_le_u32(sb, 0x20, INODES_PER_GROUP); // blocks_per_group
        write_le_u32(sb, 0x28, INODES_PER_GROUP); // inodes_per_group
        write_le_u16(sb, 0x38, EXT2_SUPER_MAGIC);
        write_le_u32(sb, 0x4C, 1); // rev_level
        write_le_u32(sb, 0x54, FIRST_INO);
        write_le_u16(sb, 0x58, INODE_SIZE as u16);

        let gd_off = (BGDT_BLOCK * BLOCK_SIZE) as usize;
        let gd = &mut self.image[gd_off..gd_off + 32];
        write_le_u32(gd, 0x00, BLOCK_BITMAP_BLOCK);
        write_le_u32(gd, 0x04, INODE_BITMAP_BLOCK);
        write_le_u32(gd, 0x08, INODE_TABLE_BLOCK);
        write_le_u16(gd, 0x0C, free_blocks as u16);
        write_le_u16(gd, 0x0E, free_inodes as u16);
        write_le_u16(gd, 0x10, self.used_dirs);

        self.image
    }

    fn count_clear_bits(&self, bitmap_block: u32, bits: u32) -> u32 {
        let start = (bitmap_block * BLOCK_SIZE) as usize;
        let bitmap = &self.image[start..start + (bits as usize).div_ceil(8)];
        (0..bits)
            .filter(|bit| (bitmap[(bit / 8) as usize] >> (bit % 8)) & 1 == 0)
            .count() as u32
    }
}

/// Free counts in the standard image before any mutation.
pub fn baseline_free_counts() -> (u32, u32) {
    // Blocks 1..=ROOT_DIR_BLOCK are metadata, the rest of the 2047 real
    // blocks are free; inodes 1..=10 are reserved.
    let free_blocks = (BLOCKS_COUNT - 1) - ROOT_DIR_BLOCK;
    let free_inodes = INODES_PER_GROUP - (FIRST_INO - 1);
    (free_blocks, free_inodes)
}

/// Recount clear bitmap bits in a device snapshot and compare them against
/// the superblock and group-descriptor counters.
pub fn assert_counters_coherent(image: &[u8], sb_free_blocks: u32, sb_free_inodes: u32) {
    let count = |bitmap_block: u32, bits: u32| -> u32 {
        let start = (bitmap_block * BLOCK_SIZE) as usize;
        (0..bits)
            .filter(|bit| (image[start + (bit / 8) as usize] >> (bit % 8)) & 1 == 0)
            .count() as u32
    };

    let bitmap_free_blocks = count(BLOCK_BITMAP_BLOCK, INODES_PER_GROUP);
    let bitmap_free_inodes = count(INODE_BITMAP_BLOCK, INODES_PER_GROUP);
    assert_eq!(bitmap_free_blocks, sb_free_blocks, "block counters diverge");
    assert_eq!(bitmap_free_inodes, sb_free_inodes, "inode counters diverge");

    // The group descriptor's 16-bit counters must agree with the superblock.
    let gd_off = (BGDT_BLOCK * BLOCK_SIZE) as usize;
    let gd_free_blocks =
        u16::from_le_bytes([image[gd_off + 0x0C], image[gd_off + 0x0D]]);
    let gd_free_inodes =
        u16::from_le_bytes([image[gd_off + 0x0E], image[gd_off + 0x0F]]);
    assert_eq!(u32::from(gd_free_blocks), sb_free_blocks);
    assert_eq!(u32::from(gd_free_inodes), sb_free_inodes);
}
