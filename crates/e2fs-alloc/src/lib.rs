#![forbid(unsafe_code)]
//! Allocation bitmaps and placement policy.
//!
//! A bitmap is a contiguous byte array; bit `k` is `(bytes[k/8] >> (k%8)) & 1`.
//! Bit `k` in a group's bitmap corresponds to the `(k+1)`-th object of that
//! group. The functions here never touch the disk: the filesystem core loads
//! bitmap blocks, calls in here, and persists what changed.

use e2fs_ondisk::GroupDesc;
use e2fs_types::{BlockIndex, GroupIndex};

// ── Bitmap primitives ───────────────────────────────────────────────────────

/// Get bit `idx`. Bits past the end of the slice read as set (never
/// allocatable).
#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u32) -> bool {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx >= bitmap.len() {
        return true;
    }
    (bitmap[byte_idx] >> bit_idx) & 1 == 1
}

/// Set bit `idx` to `value`.
pub fn bitmap_set(bitmap: &mut [u8], idx: u32, value: bool) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        if value {
            bitmap[byte_idx] |= 1 << bit_idx;
        } else {
            bitmap[byte_idx] &= !(1 << bit_idx);
        }
    }
}

/// Count clear bits among the first `count` bits.
#[must_use]
pub fn bitmap_count_free(bitmap: &[u8], count: u32) -> u32 {
    let mut free = 0_u32;
    for idx in 0..count {
        if !bitmap_get(bitmap, idx) {
            free += 1;
        }
    }
    free
}

/// First clear bit at or after `start` among the first `count` bits.
#[must_use]
pub fn bitmap_find_first_unset(bitmap: &[u8], count: u32, start: u32) -> Option<u32> {
    (start..count).find(|&idx| !bitmap_get(bitmap, idx))
}

/// Collect up to `want` clear bits, lowest first. The bits are *not* flipped;
/// the caller commits them separately.
#[must_use]
pub fn bitmap_collect_unset(bitmap: &[u8], count: u32, want: u32) -> Vec<u32> {
    let mut found = Vec::with_capacity(want as usize);
    if want == 0 {
        return found;
    }
    for idx in 0..count {
        if !bitmap_get(bitmap, idx) {
            found.push(idx);
            if found.len() as u32 == want {
                break;
            }
        }
    }
    found
}

// ── Filesystem geometry ─────────────────────────────────────────────────────

/// Immutable geometry derived from the superblock at mount.
#[derive(Debug, Clone)]
pub struct FsGeometry {
    pub block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub inode_size: u16,
    pub blocks_count: u32,
    pub inodes_count: u32,
    pub first_data_block: u32,
    pub group_count: u32,
    pub first_ino: u32,
}

impl FsGeometry {
    #[must_use]
    pub fn from_superblock(sb: &e2fs_ondisk::Superblock) -> Self {
        Self {
            block_size: sb.block_size,
            blocks_per_group: sb.blocks_per_group,
            inodes_per_group: sb.inodes_per_group,
            inode_size: sb.inode_size,
            blocks_count: sb.blocks_count,
            inodes_count: sb.inodes_count,
            first_data_block: sb.first_data_block,
            group_count: sb.block_group_count(),
            first_ino: sb.first_ino,
        }
    }

    /// Data blocks needed to hold `size` bytes.
    #[must_use]
    pub fn blocks_for_size(&self, size: u32) -> u32 {
        u32::try_from(e2fs_types::ceil_div(
            u64::from(size),
            u64::from(self.block_size),
        ))
        .unwrap_or(u32::MAX)
    }

    /// First block belonging to a group (1-based).
    #[must_use]
    pub fn group_first_block(&self, group: GroupIndex) -> BlockIndex {
        BlockIndex(self.first_data_block + (group.0 - 1) * self.blocks_per_group)
    }

    /// Number of blocks actually present in a group (the last group of an
    /// image that is not an exact multiple is shorter).
    #[must_use]
    pub fn blocks_in_group(&self, group: GroupIndex) -> u32 {
        let start = u64::from(self.group_first_block(group).0);
        let remaining = u64::from(self.blocks_count).saturating_sub(start);
        u32::try_from(remaining.min(u64::from(self.blocks_per_group))).unwrap_or(0)
    }

    /// Group-local bitmap bit for an absolute block number.
    #[must_use]
    pub fn block_bit_in_group(&self, group: GroupIndex, block: BlockIndex) -> u32 {
        block.0 - self.group_first_block(group).0
    }
}

// ── Group-selection policy ──────────────────────────────────────────────────

/// Whether a group can host a new inode whose initial content needs
/// `needed_blocks` data blocks.
#[must_use]
pub fn group_is_suitable(desc: &GroupDesc, needed_blocks: u32) -> bool {
    desc.free_inodes_count > 0 && u32::from(desc.free_blocks_count) >= needed_blocks
}

/// Pick the block group for a new inode.
///
/// The preferred group wins when it is suitable; otherwise groups 1..=N are
/// scanned and the *last* suitable one is kept, a stable tie-break.
#[must_use]
pub fn pick_group_for_inode(
    descs: &[GroupDesc],
    preferred: Option<GroupIndex>,
    needed_blocks: u32,
) -> Option<GroupIndex> {
    if let Some(preferred) = preferred {
        let idx = preferred.0.checked_sub(1)? as usize;
        if let Some(desc) = descs.get(idx) {
            if group_is_suitable(desc, needed_blocks) {
                return Some(preferred);
            }
        }
    }

    let mut picked = None;
    for (idx, desc) in descs.iter().enumerate() {
        if group_is_suitable(desc, needed_blocks) {
            picked = Some(GroupIndex(idx as u32 + 1));
        }
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(free_blocks: u16, free_inodes: u16) -> GroupDesc {
        GroupDesc {
            block_bitmap: BlockIndex(3),
            inode_bitmap: BlockIndex(4),
            inode_table: BlockIndex(5),
            free_blocks_count: free_blocks,
            free_inodes_count: free_inodes,
            used_dirs_count: 0,
        }
    }

    #[test]
    fn get_set_round_trip() {
        let mut bm = vec![0_u8; 4];
        assert!(!bitmap_get(&bm, 0));
        bitmap_set(&mut bm, 0, true);
        assert!(bitmap_get(&bm, 0));
        bitmap_set(&mut bm, 0, false);
        assert!(!bitmap_get(&bm, 0));

        bitmap_set(&mut bm, 7, true);
        assert_eq!(bm[0], 0x80);
        bitmap_set(&mut bm, 8, true);
        assert_eq!(bm[1], 0x01);
    }

    #[test]
    fn out_of_range_bits_read_as_set() {
        let bm = vec![0_u8; 1];
        assert!(!bitmap_get(&bm, 7));
        assert!(bitmap_get(&bm, 8));
        assert_eq!(bitmap_find_first_unset(&bm, 16, 8), None);
    }

    #[test]
    fn count_free_partial_byte() {
        let mut bm = vec![0_u8; 2];
        bitmap_set(&mut bm, 0, true);
        bitmap_set(&mut bm, 5, true);
        bitmap_set(&mut bm, 12, true);
        assert_eq!(bitmap_count_free(&bm, 16), 13);
        assert_eq!(bitmap_count_free(&bm, 10), 8);
    }

    #[test]
    fn find_first_unset_honors_start() {
        let mut bm = vec![0_u8; 2];
        bitmap_set(&mut bm, 0, true);
        bitmap_set(&mut bm, 1, true);
        assert_eq!(bitmap_find_first_unset(&bm, 16, 0), Some(2));
        assert_eq!(bitmap_find_first_unset(&bm, 16, 5), Some(5));
    }

    #[test]
    fn collect_unset_lowest_first() {
        let mut bm = vec![0_u8; 2];
        bitmap_set(&mut bm, 0, true);
        bitmap_set(&mut bm, 2, true);
        assert_eq!(bitmap_collect_unset(&bm, 16, 3), vec![1, 3, 4]);
        assert_eq!(bitmap_collect_unset(&bm, 16, 0), Vec::<u32>::new());
    }

    #[test]
    fn collect_unset_stops_at_count() {
        let bm = vec![0_u8; 2];
        // Only 4 bits visible, even though the slice holds 16.
        assert_eq!(bitmap_collect_unset(&bm, 4, 8), vec![0, 1, 2, 3]);
    }

    #[test]
    fn preferred_group_wins_when_suitable() {
        let descs = vec![desc(10, 10), desc(10, 10), desc(10, 10)];
        assert_eq!(
            pick_group_for_inode(&descs, Some(GroupIndex(2)), 4),
            Some(GroupIndex(2))
        );
    }

    #[test]
    fn scan_keeps_last_suitable_group() {
        let descs = vec![desc(10, 10), desc(0, 10), desc(10, 10)];
        // Preferred group 2 has no free blocks; scan picks the last fit.
        assert_eq!(
            pick_group_for_inode(&descs, Some(GroupIndex(2)), 4),
            Some(GroupIndex(3))
        );
        assert_eq!(pick_group_for_inode(&descs, None, 4), Some(GroupIndex(3)));
    }

    #[test]
    fn no_suitable_group() {
        let descs = vec![desc(10, 0), desc(1, 5)];
        assert_eq!(pick_group_for_inode(&descs, None, 4), None);
    }

    #[test]
    fn zero_needed_blocks_only_requires_inodes() {
        let descs = vec![desc(0, 1)];
        assert_eq!(pick_group_for_inode(&descs, None, 0), Some(GroupIndex(1)));
    }

    fn geometry_1k() -> FsGeometry {
        FsGeometry {
            block_size: 1024,
            blocks_per_group: 8192,
            inodes_per_group: 8192,
            inode_size: 128,
            blocks_count: 2048,
            inodes_count: 8192,
            first_data_block: 1,
            group_count: 1,
            first_ino: 11,
        }
    }

    #[test]
    fn geometry_blocks_for_size() {
        let geo = geometry_1k();
        assert_eq!(geo.blocks_for_size(0), 0);
        assert_eq!(geo.blocks_for_size(1), 1);
        assert_eq!(geo.blocks_for_size(1024), 1);
        assert_eq!(geo.blocks_for_size(1025), 2);
        assert_eq!(geo.blocks_for_size(13 * 1024), 13);
    }

    #[test]
    fn geometry_group_block_math() {
        let geo = geometry_1k();
        // 1K blocks: data starts at block 1, so group 1 begins there.
        assert_eq!(geo.group_first_block(GroupIndex(1)), BlockIndex(1));
        assert_eq!(geo.block_bit_in_group(GroupIndex(1), BlockIndex(1)), 0);
        assert_eq!(geo.block_bit_in_group(GroupIndex(1), BlockIndex(100)), 99);
        // Only 2048 blocks exist, so the single group is short.
        assert_eq!(geo.blocks_in_group(GroupIndex(1)), 2047);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn count_free_matches_get(set_bits in prop::collection::btree_set(0_u32..128, 0..64)) {
                let mut bm = vec![0_u8; 16];
                for &bit in &set_bits {
                    bitmap_set(&mut bm, bit, true);
                }
                let expected = 128 - set_bits.len() as u32;
                prop_assert_eq!(bitmap_count_free(&bm, 128), expected);
            }

            #[test]
            fn collected_bits_are_clear_and_sorted(
                set_bits in prop::collection::btree_set(0_u32..128, 0..64),
                want in 0_u32..32,
            ) {
                let mut bm = vec![0_u8; 16];
                for &bit in &set_bits {
                    bitmap_set(&mut bm, bit, true);
                }
                let got = bitmap_collect_unset(&bm, 128, want);
                prop_assert!(got.len() as u32 <= want);
                prop_assert!(got.windows(2).all(|w| w[0] < w[1]));
                for &bit in &got {
                    prop_assert!(!bitmap_get(&bm, bit));
                }
            }
        }
    }
}
