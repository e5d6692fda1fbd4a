#![forbid(unsafe_code)]
//! Inode-table I/O and block-list resolution.
//!
//! On-disk inode records are updated with read-modify-write of their
//! containing block so neighboring inodes and OS-dependent fields survive.
//! The block-list resolver walks direct and single/double/triple-indirect
//! pointers into the ordered physical block list backing a file.

use e2fs_alloc::FsGeometry;
use e2fs_block::DiskStore;
use e2fs_error::{Ext2Error, Result};
use e2fs_ondisk::RawInode;
use e2fs_types::{
    ceil_div, inode_index_in_group, read_le_u32, BlockIndex, InodeIndex, DIND_BLOCK, IND_BLOCK,
    NDIR_BLOCKS, TIND_BLOCK,
};
use tracing::trace;

/// Computed on-disk location of an inode record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeLocation {
    pub block: BlockIndex,
    pub byte_offset: usize,
}

/// Locate an inode within its group's inode table.
///
/// `inode_table` is the table's first block from the group descriptor of the
/// inode's own group.
#[must_use]
pub fn locate_inode(ino: InodeIndex, geo: &FsGeometry, inode_table: BlockIndex) -> InodeLocation {
    let index = inode_index_in_group(ino, geo.inodes_per_group);
    let byte_in_table = u64::from(index) * u64::from(geo.inode_size);
    let block_offset = byte_in_table / u64::from(geo.block_size);
    let byte_offset = (byte_in_table % u64::from(geo.block_size)) as usize;
    InodeLocation {
        block: BlockIndex(inode_table.0 + block_offset as u32),
        byte_offset,
    }
}

/// Read and parse an inode record.
pub fn read_inode(
    store: &DiskStore,
    geo: &FsGeometry,
    inode_table: BlockIndex,
    ino: InodeIndex,
) -> Result<RawInode> {
    let loc = locate_inode(ino, geo, inode_table);
    let block = store.read_block(loc.block)?;
    let record = &block[loc.byte_offset..loc.byte_offset + usize::from(geo.inode_size)];
    RawInode::parse(record).map_err(|e| Ext2Error::Corrupt {
        block: u64::from(loc.block.0),
        detail: format!("inode {ino}: {e}"),
    })
}

/// Persist an inode record with read-modify-write of its containing block.
pub fn write_inode(
    store: &DiskStore,
    geo: &FsGeometry,
    inode_table: BlockIndex,
    ino: InodeIndex,
    raw: &RawInode,
) -> Result<()> {
    let loc = locate_inode(ino, geo, inode_table);
    trace!(
        target: "e2fs::inode",
        event = "write_inode",
        ino = ino.0,
        block = loc.block.0
    );
    let mut block = store.read_block(loc.block)?;
    raw.write_into(&mut block[loc.byte_offset..loc.byte_offset + usize::from(geo.inode_size)]);
    store.write_block(loc.block, &block)
}

/// Build a fresh inode record for `create`.
///
/// `i_blocks` counts the data blocks in 512-byte sectors; direct pointers are
/// filled from `blocks`, which the caller has already bounded to the direct
/// range.
#[must_use]
pub fn build_inode(
    mode: u16,
    size: u32,
    blocks: &[BlockIndex],
    now: u32,
    block_size: u32,
) -> RawInode {
    let mut raw = RawInode::zeroed();
    raw.mode = mode;
    raw.size = size;
    raw.atime = now;
    raw.ctime = now;
    raw.mtime = now;
    raw.dtime = 0;
    raw.links_count = if e2fs_types::is_directory(mode) { 2 } else { 1 };
    raw.blocks = blocks.len() as u32 * (block_size / 512);
    for (slot, block) in raw.block_ptrs.iter_mut().zip(blocks) {
        *slot = block.0;
    }
    raw
}

// ── Block-list resolver ─────────────────────────────────────────────────────

/// Append data-block entries reachable through one indirect block.
///
/// `depth` 1 means the block's entries are data blocks; deeper levels are
/// pointers to further indirect blocks. A zero entry ends the whole list
/// (sparse encoding), signalled by forcing `remaining` to zero.
fn append_from_indirect(
    store: &DiskStore,
    block: BlockIndex,
    depth: u8,
    remaining: &mut u32,
    list: &mut Vec<BlockIndex>,
) -> Result<()> {
    let buf = store.read_block(block)?;
    let entries_per_block = buf.len() / 4;

    for i in 0..entries_per_block {
        if *remaining == 0 {
            break;
        }
        let entry = read_le_u32(&buf, i * 4).map_err(|e| Ext2Error::Corrupt {
            block: u64::from(block.0),
            detail: format!("indirect block entry {i}: {e}"),
        })?;
        if entry == 0 {
            *remaining = 0;
            break;
        }
        if depth == 1 {
            list.push(BlockIndex(entry));
            *remaining -= 1;
        } else {
            append_from_indirect(store, BlockIndex(entry), depth - 1, remaining, list)?;
        }
    }
    Ok(())
}

/// Compute the ordered physical block list backing an inode.
///
/// The expected length is `ceil(i_blocks * 512 / block_size)`; `i_blocks`
/// counts the data blocks in 512-byte sectors. A list that cannot be
/// satisfied even through the triple-indirect level is corrupt.
pub fn resolve_block_list(
    store: &DiskStore,
    geo: &FsGeometry,
    ino: InodeIndex,
    raw: &RawInode,
) -> Result<Vec<BlockIndex>> {
    let total = u32::try_from(ceil_div(
        u64::from(raw.blocks) * 512,
        u64::from(geo.block_size),
    ))
    .unwrap_or(u32::MAX);

    let mut list = Vec::with_capacity(total as usize);
    let mut remaining = total;

    let direct = remaining.min(NDIR_BLOCKS as u32);
    for i in 0..direct as usize {
        list.push(BlockIndex(raw.block_ptrs[i]));
    }
    remaining -= direct;

    for (slot, depth) in [(IND_BLOCK, 1_u8), (DIND_BLOCK, 2), (TIND_BLOCK, 3)] {
        if remaining == 0 {
            break;
        }
        let ptr = raw.block_ptrs[slot];
        if ptr == 0 {
            continue;
        }
        append_from_indirect(store, BlockIndex(ptr), depth, &mut remaining, &mut list)?;
    }

    if remaining > 0 {
        return Err(Ext2Error::Corrupt {
            block: 0,
            detail: format!(
                "inode {ino}: block list exhausted with {remaining} of {total} blocks unresolved"
            ),
        });
    }

    trace!(
        target: "e2fs::inode",
        event = "block_list_resolved",
        ino = ino.0,
        blocks = list.len()
    );
    Ok(list)
}
