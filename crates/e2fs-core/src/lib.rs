#![forbid(unsafe_code)]
//! The ext2 engine.
//!
//! [`Ext2Fs`] sits between a 512-byte-sector block device and a VFS-style
//! inode layer: it loads and writes back the superblock and block-group
//! descriptor table, allocates inodes and data blocks against the group
//! bitmaps, caches live inodes (at most one instance per index), and exposes
//! the POSIX-shaped operation surface (lookup, read, write, create, mkdir,
//! link-count and timestamp updates).
//!
//! Lock order, strictly: inode-cache lock, then any per-inode lock, then the
//! filesystem-wide metadata lock. The cache lock is never held across I/O.

mod vnode;

pub use e2fs_alloc::FsGeometry;
pub use e2fs_block::{DiskStore, FileSectorDevice, MemSectorDevice, SectorDevice};
pub use e2fs_error::{Ext2Error, Result};
pub use e2fs_ondisk::{FileType, GroupDesc, RawInode, Superblock};
pub use e2fs_types::{BlockIndex, FsId, GroupIndex, InodeId, InodeIndex};
pub use vnode::LiveInode;

use e2fs_ondisk::DirEntry;
use e2fs_types::{
    group_for_inode, inode_index_in_group, S_IFDIR, S_IFMT, SECTOR_SIZE, SUPERBLOCK_OFFSET,
    SUPERBLOCK_SIZE,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

static NEXT_FS_ID: AtomicU32 = AtomicU32::new(1);

fn now_epoch() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Stable projection of the on-disk inode fields consumed by the VFS layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeMetadata {
    pub id: InodeId,
    pub size: u32,
    pub mode: u16,
    pub uid: u16,
    pub gid: u16,
    pub links_count: u16,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub block_size: u32,
    /// `i_blocks`: data blocks counted in 512-byte sectors.
    pub block_count: u32,
    pub major_device: u32,
    pub minor_device: u32,
}

impl InodeMetadata {
    fn from_raw(id: InodeId, raw: &RawInode, block_size: u32) -> Self {
        let (major, minor) = if e2fs_types::is_block_device(raw.mode)
            || e2fs_types::is_character_device(raw.mode)
        {
            let dev = raw.device_number();
            ((dev & 0xfff00) >> 8, (dev & 0xff) | ((dev >> 12) & 0xfff00))
        } else {
            (0, 0)
        };

        Self {
            id,
            size: raw.size,
            mode: raw.mode,
            uid: raw.uid,
            gid: raw.gid,
            links_count: raw.links_count,
            atime: raw.atime,
            ctime: raw.ctime,
            mtime: raw.mtime,
            dtime: raw.dtime,
            block_size,
            block_count: raw.blocks,
            major_device: major,
            minor_device: minor,
        }
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        e2fs_types::is_directory(self.mode)
    }

    #[must_use]
    pub fn is_regular_file(&self) -> bool {
        e2fs_types::is_regular_file(self.mode)
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        e2fs_types::is_symlink(self.mode)
    }
}

/// One directory entry as seen by traversal callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub id: InodeId,
    pub file_type: FileType,
}

struct BgdtCache {
    raw: Vec<u8>,
    descs: Vec<GroupDesc>,
}

struct MetaCache {
    sb_raw: Vec<u8>,
    sb: Superblock,
    bgdt: Option<BgdtCache>,
}

/// A mounted ext2 filesystem instance.
pub struct Ext2Fs {
    id: FsId,
    store: DiskStore,
    geo: FsGeometry,
    /// Superblock + BGDT: the filesystem-wide metadata lock (last in order).
    meta: Mutex<MetaCache>,
    /// At most one live inode per index (first in lock order).
    inode_cache: Mutex<HashMap<InodeIndex, Arc<LiveInode>>>,
}

impl Ext2Fs {
    /// Mount a filesystem from a sector device.
    ///
    /// Reads and validates the superblock, derives geometry, and preheats the
    /// block-group descriptor table.
    pub fn mount(device: Arc<dyn SectorDevice>) -> Result<Arc<Self>> {
        let sb_raw = read_superblock_region(device.as_ref())?;
        let sb = Superblock::parse(&sb_raw)
            .map_err(|e| Ext2Error::InvalidSuperblock(e.to_string()))?;
        sb.validate_geometry()
            .map_err(|e| Ext2Error::InvalidSuperblock(e.to_string()))?;

        let geo = FsGeometry::from_superblock(&sb);
        if geo.group_count == 0 {
            return Err(Ext2Error::InvalidSuperblock("no block groups".into()));
        }

        let store = DiskStore::new(device, sb.block_size)?;
        let fs = Arc::new(Self {
            id: FsId(NEXT_FS_ID.fetch_add(1, Ordering::Relaxed)),
            store,
            geo,
            meta: Mutex::new(MetaCache {
                sb_raw,
                sb,
                bgdt: None,
            }),
            inode_cache: Mutex::new(HashMap::new()),
        });

        // Preheat the BGDT so mount fails early on a truncated table.
        {
            let mut meta = fs.meta.lock();
            fs.ensure_bgdt(&mut meta)?;
        }

        info!(
            target: "e2fs::mount",
            fs = fs.id.0,
            block_size = fs.geo.block_size,
            blocks = fs.geo.blocks_count,
            inodes = fs.geo.inodes_count,
            groups = fs.geo.group_count,
            "mounted ext2 filesystem"
        );
        Ok(fs)
    }

    #[must_use]
    pub fn id(&self) -> FsId {
        self.id
    }

    #[must_use]
    pub fn geometry(&self) -> &FsGeometry {
        &self.geo
    }

    pub(crate) fn store(&self) -> &DiskStore {
        &self.store
    }

    /// Snapshot of the cached superblock (counters included).
    #[must_use]
    pub fn superblock(&self) -> Superblock {
        self.meta.lock().sb.clone()
    }

    /// Fetch a block-group descriptor (1-based group index).
    pub fn bgd(&self, group: GroupIndex) -> Result<GroupDesc> {
        let mut meta = self.meta.lock();
        self.ensure_bgdt(&mut meta)?;
        let bgdt = meta.bgdt.as_ref().expect("BGDT loaded");
        group_desc(bgdt, group)
    }

    // ── Superblock & BGDT management ────────────────────────────────────

    fn ensure_bgdt(&self, meta: &mut MetaCache) -> Result<()> {
        if meta.bgdt.is_some() {
            return Ok(());
        }

        let table_blocks = bgdt_block_count(&self.geo);
        let first = meta.sb.bgdt_first_block();
        let raw = self.store.read_blocks(first, table_blocks)?;

        let mut descs = Vec::with_capacity(self.geo.group_count as usize);
        for g in 0..self.geo.group_count as usize {
            let desc = GroupDesc::parse(&raw[g * 32..g * 32 + 32]).map_err(|e| {
                Ext2Error::Corrupt {
                    block: u64::from(first.0),
                    detail: format!("group descriptor {}: {e}", g + 1),
                }
            })?;
            descs.push(desc);
        }

        debug!(
            target: "e2fs::mount",
            fs = self.id.0,
            groups = descs.len(),
            table_blocks,
            "loaded block group descriptor table"
        );
        meta.bgdt = Some(BgdtCache { raw, descs });
        Ok(())
    }

    /// Persist the superblock, then invalidate and reload the cached copy.
    fn write_superblock(&self, meta: &mut MetaCache) -> Result<()> {
        meta.sb.patch_counts(&mut meta.sb_raw);

        let device = self.store.device();
        device.write_sector(2, &meta.sb_raw[..SECTOR_SIZE])?;
        device.write_sector(3, &meta.sb_raw[SECTOR_SIZE..])?;

        let sb_raw = read_superblock_region(device.as_ref())?;
        let sb = Superblock::parse(&sb_raw)
            .map_err(|e| Ext2Error::InvalidSuperblock(e.to_string()))?;
        meta.sb_raw = sb_raw;
        meta.sb = sb;
        Ok(())
    }

    /// Rewrite the full BGDT after any descriptor change.
    fn write_bgdt(&self, meta: &mut MetaCache) -> Result<()> {
        let first = meta.sb.bgdt_first_block();
        let BgdtCache { raw, descs } = meta.bgdt.as_mut().expect("BGDT loaded");
        for (g, desc) in descs.iter().enumerate() {
            desc.write_into(&mut raw[g * 32..g * 32 + 32]);
        }
        self.store.write_blocks(first, raw)
    }

    // ── Allocator ───────────────────────────────────────────────────────

    /// Collect `count` free blocks from one group, without committing them.
    ///
    /// Fails with `NoSpace` when the group cannot satisfy the request; this
    /// engine does not fall back to other groups.
    pub fn allocate_blocks(&self, group: GroupIndex, count: u32) -> Result<Vec<BlockIndex>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut meta = self.meta.lock();
        self.ensure_bgdt(&mut meta)?;
        let desc = group_desc(meta.bgdt.as_ref().expect("BGDT loaded"), group)?;
        if u32::from(desc.free_blocks_count) < count {
            return Err(Ext2Error::NoSpace);
        }

        let bitmap = self.load_bitmap(desc.block_bitmap, self.geo.blocks_per_group)?;
        let limit = self.geo.blocks_in_group(group);
        let bits = e2fs_alloc::bitmap_collect_unset(&bitmap, limit, count);
        if bits.len() as u32 != count {
            return Err(Ext2Error::Corrupt {
                block: u64::from(desc.block_bitmap.0),
                detail: format!(
                    "group {group}: descriptor claims {} free blocks but bitmap has fewer",
                    desc.free_blocks_count
                ),
            });
        }

        let first = self.geo.group_first_block(group);
        let blocks: Vec<BlockIndex> = bits.iter().map(|bit| BlockIndex(first.0 + bit)).collect();
        debug!(
            target: "e2fs::alloc",
            fs = self.id.0,
            group = group.0,
            count,
            first = blocks[0].0,
            "reserved data blocks"
        );
        Ok(blocks)
    }

    /// Reserve an inode index, without committing it.
    ///
    /// A group is suitable when it has a free inode and enough free blocks
    /// for `expected_size`. The preferred group wins when suitable; otherwise
    /// the scan keeps the last suitable group. The smallest clear bit in the
    /// chosen group's bitmap is returned.
    pub fn allocate_inode(
        &self,
        preferred: Option<GroupIndex>,
        expected_size: u32,
    ) -> Result<InodeIndex> {
        let needed_blocks = self.geo.blocks_for_size(expected_size);

        let mut meta = self.meta.lock();
        self.ensure_bgdt(&mut meta)?;
        let bgdt = meta.bgdt.as_ref().expect("BGDT loaded");

        let Some(group) = e2fs_alloc::pick_group_for_inode(&bgdt.descs, preferred, needed_blocks)
        else {
            debug!(
                target: "e2fs::alloc",
                fs = self.id.0,
                needed_blocks,
                "no suitable group for new inode"
            );
            return Err(Ext2Error::NoSpace);
        };

        let desc = group_desc(bgdt, group)?;
        let bitmap = self.load_bitmap(desc.inode_bitmap, self.geo.inodes_per_group)?;
        let Some(bit) = e2fs_alloc::bitmap_find_first_unset(&bitmap, self.geo.inodes_per_group, 0)
        else {
            return Err(Ext2Error::Corrupt {
                block: u64::from(desc.inode_bitmap.0),
                detail: format!(
                    "group {group}: descriptor claims {} free inodes but bitmap is full",
                    desc.free_inodes_count
                ),
            });
        };

        let ino = InodeIndex((group.0 - 1) * self.geo.inodes_per_group + bit + 1);
        debug!(
            target: "e2fs::alloc",
            fs = self.id.0,
            group = group.0,
            ino = ino.0,
            "reserved inode"
        );
        Ok(ino)
    }

    /// Commit or revert an inode's allocation state.
    ///
    /// Persists bitmap, superblock, BGDT in that order; succeeds as a no-op
    /// when the bit already has the requested value.
    pub fn set_inode_allocation_state(&self, ino: InodeIndex, in_use: bool) -> Result<()> {
        let group = group_for_inode(ino, self.geo.inodes_per_group);
        let bit = inode_index_in_group(ino, self.geo.inodes_per_group);

        let mut meta = self.meta.lock();
        self.ensure_bgdt(&mut meta)?;
        let desc = group_desc(meta.bgdt.as_ref().expect("BGDT loaded"), group)?;

        if !self.flip_bitmap_bit(desc.inode_bitmap, bit, in_use)? {
            return Ok(());
        }

        debug!(
            target: "e2fs::alloc",
            fs = self.id.0,
            ino = ino.0,
            in_use,
            "inode allocation state committed"
        );

        {
            let sb = &mut meta.sb;
            if in_use {
                sb.free_inodes_count -= 1;
            } else {
                sb.free_inodes_count += 1;
            }
        }
        self.write_superblock(&mut meta)?;

        {
            let bgdt = meta.bgdt.as_mut().expect("BGDT loaded");
            let desc = &mut bgdt.descs[(group.0 - 1) as usize];
            if in_use {
                desc.free_inodes_count -= 1;
            } else {
                desc.free_inodes_count += 1;
            }
        }
        self.write_bgdt(&mut meta)
    }

    /// Commit or revert a data block's allocation state.
    pub fn set_block_allocation_state(
        &self,
        group: GroupIndex,
        block: BlockIndex,
        in_use: bool,
    ) -> Result<()> {
        let bit = self.geo.block_bit_in_group(group, block);

        let mut meta = self.meta.lock();
        self.ensure_bgdt(&mut meta)?;
        let desc = group_desc(meta.bgdt.as_ref().expect("BGDT loaded"), group)?;

        if !self.flip_bitmap_bit(desc.block_bitmap, bit, in_use)? {
            return Ok(());
        }

        debug!(
            target: "e2fs::alloc",
            fs = self.id.0,
            block = block.0,
            in_use,
            "block allocation state committed"
        );

        {
            let sb = &mut meta.sb;
            if in_use {
                sb.free_blocks_count -= 1;
            } else {
                sb.free_blocks_count += 1;
            }
        }
        self.write_superblock(&mut meta)?;

        {
            let bgdt = meta.bgdt.as_mut().expect("BGDT loaded");
            let desc = &mut bgdt.descs[(group.0 - 1) as usize];
            if in_use {
                desc.free_blocks_count -= 1;
            } else {
                desc.free_blocks_count += 1;
            }
        }
        self.write_bgdt(&mut meta)
    }

    /// Load a group bitmap spanning as many blocks as `bits` requires.
    fn load_bitmap(&self, first: BlockIndex, bits: u32) -> Result<Vec<u8>> {
        let bits_per_block = self.geo.block_size * 8;
        let blocks = bits.div_ceil(bits_per_block);
        self.store.read_blocks(first, blocks)
    }

    /// Flip one bit of an on-disk bitmap and persist the touched block.
    ///
    /// Returns `false` (and writes nothing) when the bit already had the
    /// requested value.
    fn flip_bitmap_bit(&self, bitmap_first: BlockIndex, bit: u32, value: bool) -> Result<bool> {
        let bits_per_block = self.geo.block_size * 8;
        let block = BlockIndex(bitmap_first.0 + bit / bits_per_block);
        let bit_in_block = bit % bits_per_block;

        let mut buf = self.store.read_block(block)?;
        if e2fs_alloc::bitmap_get(&buf, bit_in_block) == value {
            return Ok(false);
        }
        e2fs_alloc::bitmap_set(&mut buf, bit_in_block, value);
        self.store.write_block(block, &buf)?;
        Ok(true)
    }

    // ── On-disk inode access ────────────────────────────────────────────

    fn check_inode_index(&self, ino: InodeIndex) -> Result<()> {
        if ino.0 == 0
            || ino.0 > self.geo.inodes_count
            || (ino != InodeIndex::ROOT && ino.0 < self.geo.first_ino)
        {
            return Err(Ext2Error::NotFound(format!("inode {ino}")));
        }
        Ok(())
    }

    fn inode_table_of(&self, ino: InodeIndex) -> Result<BlockIndex> {
        let group = group_for_inode(ino, self.geo.inodes_per_group);
        Ok(self.bgd(group)?.inode_table)
    }

    fn read_raw_inode(&self, ino: InodeIndex) -> Result<RawInode> {
        self.check_inode_index(ino)?;
        let table = self.inode_table_of(ino)?;
        e2fs_inode::read_inode(&self.store, &self.geo, table, ino)
    }

    /// Persist a raw inode, keeping any live instance coherent.
    ///
    /// When the cache holds this inode, its in-memory state is refreshed
    /// first and its lock is held across the backing block write, so readers
    /// acquiring the inode afterwards see the new record.
    pub fn write_raw_inode(&self, ino: InodeIndex, raw: &RawInode) -> Result<()> {
        self.check_inode_index(ino)?;
        let table = self.inode_table_of(ino)?;

        let live = self.inode_cache.lock().get(&ino).cloned();
        match live {
            Some(live) => {
                let _state = live.begin_raw_update(self.geo.block_size, raw);
                e2fs_inode::write_inode(&self.store, &self.geo, table, ino, raw)
            }
            None => e2fs_inode::write_inode(&self.store, &self.geo, table, ino, raw),
        }
    }

    pub(crate) fn resolve_block_list(
        &self,
        ino: InodeIndex,
        raw: &RawInode,
    ) -> Result<Vec<BlockIndex>> {
        e2fs_inode::resolve_block_list(&self.store, &self.geo, ino, raw)
    }

    // ── Inode cache ─────────────────────────────────────────────────────

    /// Get the unique live instance for an inode, loading it on first use.
    ///
    /// Double-checked: the cache lock is released for the disk read and the
    /// map is re-checked before insertion, so a racing caller's instance
    /// wins and at most one `LiveInode` exists per index.
    pub fn get_inode(&self, id: InodeId) -> Result<Arc<LiveInode>> {
        if id.fs != self.id {
            return Err(Ext2Error::NotFound(format!("inode {id}")));
        }
        self.get_inode_by_index(id.index)
    }

    fn get_inode_by_index(&self, ino: InodeIndex) -> Result<Arc<LiveInode>> {
        {
            let cache = self.inode_cache.lock();
            if let Some(live) = cache.get(&ino) {
                return Ok(Arc::clone(live));
            }
        }

        let raw = self.read_raw_inode(ino)?;

        let mut cache = self.inode_cache.lock();
        if let Some(live) = cache.get(&ino) {
            return Ok(Arc::clone(live));
        }
        let live = Arc::new(LiveInode::new(
            InodeId::new(self.id, ino),
            raw,
            self.geo.block_size,
        ));
        cache.insert(ino, Arc::clone(&live));
        Ok(live)
    }

    // ── VFS surface ─────────────────────────────────────────────────────

    /// The root directory: inode 2.
    #[must_use]
    pub fn root_inode(&self) -> InodeId {
        InodeId::new(self.id, InodeIndex::ROOT)
    }

    pub fn inode_metadata(&self, id: InodeId) -> Result<InodeMetadata> {
        Ok(self.get_inode(id)?.metadata())
    }

    /// Read file bytes; returns the byte count, or a negative errno.
    ///
    /// Directories cannot be read this way (`-EISDIR`); traversal is the
    /// sanctioned surface for directory content.
    pub fn read_inode_bytes(&self, id: InodeId, offset: u64, count: usize, buf: &mut [u8]) -> i64 {
        let result = self.get_inode(id).and_then(|live| {
            if live.metadata().is_directory() {
                return Err(Ext2Error::IsDirectory);
            }
            live.read_bytes(self, offset, count, buf)
        });
        match result {
            Ok(n) => n as i64,
            Err(e) => -i64::from(e.to_errno()),
        }
    }

    /// Same-size rewrite of a file's content.
    pub fn write_inode(&self, id: InodeId, data: &[u8]) -> Result<()> {
        self.get_inode(id)?.write_bytes(self, data)
    }

    /// Walk a directory's entries; `visit` returns `false` to stop.
    pub fn traverse_directory(
        &self,
        id: InodeId,
        visit: impl FnMut(&DirEntryInfo) -> bool,
    ) -> Result<()> {
        self.get_inode(id)?.traverse_as_directory(self, visit)
    }

    /// Adjust an inode's link count by `delta`. A zero delta is a no-op.
    pub fn modify_link_count(&self, id: InodeId, delta: i32) -> Result<()> {
        if id.fs != self.id {
            return Err(Ext2Error::NotFound(format!("inode {id}")));
        }
        let mut raw = self.read_raw_inode(id.index)?;
        if delta == 0 {
            return Ok(());
        }

        let new_count = i32::from(raw.links_count) + delta;
        let new_count = u16::try_from(new_count)
            .map_err(|_| Ext2Error::Unsupported("link count out of range"))?;
        debug!(
            target: "e2fs::inode",
            fs = self.id.0,
            ino = id.index.0,
            from = raw.links_count,
            to = new_count,
            "link count changed"
        );
        raw.links_count = new_count;
        self.write_raw_inode(id.index, &raw)
    }

    /// Stamp an inode's modification time.
    pub fn set_mtime(&self, id: InodeId, epoch_seconds: u32) -> Result<()> {
        if id.fs != self.id {
            return Err(Ext2Error::NotFound(format!("inode {id}")));
        }
        let mut raw = self.read_raw_inode(id.index)?;
        raw.mtime = epoch_seconds;
        self.write_raw_inode(id.index, &raw)
    }

    /// Create a new inode under `parent`, with `size` bytes of zeroed
    /// content backed by freshly allocated blocks.
    ///
    /// Nothing is committed until the directory entry is in place: a name
    /// collision (`Exists`) leaves every bitmap and counter untouched, and
    /// the reservation is simply forgotten.
    pub fn create_inode(
        &self,
        parent: InodeId,
        name: &str,
        mode: u16,
        size: u32,
    ) -> Result<InodeId> {
        let parent_live = self.get_inode(parent)?;
        if !parent_live.metadata().is_directory() {
            return Err(Ext2Error::NotDirectory);
        }
        if name.is_empty() || name.len() > e2fs_types::NAME_MAX {
            return Err(Ext2Error::NameTooLong);
        }

        // Reservations: nothing on disk changes yet.
        let ino = self.allocate_inode(None, size)?;
        let group = group_for_inode(ino, self.geo.inodes_per_group);
        let blocks = self.allocate_blocks(group, self.geo.blocks_for_size(size))?;

        // Indirect pointers are not written by this engine yet.
        if blocks.len() > e2fs_types::NDIR_BLOCKS {
            return Err(Ext2Error::FileTooBig);
        }

        // The collision check happens here; on failure the reservations are
        // harmlessly forgotten.
        self.add_directory_entry(&parent_live, name, ino, FileType::from_mode(mode))?;

        self.set_inode_allocation_state(ino, true)?;
        for block in &blocks {
            self.set_block_allocation_state(group, *block, true)?;
        }

        let raw = e2fs_inode::build_inode(mode, size, &blocks, now_epoch(), self.geo.block_size);
        self.write_raw_inode(ino, &raw)?;

        debug!(
            target: "e2fs::inode",
            fs = self.id.0,
            parent = parent.index.0,
            ino = ino.0,
            name,
            mode,
            size,
            "created inode"
        );
        Ok(InodeId::new(self.id, ino))
    }

    /// Create a directory: mode forced to directory, one block of content,
    /// seeded with `.` and `..`.
    pub fn create_directory(&self, parent: InodeId, name: &str, mode: u16) -> Result<InodeId> {
        let mode = (mode & !S_IFMT) | S_IFDIR;
        let id = self.create_inode(parent, name, mode, self.geo.block_size)?;

        let dir_live = self.get_inode(id)?;
        let seed = vec![
            DirEntry::new(&b"."[..], id.index.0, FileType::Dir),
            DirEntry::new(&b".."[..], parent.index.0, FileType::Dir),
        ];
        self.write_directory_content(&dir_live, &seed)?;

        // `..` is a new link to the parent.
        self.modify_link_count(parent, 1)?;

        {
            let group = group_for_inode(id.index, self.geo.inodes_per_group);
            let mut meta = self.meta.lock();
            self.ensure_bgdt(&mut meta)?;
            let bgdt = meta.bgdt.as_mut().expect("BGDT loaded");
            bgdt.descs[(group.0 - 1) as usize].used_dirs_count += 1;
            self.write_bgdt(&mut meta)?;
        }

        debug!(
            target: "e2fs::dir",
            fs = self.id.0,
            parent = parent.index.0,
            ino = id.index.0,
            name,
            "created directory"
        );
        Ok(id)
    }

    /// Find the directory containing an inode by scanning its block group's
    /// directories and reverse-looking-up the child. O(inodes_per_group).
    pub fn find_parent_of_inode(&self, id: InodeId) -> Result<InodeId> {
        let child = self.get_inode(id)?;
        let group = group_for_inode(child.index(), self.geo.inodes_per_group);
        let first = (group.0 - 1) * self.geo.inodes_per_group + 1;
        let last = (first + self.geo.inodes_per_group - 1).min(self.geo.inodes_count);

        for candidate in first..=last {
            let live = match self.get_inode_by_index(InodeIndex(candidate)) {
                Ok(live) => live,
                Err(Ext2Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if !live.metadata().is_directory() {
                continue;
            }
            if live.reverse_lookup(self, id)?.is_some() {
                return Ok(live.id());
            }
        }
        Err(Ext2Error::NotFound(format!("parent of inode {id}")))
    }

    // ── Directory writing ───────────────────────────────────────────────

    /// Serialize `entries` and rewrite the directory's content in place.
    fn write_directory_content(&self, dir: &Arc<LiveInode>, entries: &[DirEntry]) -> Result<()> {
        let data = e2fs_ondisk::serialize_entries(entries, self.geo.block_size as usize).map_err(
            |e| Ext2Error::Corrupt {
                block: 0,
                detail: format!("directory inode {}: {e}", dir.index()),
            },
        )?;
        dir.write_bytes(self, &data)
    }

    /// Append one entry to a directory, failing with `Exists` on collision.
    fn add_directory_entry(
        &self,
        dir: &Arc<LiveInode>,
        name: &str,
        child: InodeIndex,
        file_type: FileType,
    ) -> Result<()> {
        let metadata = dir.metadata();
        let mut buf = vec![0_u8; metadata.size as usize];
        let n = dir.read_bytes(self, 0, buf.len(), &mut buf)?;
        buf.truncate(n);

        let mut entries =
            e2fs_ondisk::parse_entries(&buf).map_err(|e| Ext2Error::Corrupt {
                block: 0,
                detail: format!("directory inode {}: {e}", dir.index()),
            })?;

        if entries.iter().any(|e| e.name == name.as_bytes()) {
            debug!(
                target: "e2fs::dir",
                fs = self.id.0,
                dir = dir.index().0,
                name,
                "name collision"
            );
            return Err(Ext2Error::Exists);
        }

        entries.push(DirEntry::new(name.as_bytes().to_vec(), child.0, file_type));
        self.write_directory_content(dir, &entries)
    }
}

impl std::fmt::Debug for Ext2Fs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ext2Fs")
            .field("id", &self.id)
            .field("geometry", &self.geo)
            .finish()
    }
}

/// Read the 1024-byte superblock region: device sectors 2 and 3.
fn read_superblock_region(device: &dyn SectorDevice) -> Result<Vec<u8>> {
    debug_assert_eq!(SUPERBLOCK_OFFSET / SECTOR_SIZE, 2);
    let mut raw = vec![0_u8; SUPERBLOCK_SIZE];
    device.read_sector(2, &mut raw[..SECTOR_SIZE])?;
    device.read_sector(3, &mut raw[SECTOR_SIZE..])?;
    Ok(raw)
}

/// Blocks occupied by the BGDT.
fn bgdt_block_count(geo: &FsGeometry) -> u32 {
    (geo.group_count * 32).div_ceil(geo.block_size)
}

fn group_desc(bgdt: &BgdtCache, group: GroupIndex) -> Result<GroupDesc> {
    let idx = group
        .0
        .checked_sub(1)
        .map(|g| g as usize)
        .filter(|g| *g < bgdt.descs.len());
    match idx {
        Some(idx) => Ok(bgdt.descs[idx]),
        None => Err(Ext2Error::Corrupt {
            block: 0,
            detail: format!("block group {group} out of range"),
        }),
    }
}
