use crate::{DirEntryInfo, Ext2Fs, InodeMetadata};
use e2fs_error::{Ext2Error, Result};
use e2fs_ondisk::RawInode;
use e2fs_types::{ceil_div, BlockIndex, InodeId, InodeIndex};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;

/// Stateful wrapper around a cached on-disk inode.
///
/// The inode cache guarantees at most one instance per `(fs, index)`. The
/// per-inode lock protects the raw record, the derived metadata, and the lazy
/// block-list and name-lookup caches, and is held across block I/O so a
/// reader and a writer of the same inode serialize.
pub struct LiveInode {
    id: InodeId,
    pub(crate) state: Mutex<InodeState>,
}

pub(crate) struct InodeState {
    pub(crate) raw: RawInode,
    pub(crate) metadata: InodeMetadata,
    pub(crate) block_list: Option<Arc<Vec<BlockIndex>>>,
    pub(crate) lookup_cache: Option<HashMap<String, InodeIndex>>,
}

impl LiveInode {
    pub(crate) fn new(id: InodeId, raw: RawInode, block_size: u32) -> Self {
        let metadata = InodeMetadata::from_raw(id, &raw, block_size);
        Self {
            id,
            state: Mutex::new(InodeState {
                raw,
                metadata,
                block_list: None,
                lookup_cache: None,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> InodeId {
        self.id
    }

    #[must_use]
    pub fn index(&self) -> InodeIndex {
        self.id.index
    }

    /// Snapshot of the derived metadata.
    #[must_use]
    pub fn metadata(&self) -> InodeMetadata {
        self.state.lock().metadata.clone()
    }

    /// Replace the raw record and refresh everything derived from it.
    ///
    /// The returned guard keeps the per-inode lock held so the caller can
    /// issue the backing block write before readers observe a mix of new
    /// in-memory and old on-disk state.
    pub(crate) fn begin_raw_update(
        &self,
        block_size: u32,
        raw: &RawInode,
    ) -> MutexGuard<'_, InodeState> {
        let mut state = self.state.lock();
        state.raw = raw.clone();
        state.metadata = InodeMetadata::from_raw(self.id, raw, block_size);
        state.block_list = None;
        state.lookup_cache = None;
        state
    }

    /// Lock the state with the block list populated, resolving it lazily.
    ///
    /// Resolution runs without the lock (it is pure derivation plus reads);
    /// the result is installed under a second check and a raced duplicate is
    /// discarded.
    fn locked_state_with_block_list(&self, fs: &Ext2Fs) -> Result<MutexGuard<'_, InodeState>> {
        let mut state = self.state.lock();
        loop {
            if state.block_list.is_some() {
                return Ok(state);
            }
            let raw = state.raw.clone();
            drop(state);
            let list = Arc::new(fs.resolve_block_list(self.id.index, &raw)?);
            state = self.state.lock();
            if state.block_list.is_none() {
                state.block_list = Some(list);
            }
        }
    }

    /// Read up to `count` bytes starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes copied, 0 at or past end of file. Short
    /// symlink targets are served straight from the inline `i_block` area.
    pub fn read_bytes(
        &self,
        fs: &Ext2Fs,
        offset: u64,
        count: usize,
        buf: &mut [u8],
    ) -> Result<usize> {
        let count = count.min(buf.len());

        let state = self.state.lock();
        let size = u64::from(state.raw.size);
        if size == 0 || offset >= size {
            return Ok(0);
        }

        if state.raw.has_inline_symlink() {
            let inline = state.raw.inline_bytes();
            let start = offset as usize;
            let n = count.min((size - offset) as usize);
            buf[..n].copy_from_slice(&inline[start..start + n]);
            return Ok(n);
        }
        drop(state);

        let state = self.locked_state_with_block_list(fs)?;
        let list = state.block_list.as_ref().expect("block list installed");
        if list.is_empty() {
            return Err(Ext2Error::Corrupt {
                block: 0,
                detail: format!("inode {}: empty block list", self.id.index),
            });
        }

        let bs = u64::from(fs.geometry().block_size);
        let first = (offset / bs) as usize;
        let last = (((offset + count as u64) / bs) as usize).min(list.len() - 1);
        let off_in_first = (offset % bs) as usize;

        let mut remaining = count.min((size - offset) as usize);
        let mut nread = 0_usize;

        for bi in first..=last {
            if remaining == 0 {
                break;
            }
            let block = fs.store().read_block(list[bi])?;
            let off = if bi == first { off_in_first } else { 0 };
            let n = (bs as usize - off).min(remaining);
            buf[nread..nread + n].copy_from_slice(&block[off..off + n]);
            remaining -= n;
            nread += n;
        }

        Ok(nread)
    }

    /// Rewrite the file's content in place.
    ///
    /// Only same-size rewrites are supported: the block count before and
    /// after must match. Every block is written in full; the final partial
    /// block is zero-padded.
    pub fn write_bytes(&self, fs: &Ext2Fs, data: &[u8]) -> Result<()> {
        let bs = u64::from(fs.geometry().block_size);

        let state = self.state.lock();
        if state.raw.is_symlink() {
            return Err(Ext2Error::Unsupported("symlink rewrite"));
        }
        let blocks_before = ceil_div(u64::from(state.raw.size), bs);
        let blocks_after = ceil_div(data.len() as u64, bs);
        if blocks_before != blocks_after {
            return Err(Ext2Error::Unsupported("growing or shrinking a file"));
        }
        drop(state);

        if blocks_after == 0 {
            return Ok(());
        }

        let mut state = self.locked_state_with_block_list(fs)?;
        let list = state
            .block_list
            .as_ref()
            .expect("block list installed")
            .clone();
        if (list.len() as u64) < blocks_after {
            return Err(Ext2Error::Corrupt {
                block: 0,
                detail: format!(
                    "inode {}: block list shorter than file size requires",
                    self.id.index
                ),
            });
        }

        let bs = bs as usize;
        for (i, block) in list.iter().take(blocks_after as usize).enumerate() {
            let start = i * bs;
            let end = (start + bs).min(data.len());
            let mut content = vec![0_u8; bs];
            content[..end - start].copy_from_slice(&data[start..end]);
            fs.store().write_block(*block, &content)?;
        }

        // Directory data changed out from under the name cache.
        if state.metadata.is_directory() {
            state.lookup_cache = None;
        }
        Ok(())
    }

    /// Walk the directory's entries, stopping early when `visit` returns
    /// `false`. This is the only sanctioned way to read directory content.
    pub fn traverse_as_directory(
        &self,
        fs: &Ext2Fs,
        mut visit: impl FnMut(&DirEntryInfo) -> bool,
    ) -> Result<()> {
        let metadata = self.metadata();
        if !metadata.is_directory() {
            return Err(Ext2Error::NotDirectory);
        }

        let size = metadata.size as usize;
        let mut buf = vec![0_u8; size];
        let n = self.read_bytes(fs, 0, size, &mut buf)?;
        buf.truncate(n);

        e2fs_ondisk::walk_entries(&buf, |name, ino, file_type| {
            let entry = DirEntryInfo {
                name: String::from_utf8_lossy(name).into_owned(),
                id: InodeId::new(self.id.fs, InodeIndex(ino)),
                file_type,
            };
            visit(&entry)
        })
        .map_err(|e| Ext2Error::Corrupt {
            block: 0,
            detail: format!("directory inode {}: {e}", self.id.index),
        })
    }

    /// Populate the name cache by traversal, at most once per generation.
    ///
    /// The traversal runs without the per-inode lock held (it re-enters
    /// `read_bytes`); the map is installed under a second check and a raced
    /// duplicate is discarded.
    fn populate_lookup_cache(&self, fs: &Ext2Fs) -> Result<()> {
        {
            let state = self.state.lock();
            if state.lookup_cache.is_some() {
                return Ok(());
            }
        }

        let mut children = HashMap::new();
        self.traverse_as_directory(fs, |entry| {
            children.insert(entry.name.clone(), entry.id.index);
            true
        })?;

        let mut state = self.state.lock();
        if state.lookup_cache.is_none() {
            state.lookup_cache = Some(children);
        }
        Ok(())
    }

    /// Forward name lookup in this directory.
    pub fn lookup(&self, fs: &Ext2Fs, name: &str) -> Result<Option<InodeId>> {
        if !self.metadata().is_directory() {
            return Err(Ext2Error::NotDirectory);
        }
        loop {
            self.populate_lookup_cache(fs)?;
            let state = self.state.lock();
            // A concurrent rewrite may have invalidated the cache between
            // population and this lock; rebuild when it did.
            if let Some(cache) = state.lookup_cache.as_ref() {
                return Ok(cache
                    .get(name)
                    .map(|index| InodeId::new(self.id.fs, *index)));
            }
        }
    }

    /// Find the name under which `child` appears in this directory.
    pub fn reverse_lookup(&self, fs: &Ext2Fs, child: InodeId) -> Result<Option<String>> {
        if !self.metadata().is_directory() {
            return Err(Ext2Error::NotDirectory);
        }
        loop {
            self.populate_lookup_cache(fs)?;
            let state = self.state.lock();
            if let Some(cache) = state.lookup_cache.as_ref() {
                return Ok(cache
                    .iter()
                    .find(|(_, index)| **index == child.index)
                    .map(|(name, _)| name.clone()));
            }
        }
    }
}

impl std::fmt::Debug for LiveInode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveInode").field("id", &self.id).finish()
    }
}
