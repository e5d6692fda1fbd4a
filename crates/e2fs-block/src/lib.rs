#![forbid(unsafe_code)]
//! Block I/O layer.
//!
//! Provides the [`SectorDevice`] trait (fixed 512-byte sectors, synchronous,
//! atomic per sector), a file-backed and an in-memory implementation, and
//! [`DiskStore`], which adapts a shared sector device to filesystem-block
//! sized typed reads and writes.

use e2fs_error::{Ext2Error, Result};
use e2fs_types::{BlockIndex, SECTOR_SIZE};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

fn invalid_input(detail: String) -> Ext2Error {
    Ext2Error::Io(io::Error::new(io::ErrorKind::InvalidInput, detail))
}

/// Fixed-size-sector device interface.
///
/// Sectors are exactly [`SECTOR_SIZE`] bytes. I/O is synchronous; a sector
/// write never tears. Out-of-range access is an I/O error.
pub trait SectorDevice: Send + Sync {
    /// Total number of sectors.
    fn sector_count(&self) -> u64;

    /// Read sector `lba` into `buf`. `buf.len()` MUST equal [`SECTOR_SIZE`].
    fn read_sector(&self, lba: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `buf` to sector `lba`. `buf.len()` MUST equal [`SECTOR_SIZE`].
    fn write_sector(&self, lba: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

fn check_sector_access(lba: u64, buf_len: usize, sector_count: u64) -> Result<()> {
    if buf_len != SECTOR_SIZE {
        return Err(invalid_input(format!(
            "sector buffer size mismatch: got={buf_len} expected={SECTOR_SIZE}"
        )));
    }
    if lba >= sector_count {
        return Err(invalid_input(format!(
            "sector out of range: lba={lba} sector_count={sector_count}"
        )));
    }
    Ok(())
}

/// File-backed sector device using `pread`/`pwrite` style I/O.
///
/// `std::os::unix::fs::FileExt` is thread-safe and does not require a shared
/// seek position.
#[derive(Debug, Clone)]
pub struct FileSectorDevice {
    file: Arc<File>,
    sector_count: u64,
}

impl FileSectorDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        if len % SECTOR_SIZE as u64 != 0 {
            return Err(invalid_input(format!(
                "image length is not sector-aligned: len={len}"
            )));
        }
        Ok(Self {
            file: Arc::new(file),
            sector_count: len / SECTOR_SIZE as u64,
        })
    }
}

impl SectorDevice for FileSectorDevice {
    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn read_sector(&self, lba: u64, buf: &mut [u8]) -> Result<()> {
        check_sector_access(lba, buf.len(), self.sector_count)?;
        self.file.read_exact_at(buf, lba * SECTOR_SIZE as u64)?;
        Ok(())
    }

    fn write_sector(&self, lba: u64, buf: &[u8]) -> Result<()> {
        check_sector_access(lba, buf.len(), self.sector_count)?;
        self.file.write_all_at(buf, lba * SECTOR_SIZE as u64)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// In-memory sector device for tests and synthetic images.
#[derive(Debug)]
pub struct MemSectorDevice {
    sectors: Mutex<Vec<u8>>,
    sector_count: u64,
}

impl MemSectorDevice {
    /// Create a zero-filled device with `sector_count` sectors.
    #[must_use]
    pub fn new(sector_count: u64) -> Self {
        let len = usize::try_from(sector_count).expect("sector count fits usize") * SECTOR_SIZE;
        Self {
            sectors: Mutex::new(vec![0_u8; len]),
            sector_count,
        }
    }

    /// Wrap an existing image. Length must be sector-aligned.
    pub fn from_image(image: Vec<u8>) -> Result<Self> {
        if image.len() % SECTOR_SIZE != 0 {
            return Err(invalid_input(format!(
                "image length is not sector-aligned: len={}",
                image.len()
            )));
        }
        let sector_count = (image.len() / SECTOR_SIZE) as u64;
        Ok(Self {
            sectors: Mutex::new(image),
            sector_count,
        })
    }

    /// Copy out the full image (test inspection).
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.sectors.lock().clone()
    }
}

impl SectorDevice for MemSectorDevice {
    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn read_sector(&self, lba: u64, buf: &mut [u8]) -> Result<()> {
        check_sector_access(lba, buf.len(), self.sector_count)?;
        let offset = usize::try_from(lba).expect("lba fits usize") * SECTOR_SIZE;
        let sectors = self.sectors.lock();
        buf.copy_from_slice(&sectors[offset..offset + SECTOR_SIZE]);
        Ok(())
    }

    fn write_sector(&self, lba: u64, buf: &[u8]) -> Result<()> {
        check_sector_access(lba, buf.len(), self.sector_count)?;
        let offset = usize::try_from(lba).expect("lba fits usize") * SECTOR_SIZE;
        let mut sectors = self.sectors.lock();
        sectors[offset..offset + SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Typed read/write of filesystem-sized logical blocks atop a sector device.
///
/// Block 0 starts at device byte 0; a filesystem block spans
/// `block_size / 512` consecutive sectors.
#[derive(Clone)]
pub struct DiskStore {
    device: Arc<dyn SectorDevice>,
    block_size: u32,
    sectors_per_block: u32,
}

impl DiskStore {
    pub fn new(device: Arc<dyn SectorDevice>, block_size: u32) -> Result<Self> {
        if block_size == 0
            || !block_size.is_power_of_two()
            || block_size < SECTOR_SIZE as u32
        {
            return Err(invalid_input(format!(
                "invalid block_size={block_size} (must be a power-of-two multiple of {SECTOR_SIZE})"
            )));
        }
        Ok(Self {
            device,
            block_size,
            sectors_per_block: block_size / SECTOR_SIZE as u32,
        })
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// The underlying sector device (superblock I/O addresses raw sectors).
    #[must_use]
    pub fn device(&self) -> &Arc<dyn SectorDevice> {
        &self.device
    }

    /// Read one filesystem block.
    pub fn read_block(&self, block: BlockIndex) -> Result<Vec<u8>> {
        trace!(target: "e2fs::block", event = "read_block", block = block.0);
        let mut buf = vec![0_u8; self.block_size as usize];
        let first_lba = u64::from(block.0) * u64::from(self.sectors_per_block);
        for (i, chunk) in buf.chunks_mut(SECTOR_SIZE).enumerate() {
            self.device.read_sector(first_lba + i as u64, chunk)?;
        }
        Ok(buf)
    }

    /// Read `count` consecutive blocks into one contiguous buffer.
    pub fn read_blocks(&self, first: BlockIndex, count: u32) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.block_size as usize * count as usize);
        for i in 0..count {
            buf.extend_from_slice(&self.read_block(BlockIndex(first.0 + i))?);
        }
        Ok(buf)
    }

    /// Write one filesystem block. `data.len()` MUST equal the block size.
    pub fn write_block(&self, block: BlockIndex, data: &[u8]) -> Result<()> {
        if data.len() != self.block_size as usize {
            return Err(invalid_input(format!(
                "write_block data size mismatch: got={} expected={}",
                data.len(),
                self.block_size
            )));
        }
        trace!(target: "e2fs::block", event = "write_block", block = block.0);
        let first_lba = u64::from(block.0) * u64::from(self.sectors_per_block);
        for (i, chunk) in data.chunks(SECTOR_SIZE).enumerate() {
            self.device.write_sector(first_lba + i as u64, chunk)?;
        }
        Ok(())
    }

    /// Write `count` consecutive blocks from one contiguous buffer.
    pub fn write_blocks(&self, first: BlockIndex, data: &[u8]) -> Result<()> {
        if data.len() % self.block_size as usize != 0 {
            return Err(invalid_input(format!(
                "write_blocks data not block-aligned: len={}",
                data.len()
            )));
        }
        for (i, chunk) in data.chunks(self.block_size as usize).enumerate() {
            self.write_block(BlockIndex(first.0 + i as u32), chunk)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStore")
            .field("block_size", &self.block_size)
            .field("sector_count", &self.device.sector_count())
            .finish()
    }
}
