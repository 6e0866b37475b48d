//! Memory-mapped read-only access to a block device image

use anyhow::Result;
use memmap2::MmapOptions;
use std::fs::File;
use std::path::Path;

/// A memory-mapped image file. All reads are borrowed slices into the map;
/// the device owns the mapping for as long as any decoded structure needs
/// to re-read payload bytes.
pub struct BlockDevice {
    _file: File,
    mmap: memmap2::Mmap,
    size: u64,
}

impl BlockDevice {
    /// Open a block device or image file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();

        let mmap = unsafe { MmapOptions::new().map(&file)? };

        Ok(BlockDevice {
            _file: file,
            mmap,
            size,
        })
    }

    /// Size of the device in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read a slice of bytes from the device.
    pub fn read_bytes(&self, offset: u64, length: usize) -> Result<&[u8]> {
        let start = offset as usize;
        let end = start + length;

        if end > self.mmap.len() {
            anyhow::bail!("Read beyond end of device: {} > {}", end, self.mmap.len());
        }

        Ok(&self.mmap[start..end])
    }

    /// Read one filesystem block.
    pub fn read_block(&self, offset: u64, block_size: u32) -> Result<&[u8]> {
        self.read_bytes(offset, block_size as usize)
    }
}
