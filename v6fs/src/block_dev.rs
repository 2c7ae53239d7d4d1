use crate::layout::block_offset;
use crate::BLOCK_SIZE;
use spin::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Byte-addressable backing store of a filesystem.
///
/// Blocks are BLOCK_SIZE bytes; block `n` starts at `n * BLOCK_SIZE`. Positioned
/// reads and writes are used for inode records and directory entries.
pub trait BlockDevice: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;
    /// Current size in bytes.
    fn size(&self) -> io::Result<u64>;
    fn set_size(&self, size: u64) -> io::Result<()>;
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    fn read_block(&self, block_id: u32, buf: &mut [u8; BLOCK_SIZE]) -> io::Result<()> {
        self.read_at(block_offset(block_id), buf)
    }
    fn write_block(&self, block_id: u32, buf: &[u8; BLOCK_SIZE]) -> io::Result<()> {
        self.write_at(block_offset(block_id), buf)
    }
}

/// A host file used as the virtual disk.
pub struct ContainerFile(Mutex<File>);

impl ContainerFile {
    /// Open the container, creating an empty one if it does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self(Mutex::new(file)))
    }
}

impl BlockDevice for ContainerFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self.0.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut file = self.0.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.0.lock().metadata()?.len())
    }

    fn set_size(&self, size: u64) -> io::Result<()> {
        self.0.lock().set_len(size)
    }

    fn flush(&self) -> io::Result<()> {
        self.0.lock().sync_all()
    }
}

/// In-memory device for tests.
#[cfg(test)]
pub(crate) struct MemoryDevice(Mutex<Vec<u8>>);

#[cfg(test)]
impl MemoryDevice {
    pub fn new() -> Self {
        Self(Mutex::new(Vec::new()))
    }
}

#[cfg(test)]
impl BlockDevice for MemoryDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let data = self.0.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut data = self.0.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.0.lock().len() as u64)
    }

    fn set_size(&self, size: u64) -> io::Result<()> {
        self.0.lock().resize(size as usize, 0);
        Ok(())
    }
}
