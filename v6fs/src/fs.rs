use crate::error::{FsError, FsResult};
use crate::layout::{
    inode_offset, DiskInode, SuperBlock, INODE_SIZE, ROOT_INODE, SUPER_BLOCK_ID,
};
use crate::{BlockDevice, BLOCK_SIZE};
use log::{debug, info};
use std::sync::Arc;

/// boot block, superblock, inode region, data blocks
///
/// A session over one container: the device, the loaded superblock and the
/// current directory. Every operation writes its changes through before it
/// returns; nothing else is cached.
pub struct V6FileSystem {
    pub(crate) block_device: Arc<dyn BlockDevice>,
    pub(crate) super_block: SuperBlock,
    pub(crate) cwd: u32,
}

impl V6FileSystem {
    /// Smallest container that can hold a superblock and the root inode.
    pub const MIN_CONTAINER_SIZE: u64 = 2 * BLOCK_SIZE as u64 + INODE_SIZE as u64;

    /// Lay out a fresh filesystem on `block_device`
    /// total_blocks: blocks of the container
    /// inode_blocks: blocks reserved for inodes, 16 inodes each
    pub fn initfs(
        block_device: Arc<dyn BlockDevice>,
        total_blocks: u32,
        inode_blocks: u32,
    ) -> FsResult<Self> {
        let geometry = SuperBlock::new(inode_blocks, total_blocks);
        if !geometry.is_valid() {
            return Err(FsError::InvalidGeometry {
                total_blocks,
                inode_blocks,
            });
        }
        info!(
            "initfs: {} blocks, {} inode blocks ({} inodes)",
            total_blocks,
            inode_blocks,
            geometry.inode_count()
        );
        block_device.set_size(total_blocks as u64 * BLOCK_SIZE as u64)?;

        let mut fs = Self {
            block_device,
            super_block: geometry,
            cwd: ROOT_INODE,
        };
        fs.sync_super_block()?;

        // slot 0 of the bottom-most free array is the disk-full sentinel
        fs.dealloc_data_block(0)?;
        for block_id in fs.super_block.data_start_block()..total_blocks {
            fs.dealloc_data_block(block_id)?;
        }

        let empty = DiskInode::empty();
        for inode_id in 2..=fs.super_block.inode_count() {
            fs.write_inode(inode_id, &empty)?;
        }

        fs.alloc_dir_inode(ROOT_INODE, ROOT_INODE)?;
        fs.cwd = ROOT_INODE;
        fs.block_device.flush()?;
        Ok(fs)
    }

    /// Load the filesystem already stored on `block_device`.
    pub fn open(block_device: Arc<dyn BlockDevice>) -> FsResult<Self> {
        if !Self::is_initialized(block_device.as_ref())? {
            return Err(FsError::NotInitialized);
        }
        let mut buf = [0u8; BLOCK_SIZE];
        block_device.read_block(SUPER_BLOCK_ID, &mut buf)?;
        let super_block = SuperBlock::from_bytes(&buf);
        if !super_block.is_valid() {
            return Err(FsError::Corrupted("bad superblock geometry"));
        }
        let fs = Self {
            block_device,
            super_block,
            cwd: ROOT_INODE,
        };
        if !fs.read_inode(ROOT_INODE)?.is_dir() {
            return Err(FsError::Corrupted("root inode is not a directory"));
        }
        info!(
            "opened filesystem: {} blocks, {} inodes, {} cached free blocks",
            fs.super_block.fsize,
            fs.super_block.inode_count(),
            fs.super_block.nfree
        );
        Ok(fs)
    }

    /// A container big enough to hold the superblock and root inode is
    /// taken to be initialized.
    pub fn is_initialized(block_device: &dyn BlockDevice) -> FsResult<bool> {
        Ok(block_device.size()? >= Self::MIN_CONTAINER_SIZE)
    }

    /// Flush and release the container.
    pub fn quit(self) -> FsResult<()> {
        self.block_device.flush()?;
        Ok(())
    }

    pub fn super_block(&self) -> &SuperBlock {
        &self.super_block
    }

    pub fn root_inode(&self) -> u32 {
        ROOT_INODE
    }

    /// Inode of the current directory.
    pub fn cwd(&self) -> u32 {
        self.cwd
    }

    pub(crate) fn sync_super_block(&mut self) -> FsResult<()> {
        self.super_block.time = crate::layout::now();
        self.block_device
            .write_block(SUPER_BLOCK_ID, &self.super_block.to_bytes())?;
        Ok(())
    }

    fn check_inode_id(&self, inode_id: u32) -> FsResult<()> {
        if inode_id == 0 || inode_id > self.super_block.inode_count() {
            return Err(FsError::InvalidInode(inode_id));
        }
        Ok(())
    }

    /// Linear scan for the first inode without the allocated bit.
    pub fn find_unallocated_inode(&self) -> FsResult<u32> {
        for inode_id in 1..=self.super_block.inode_count() {
            if !self.read_inode(inode_id)?.is_allocated() {
                debug!("inode {} is free", inode_id);
                return Ok(inode_id);
            }
        }
        Err(FsError::InodeExhausted)
    }

    pub fn read_inode(&self, inode_id: u32) -> FsResult<DiskInode> {
        self.check_inode_id(inode_id)?;
        let mut buf = [0u8; INODE_SIZE];
        self.block_device.read_at(inode_offset(inode_id), &mut buf)?;
        Ok(DiskInode::from_bytes(&buf))
    }

    pub fn write_inode(&self, inode_id: u32, inode: &DiskInode) -> FsResult<()> {
        self.check_inode_id(inode_id)?;
        self.block_device
            .write_at(inode_offset(inode_id), &inode.to_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_fs(total_blocks: u32, inode_blocks: u32) -> V6FileSystem {
    use crate::block_dev::MemoryDevice;
    V6FileSystem::initfs(Arc::new(MemoryDevice::new()), total_blocks, inode_blocks).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::MemoryDevice;
    use crate::layout::FREE_ARRAY_LEN;

    #[test]
    fn test_initfs_layout() {
        let fs = test_fs(20, 1);
        let sb = fs.super_block();
        assert_eq!(sb.isize, 1);
        assert_eq!(sb.fsize, 20);
        assert_eq!(sb.inode_count(), 16);
        // sentinel + blocks 3..=19, minus the root directory block
        assert_eq!(sb.nfree, 17);
        assert_eq!(sb.free[0], 0);
        assert_eq!(sb.free[1], 3);
        assert_eq!((sb.flock, sb.ilock, sb.fmod), (b'x', b'x', b'x'));
        let mut raw = [0u8; BLOCK_SIZE];
        fs.block_device.read_block(SUPER_BLOCK_ID, &mut raw).unwrap();
        assert_eq!(&raw[1016..1019], b"xxx");
        assert_eq!(fs.block_device.size().unwrap(), 20 * BLOCK_SIZE as u64);

        let root = fs.read_inode(ROOT_INODE).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.size(), 64);
        assert_eq!(root.addr[0], 19);
        assert_eq!(fs.cwd(), ROOT_INODE);

        let entries = fs.ls(ROOT_INODE).unwrap();
        assert_eq!(
            entries,
            vec![(".".to_string(), ROOT_INODE), ("..".to_string(), ROOT_INODE)]
        );
        for inode_id in 2..=16 {
            assert!(!fs.read_inode(inode_id).unwrap().is_allocated());
        }
    }

    #[test]
    fn test_initfs_rejects_bad_geometry() {
        let device = Arc::new(MemoryDevice::new());
        assert!(matches!(
            V6FileSystem::initfs(device.clone(), 3, 1),
            Err(FsError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            V6FileSystem::initfs(device, 20, 0),
            Err(FsError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_open_existing() {
        let device = Arc::new(MemoryDevice::new());
        assert!(matches!(
            V6FileSystem::open(device.clone()),
            Err(FsError::NotInitialized)
        ));

        let mut fs = V6FileSystem::initfs(device.clone(), 40, 2).unwrap();
        let docs = fs.makedir("docs", ROOT_INODE).unwrap();
        let nfree = fs.super_block().nfree;
        fs.quit().unwrap();

        let fs = V6FileSystem::open(device).unwrap();
        assert_eq!(fs.super_block().nfree, nfree);
        assert_eq!(fs.super_block().inode_count(), 32);
        assert_eq!(fs.resolve("/docs", None).unwrap().inode, docs);
    }

    #[test]
    fn test_open_rejects_garbage() {
        let device = Arc::new(MemoryDevice::new());
        device.set_size(4 * BLOCK_SIZE as u64).unwrap();
        assert!(matches!(
            V6FileSystem::open(device.clone()),
            Err(FsError::Corrupted(_))
        ));

        let mut sb = SuperBlock::new(1, 20);
        sb.nfree = FREE_ARRAY_LEN as u32 + 1;
        device.write_block(SUPER_BLOCK_ID, &sb.to_bytes()).unwrap();
        assert!(matches!(
            V6FileSystem::open(device),
            Err(FsError::Corrupted(_))
        ));
    }

    #[test]
    fn test_inode_table() {
        let fs = test_fs(20, 1);
        assert_eq!(fs.find_unallocated_inode().unwrap(), 2);

        let mut inode = DiskInode::empty();
        inode.init_file(3);
        fs.write_inode(2, &inode).unwrap();
        assert_eq!(fs.read_inode(2).unwrap(), inode);
        assert_eq!(fs.find_unallocated_inode().unwrap(), 3);

        for inode_id in 3..=16 {
            fs.write_inode(inode_id, &inode).unwrap();
        }
        assert!(matches!(
            fs.find_unallocated_inode(),
            Err(FsError::InodeExhausted)
        ));
        assert!(matches!(fs.read_inode(0), Err(FsError::InvalidInode(0))));
        assert!(matches!(fs.read_inode(17), Err(FsError::InvalidInode(17))));
        // inode 2 sits right after inode 1 at byte 2048
        let mut raw = [0u8; 2];
        fs.block_device.read_at(2048 + 64, &mut raw).unwrap();
        assert_eq!(u16::from_le_bytes(raw), inode.flags.bits());
    }
}
