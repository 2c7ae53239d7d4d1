use crate::error::{FsError, FsResult};
use crate::fs::V6FileSystem;
use crate::layout::FREE_ARRAY_LEN;
use crate::BLOCK_SIZE;
use log::{debug, trace, warn};

/// Free blocks live in a bounded stack inside the superblock. When the stack
/// overflows it is spilled into the block being freed, which becomes the head
/// of an on-disk chain; slot 0 of every array links to the next chain block,
/// and the bottom-most one holds the sentinel 0.
impl V6FileSystem {
    /// Pop the most recently freed block.
    pub fn alloc_data_block(&mut self) -> FsResult<u32> {
        let sb = &mut self.super_block;
        if sb.nfree == 0 {
            return Err(FsError::Corrupted("empty free array"));
        }
        let top = sb.nfree as usize - 1;
        let block_id = sb.free[top];
        if block_id == 0 {
            // leave the sentinel in place so every later call sees it too
            warn!("free list exhausted");
            return Err(FsError::DiskFull);
        }
        if block_id < sb.data_start_block() || block_id >= sb.fsize {
            return Err(FsError::Corrupted("free block out of range"));
        }
        sb.nfree -= 1;

        if sb.nfree == 0 {
            // `block_id` is the next chain block: its contents become the array
            let mut chain = [0u8; BLOCK_SIZE];
            self.block_device.read_block(block_id, &mut chain)?;
            self.super_block.load_free_chain(&chain)?;
            trace!(
                "loaded free chain from block {}, {} entries",
                block_id,
                self.super_block.nfree
            );
        }
        self.sync_super_block()?;
        debug!("allocated data block {}", block_id);
        Ok(block_id)
    }

    /// Return `block_id` to the free list. Block 0 only ever enters as the
    /// disk-full sentinel.
    pub fn dealloc_data_block(&mut self, block_id: u32) -> FsResult<()> {
        let sb = &self.super_block;
        if block_id == 0 {
            if sb.nfree != 0 {
                return Err(FsError::Corrupted("block 0 freed onto a non-empty free list"));
            }
        } else if block_id < sb.data_start_block() || block_id >= sb.fsize {
            return Err(FsError::Corrupted("freed block out of range"));
        }

        if self.super_block.nfree as usize == FREE_ARRAY_LEN {
            let chain = self.super_block.free_chain_bytes();
            self.block_device.write_block(block_id, &chain)?;
            self.super_block.nfree = 0;
            trace!("free array spilled into chain block {}", block_id);
        } else if block_id != 0 {
            self.block_device.write_block(block_id, &[0u8; BLOCK_SIZE])?;
        }
        let sb = &mut self.super_block;
        sb.free[sb.nfree as usize] = block_id;
        sb.nfree += 1;
        self.sync_super_block()?;
        debug!("freed data block {}", block_id);
        Ok(())
    }

    /// Give back blocks taken by an operation that failed halfway, newest first.
    pub(crate) fn release_blocks(&mut self, blocks: &[u32]) -> FsResult<()> {
        for &block_id in blocks.iter().rev() {
            self.dealloc_data_block(block_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::FsError;
    use crate::fs::test_fs;
    use crate::BLOCK_SIZE;
    use std::collections::HashSet;

    #[test]
    fn test_lifo() {
        let mut fs = test_fs(20, 1);
        let a = fs.alloc_data_block().unwrap();
        let b = fs.alloc_data_block().unwrap();
        assert_ne!(a, b);

        fs.dealloc_data_block(a).unwrap();
        fs.dealloc_data_block(b).unwrap();
        assert_eq!(fs.alloc_data_block().unwrap(), b);
        assert_eq!(fs.alloc_data_block().unwrap(), a);
    }

    #[test]
    fn test_freed_block_is_zeroed() {
        let mut fs = test_fs(20, 1);
        let block_id = fs.alloc_data_block().unwrap();
        fs.block_device
            .write_block(block_id, &[0xaa; BLOCK_SIZE])
            .unwrap();
        fs.dealloc_data_block(block_id).unwrap();

        let mut buf = [0xffu8; BLOCK_SIZE];
        fs.block_device.read_block(block_id, &mut buf).unwrap();
        assert!(buf.iter().all(|&x| x == 0));
    }

    #[test]
    fn test_exhaustion() {
        let mut fs = test_fs(20, 1);
        // blocks 3..=18 remain after the root directory took 19
        let mut taken = HashSet::new();
        for _ in 0..16 {
            let block_id = fs.alloc_data_block().unwrap();
            assert!((3..19).contains(&block_id));
            assert!(taken.insert(block_id));
        }
        assert!(matches!(fs.alloc_data_block(), Err(FsError::DiskFull)));
        assert!(matches!(fs.alloc_data_block(), Err(FsError::DiskFull)));
        assert_eq!(fs.super_block().nfree, 1);

        fs.dealloc_data_block(7).unwrap();
        assert_eq!(fs.alloc_data_block().unwrap(), 7);
        assert!(matches!(fs.alloc_data_block(), Err(FsError::DiskFull)));
    }

    #[test]
    fn test_dealloc_rejects_metadata_blocks() {
        let mut fs = test_fs(20, 1);
        let nfree = fs.super_block().nfree;
        // superblock, inode region, past the end
        for block_id in [1, 2, 20, 100] {
            assert!(matches!(
                fs.dealloc_data_block(block_id),
                Err(FsError::Corrupted(_))
            ));
        }
        assert!(matches!(
            fs.dealloc_data_block(0),
            Err(FsError::Corrupted(_))
        ));
        assert_eq!(fs.super_block().nfree, nfree);
        assert!(fs.read_inode(crate::layout::ROOT_INODE).unwrap().is_dir());
        let block_id = fs.alloc_data_block().unwrap();
        assert!((3..20).contains(&block_id));
    }

    #[test]
    fn test_free_chain() {
        // sentinel + blocks 3..=299 overflow the 251-entry array once
        let mut fs = test_fs(300, 1);
        let mut taken = HashSet::new();
        loop {
            match fs.alloc_data_block() {
                Ok(block_id) => {
                    assert_ne!(block_id, 0);
                    assert!((3..300).contains(&block_id));
                    assert!(taken.insert(block_id));
                }
                Err(FsError::DiskFull) => break,
                Err(err) => panic!("unexpected error: {}", err),
            }
        }
        // everything but the root directory block
        assert_eq!(taken.len(), 296);

        // spill again on the way back and drain a second time
        let mut blocks: Vec<u32> = taken.into_iter().collect();
        blocks.sort_unstable();
        for &block_id in &blocks {
            fs.dealloc_data_block(block_id).unwrap();
        }
        let mut count = 0;
        while fs.alloc_data_block().is_ok() {
            count += 1;
        }
        assert_eq!(count, 296);
    }
}
