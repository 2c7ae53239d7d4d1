use crate::error::{FsError, FsResult};
use crate::fs::V6FileSystem;
use crate::layout::{block_offset, now, DirEntry, DiskInode, DIR_ENTRY_SIZE, MAX_FILE_SIZE};
use crate::BLOCK_SIZE;
use log::{debug, info, warn};
use std::io::{Read, Write};

/// Commands issued by the shell, composed from the directory and allocator layers.
impl V6FileSystem {
    /// Copy the contents of `source` into a new regular file `name` under
    /// directory `dest`. At most 9 blocks of content are accepted.
    pub fn cpin<R: Read>(&mut self, source: R, name: &str, dest: u32) -> FsResult<u32> {
        let mut content = Vec::new();
        source
            .take(MAX_FILE_SIZE as u64 + 1)
            .read_to_end(&mut content)?;
        if content.len() > MAX_FILE_SIZE {
            return Err(FsError::SizeLimitExceeded);
        }
        let inode_id = self.add_child(dest, name, |fs, child| {
            fs.write_file_inode(child, &content)
        })?;
        info!(
            "cpin {} ({} bytes) -> inode {}",
            name,
            content.len(),
            inode_id
        );
        Ok(inode_id)
    }

    fn write_file_inode(&mut self, inode_id: u32, content: &[u8]) -> FsResult<()> {
        let mut inode = DiskInode::empty();
        let mut taken = Vec::new();
        for (chunk, slot) in content.chunks(BLOCK_SIZE).zip(inode.addr.iter_mut()) {
            let block_id = match self.alloc_data_block() {
                Ok(block_id) => block_id,
                Err(err) => {
                    warn!("cpin: giving back {} blocks", taken.len());
                    self.release_blocks(&taken)?;
                    return Err(err);
                }
            };
            taken.push(block_id);
            self.block_device.write_at(block_offset(block_id), chunk)?;
            *slot = block_id;
        }
        inode.init_file(content.len() as u32);
        self.write_inode(inode_id, &inode)
    }

    /// Write the contents of the file at `path` to `sink`, returning the byte count.
    pub fn cpout<W: Write>(&mut self, path: &str, mut sink: W) -> FsResult<u64> {
        let inode_id = self.resolve(path, None)?.inode;
        let mut inode = self.read_inode(inode_id)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        let mut remaining = inode.size() as usize;
        let mut buf = [0u8; BLOCK_SIZE];
        for block_id in inode.data_blocks() {
            if remaining == 0 {
                break;
            }
            let len = remaining.min(BLOCK_SIZE);
            self.block_device
                .read_at(block_offset(block_id), &mut buf[..len])?;
            sink.write_all(&buf[..len])?;
            remaining -= len;
        }
        if remaining != 0 {
            warn!("cpout {}: {} bytes have no block", path, remaining);
        }
        sink.flush()?;

        inode.actime = now();
        self.write_inode(inode_id, &inode)?;
        let written = inode.size() as u64 - remaining as u64;
        info!("cpout {} -> {} bytes", path, written);
        Ok(written)
    }

    /// Unlink the file at `path` and free its inode and blocks. Directories
    /// are refused.
    pub fn rm(&mut self, path: &str) -> FsResult<()> {
        let resolved = self.resolve(path, None)?;
        let mut inode = self.read_inode(resolved.inode)?;
        if inode.is_dir() {
            return Err(FsError::IsDirectory);
        }
        let location = resolved.entry.ok_or(FsError::NotFound)?;
        let mut parent = self.read_inode(location.parent)?;

        for slot in inode.addr.iter_mut() {
            if *slot == 0 {
                continue;
            }
            debug!("rm {}: freeing block {}", path, slot);
            self.dealloc_data_block(*slot)?;
            *slot = 0;
        }
        inode.clear();
        self.write_inode(resolved.inode, &inode)?;

        self.write_dir_entry(location.offset, &DirEntry::empty())?;
        parent.size1 = parent.size1.saturating_sub(DIR_ENTRY_SIZE as u32);
        parent.modtime = now();
        self.write_inode(location.parent, &parent)?;
        info!("rm {}: inode {} unallocated", path, resolved.inode);
        Ok(())
    }

    /// Change the current directory; it stays put on failure.
    pub fn cd(&mut self, path: &str) -> FsResult<u32> {
        let inode_id = self.resolve(path, None)?.inode;
        if !self.read_inode(inode_id)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        self.cwd = inode_id;
        Ok(inode_id)
    }

    /// `makedir` on a full path.
    pub fn mkdir(&mut self, path: &str) -> FsResult<u32> {
        let (parent, name) = self.split_parent(path)?;
        self.makedir(name, parent)
    }

    /// `cpin` on a full path.
    pub fn import<R: Read>(&mut self, source: R, path: &str) -> FsResult<u32> {
        let (parent, name) = self.split_parent(path)?;
        self.cpin(source, name, parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::test_fs;
    use crate::layout::{INODE_DIRECT_CNT, ROOT_INODE};
    use std::io::empty;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn round_trip(len: usize) {
        let mut fs = test_fs(40, 2);
        let data = pattern(len);
        let inode_id = fs.cpin(data.as_slice(), "file", ROOT_INODE).unwrap();
        let inode = fs.read_inode(inode_id).unwrap();
        assert!(inode.is_file());
        assert_eq!(inode.size() as usize, len);
        assert_eq!(inode.data_blocks().count(), (len + BLOCK_SIZE - 1) / BLOCK_SIZE);

        let mut out = Vec::new();
        assert_eq!(fs.cpout("/file", &mut out).unwrap(), len as u64);
        assert_eq!(out, data);
    }

    #[test]
    fn test_round_trip() {
        for len in [0, 1, 1023, 1024, 1025, 5000, MAX_FILE_SIZE] {
            round_trip(len);
        }
    }

    #[test]
    fn test_cpin_size_limit() {
        let mut fs = test_fs(40, 2);
        let root = fs.read_inode(ROOT_INODE).unwrap();
        let entries = fs.ls(ROOT_INODE).unwrap();
        let nfree = fs.super_block().nfree;

        let data = pattern(MAX_FILE_SIZE + 1);
        assert!(matches!(
            fs.cpin(data.as_slice(), "big", ROOT_INODE),
            Err(FsError::SizeLimitExceeded)
        ));
        assert_eq!(fs.read_inode(ROOT_INODE).unwrap(), root);
        assert_eq!(fs.ls(ROOT_INODE).unwrap(), entries);
        assert_eq!(fs.super_block().nfree, nfree);
        assert_eq!(fs.find_unallocated_inode().unwrap(), 2);
        assert!(matches!(fs.resolve("/big", None), Err(FsError::NotFound)));
    }

    #[test]
    fn test_cpin_disk_full_rolls_back() {
        // 16 free blocks: the second 9-block file runs out after 7
        let mut fs = test_fs(20, 1);
        fs.cpin(pattern(MAX_FILE_SIZE).as_slice(), "a", ROOT_INODE)
            .unwrap();
        let nfree = fs.super_block().nfree;
        assert_eq!(nfree, 8);
        assert!(matches!(
            fs.cpin(pattern(MAX_FILE_SIZE).as_slice(), "b", ROOT_INODE),
            Err(FsError::DiskFull)
        ));
        assert_eq!(fs.super_block().nfree, nfree);
        assert!(matches!(fs.resolve("/b", None), Err(FsError::NotFound)));
        assert!(!fs.read_inode(3).unwrap().is_allocated());
    }

    #[test]
    fn test_cpin_entry_checks() {
        let mut fs = test_fs(40, 2);
        fs.cpin(empty(), "file", ROOT_INODE).unwrap();
        assert!(matches!(
            fs.cpin(empty(), "file", ROOT_INODE),
            Err(FsError::DuplicateName)
        ));
        let long = "z".repeat(29);
        assert!(matches!(
            fs.cpin(empty(), &long, ROOT_INODE),
            Err(FsError::NameTooLong)
        ));
    }

    #[test]
    fn test_cpout_failures() {
        let mut fs = test_fs(40, 2);
        let mut out = Vec::new();
        assert!(matches!(
            fs.cpout("/missing", &mut out),
            Err(FsError::NotFound)
        ));
        fs.makedir("d", ROOT_INODE).unwrap();
        assert!(matches!(fs.cpout("/d", &mut out), Err(FsError::IsDirectory)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_rm_file() {
        let mut fs = test_fs(40, 2);
        let size_before = fs.read_inode(ROOT_INODE).unwrap().size();
        let inode_id = fs
            .cpin(pattern(3000).as_slice(), "a.txt", ROOT_INODE)
            .unwrap();
        let blocks: Vec<u32> = fs.read_inode(inode_id).unwrap().data_blocks().collect();
        assert_eq!(blocks.len(), 3);
        let nfree = fs.super_block().nfree;
        assert_eq!(
            fs.read_inode(ROOT_INODE).unwrap().size(),
            size_before + 32
        );

        fs.rm("/a.txt").unwrap();
        let inode = fs.read_inode(inode_id).unwrap();
        assert!(!inode.is_allocated());
        assert_eq!(inode.addr, [0; INODE_DIRECT_CNT]);
        assert_eq!(fs.read_inode(ROOT_INODE).unwrap().size(), size_before);
        assert_eq!(fs.super_block().nfree, nfree + 3);
        assert!(matches!(fs.resolve("/a.txt", None), Err(FsError::NotFound)));
        assert_eq!(fs.ls(ROOT_INODE).unwrap().len(), 2);

        // freed last-to-first, handed out again newest first
        for &block_id in blocks.iter().rev() {
            assert_eq!(fs.alloc_data_block().unwrap(), block_id);
        }
        // the slot and inode are reused
        assert_eq!(fs.cpin(empty(), "b", ROOT_INODE).unwrap(), inode_id);
    }

    #[test]
    fn test_rm_rejects_directories() {
        let mut fs = test_fs(40, 2);
        let docs = fs.makedir("docs", ROOT_INODE).unwrap();
        let size = fs.read_inode(ROOT_INODE).unwrap().size();
        assert!(matches!(fs.rm("/docs"), Err(FsError::IsDirectory)));
        assert!(matches!(fs.rm("/"), Err(FsError::IsDirectory)));
        assert!(matches!(fs.rm("/missing"), Err(FsError::NotFound)));
        assert_eq!(fs.resolve("/docs", None).unwrap().inode, docs);
        assert_eq!(fs.read_inode(ROOT_INODE).unwrap().size(), size);
    }

    #[test]
    fn test_rm_nested() {
        let mut fs = test_fs(40, 2);
        let docs = fs.makedir("docs", ROOT_INODE).unwrap();
        fs.cpin(pattern(10).as_slice(), "note", docs).unwrap();
        assert_eq!(fs.read_inode(docs).unwrap().size(), 96);
        fs.rm("/docs/note").unwrap();
        assert_eq!(fs.read_inode(docs).unwrap().size(), 64);
        assert_eq!(fs.read_inode(ROOT_INODE).unwrap().size(), 96);
    }

    #[test]
    fn test_cd() {
        let mut fs = test_fs(40, 2);
        let docs = fs.mkdir("/docs").unwrap();
        let inner = fs.mkdir("/docs/inner").unwrap();
        fs.import(pattern(5).as_slice(), "/docs/file").unwrap();

        assert_eq!(fs.cd("/docs").unwrap(), docs);
        assert_eq!(fs.cwd(), docs);
        assert_eq!(fs.resolve("inner", None).unwrap().inode, inner);

        assert!(matches!(fs.cd("file"), Err(FsError::NotADirectory)));
        assert!(matches!(fs.cd("nowhere"), Err(FsError::NotFound)));
        assert_eq!(fs.cwd(), docs);

        // relative paths follow the current directory
        let mut out = Vec::new();
        fs.cpout("file", &mut out).unwrap();
        assert_eq!(out, pattern(5));
        let sub = fs.mkdir("sub").unwrap();
        assert_eq!(fs.resolve("/docs/sub", None).unwrap().inode, sub);

        assert_eq!(fs.cd("..").unwrap(), ROOT_INODE);
    }
}
