use crate::error::{FsError, FsResult};
use crate::fs::V6FileSystem;
use crate::layout::{
    block_offset, now, DirEntry, DiskInode, DIR_ENTRY_NUM, DIR_ENTRY_SIZE, MAX_NAME_LENGTH,
};
use crate::BLOCK_SIZE;
use log::{debug, info};

/// Where a new entry goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slot {
    /// byte offset of a free entry in an existing block
    Free(u64),
    /// first unused address slot of the directory
    Grow(usize),
}

/// Names must fit the 28-byte field and cannot hold the separator.
pub(crate) fn check_name(name: &str) -> FsResult<()> {
    if name.len() > MAX_NAME_LENGTH {
        return Err(FsError::NameTooLong);
    }
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

impl V6FileSystem {
    /// Format a directory block: `.` and `..` when it is the first block of
    /// `owner`, free slots everywhere else. Takes a block from the free list
    /// unless `block_id` is given.
    pub fn alloc_dir_block(
        &mut self,
        block_id: Option<u32>,
        parent: u32,
        first: bool,
        owner: u32,
    ) -> FsResult<u32> {
        let block_id = match block_id {
            Some(block_id) => block_id,
            None => self.alloc_data_block()?,
        };
        let mut buf = [0u8; BLOCK_SIZE];
        for (i, chunk) in buf.chunks_exact_mut(DIR_ENTRY_SIZE).enumerate() {
            let entry = match (first, i) {
                (true, 0) => DirEntry::new(".", owner),
                (true, 1) => DirEntry::new("..", parent),
                _ => DirEntry::empty(),
            };
            chunk.copy_from_slice(&entry.to_bytes());
        }
        self.block_device.write_block(block_id, &buf)?;
        Ok(block_id)
    }

    /// Turn `inode_id` into an empty directory under `parent`.
    pub fn alloc_dir_inode(&mut self, inode_id: u32, parent: u32) -> FsResult<()> {
        let block_id = self.alloc_dir_block(None, parent, true, inode_id)?;
        let mut inode = DiskInode::empty();
        inode.init_dir(block_id);
        self.write_inode(inode_id, &inode)
    }

    /// Every slot of every block of `dir`, with its byte offset.
    pub(crate) fn dir_entries(&self, dir: &DiskInode) -> FsResult<Vec<(u64, DirEntry)>> {
        let mut entries = Vec::with_capacity(DIR_ENTRY_NUM);
        let mut buf = [0u8; BLOCK_SIZE];
        for block_id in dir.data_blocks() {
            self.block_device.read_block(block_id, &mut buf)?;
            for (i, chunk) in buf.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
                let offset = block_offset(block_id) + (i * DIR_ENTRY_SIZE) as u64;
                entries.push((offset, DirEntry::from_bytes(chunk)));
            }
        }
        Ok(entries)
    }

    /// Find a used entry called `name` in `dir`.
    pub(crate) fn find_entry(
        &self,
        dir: &DiskInode,
        name: &str,
    ) -> FsResult<Option<(u64, DirEntry)>> {
        Ok(self
            .dir_entries(dir)?
            .into_iter()
            .find(|(_, entry)| !entry.is_free() && entry.name_matches(name)))
    }

    /// First free slot across the allocated blocks, else the first unused
    /// address slot.
    pub(crate) fn find_free_slot(&self, dir: &DiskInode) -> FsResult<Slot> {
        if let Some((offset, _)) = self
            .dir_entries(dir)?
            .into_iter()
            .find(|(_, entry)| entry.is_free())
        {
            return Ok(Slot::Free(offset));
        }
        dir.addr
            .iter()
            .position(|&block_id| block_id == 0)
            .map(Slot::Grow)
            .ok_or(FsError::DirectoryFull)
    }

    pub(crate) fn write_dir_entry(&self, offset: u64, entry: &DirEntry) -> FsResult<()> {
        self.block_device.write_at(offset, &entry.to_bytes())?;
        Ok(())
    }

    /// Link a new child `name` into directory `parent_id`.
    ///
    /// `build` receives the reserved inode number and must write the child
    /// inode; it is expected to undo its own block allocations on failure.
    pub(crate) fn add_child<F>(&mut self, parent_id: u32, name: &str, build: F) -> FsResult<u32>
    where
        F: FnOnce(&mut Self, u32) -> FsResult<()>,
    {
        check_name(name)?;
        let mut parent = self.read_inode(parent_id)?;
        if !parent.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if self.find_entry(&parent, name)?.is_some() {
            return Err(FsError::DuplicateName);
        }
        let slot = self.find_free_slot(&parent)?;
        let child_id = self.find_unallocated_inode()?;

        let offset = match slot {
            Slot::Free(offset) => offset,
            Slot::Grow(idx) => {
                let block_id = self.alloc_dir_block(None, parent_id, idx == 0, parent_id)?;
                debug!(
                    "directory {} grows into block {} (addr[{}])",
                    parent_id, block_id, idx
                );
                parent.addr[idx] = block_id;
                block_offset(block_id) + 2 * DIR_ENTRY_SIZE as u64
            }
        };
        if let Err(err) = build(self, child_id) {
            if let Slot::Grow(idx) = slot {
                self.release_blocks(&[parent.addr[idx]])?;
            }
            return Err(err);
        }

        self.write_dir_entry(offset, &DirEntry::new(name, child_id))?;
        parent.size1 += DIR_ENTRY_SIZE as u32;
        parent.modtime = now();
        self.write_inode(parent_id, &parent)?;
        Ok(child_id)
    }

    /// Create directory `name` under `parent` and return its inode.
    pub fn makedir(&mut self, name: &str, parent: u32) -> FsResult<u32> {
        let inode_id = self.add_child(parent, name, |fs, child| {
            fs.alloc_dir_inode(child, parent)
        })?;
        info!("mkdir {} -> inode {}", name, inode_id);
        Ok(inode_id)
    }

    /// Names and inode numbers of the used entries of `dir_id`.
    pub fn ls(&self, dir_id: u32) -> FsResult<Vec<(String, u32)>> {
        let dir = self.read_inode(dir_id)?;
        if !dir.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(self
            .dir_entries(&dir)?
            .into_iter()
            .filter(|(_, entry)| !entry.is_free())
            .map(|(_, entry)| (entry.name().into_owned(), entry.inode_id()))
            .collect())
    }
}
