//! A Unix V6 style filesystem stored inside a single container file.
//!
//! The container is addressed in 1024-byte blocks: block 0 is unused, block 1
//! holds the superblock, the inode region follows and the rest are data
//! blocks handed out from a free list.

mod block_dev;
mod dir;
mod error;
mod free_list;
mod fs;
mod layout;
mod path;
mod vfs;

pub const BLOCK_SIZE: usize = 1024;

pub use block_dev::{BlockDevice, ContainerFile};
pub use error::{FsError, FsResult};
pub use fs::V6FileSystem;
pub use layout::{
    DirEntry, DiskInode, InodeFlags, InodeType, SuperBlock, DIR_ENTRY_SIZE, FREE_ARRAY_LEN,
    INODE_DIRECT_CNT, INODE_SIZE, MAX_FILE_SIZE, MAX_NAME_LENGTH, MAX_PATH_LENGTH, ROOT_INODE,
};
pub use path::{EntryLocation, ResolvedPath};
