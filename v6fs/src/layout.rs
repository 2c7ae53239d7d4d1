use crate::error::{FsError, FsResult};
use crate::BLOCK_SIZE;
use bitflags::bitflags;
use std::borrow::Cow;
use std::time::{SystemTime, UNIX_EPOCH};

/// block 0 is the (unused) boot block
pub const SUPER_BLOCK_ID: u32 = 1;
/// capacity of the in-memory free array
pub const FREE_ARRAY_LEN: usize = 251;

pub const INODE_SIZE: usize = 64;
pub const INODES_PER_BLOCK: u32 = (BLOCK_SIZE / INODE_SIZE) as u32;
/// byte offset of inode 1
pub const INODE_REGION_OFFSET: u64 = 2 * BLOCK_SIZE as u64;
pub const ROOT_INODE: u32 = 1;

pub const INODE_DIRECT_CNT: usize = 9;
pub const MAX_FILE_SIZE: usize = INODE_DIRECT_CNT * BLOCK_SIZE;

pub const MAX_NAME_LENGTH: usize = 28;
pub const MAX_PATH_LENGTH: usize = 255;
/// inode number of a free directory slot (-1 on disk)
pub const FREE_DIR_ENTRY: u32 = u32::MAX;

fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Seconds since the unix epoch, truncated to the 32-bit on-disk width.
pub fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Byte offset of a block inside the container.
pub fn block_offset(block_id: u32) -> u64 {
    block_id as u64 * BLOCK_SIZE as u64
}

/// Byte offset of an inode record inside the container.
pub fn inode_offset(inode_id: u32) -> u64 {
    INODE_REGION_OFFSET + (inode_id as u64 - 1) * INODE_SIZE as u64
}

/// should be BLOCK_SIZE bytes, stored at block 1
///
/// isize, fsize, nfree, free[251], flock, ilock, fmod, (pad), time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuperBlock {
    /// blocks in the inode region
    pub isize: u32,
    /// total blocks of the container
    pub fsize: u32,
    pub nfree: u32,
    pub free: [u32; FREE_ARRAY_LEN],
    pub flock: u8,
    pub ilock: u8,
    pub fmod: u8,
    pub time: u32,
}

const FREE_ARRAY_OFFSET: usize = 12;
const FLOCK_OFFSET: usize = FREE_ARRAY_OFFSET + FREE_ARRAY_LEN * 4;
const SUPER_TIME_OFFSET: usize = FLOCK_OFFSET + 4;

impl SuperBlock {
    pub fn new(inode_blocks: u32, total_blocks: u32) -> Self {
        Self {
            isize: inode_blocks,
            fsize: total_blocks,
            nfree: 0,
            free: [0; FREE_ARRAY_LEN],
            flock: b'x',
            ilock: b'x',
            fmod: b'x',
            time: now(),
        }
    }

    pub fn inode_count(&self) -> u32 {
        self.isize * INODES_PER_BLOCK
    }

    /// First block handed out by the free list; everything below is boot block,
    /// superblock or inode region.
    pub fn data_start_block(&self) -> u32 {
        self.isize + 2
    }

    pub fn is_valid(&self) -> bool {
        self.isize >= 1
            && self.isize <= u32::MAX / INODES_PER_BLOCK
            && self.fsize > self.data_start_block()
            && self.nfree as usize <= FREE_ARRAY_LEN
    }

    pub fn from_bytes(buf: &[u8; BLOCK_SIZE]) -> Self {
        let mut free = [0u32; FREE_ARRAY_LEN];
        for (i, slot) in free.iter_mut().enumerate() {
            *slot = get_u32(buf, FREE_ARRAY_OFFSET + i * 4);
        }
        Self {
            isize: get_u32(buf, 0),
            fsize: get_u32(buf, 4),
            nfree: get_u32(buf, 8),
            free,
            flock: buf[FLOCK_OFFSET],
            ilock: buf[FLOCK_OFFSET + 1],
            fmod: buf[FLOCK_OFFSET + 2],
            time: get_u32(buf, SUPER_TIME_OFFSET),
        }
    }

    pub fn to_bytes(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        put_u32(&mut buf, 0, self.isize);
        put_u32(&mut buf, 4, self.fsize);
        put_u32(&mut buf, 8, self.nfree);
        for (i, block_id) in self.free.iter().enumerate() {
            put_u32(&mut buf, FREE_ARRAY_OFFSET + i * 4, *block_id);
        }
        buf[FLOCK_OFFSET] = self.flock;
        buf[FLOCK_OFFSET + 1] = self.ilock;
        buf[FLOCK_OFFSET + 2] = self.fmod;
        put_u32(&mut buf, SUPER_TIME_OFFSET, self.time);
        buf
    }

    /// Contents of a free-chain block: the current count followed by the whole array.
    pub fn free_chain_bytes(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        put_u32(&mut buf, 0, self.nfree);
        for (i, block_id) in self.free.iter().enumerate() {
            put_u32(&mut buf, 4 + i * 4, *block_id);
        }
        buf
    }

    /// Replace the in-memory free array with the contents of a chain block.
    pub fn load_free_chain(&mut self, buf: &[u8; BLOCK_SIZE]) -> FsResult<()> {
        let nfree = get_u32(buf, 0);
        if nfree as usize > FREE_ARRAY_LEN {
            return Err(FsError::Corrupted("free chain count out of range"));
        }
        self.nfree = nfree;
        for (i, slot) in self.free.iter_mut().enumerate() {
            *slot = get_u32(buf, 4 + i * 4);
        }
        Ok(())
    }
}

bitflags! {
    /// V6 inode mode word
    pub struct InodeFlags: u16 {
        const ALLOCATED = 1 << 15;
        /// type bits 14..13: 10 dir, 00 plain, 01 char special, 11 block special
        const DIRECTORY = 1 << 14;
        const CHAR_SPECIAL = 1 << 13;
        const BLOCK_SPECIAL = Self::DIRECTORY.bits | Self::CHAR_SPECIAL.bits;
        const LARGE_FILE = 1 << 12;
        const SET_UID = 1 << 11;
        const SET_GID = 1 << 10;
        const STICKY = 1 << 9;
        const OWNER_R = 1 << 8;
        const OWNER_W = 1 << 7;
        const OWNER_X = 1 << 6;
        const GROUP_R = 1 << 5;
        const GROUP_W = 1 << 4;
        const GROUP_X = 1 << 3;
        const OTHER_R = 1 << 2;
        const OTHER_W = 1 << 1;
        const OTHER_X = 1 << 0;

        /// rwxr-xr--
        const DIR_MODE = Self::OWNER_R.bits | Self::OWNER_W.bits | Self::OWNER_X.bits
            | Self::GROUP_R.bits | Self::GROUP_X.bits | Self::OTHER_R.bits;
        /// rw-r-xr--
        const FILE_MODE = Self::OWNER_R.bits | Self::OWNER_W.bits
            | Self::GROUP_R.bits | Self::GROUP_X.bits | Self::OTHER_R.bits;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InodeType {
    Regular,
    Directory,
    CharSpecial,
    BlockSpecial,
}

impl InodeFlags {
    pub fn is_allocated(&self) -> bool {
        self.contains(Self::ALLOCATED)
    }

    pub fn inode_type(&self) -> InodeType {
        match (
            self.contains(Self::DIRECTORY),
            self.contains(Self::CHAR_SPECIAL),
        ) {
            (false, false) => InodeType::Regular,
            (true, false) => InodeType::Directory,
            (false, true) => InodeType::CharSpecial,
            (true, true) => InodeType::BlockSpecial,
        }
    }
}

/// size should be 64 bytes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskInode {
    pub flags: InodeFlags,
    pub nlinks: u16,
    pub uid: u32,
    pub gid: u32,
    pub size0: u32,
    pub size1: u32,
    pub addr: [u32; INODE_DIRECT_CNT],
    pub actime: u32,
    pub modtime: u32,
}

const ADDR_OFFSET: usize = 20;
const ACTIME_OFFSET: usize = ADDR_OFFSET + INODE_DIRECT_CNT * 4;

impl DiskInode {
    pub fn empty() -> Self {
        Self {
            flags: InodeFlags::empty(),
            nlinks: 0,
            uid: 0,
            gid: 0,
            size0: 0,
            size1: 0,
            addr: [0; INODE_DIRECT_CNT],
            actime: 0,
            modtime: 0,
        }
    }

    /// A directory whose `.` and `..` live in `first_block`.
    pub fn init_dir(&mut self, first_block: u32) {
        let time = now();
        self.flags = InodeFlags::ALLOCATED
            | InodeFlags::DIRECTORY
            | InodeFlags::SET_UID
            | InodeFlags::SET_GID
            | InodeFlags::DIR_MODE;
        self.nlinks = 1;
        self.uid = 0;
        self.gid = 0;
        self.size0 = 0;
        self.size1 = 2 * DIR_ENTRY_SIZE as u32;
        self.addr = [0; INODE_DIRECT_CNT];
        self.addr[0] = first_block;
        self.actime = time;
        self.modtime = time;
    }

    /// A regular file of `size` bytes; `addr` is filled by the caller.
    pub fn init_file(&mut self, size: u32) {
        let time = now();
        self.flags = InodeFlags::ALLOCATED | InodeFlags::FILE_MODE;
        self.nlinks = 1;
        self.uid = 0;
        self.gid = 0;
        self.size0 = 0;
        self.size1 = size;
        self.actime = time;
        self.modtime = time;
    }

    /// Back to the unallocated state.
    pub fn clear(&mut self) {
        *self = Self::empty();
    }

    pub fn is_allocated(&self) -> bool {
        self.flags.is_allocated()
    }
    pub fn inode_type(&self) -> InodeType {
        self.flags.inode_type()
    }
    pub fn is_dir(&self) -> bool {
        self.is_allocated() && self.inode_type() == InodeType::Directory
    }
    pub fn is_file(&self) -> bool {
        self.is_allocated() && self.inode_type() == InodeType::Regular
    }

    pub fn size(&self) -> u32 {
        self.size1
    }

    /// Block ids of the used direct slots, in slot order.
    pub fn data_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.addr.iter().copied().filter(|&block_id| block_id != 0)
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut addr = [0u32; INODE_DIRECT_CNT];
        for (i, slot) in addr.iter_mut().enumerate() {
            *slot = get_u32(buf, ADDR_OFFSET + i * 4);
        }
        Self {
            flags: InodeFlags::from_bits_truncate(get_u16(buf, 0)),
            nlinks: get_u16(buf, 2),
            uid: get_u32(buf, 4),
            gid: get_u32(buf, 8),
            size0: get_u32(buf, 12),
            size1: get_u32(buf, 16),
            addr,
            actime: get_u32(buf, ACTIME_OFFSET),
            modtime: get_u32(buf, ACTIME_OFFSET + 4),
        }
    }

    pub fn to_bytes(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        put_u16(&mut buf, 0, self.flags.bits());
        put_u16(&mut buf, 2, self.nlinks);
        put_u32(&mut buf, 4, self.uid);
        put_u32(&mut buf, 8, self.gid);
        put_u32(&mut buf, 12, self.size0);
        put_u32(&mut buf, 16, self.size1);
        for (i, block_id) in self.addr.iter().enumerate() {
            put_u32(&mut buf, ADDR_OFFSET + i * 4, *block_id);
        }
        put_u32(&mut buf, ACTIME_OFFSET, self.actime);
        put_u32(&mut buf, ACTIME_OFFSET + 4, self.modtime);
        buf
    }
}

/// inode id + 28 bytes of name, zero padded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    inode_id: u32,
    name: [u8; MAX_NAME_LENGTH],
}

/// should be 32 bytes
pub const DIR_ENTRY_SIZE: usize = 4 + MAX_NAME_LENGTH;
pub const DIR_ENTRY_NUM: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;

impl DirEntry {
    /// A free slot.
    pub fn empty() -> Self {
        Self {
            inode_id: FREE_DIR_ENTRY,
            name: [0u8; MAX_NAME_LENGTH],
        }
    }
    /// `name` is cut at MAX_NAME_LENGTH bytes; callers validate it first.
    pub fn new(name: &str, inode_id: u32) -> Self {
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_NAME_LENGTH);
        let mut new_name = [0u8; MAX_NAME_LENGTH];
        new_name[..len].copy_from_slice(&bytes[..len]);
        Self {
            inode_id,
            name: new_name,
        }
    }
    pub fn is_free(&self) -> bool {
        self.inode_id == FREE_DIR_ENTRY
    }
    pub fn inode_id(&self) -> u32 {
        self.inode_id
    }
    pub fn name(&self) -> Cow<'_, str> {
        let len = self
            .name
            .iter()
            .position(|&x| x == 0)
            .unwrap_or(MAX_NAME_LENGTH);
        String::from_utf8_lossy(&self.name[..len])
    }
    /// Compares against the whole zero-filled name field.
    pub fn name_matches(&self, name: &str) -> bool {
        let bytes = name.as_bytes();
        bytes.len() <= MAX_NAME_LENGTH
            && self.name[..bytes.len()] == *bytes
            && self.name[bytes.len()..].iter().all(|&x| x == 0)
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut name = [0u8; MAX_NAME_LENGTH];
        name.copy_from_slice(&buf[4..DIR_ENTRY_SIZE]);
        Self {
            inode_id: get_u32(buf, 0),
            name,
        }
    }
    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        put_u32(&mut buf, 0, self.inode_id);
        buf[4..].copy_from_slice(&self.name);
        buf
    }
}
