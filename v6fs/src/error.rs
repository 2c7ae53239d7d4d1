use std::io;
use thiserror::Error;

pub type FsResult<T> = Result<T, FsError>;

/// Outcomes of filesystem operations; see [`FsError::is_fatal`] for the ones
/// that end a session.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("an entry with that name already exists")]
    DuplicateName,
    #[error("name longer than 28 bytes")]
    NameTooLong,
    #[error("invalid name")]
    InvalidName,
    #[error("path longer than 255 bytes")]
    PathTooLong,
    #[error("no free data block left")]
    DiskFull,
    #[error("no free inode left")]
    InodeExhausted,
    #[error("directory has no free address slot")]
    DirectoryFull,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a directory")]
    NotADirectory,
    #[error("file larger than 9 direct blocks")]
    SizeLimitExceeded,
    #[error("inode {0} out of range")]
    InvalidInode(u32),
    #[error("invalid geometry: {total_blocks} blocks with {inode_blocks} inode blocks")]
    InvalidGeometry { total_blocks: u32, inode_blocks: u32 },
    #[error("container holds no filesystem, run initfs first")]
    NotInitialized,
    #[error("corrupted filesystem: {0}")]
    Corrupted(&'static str),
    #[error("container I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Small integer status handed to the command layer, 0 being success.
    pub fn status(&self) -> i32 {
        match self {
            FsError::NotFound => 1,
            FsError::NameTooLong => 2,
            FsError::DuplicateName => 3,
            FsError::DiskFull => 4,
            FsError::InodeExhausted => 5,
            FsError::DirectoryFull => 6,
            FsError::IsDirectory => 7,
            FsError::NotADirectory => 8,
            FsError::SizeLimitExceeded => 9,
            FsError::InvalidName
            | FsError::PathTooLong
            | FsError::InvalidInode(_)
            | FsError::InvalidGeometry { .. } => 10,
            FsError::NotInitialized => 11,
            FsError::Corrupted(_) | FsError::Io(_) => 12,
        }
    }

    /// Whether the container itself can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FsError::Io(_) | FsError::Corrupted(_))
    }
}
