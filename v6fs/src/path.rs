use crate::error::{FsError, FsResult};
use crate::fs::V6FileSystem;
use crate::layout::{MAX_NAME_LENGTH, MAX_PATH_LENGTH, ROOT_INODE};

/// Where the last component of a path was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryLocation {
    /// directory holding the entry
    pub parent: u32,
    /// byte offset of the entry inside the container
    pub offset: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedPath {
    pub inode: u32,
    /// `None` when the path has no components, e.g. `/`
    pub entry: Option<EntryLocation>,
}

fn check_path(path: &str) -> FsResult<()> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(FsError::PathTooLong);
    }
    Ok(())
}

impl V6FileSystem {
    /// Walk `path` from the root if it is absolute, else from `start` or the
    /// current directory.
    pub fn resolve(&self, path: &str, start: Option<u32>) -> FsResult<ResolvedPath> {
        check_path(path)?;
        let mut current = if path.starts_with('/') {
            ROOT_INODE
        } else {
            start.unwrap_or(self.cwd)
        };
        let mut entry = None;
        for name in path.split('/').filter(|name| !name.is_empty()) {
            if name.len() > MAX_NAME_LENGTH {
                return Err(FsError::NameTooLong);
            }
            let dir = self.read_inode(current)?;
            if !dir.is_dir() {
                return Err(FsError::NotADirectory);
            }
            let (offset, found) = self.find_entry(&dir, name)?.ok_or(FsError::NotFound)?;
            entry = Some(EntryLocation {
                parent: current,
                offset,
            });
            current = found.inode_id();
        }
        Ok(ResolvedPath {
            inode: current,
            entry,
        })
    }

    /// Resolve everything but the last component of `path`, returning the
    /// parent directory and the last name.
    pub fn split_parent<'p>(&self, path: &'p str) -> FsResult<(u32, &'p str)> {
        check_path(path)?;
        let trimmed = path.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(pos) => {
                let (head, name) = (&trimmed[..pos], &trimmed[pos + 1..]);
                let parent = if head.is_empty() {
                    ROOT_INODE
                } else {
                    self.resolve(head, None)?.inode
                };
                Ok((parent, name))
            }
            None if trimmed.is_empty() => Err(FsError::InvalidName),
            None => Ok((self.cwd, trimmed)),
        }
    }
}
