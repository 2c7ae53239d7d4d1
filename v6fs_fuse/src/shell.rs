use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use v6fs::{BlockDevice, ContainerFile, FsError, V6FileSystem};

/// One line of the shell, or one subcommand of the binary.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Open(String),
    Initfs { total_blocks: u32, inode_blocks: u32 },
    Cpin { external: String, path: String },
    /// `external` of `None` writes to stdout
    Cpout { path: String, external: Option<String> },
    Mkdir(String),
    Cd(String),
    Rm(String),
    Ls(Option<String>),
    Quit,
}

fn arg<'a>(args: &[&'a str], idx: usize, usage: &str) -> Result<&'a str> {
    args.get(idx)
        .copied()
        .ok_or_else(|| anyhow!("usage: {}", usage))
}

fn number(value: &str, what: &str) -> Result<u32> {
    value
        .parse()
        .with_context(|| format!("{} must be a number, got {:?}", what, value))
}

impl Command {
    /// Parse a whitespace separated shell line. Blank lines give `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let name = match words.next() {
            Some(name) => name,
            None => return Ok(None),
        };
        let args: Vec<&str> = words.collect();
        let cmd = match name {
            "openfs" => Command::Open(arg(&args, 0, "openfs <container>")?.to_string()),
            "initfs" => {
                let usage = "initfs <blocks> <inode blocks>";
                Command::Initfs {
                    total_blocks: number(arg(&args, 0, usage)?, "blocks")?,
                    inode_blocks: number(arg(&args, 1, usage)?, "inode blocks")?,
                }
            }
            "cpin" => {
                let usage = "cpin <external file> <path>";
                Command::Cpin {
                    external: arg(&args, 0, usage)?.to_string(),
                    path: arg(&args, 1, usage)?.to_string(),
                }
            }
            "cpout" => {
                let usage = "cpout <path> <external file>";
                Command::Cpout {
                    path: arg(&args, 0, usage)?.to_string(),
                    external: Some(arg(&args, 1, usage)?.to_string()),
                }
            }
            "mkdir" => Command::Mkdir(arg(&args, 0, "mkdir <path>")?.to_string()),
            "cd" => Command::Cd(arg(&args, 0, "cd <path>")?.to_string()),
            "rm" => Command::Rm(arg(&args, 0, "rm <path>")?.to_string()),
            "ls" => Command::Ls(args.first().map(|path| path.to_string())),
            "q" | "quit" => Command::Quit,
            other => bail!("invalid command: {}", other),
        };
        Ok(Some(cmd))
    }
}

/// The container and filesystem a shell works on.
#[derive(Default)]
pub struct Session {
    device: Option<Arc<dyn BlockDevice>>,
    fs: Option<V6FileSystem>,
}

impl Session {
    /// Open `path` as the container without looking at its contents.
    pub fn attach(&mut self, path: &str) -> Result<()> {
        self.close()?;
        let device: Arc<dyn BlockDevice> = Arc::new(
            ContainerFile::open(path).with_context(|| format!("cannot open container {}", path))?,
        );
        self.device = Some(device);
        Ok(())
    }

    /// Open `path` as the container, loading its filesystem if it has one.
    /// Returns whether a filesystem was loaded; a container holding anything
    /// else is kept open for `initfs` to overwrite.
    pub fn open(&mut self, path: &str) -> Result<bool> {
        self.attach(path)?;
        let device = match &self.device {
            Some(device) => device.clone(),
            None => bail!("no container open, use openfs <container>"),
        };
        if !V6FileSystem::is_initialized(device.as_ref())? {
            info!("container {} holds no filesystem", path);
            return Ok(false);
        }
        match V6FileSystem::open(device) {
            Ok(fs) => {
                info!("container {} opened, filesystem loaded", path);
                self.fs = Some(fs);
                Ok(true)
            }
            Err(FsError::Corrupted(what)) => {
                warn!("container {} holds no usable filesystem: {}", path, what);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn fs(&mut self) -> Result<&mut V6FileSystem> {
        if self.device.is_none() {
            bail!("no container open, use openfs <container>");
        }
        self.fs.as_mut().ok_or_else(|| FsError::NotInitialized.into())
    }

    /// Flush and drop the current filesystem.
    pub fn close(&mut self) -> Result<()> {
        if let Some(fs) = self.fs.take() {
            fs.quit()?;
        }
        self.device = None;
        Ok(())
    }

    /// Run `cmd`; returns `false` once the session should end.
    pub fn execute(&mut self, cmd: Command) -> Result<bool> {
        match cmd {
            Command::Open(path) => {
                if self.open(&path)? {
                    println!("{} already holds a filesystem, loaded it", path);
                } else {
                    println!("{} holds no filesystem, run initfs", path);
                }
            }
            Command::Initfs {
                total_blocks,
                inode_blocks,
            } => {
                let device = self
                    .device
                    .clone()
                    .ok_or_else(|| anyhow!("no container open, use openfs <container>"))?;
                // the old session is gone even if the new layout is rejected
                self.fs = None;
                self.fs = Some(V6FileSystem::initfs(device, total_blocks, inode_blocks)?);
                println!(
                    "initialized {} blocks with {} inodes",
                    total_blocks,
                    inode_blocks * 16
                );
            }
            Command::Cpin { external, path } => {
                let source =
                    File::open(&external).with_context(|| format!("cannot read {}", external))?;
                let inode_id = self.fs()?.import(source, &path)?;
                println!("copied {} to {} (inode {})", external, path, inode_id);
            }
            Command::Cpout { path, external } => {
                let fs = self.fs()?;
                // check the source before creating the external file
                let inode_id = fs.resolve(&path, None)?.inode;
                if fs.read_inode(inode_id)?.is_dir() {
                    return Err(FsError::IsDirectory.into());
                }
                match external {
                    Some(external) => {
                        let sink = File::create(&external)
                            .with_context(|| format!("cannot create {}", external))?;
                        let len = fs.cpout(&path, sink)?;
                        println!("wrote {} bytes of {} to {}", len, path, external);
                    }
                    None => {
                        fs.cpout(&path, io::stdout().lock())?;
                    }
                }
            }
            Command::Mkdir(path) => {
                let inode_id = self.fs()?.mkdir(&path)?;
                println!("{} created (inode {})", path, inode_id);
            }
            Command::Cd(path) => {
                let inode_id = self.fs()?.cd(&path)?;
                println!("current directory is inode {}", inode_id);
            }
            Command::Rm(path) => {
                self.fs()?.rm(&path)?;
                println!("{} deleted", path);
            }
            Command::Ls(path) => {
                let fs = self.fs()?;
                let dir = match path {
                    Some(path) => fs.resolve(&path, None)?.inode,
                    None => fs.cwd(),
                };
                for (name, inode_id) in fs.ls(dir)? {
                    println!("{:>6}  {}", inode_id, name);
                }
            }
            Command::Quit => {
                self.close()?;
                println!("quitting");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Whether `err` leaves the container in a state the session cannot go on with.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<FsError>()
        .map_or(false, FsError::is_fatal)
}

/// Exit status for a failed command.
pub fn status_of(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<FsError>().map_or(1, FsError::status)
}

/// Read commands from `input` until `q`, end of input or a fatal error.
pub fn run<R: BufRead>(session: &mut Session, input: R) -> Result<()> {
    let mut lines = input.lines();
    loop {
        print!("v6fs> ");
        io::stdout().flush()?;
        let line = match lines.next() {
            Some(line) => line?,
            None => break,
        };
        let cmd = match Command::parse(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(err) => {
                println!("{}", err);
                continue;
            }
        };
        info!("shell: {:?}", cmd);
        match session.execute(cmd) {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(err) if is_fatal(&err) => return Err(err),
            Err(err) => {
                warn!("command failed with status {}", status_of(&err));
                println!("error: {:#}", err);
            }
        }
    }
    session.close()
}
