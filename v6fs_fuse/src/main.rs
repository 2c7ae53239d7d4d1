mod logging;
mod shell;

use anyhow::{anyhow, Context, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use shell::{Command, Session};
use std::io;
use std::process;

fn main() {
    let matches = cli().get_matches();
    logging::init(matches.value_of("log"));
    if let Err(err) = run(&matches) {
        eprintln!("v6fs_fuse: {:#}", err);
        process::exit(shell::status_of(&err));
    }
}

fn cli() -> App<'static, 'static> {
    let path = |name: &'static str, help: &'static str| {
        Arg::with_name(name).required(true).index(1).help(help)
    };
    App::new("v6fs_fuse")
        .about("Unix V6 style filesystem inside a container file")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("container")
                .short("c")
                .long("container")
                .takes_value(true)
                .global(true)
                .help("Container file holding the filesystem"),
        )
        .arg(
            Arg::with_name("log")
                .long("log")
                .takes_value(true)
                .global(true)
                .help("Log level: ERROR, WARN, INFO, DEBUG or TRACE (default: $LOG, then WARN)"),
        )
        .subcommand(
            SubCommand::with_name("initfs")
                .about("Lay out a fresh filesystem")
                .arg(
                    Arg::with_name("blocks")
                        .required(true)
                        .index(1)
                        .help("Total blocks of the container"),
                )
                .arg(
                    Arg::with_name("inode_blocks")
                        .required(true)
                        .index(2)
                        .help("Blocks reserved for inodes, 16 inodes each"),
                ),
        )
        .subcommand(
            SubCommand::with_name("cpin")
                .about("Copy an external file into the filesystem")
                .arg(
                    Arg::with_name("external")
                        .required(true)
                        .index(1)
                        .help("External file to read"),
                )
                .arg(
                    Arg::with_name("path")
                        .required(true)
                        .index(2)
                        .help("Path of the new file"),
                ),
        )
        .subcommand(
            SubCommand::with_name("cpout")
                .about("Copy a file out of the filesystem")
                .arg(path("path", "File to copy out"))
                .arg(
                    Arg::with_name("external")
                        .index(2)
                        .help("External file to write, stdout when absent"),
                ),
        )
        .subcommand(
            SubCommand::with_name("mkdir")
                .about("Create a directory")
                .arg(path("path", "Directory to create")),
        )
        .subcommand(
            SubCommand::with_name("rm")
                .about("Remove a file")
                .arg(path("path", "File to remove")),
        )
        .subcommand(
            SubCommand::with_name("ls")
                .about("List a directory")
                .arg(Arg::with_name("path").index(1).help("Directory, / when absent")),
        )
        .subcommand(SubCommand::with_name("shell").about("Interactive command loop"))
}

fn value(matches: &ArgMatches, name: &str) -> Result<String> {
    matches
        .value_of(name)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("missing argument <{}>", name))
}

fn number(matches: &ArgMatches, name: &str) -> Result<u32> {
    value(matches, name)?
        .parse()
        .with_context(|| format!("<{}> must be a number", name))
}

/// Map a one-shot subcommand to the shell command it runs.
fn command(name: &str, matches: &ArgMatches) -> Result<Command> {
    let cmd = match name {
        "initfs" => Command::Initfs {
            total_blocks: number(matches, "blocks")?,
            inode_blocks: number(matches, "inode_blocks")?,
        },
        "cpin" => Command::Cpin {
            external: value(matches, "external")?,
            path: value(matches, "path")?,
        },
        "cpout" => Command::Cpout {
            path: value(matches, "path")?,
            external: matches.value_of("external").map(str::to_string),
        },
        "mkdir" => Command::Mkdir(value(matches, "path")?),
        "rm" => Command::Rm(value(matches, "path")?),
        "ls" => Command::Ls(Some(
            matches.value_of("path").unwrap_or("/").to_string(),
        )),
        other => return Err(anyhow!("unknown subcommand {}", other)),
    };
    Ok(cmd)
}

fn run(matches: &ArgMatches) -> Result<()> {
    let mut session = Session::default();
    let (name, sub) = matches.subcommand();
    let sub = sub.ok_or_else(|| anyhow!("no subcommand given"))?;
    let container = sub
        .value_of("container")
        .or_else(|| matches.value_of("container"));

    if name == "shell" {
        if let Some(container) = container {
            session.open(container)?;
        }
        let stdin = io::stdin();
        return shell::run(&mut session, stdin.lock());
    }

    let container = container.ok_or_else(|| anyhow!("--container is required for {}", name))?;
    if name == "initfs" {
        session.attach(container)?;
    } else {
        session.open(container)?;
    }
    let cmd = command(name, sub)?;
    session.execute(cmd)?;
    session.close()
}
