/*
 * Copyright 2025 OpenStudioLandscapes Contributors
 */

use anyhow::{bail, Result};
use slog::{error, info, Logger};
use std::ffi::{OsStr, OsString};
use std::fs::DirBuilder;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;

#[derive(Debug, PartialEq)]
pub enum FileType {
    Directory,
    File,
    Link,
}

#[derive(Debug, PartialEq)]
pub struct FileInfo {
    pub filetype: FileType,
    pub perms: u32,
}

/**
 * Look at a path without following a final symbolic link.  Returns None if
 * there is nothing there.
 */
pub fn check<P: AsRef<Path>>(p: P) -> Result<Option<FileInfo>> {
    let p = p.as_ref();
    let md = match std::fs::symlink_metadata(p) {
        Ok(md) => md,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => bail!("lstat({}): {}", p.display(), e),
    };

    let ft = md.file_type();
    let filetype = match (ft.is_dir(), ft.is_file(), ft.is_symlink()) {
        (true, _, _) => FileType::Directory,
        (_, true, _) => FileType::File,
        (_, _, true) => FileType::Link,
        _ => bail!("{}: unsupported file type {:?}", p.display(), ft),
    };

    Ok(Some(FileInfo {
        filetype,
        perms: md.permissions().mode() & 0o7777,
    }))
}

/**
 * Set the mode of a file or directory.  Links have no mode of their own and
 * are left alone.  Returns true if the mode was changed.
 */
pub fn perms<P: AsRef<Path>>(log: &Logger, p: P, mode: u32) -> Result<bool> {
    let p = p.as_ref();

    let fi = match check(p)? {
        Some(fi) => fi,
        None => bail!("cannot chmod {}: no such file", p.display()),
    };
    if fi.filetype == FileType::Link || fi.perms == mode {
        return Ok(false);
    }

    info!(log, "chmod {:o} -> {:o} {}", fi.perms, mode, p.display());
    let res = std::fs::set_permissions(p, std::fs::Permissions::from_mode(mode));
    if let Err(e) = res {
        bail!("chmod({}, {:o}): {}", p.display(), mode, e);
    }
    Ok(true)
}

/**
 * Make sure a directory, and any missing parents, exist with this mode.
 */
pub fn directory<P: AsRef<Path>>(
    log: &Logger,
    dir: P,
    mode: u32,
) -> Result<bool> {
    let dir = dir.as_ref();

    let created = match check(dir)? {
        Some(fi) if fi.filetype == FileType::Directory => false,
        Some(fi) => {
            bail!("{} exists but is a {:?}", dir.display(), fi.filetype);
        }
        None => {
            info!(log, "mkdir -p {}", dir.display());
            DirBuilder::new().recursive(true).mode(mode).create(dir)?;
            true
        }
    };

    Ok(perms(log, dir, mode)? || created)
}

/**
 * Write a complete new file next to "dst" and rename it over the top, so that
 * readers see either the old or the new contents.
 */
fn replace(dst: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let parent = dst
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.as_file()
        .set_permissions(std::fs::Permissions::from_mode(mode))?;
    tmp.persist(dst)?;
    Ok(())
}

/**
 * Make sure the file at "dst" holds "contents" and has this mode.  Returns
 * true if anything had to change.
 */
pub fn file_str<P: AsRef<Path>>(
    log: &Logger,
    contents: &str,
    dst: P,
    mode: u32,
) -> Result<bool> {
    let dst = dst.as_ref();

    let write = match check(dst)? {
        None => true,
        Some(fi) if fi.filetype != FileType::File => {
            bail!("{} should be a file, not a {:?}", dst.display(),
                fi.filetype);
        }
        Some(_) => std::fs::read(dst)? != contents.as_bytes(),
    };

    if write {
        info!(log, "writing {} ...", dst.display());
        replace(dst, contents.as_bytes(), mode)?;
        return Ok(true);
    }

    perms(log, dst, mode)
}

/**
 * Return the contents with every line equal to "line" removed and one copy of
 * "line" appended at the end.  This is the "sed -e '$aLINE' -e '/LINE/d'"
 * edit, without the regular expression pitfalls of sed.
 */
pub fn with_line_at_end(contents: &str, line: &str) -> String {
    let mut out = String::new();

    for l in contents.lines() {
        if l.trim_end() == line {
            continue;
        }
        out.push_str(l);
        out.push('\n');
    }

    out.push_str(line);
    out.push('\n');
    out
}

/**
 * Make sure "line" appears exactly once, as the last line of the file at
 * "dst".  The file is created if it does not exist.  Returns true if the file
 * was changed.
 */
pub fn line_at_end<P: AsRef<Path>>(
    log: &Logger,
    dst: P,
    line: &str,
) -> Result<bool> {
    let dst = dst.as_ref();

    /*
     * Edit the file a symbolic link points at, rather than replacing the link.
     */
    let dst = match check(dst)? {
        Some(fi) if fi.filetype == FileType::Link => {
            std::fs::canonicalize(dst)?
        }
        _ => dst.to_path_buf(),
    };

    let (existing, mode) = match check(&dst)? {
        Some(fi) if fi.filetype == FileType::Directory => {
            bail!("{} is a directory, not a file", dst.display());
        }
        Some(fi) => (String::from_utf8(std::fs::read(&dst)?)?, fi.perms),
        None => (String::new(), 0o644),
    };

    let updated = with_line_at_end(&existing, line);
    if updated == existing {
        info!(log, "{} already ends with {:?}", dst.display(), line);
        return Ok(false);
    }

    info!(log, "updating {} ...", dst.display());
    replace(&dst, updated.as_bytes(), mode)?;
    Ok(true)
}

/**
 * Relay each line a child writes to one of its output streams into the log,
 * tagged with "tag".
 */
fn relay<T>(log: &Logger, tag: &'static str, stream: Option<T>)
    -> Option<JoinHandle<()>>
    where T: Read + Send + 'static,
{
    let stream = stream?;
    let log = log.clone();

    Some(std::thread::spawn(move || {
        /*
         * Output is split on newlines as raw bytes; it need not be UTF-8.
         */
        for l in BufReader::new(stream).split(b'\n') {
            match l {
                Ok(l) => {
                    let l = String::from_utf8_lossy(&l);
                    let l = l.trim_end();
                    if !l.is_empty() {
                        info!(log, "{}| {}", tag, l);
                    }
                }
                Err(e) => {
                    error!(log, "reading {} stream: {}", tag, e);
                    break;
                }
            }
        }
    }))
}

fn describe(cmd: &Command) -> Vec<OsString> {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| a.to_os_string())
        .collect()
}

/*
 * Locale variables that would change the messages of the programs we run:
 */
const LOCALE_VARS: &[&str] = &[
    "LANG",
    "LANGUAGE",
    "LC_ALL",
    "LC_COLLATE",
    "LC_CTYPE",
    "LC_MESSAGES",
    "LC_MONETARY",
    "LC_NUMERIC",
    "LC_TIME",
];

/**
 * Run programs in the C locale, so that their output is the same everywhere.
 */
pub fn scrub_env(cmd: &mut Command) {
    for v in LOCALE_VARS.iter() {
        cmd.env_remove(v);
    }
    cmd.env("LC_ALL", "C");
}

fn command<S: AsRef<OsStr>>(args: &[S]) -> Result<Command> {
    match args.split_first() {
        Some((prog, rest)) => {
            let mut cmd = Command::new(prog);
            cmd.args(rest);
            Ok(cmd)
        }
        None => bail!("no program to execute"),
    }
}

/**
 * Run a program, relaying its output through the log.  The program gets no
 * terminal, so it must not need to prompt.
 */
pub fn run<S: AsRef<OsStr>>(log: &Logger, args: &[S]) -> Result<()> {
    let mut cmd = command(args)?;
    scrub_env(&mut cmd);

    let desc = describe(&cmd);
    info!(log, "exec: {:?}", &desc);

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let relays = vec![
        relay(log, "O", child.stdout.take()),
        relay(log, "E", child.stderr.take()),
    ];
    for r in relays.into_iter().flatten() {
        if r.join().is_err() {
            bail!("output relay for {:?} panicked", &desc);
        }
    }

    let es = child.wait()?;
    if !es.success() {
        bail!("exec {:?}: {}", &desc, es);
    }
    Ok(())
}

/**
 * Run a program attached to our terminal, so that it can prompt the user (for
 * a sudo password, a confirmation, and so on).  The exit status is returned
 * to the caller, who decides what a failure means.
 */
pub fn run_interactive<S: AsRef<OsStr>>(
    log: &Logger,
    args: &[S],
) -> Result<ExitStatus> {
    let mut cmd = command(args)?;
    info!(log, "exec: {:?}", describe(&cmd));

    cmd.stdin(Stdio::inherit());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::inherit());

    Ok(cmd.spawn()?.wait()?)
}

/**
 * Run a program with the provided bytes as its standard input.  The input is
 * not logged.
 */
pub fn run_with_input<S: AsRef<OsStr>>(
    log: &Logger,
    args: &[S],
    input: &[u8],
) -> Result<()> {
    let mut cmd = command(args)?;
    let desc = describe(&cmd);
    info!(log, "exec: {:?} (with input)", &desc);

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::inherit());

    let mut child = cmd.spawn()?;
    match child.stdin.take() {
        Some(mut stdin) => {
            stdin.write_all(input)?;
            stdin.flush()?;
        }
        None => bail!("no stdin for {:?}", &desc),
    }

    let es = child.wait()?;
    if !es.success() {
        bail!("exec {:?}: {}", &desc, es);
    }
    Ok(())
}
