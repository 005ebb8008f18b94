/*
 * Copyright 2025 OpenStudioLandscapes Contributors
 */

use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Result};
use atty::Stream;
use serde::Deserialize;
use slog::{Drain, Logger};

pub use slog::{info, warn, o};

/**
 * Log to stdout: compact output for a person at a terminal, the full format in
 * original key order when the output is going somewhere else.
 */
pub fn init_log() -> Logger {
    let dec = slog_term::TermDecorator::new().stdout().build();

    if is_tty() {
        let fmt = slog_term::CompactFormat::new(dec).build();
        Logger::root(Mutex::new(fmt).fuse(), o!())
    } else {
        let fmt = slog_term::FullFormat::new(dec).use_original_order().build();
        Logger::root(Mutex::new(fmt).fuse(), o!())
    }
}

pub fn is_tty() -> bool {
    atty::is(Stream::Stdout) && atty::is(Stream::Stdin)
}

pub fn sleep(s: u64) {
    std::thread::sleep(std::time::Duration::from_secs(s));
}

/**
 * Width of the terminal for banner lines, or 80 columns if we cannot tell.
 */
pub fn term_width() -> usize {
    width_from(crossterm::terminal::size())
}

fn width_from(size: std::io::Result<(u16, u16)>) -> usize {
    match size {
        Ok((cols, _)) if cols >= 20 => usize::from(cols),
        _ => 80,
    }
}

/**
 * Centre a title in a line of fill characters, e.g. "==== BLOCK START ====".
 */
pub fn banner(title: &str, fill: char, width: usize) -> String {
    let title = if title.is_empty() {
        String::new()
    } else {
        format!(" {} ", title)
    };

    let len = title.chars().count();
    if len >= width {
        return title;
    }

    let left = (width - len) / 2;
    let right = width - len - left;

    let mut out = String::new();
    out.extend(std::iter::repeat(fill).take(left));
    out.push_str(&title);
    out.extend(std::iter::repeat(fill).take(right));
    out
}

pub trait OutputExt {
    /**
     * A one-line account of how a captured command went, for error messages.
     */
    fn info(&self) -> String;
}

impl OutputExt for std::process::Output {
    fn info(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stdout = String::from_utf8_lossy(&self.stdout);

        /*
         * Some programs report failure on stdout; use it if stderr is quiet.
         */
        let msg = match stderr.trim() {
            "" => stdout.trim(),
            e => e,
        };

        match (self.status.code(), msg) {
            (Some(c), "") => format!("exit code {}", c),
            (Some(c), m) => format!("exit code {}: {}", c, m),
            (None, "") => self.status.to_string(),
            (None, m) => format!("{}: {}", self.status, m),
        }
    }
}

pub fn read_toml<P, O>(path: P) -> Result<O>
    where P: AsRef<Path>,
          for<'de> O: Deserialize<'de>
{
    let p = path.as_ref();

    let s = match std::fs::read_to_string(p) {
        Ok(s) => s,
        Err(e) => bail!("reading {}: {}", p.display(), e),
    };
    match toml::from_str(&s) {
        Ok(o) => Ok(o),
        Err(e) => bail!("parsing {}: {}", p.display(), e),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn banner_centres_title() {
        assert_eq!(banner("AB", '=', 10), "=== AB ===");
        assert_eq!(banner("ABC", '-', 10), "-- ABC ---");
        assert_eq!(banner("", '#', 4), "####");
    }

    #[test]
    fn banner_wider_than_line() {
        assert_eq!(banner("LONG TITLE", '=', 6), " LONG TITLE ");
    }

    #[test]
    fn output_info() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::{ExitStatus, Output};

        let out = |code: i32, stdout: &str, stderr: &str| Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        };

        assert_eq!(out(1, "", "").info(), "exit code 1");
        assert_eq!(out(1, "ignored\n", "permission denied\n").info(),
            "exit code 1: permission denied");
        assert_eq!(out(125, "no such container\n", "").info(),
            "exit code 125: no such container");
    }

    #[test]
    fn read_toml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("bad.toml");
        std::fs::write(&f, "this is = = not toml").unwrap();

        let e = read_toml::<_, toml::Value>(&f).unwrap_err();
        assert!(e.to_string().contains("bad.toml"));
    }

    #[test]
    fn width_fallback() {
        assert_eq!(width_from(Ok((132, 40))), 132);
        assert_eq!(width_from(Ok((0, 0))), 80);
        assert_eq!(width_from(Err(std::io::Error::new(
            std::io::ErrorKind::Other, "not a terminal"))), 80);
    }
}
