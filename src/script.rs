/*
 * Copyright 2025 OpenStudioLandscapes Contributors
 */

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use anyhow::{bail, Result};
use colored::{ColoredString, Colorize};
use slog::{info, Logger};

use super::common::{banner, term_width};
use super::ensure;
use super::expand::{self, Variables};
use super::host;
use super::prompt;

const PREAMBLE: &str = "#!/usr/bin/env bash\n\
    set -o errexit\n\
    set -o pipefail\n\n";
const EPILOGUE: &str = "\nexit 0\n";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Privilege {
    User,
    Root,
}

/**
 * A rendered bootstrap script for one step.
 */
#[derive(Debug)]
pub struct Script {
    pub step: String,
    pub privilege: Privilege,
    pub body: String,
}

impl Script {
    /**
     * Render a template into a complete script, with our standard preamble
     * and a final "exit 0".
     */
    pub fn render(
        step: &str,
        privilege: Privilege,
        template: &str,
        vars: &Variables,
    ) -> Result<Script> {
        let t = expand::Template::parse(template)?;

        /*
         * A variable nobody refers to is a mistake in the caller.
         */
        let used = t.variables();
        let mut unused = vars.keys()
            .filter(|k| !used.contains(&k.as_str()))
            .collect::<Vec<_>>();
        if !unused.is_empty() {
            unused.sort();
            bail!("step {:?}: variables not used by the script: {:?}",
                step, unused);
        }

        let mut body = String::from(PREAMBLE);
        body.push_str(&t.evaluate(vars)?);
        if !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(EPILOGUE);

        Ok(Script {
            step: step.to_string(),
            privilege,
            body,
        })
    }

    /**
     * The script body with line numbers, for display before execution.
     */
    pub fn listing(&self) -> String {
        let lines = self.body.lines().collect::<Vec<_>>();
        let w = lines.len().to_string().len();

        let mut out = String::new();
        for (i, l) in lines.iter().enumerate() {
            out.push_str(&format!("{:<w$}: {}\n", i + 1, l, w = w));
        }
        out
    }
}

/**
 * Writes bootstrap scripts to temporary files and executes them, one at a
 * time, attached to the terminal.  Scripts are kept after execution so that a
 * failed step can be inspected and re-run by hand.
 */
pub struct Runner {
    prefix: String,
    dry_run: bool,
    ask_password: bool,
    root: bool,
    shell: String,
    sudo_ok: bool,
    stage: Option<PathBuf>,
}

impl Runner {
    pub fn new(prefix: &str, dry_run: bool, ask_password: bool) -> Runner {
        Runner {
            prefix: prefix.to_string(),
            dry_run,
            ask_password,
            root: host::is_root(),
            shell: "bash".to_string(),
            sudo_ok: false,
            stage: None,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /**
     * Hand scripts to another program, without sudo.
     */
    #[cfg(test)]
    pub fn with_shell(mut self, shell: &str) -> Runner {
        self.shell = shell.to_string();
        self.root = true;
        self
    }

    /**
     * Prefix a command with sudo, unless we are root already.
     */
    pub fn elevate<'a>(&self, args: &[&'a str]) -> Vec<&'a str> {
        let mut out = Vec::new();
        if !self.root {
            out.push("sudo");
        }
        out.extend_from_slice(args);
        out
    }

    pub fn deposit(&self, log: &Logger, s: &Script) -> Result<PathBuf> {
        let mut f = tempfile::Builder::new()
            .prefix(&format!("{}__{}__", self.prefix, s.step))
            .suffix(".sh")
            .tempfile()?;
        f.write_all(s.body.as_bytes())?;
        f.flush()?;

        let (_, path) = f.keep()?;
        ensure::perms(log, &path, 0o755)?;
        Ok(path)
    }

    /**
     * Write a file that a privileged script will install into place.  Files
     * are staged in a directory that is kept for the life of the host.
     */
    pub fn stage(
        &mut self,
        log: &Logger,
        name: &str,
        contents: &str,
    ) -> Result<PathBuf> {
        let dir = match self.stage.as_ref() {
            Some(dir) => dir.clone(),
            None => {
                let dir = tempfile::Builder::new()
                    .prefix(&format!("{}__stage__", self.prefix))
                    .tempdir()?
                    .keep();
                ensure::directory(log, &dir, 0o755)?;
                self.stage = Some(dir.clone());
                dir
            }
        };

        let path = dir.join(name);
        ensure::file_str(log, contents, &path, 0o644)?;
        Ok(path)
    }

    fn command(&self, s: &Script, path: &Path) -> Result<Vec<String>> {
        let path = match path.to_str() {
            Some(p) => p.to_string(),
            None => bail!("script path {:?} is not UTF-8", path),
        };

        let mut cmd = Vec::new();
        if s.privilege == Privilege::Root && !self.root {
            cmd.push("sudo".to_string());
        }
        cmd.push(self.shell.clone());
        cmd.push(path);
        Ok(cmd)
    }

    /**
     * Make sure sudo will not need to ask for a password while a script is
     * running.  We either let sudo prompt on the terminal itself, or collect
     * the password ourselves and hand it to sudo on stdin.
     */
    fn sudo(&mut self, log: &Logger) -> Result<()> {
        if self.root || self.sudo_ok {
            return Ok(());
        }

        if self.ask_password {
            let mut pw = prompt::password("Sudo Password")?;
            pw.push('\n');
            ensure::run_with_input(log,
                &["sudo", "--stdin", "--validate", "--prompt="],
                pw.as_bytes())?;
        } else {
            let es = ensure::run_interactive(log, &["sudo", "--validate"])?;
            if !es.success() {
                bail!("sudo authentication failed: {}", es);
            }
        }

        self.sudo_ok = true;
        Ok(())
    }

    pub fn run(&mut self, log: &Logger, s: &Script) -> Result<()> {
        let w = term_width();

        let path = self.deposit(log, s)?;
        let cmd = self.command(s, &path)?;

        println!("{}", banner("BLOCK START", '=', w));
        println!("{}", banner("COMMAND", '-', w));
        println!("{}", banner(&shell_words::join(&cmd), ' ', w).on_yellow());
        println!("{}", banner("SCRIPT START", '-', w));
        print!("{}", s.listing().bright_cyan());
        println!("{}", banner("SCRIPT END", '-', w));

        if self.dry_run {
            info!(log, "dry run; not executing {}", path.display());
            println!("{}", banner("BLOCK END", '=', w));
            return Ok(());
        }

        if s.privilege == Privilege::Root {
            self.sudo(log)?;
        }

        println!("{}", banner("SCRIPT EXECUTION START", '-', w));
        let es = ensure::run_interactive(log, &cmd)?;
        println!("{}", banner("SCRIPT EXECUTION END", '-', w));
        println!("{}", banner("RETURN CODE", '-', w));
        println!("{}", return_code(&es));
        println!("{}", banner("BLOCK END", '=', w));

        if !es.success() {
            bail!("step {:?} failed: {} (script kept at {})",
                s.step, es, path.display());
        }

        info!(log, "step ok");
        Ok(())
    }
}

fn return_code(es: &ExitStatus) -> ColoredString {
    let msg = match es.code() {
        Some(c) => format!("Return Code = {}", c),
        None => format!("Return Code = {}", es),
    };

    if es.success() {
        msg.bright_green()
    } else {
        msg.bright_red()
    }
}

/**
 * Build a variable map from name/value pairs.
 */
pub fn vars<K, V, I>(pairs: I) -> Variables
    where I: IntoIterator<Item = (K, V)>,
          K: Into<String>,
          V: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
