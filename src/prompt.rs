/*
 * Copyright 2025 OpenStudioLandscapes Contributors
 */

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use dialoguer::{Confirm, Input, Password};

const PROBE: &str = ".openstudiolandscapes_probe";

/**
 * Expand a leading "~" using the home directory from the password database,
 * rather than trusting $HOME, which sudo may have rewritten.
 */
pub fn expand_home(path: &str, home: &Path) -> Result<PathBuf> {
    let home = match home.to_str() {
        Some(h) => h,
        None => bail!("home directory {:?} is not UTF-8", home),
    };

    Ok(PathBuf::from(
        shellexpand::tilde_with_context(path.trim(), || Some(home))
            .into_owned(),
    ))
}

/**
 * Check that a directory can hold the landscapes checkout.  The errors are
 * meant to be shown to the user as-is.
 */
pub fn check_base(base: &str, home: &Path) -> Result<PathBuf> {
    let dir = expand_home(base, home)?;

    if !dir.is_absolute() {
        bail!("directory {} is not absolute (~ is allowed)", base);
    }

    match std::fs::metadata(&dir) {
        Ok(md) if md.is_dir() => (),
        Ok(_) => bail!("directory {} is a file; cannot continue", base),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            bail!("directory {} does not exist; create it first \
                (\"mkdir -p {}\") or choose a different one", base, base);
        }
        Err(e) => bail!("directory {}: {}", base, e),
    }

    let probe = dir.join(PROBE);
    let res = std::fs::create_dir_all(&probe)
        .and_then(|_| std::fs::remove_dir(&probe));
    if let Err(e) = res {
        bail!("unable to write to {}: {}; make sure you may create a \
            subdirectory there (e.g., \"sudo chown -R $USER: {}\")",
            base, e, base);
    }

    Ok(dir)
}

pub fn check_subdir(subdir: &str) -> Result<String> {
    let subdir = subdir.trim();
    if subdir.is_empty() || subdir == "." || subdir == ".."
        || subdir.contains('/')
    {
        bail!("sub directory {:?} must be a single directory name", subdir);
    }
    Ok(subdir.to_string())
}

/**
 * Ask for the install location until we get one that passes the checks.
 */
pub fn install_dir(
    default_base: &str,
    default_subdir: &str,
    home: &Path,
) -> Result<PathBuf> {
    println!("(Press Enter to continue with the defaults)");

    loop {
        let base: String = Input::new()
            .with_prompt("Install base dir")
            .default(default_base.to_string())
            .interact_text()?;

        let base = match check_base(&base, home) {
            Ok(base) => base,
            Err(e) => {
                println!("ERROR: {}", e);
                continue;
            }
        };

        let subdir: String = Input::new()
            .with_prompt("Install sub dir")
            .default(default_subdir.to_string())
            .interact_text()?;

        match check_subdir(&subdir) {
            Ok(subdir) => return Ok(base.join(subdir)),
            Err(e) => println!("ERROR: {}", e),
        }
    }
}

pub fn email() -> Result<String> {
    loop {
        let email: String = Input::new()
            .with_prompt("Enter your email")
            .interact_text()?;

        let email = email.trim().to_string();
        if email.contains('@') && !email.contains(char::is_whitespace) {
            return Ok(email);
        }
        println!("ERROR: {:?} does not look like an email address", email);
    }
}

pub fn confirm(question: &str) -> Result<bool> {
    Ok(Confirm::new()
        .with_prompt(question)
        .default(false)
        .interact()?)
}

pub fn password(prompt: &str) -> Result<String> {
    Ok(Password::new().with_prompt(prompt).interact()?)
}
