/*
 * Copyright 2025 OpenStudioLandscapes Contributors
 */

use anyhow::Result;
use regex::Regex;

/**
 * Produce new contents for a hosts(5) file in which every name in "names"
 * maps to "address" on a line of its own at the end of the file.  Earlier
 * lines mapping the same address to just that name are dropped; lines that
 * carry other aliases are left alone.
 */
pub fn with_entries(
    contents: &str,
    address: &str,
    names: &[String],
) -> Result<String> {
    let mut patterns = Vec::new();
    for n in names.iter() {
        patterns.push(Regex::new(&format!(
            r"^\s*{}\s+{}\s*(#.*)?$",
            regex::escape(address),
            regex::escape(n),
        ))?);
    }

    let mut out = String::new();
    for l in contents.lines() {
        if patterns.iter().any(|re| re.is_match(l)) {
            continue;
        }
        out.push_str(l);
        out.push('\n');
    }

    for n in names.iter() {
        out.push_str(&entry(address, n));
        out.push('\n');
    }

    Ok(out)
}

pub fn entry(address: &str, name: &str) -> String {
    format!("{}    {}", address, name)
}
