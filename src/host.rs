/*
 * Copyright 2025 OpenStudioLandscapes Contributors
 */

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;
use anyhow::{Result, bail};

const OS_RELEASE: &str = "/etc/os-release";

fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

fn clear_errno() {
    unsafe {
        *libc::__errno_location() = 0;
    }
}

fn cs(lpsz: *const c_char) -> Result<Option<String>> {
    if lpsz.is_null() {
        Ok(None)
    } else {
        let cstr = unsafe { CStr::from_ptr(lpsz) };
        Ok(Some(cstr.to_str()?.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Passwd {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub dir: PathBuf,
}

impl Passwd {
    fn from(p: *const libc::passwd) -> Result<Passwd> {
        let p = unsafe { &*p };

        let name = match cs(p.pw_name)? {
            Some(name) => name,
            None => bail!("password entry without a name"),
        };
        let dir = match cs(p.pw_dir)? {
            Some(dir) => PathBuf::from(dir),
            None => bail!("password entry for {} without a home", name),
        };

        Ok(Passwd {
            name,
            uid: p.pw_uid,
            gid: p.pw_gid,
            dir,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

impl Group {
    fn from(g: *const libc::group) -> Result<Group> {
        let g = unsafe { &*g };

        let name = match cs(g.gr_name)? {
            Some(name) => name,
            None => bail!("group entry without a name"),
        };

        /*
         * gr_mem is a NULL-terminated array of member names.
         */
        let mut members = Vec::new();
        if !g.gr_mem.is_null() {
            for i in 0.. {
                match cs(unsafe { *g.gr_mem.add(i) })? {
                    Some(m) => members.push(m),
                    None => break,
                }
            }
        }

        Ok(Group {
            name,
            gid: g.gr_gid,
            members,
        })
    }

    /**
     * Is this user a member of the group, either as their primary group or
     * through the group's member list?  This consults the group database, not
     * the credentials of the running process, so a membership granted during
     * this session is visible even before the user logs in again.
     */
    pub fn has_member(&self, user: &Passwd) -> bool {
        user.gid == self.gid || self.members.iter().any(|m| m == &user.name)
    }
}

/*
 * The getpw*(3) and getgr*(3) routines return NULL both when there is no such
 * entry and on failure; only errno tells the two apart.  Some name services
 * report a missing entry as ENOENT or ESRCH.
 */
fn lookup<T, R, F, C>(what: &str, f: F, conv: C) -> Result<Option<R>>
    where F: FnOnce() -> *mut T,
          C: FnOnce(*const T) -> Result<R>,
{
    clear_errno();
    let p = f();
    match (p.is_null(), errno()) {
        (false, _) => Ok(Some(conv(p)?)),
        (true, 0) => Ok(None),
        (true, e) if e == libc::ENOENT || e == libc::ESRCH => Ok(None),
        (true, e) => bail!("{}: {}", what, std::io::Error::from_raw_os_error(e)),
    }
}

pub fn get_passwd_by_id(uid: u32) -> Result<Option<Passwd>> {
    lookup("getpwuid", || unsafe { libc::getpwuid(uid) }, Passwd::from)
}

pub fn get_group_by_name(name: &str) -> Result<Option<Group>> {
    let cname = CString::new(name)?;
    lookup(&format!("getgrnam({})", name),
        || unsafe { libc::getgrnam(cname.as_ptr()) }, Group::from)
}

/**
 * The password entry of the user running this program.
 */
pub fn current_user() -> Result<Passwd> {
    let uid = unsafe { libc::getuid() };
    match get_passwd_by_id(uid)? {
        Some(p) => Ok(p),
        None => bail!("no password entry for uid {}", uid),
    }
}

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/**
 * Parse the KEY=value lines of an os-release(5) file.  Values may be quoted
 * with single or double quotes; comments and blank lines are ignored.
 */
pub fn parse_os_release(contents: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();

    for l in contents.lines() {
        let l = l.trim();
        if l.is_empty() || l.starts_with('#') {
            continue;
        }

        let (k, v) = match l.split_once('=') {
            Some(kv) => kv,
            None => continue,
        };

        let v = v.trim();
        let v = if v.len() >= 2
            && ((v.starts_with('"') && v.ends_with('"'))
                || (v.starts_with('\'') && v.ends_with('\'')))
        {
            &v[1..v.len() - 1]
        } else {
            v
        };

        out.insert(k.trim().to_string(), v.replace("\\\"", "\""));
    }

    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub id: String,
    pub version_id: String,
    pub pretty_name: Option<String>,
}

impl Release {
    pub fn is(&self, id: &str, version_id: &str) -> bool {
        self.id == id && self.version_id == version_id
    }
}

impl std::fmt::Display for Release {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if let Some(pn) = self.pretty_name.as_deref() {
            write!(f, "{}", pn)
        } else {
            write!(f, "{} {}", self.id, self.version_id)
        }
    }
}

pub fn release_from(contents: &str) -> Release {
    let mut osr = parse_os_release(contents);

    Release {
        id: osr.remove("ID").unwrap_or_else(|| "linux".to_string()),
        version_id: osr.remove("VERSION_ID").unwrap_or_default(),
        pretty_name: osr.remove("PRETTY_NAME"),
    }
}

pub fn release() -> Result<Release> {
    match std::fs::read_to_string(OS_RELEASE) {
        Ok(s) => Ok(release_from(&s)),
        Err(e) => bail!("reading {}: {}", OS_RELEASE, e),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const JAMMY: &str = "\
PRETTY_NAME=\"Ubuntu 22.04.4 LTS\"
NAME=\"Ubuntu\"
VERSION_ID=\"22.04\"
VERSION=\"22.04.4 LTS (Jammy Jellyfish)\"
VERSION_CODENAME=jammy
ID=ubuntu
ID_LIKE=debian
# a comment
UBUNTU_CODENAME=jammy
";

    #[test]
    fn os_release_values() {
        let osr = parse_os_release(JAMMY);
        assert_eq!(osr.get("ID").map(String::as_str), Some("ubuntu"));
        assert_eq!(osr.get("VERSION_ID").map(String::as_str), Some("22.04"));
        assert_eq!(
            osr.get("UBUNTU_CODENAME").map(String::as_str),
            Some("jammy")
        );
        assert!(!osr.contains_key("# a comment"));
    }

    #[test]
    fn release_identification() {
        let r = release_from(JAMMY);
        assert!(r.is("ubuntu", "22.04"));
        assert!(!r.is("ubuntu", "24.04"));
        assert_eq!(r.to_string(), "Ubuntu 22.04.4 LTS");

        let r = release_from("ID=debian\nVERSION_ID='12'\n");
        assert!(r.is("debian", "12"));
        assert_eq!(r.to_string(), "debian 12");
    }

    #[test]
    fn group_membership() {
        let user = Passwd {
            name: "artist".into(),
            uid: 1000,
            gid: 1000,
            dir: PathBuf::from("/home/artist"),
        };

        let docker = Group {
            name: "docker".into(),
            gid: 959,
            members: vec!["other".into()],
        };
        assert!(!docker.has_member(&user));

        let docker = Group {
            members: vec!["other".into(), "artist".into()],
            ..docker
        };
        assert!(docker.has_member(&user));

        let primary = Group {
            name: "artist".into(),
            gid: 1000,
            members: Vec::new(),
        };
        assert!(primary.has_member(&user));
    }

    #[test]
    fn lookup_database() {
        let root = get_passwd_by_id(0).unwrap().unwrap();
        assert_eq!(root.name, "root");
        assert_eq!(root.gid, 0);
        assert!(get_group_by_name("no-such-group-hopefully").unwrap().is_none());
    }
}
