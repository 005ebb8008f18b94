/*
 * Copyright 2025 OpenStudioLandscapes Contributors
 */

use std::path::Path;

use anyhow::{bail, Result};
use serde::Deserialize;

use super::common::read_toml;
use super::prompt;

/*
 * The defaults here describe the stock OpenStudioLandscapes deployment: a
 * Harbor registry on plain HTTP at harbor.farm.evil, with the companion
 * repository cloned from GitHub over HTTPS.
 */

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub registry: Registry,
    #[serde(default)]
    pub repository: Repository,
    #[serde(default)]
    pub python: Python,
    #[serde(default)]
    pub docker: Docker,
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    #[serde(default = "default_hosts_address")]
    pub hosts_address: String,
    /*
     * Pi-hole preparation is off unless asked for:
     */
    #[serde(default)]
    pub pihole: bool,
    #[serde(default = "default_script_prefix")]
    pub script_prefix: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Registry {
    #[serde(default = "default_registry_url")]
    pub url: String,
    #[serde(default = "default_registry_username")]
    pub username: String,
    #[serde(default = "default_registry_password")]
    pub password: String,
    #[serde(default = "default_registry_project")]
    pub project: String,
    #[serde(default = "default_true")]
    pub public: bool,
    #[serde(default = "default_remove_projects")]
    pub remove_projects: Vec<String>,
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Repository {
    #[serde(default = "default_github")]
    pub github: Option<String>,
    pub url: Option<String>,
    /*
     * If this is a private repository, we force the use of SSH:
     */
    #[serde(default)]
    pub use_ssh: bool,
    #[serde(default = "default_base")]
    pub base: String,
    #[serde(default = "default_subdir")]
    pub subdir: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Python {
    #[serde(default = "default_python_version")]
    pub version: String,
    pub hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Docker {
    #[serde(default = "default_docker_gid")]
    pub gid: u32,
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: u32,
}

fn default_true() -> bool {
    true
}

fn default_hosts() -> Vec<String> {
    vec![
        "dagster.farm.evil".to_string(),
        "postgres-dagster.farm.evil".to_string(),
        "harbor.farm.evil".to_string(),
        "pi-hole.farm.evil".to_string(),
    ]
}

fn default_hosts_address() -> String {
    "127.0.0.1".to_string()
}

fn default_script_prefix() -> String {
    "ubuntu_2204".to_string()
}

fn default_registry_url() -> String {
    "http://harbor.farm.evil:80".to_string()
}

fn default_registry_username() -> String {
    "admin".to_string()
}

fn default_registry_password() -> String {
    "Harbor12345".to_string()
}

fn default_registry_project() -> String {
    "openstudiolandscapes".to_string()
}

fn default_remove_projects() -> Vec<String> {
    vec!["library".to_string()]
}

fn default_settle_secs() -> u64 {
    10
}

fn default_attempts() -> u32 {
    30
}

fn default_github() -> Option<String> {
    Some("michimussato/OpenStudioLandscapes".to_string())
}

fn default_base() -> String {
    "~/git/repos".to_string()
}

fn default_subdir() -> String {
    "OpenStudioLandscapes".to_string()
}

fn default_python_version() -> String {
    "3.11.11".to_string()
}

fn default_docker_gid() -> u32 {
    959
}

fn default_max_concurrent_uploads() -> u32 {
    1
}

impl Default for Registry {
    fn default() -> Registry {
        Registry {
            url: default_registry_url(),
            username: default_registry_username(),
            password: default_registry_password(),
            project: default_registry_project(),
            public: true,
            remove_projects: default_remove_projects(),
            settle_secs: default_settle_secs(),
            attempts: default_attempts(),
        }
    }
}

impl Default for Repository {
    fn default() -> Repository {
        Repository {
            github: default_github(),
            url: None,
            use_ssh: false,
            base: default_base(),
            subdir: default_subdir(),
        }
    }
}

impl Default for Python {
    fn default() -> Python {
        Python {
            version: default_python_version(),
            hash: None,
        }
    }
}

impl Default for Docker {
    fn default() -> Docker {
        Docker {
            gid: default_docker_gid(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            registry: Registry::default(),
            repository: Repository::default(),
            python: Python::default(),
            docker: Docker::default(),
            hosts: default_hosts(),
            hosts_address: default_hosts_address(),
            pihole: false,
            script_prefix: default_script_prefix(),
        }
    }
}

impl Repository {
    pub fn url(&self) -> Result<String> {
        if let Some(url) = self.url.as_deref() {
            Ok(url.to_string())
        } else if let Some(github) = self.github.as_deref() {
            Ok(if self.use_ssh {
                format!("git@github.com:{}.git", github)
            } else {
                format!("https://github.com/{}.git", github)
            })
        } else {
            bail!("need github or url?");
        }
    }
}

/**
 * A Python release, split into its parts.  The build installs the
 * interpreter as "python3.<minor>" via "make altinstall".
 */
#[derive(Debug, Clone, PartialEq)]
pub struct PythonVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl PythonVersion {
    pub fn parse(s: &str) -> Result<PythonVersion> {
        let t = s.trim().split('.').collect::<Vec<_>>();
        if t.len() != 3 {
            bail!("python version {:?} should be MAJOR.MINOR.PATCH", s);
        }

        let num = |x: &str| -> Result<u32> {
            match x.parse::<u32>() {
                Ok(n) => Ok(n),
                Err(_) => bail!("python version {:?}: {:?} not a number", s, x),
            }
        };

        Ok(PythonVersion {
            major: num(t[0])?,
            minor: num(t[1])?,
            patch: num(t[2])?,
        })
    }

    pub fn interpreter(&self) -> String {
        format!("python{}.{}", self.major, self.minor)
    }

    pub fn source_name(&self) -> String {
        format!("Python-{}", self)
    }

    pub fn source_url(&self) -> String {
        format!("https://www.python.org/ftp/python/{}/{}.tgz",
            self, self.source_name())
    }
}

impl std::fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let c: Config = if let Some(path) = path {
            read_toml(path)?
        } else {
            Config::default()
        };

        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> Result<()> {
        PythonVersion::parse(&self.python.version)?;
        self.repository.url()?;

        if !self.registry.url.starts_with("http://")
            && !self.registry.url.starts_with("https://")
        {
            bail!("registry url {:?} must be http:// or https://",
                self.registry.url);
        }
        if self.registry.attempts == 0 {
            bail!("registry attempts must be at least 1");
        }
        if let Err(e) = prompt::check_subdir(&self.repository.subdir) {
            bail!("repository: {}", e);
        }
        if self.script_prefix.is_empty()
            || !self.script_prefix.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            bail!("script_prefix {:?} may only contain letters, digits, \
                \"_\" and \"-\"", self.script_prefix);
        }
        for h in self.hosts.iter() {
            if h.is_empty() || h.chars().any(|c| c.is_whitespace()) {
                bail!("invalid host name {:?}", h);
            }
        }

        Ok(())
    }

    pub fn python_version(&self) -> Result<PythonVersion> {
        PythonVersion::parse(&self.python.version)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(s: &str) -> Result<Config> {
        let c: Config = toml::from_str(s)?;
        c.validate()?;
        Ok(c)
    }

    #[test]
    fn defaults() {
        let c = parse("").unwrap();
        assert_eq!(c.registry.url, "http://harbor.farm.evil:80");
        assert_eq!(c.registry.username, "admin");
        assert_eq!(c.registry.remove_projects, vec!["library"]);
        assert_eq!(c.docker.gid, 959);
        assert_eq!(c.hosts.len(), 4);
        assert!(!c.pihole);
        assert_eq!(
            c.repository.url().unwrap(),
            "https://github.com/michimussato/OpenStudioLandscapes.git"
        );
        assert_eq!(c.python_version().unwrap().interpreter(), "python3.11");
    }

    #[test]
    fn partial_tables_keep_defaults() {
        let c = parse("
            pihole = true
            [registry]
            url = \"https://registry.example.com\"
            [repository]
            use_ssh = true
        ").unwrap();
        assert!(c.pihole);
        assert_eq!(c.registry.url, "https://registry.example.com");
        assert_eq!(c.registry.password, "Harbor12345");
        assert_eq!(
            c.repository.url().unwrap(),
            "git@github.com:michimussato/OpenStudioLandscapes.git"
        );
    }

    #[test]
    fn explicit_url_wins() {
        let c = parse("[repository]\nurl = \"https://git.example.com/x.git\"\n")
            .unwrap();
        assert_eq!(c.repository.url().unwrap(), "https://git.example.com/x.git");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse("unknown = 1").is_err());
        assert!(parse("[registry]\nurl = \"harbor.farm.evil\"").is_err());
        assert!(parse("[python]\nversion = \"3.11\"").is_err());
        assert!(parse("[repository]\nsubdir = \"a/b\"").is_err());
        assert!(parse("[repository]\nsubdir = \"..\"").is_err());
        assert!(parse("[repository]\nsubdir = \".\"").is_err());
        assert!(parse("hosts = [\"two words\"]").is_err());
        assert!(parse("script_prefix = \"../x\"").is_err());
    }

    #[test]
    fn python_source() {
        let v = PythonVersion::parse("3.11.11").unwrap();
        assert_eq!(v.to_string(), "3.11.11");
        assert_eq!(
            v.source_url(),
            "https://www.python.org/ftp/python/3.11.11/Python-3.11.11.tgz"
        );
        assert!(PythonVersion::parse("3.x.1").is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("setup.toml");
        std::fs::write(&f, "[docker]\ngid = 999\n").unwrap();
        let c = Config::load(Some(&f)).unwrap();
        assert_eq!(c.docker.gid, 999);
        assert_eq!(c.docker.max_concurrent_uploads, 1);

        assert_eq!(Config::load(None).unwrap().hosts_address, "127.0.0.1");
    }
}
