/*
 * Copyright 2025 OpenStudioLandscapes Contributors
 */

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Result};
use slog::{info, warn, Logger};

use super::common::OutputExt;
use super::config::Config;
use super::ensure;
use super::expand;
use super::fetch;
use super::host::{self, Group, Passwd};
use super::hosts;
use super::prompt;
use super::registry::Registry;
use super::script::{vars, Privilege, Runner, Script};

const DOCKER_GROUP: &str = "docker";
const RC_FILE: &str = ".openstudiolandscapesrc";
const HARBOR_STATE: &str = ".landscapes/.harbor";

const PREP_PACKAGES: &[&str] = &[
    "openssh-server",
    "git",
    "htop",
    "vim",
    "graphviz",
];

const PYTHON_BUILD_PACKAGES: &[&str] = &[
    "build-essential",
    "zlib1g-dev",
    "libncurses5-dev",
    "libgdbm-dev",
    "libnss3-dev",
    "libssl-dev",
    "libreadline-dev",
    "libffi-dev",
    "pkg-config",
    "liblzma-dev",
    "libbz2-dev",
    "libsqlite3-dev",
    "curl",
];

const DOCKER_PREREQ_PACKAGES: &[&str] = &["ca-certificates", "curl"];

const DOCKER_PACKAGES: &[&str] = &[
    "docker-ce",
    "docker-ce-cli",
    "containerd.io",
    "docker-buildx-plugin",
    "docker-compose-plugin",
];

/**
 * Everything the steps share: configuration, the script runner, the user we
 * are provisioning for, and the answers to the interactive questions once
 * they have been asked.
 */
pub struct Context {
    pub config: Config,
    pub runner: Runner,
    pub user: Passwd,
    /*
     * When not interactive, we never prompt and use defaults or placeholders
     * instead.
     */
    pub interactive: bool,
    /*
     * Set when we only render scripts for someone to read.  The configured
     * install directory is then used without checking it.
     */
    pub inspect: bool,
    pub reboot: bool,
    pub group: fn(&str) -> Result<Option<Group>>,
    dir: Option<PathBuf>,
    email: Option<String>,
    python_src: Option<PathBuf>,
}

impl Context {
    pub fn new(
        config: Config,
        runner: Runner,
        user: Passwd,
        interactive: bool,
    ) -> Context {
        Context {
            config,
            runner,
            user,
            interactive,
            inspect: false,
            reboot: true,
            group: host::get_group_by_name,
            dir: None,
            email: None,
            python_src: None,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.runner.dry_run()
    }

    /**
     * Use this landscapes directory rather than asking for one.  The parent
     * directory must pass the same checks as an interactive answer.
     */
    pub fn set_landscapes_dir(&mut self, dir: &str) -> Result<()> {
        let dir = prompt::expand_home(dir, &self.user.dir)?;
        let (parent, name) = match (dir.parent(), dir.file_name()) {
            (Some(p), Some(n)) => (p, n),
            _ => bail!("{} cannot be an install directory", dir.display()),
        };
        let name = match name.to_str() {
            Some(n) => prompt::check_subdir(n)?,
            None => bail!("{} is not UTF-8", dir.display()),
        };
        let parent = match parent.to_str() {
            Some(p) => prompt::check_base(p, &self.user.dir)?,
            None => bail!("{} is not UTF-8", dir.display()),
        };

        self.dir = Some(parent.join(name));
        Ok(())
    }

    pub fn landscapes_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = self.dir.as_ref() {
            return Ok(dir.clone());
        }

        let repo = &self.config.repository;
        let dir = if self.interactive {
            prompt::install_dir(&repo.base, &repo.subdir, &self.user.dir)?
        } else if self.inspect {
            prompt::expand_home(&repo.base, &self.user.dir)?
                .join(&repo.subdir)
        } else {
            prompt::check_base(&repo.base, &self.user.dir)?
                .join(prompt::check_subdir(&repo.subdir)?)
        };

        self.dir = Some(dir.clone());
        Ok(dir)
    }

    fn email(&mut self) -> Result<String> {
        if let Some(email) = self.email.as_ref() {
            return Ok(email.clone());
        }

        let email = if self.interactive {
            prompt::email()?
        } else {
            "<email>".to_string()
        };

        self.email = Some(email.clone());
        Ok(email)
    }

    /**
     * Fetch and unpack the Python sources, returning the source tree.  In a
     * dry run we only say where the tree would be.
     */
    fn python_source(&mut self, log: &Logger) -> Result<PathBuf> {
        if let Some(src) = self.python_src.as_ref() {
            return Ok(src.clone());
        }

        let v = self.config.python_version()?;
        if self.dry_run() {
            return Ok(std::env::temp_dir()
                .join(format!("{}__python__XXXXXX", self.config.script_prefix))
                .join(v.source_name()));
        }

        let work = tempfile::Builder::new()
            .prefix(&format!("{}__python__", self.config.script_prefix))
            .tempdir()?
            .keep();

        let tgz = work.join(format!("{}.tgz", v.source_name()));
        fetch::download(log, &v.source_url(), &tgz)?;
        if let Some(h) = self.config.python.hash.as_deref() {
            fetch::verify(log, &tgz, &fetch::Hash::parse(h)?)?;
        } else {
            warn!(log, "no hash configured for {}; not verifying",
                v.source_name());
        }
        fetch::unpack(log, &tgz, &work)?;

        let src = work.join(v.source_name());
        if !src.join("configure").is_file() {
            bail!("{} does not contain a configure script", src.display());
        }

        self.python_src = Some(src.clone());
        Ok(src)
    }
}

type RenderFn = fn(&Logger, &mut Context) -> Result<Script>;
type NativeFn = fn(&Logger, &mut Context) -> Result<()>;

pub struct Step {
    pub name: &'static str,
    pub desc: &'static str,
    pub privilege: Option<Privilege>,
    /*
     * Renders the bootstrap script for this step, if it has one.
     */
    script: Option<RenderFn>,
    /*
     * Steps with work to do outside of their script.  If this is not set,
     * running the step means rendering and running the script.
     */
    native: Option<NativeFn>,
    when: Option<fn(&Context) -> bool>,
}

impl Step {
    pub fn enabled(&self, ctx: &Context) -> bool {
        self.when.map(|f| f(ctx)).unwrap_or(true)
    }

    pub fn has_script(&self) -> bool {
        self.script.is_some()
    }

    pub fn render(&self, log: &Logger, ctx: &mut Context) -> Result<Script> {
        match self.script {
            Some(f) => f(log, ctx),
            None => bail!("step {:?} has no script", self.name),
        }
    }

    pub fn run(&self, log: &Logger, ctx: &mut Context) -> Result<()> {
        let log = log.new(slog::o!("step" => self.name));

        if let Some(f) = self.native {
            f(&log, ctx)
        } else {
            let s = self.render(&log, ctx)?;
            ctx.runner.run(&log, &s)
        }
    }
}

/**
 * All of the steps, in the order in which they must run.
 */
pub fn all() -> Vec<Step> {
    vec![
        Step {
            name: "checks",
            desc: "check docker group membership and for a running registry",
            privilege: None,
            script: Some(render_docker_group),
            native: Some(run_checks),
            when: None,
        },
        Step {
            name: "directory",
            desc: "choose the install directory",
            privilege: None,
            script: None,
            native: Some(run_directory),
            when: None,
        },
        Step {
            name: "unattended",
            desc: "disable unattended upgrades",
            privilege: Some(Privilege::Root),
            script: Some(render_unattended),
            native: None,
            when: None,
        },
        Step {
            name: "prep",
            desc: "update packages, install base tools, enable ssh",
            privilege: Some(Privilege::Root),
            script: Some(render_prep),
            native: None,
            when: None,
        },
        Step {
            name: "clone",
            desc: "clone the OpenStudioLandscapes repository",
            privilege: Some(Privilege::User),
            script: Some(render_clone),
            native: None,
            when: None,
        },
        Step {
            name: "python",
            desc: "build and install Python from source",
            privilege: Some(Privilege::Root),
            script: Some(render_python),
            native: Some(run_python),
            when: None,
        },
        Step {
            name: "docker",
            desc: "install Docker Engine, configure the insecure registry",
            privilege: Some(Privilege::Root),
            script: Some(render_docker),
            native: None,
            when: None,
        },
        Step {
            name: "landscapes",
            desc: "install OpenStudioLandscapes into a venv",
            privilege: Some(Privilege::User),
            script: Some(render_landscapes),
            native: None,
            when: None,
        },
        Step {
            name: "hosts",
            desc: "add the service host names to /etc/hosts",
            privilege: Some(Privilege::Root),
            script: Some(render_hosts),
            native: None,
            when: None,
        },
        Step {
            name: "harbor-prepare",
            desc: "prepare the Harbor registry",
            privilege: Some(Privilege::User),
            script: Some(render_harbor_prepare),
            native: None,
            when: None,
        },
        Step {
            name: "harbor-up",
            desc: "start the Harbor registry",
            privilege: Some(Privilege::User),
            script: Some(render_harbor_up),
            native: None,
            when: None,
        },
        Step {
            name: "registry",
            desc: "create and remove registry projects",
            privilege: None,
            script: None,
            native: Some(run_registry),
            when: None,
        },
        Step {
            name: "harbor-down",
            desc: "stop the Harbor registry",
            privilege: Some(Privilege::User),
            script: Some(render_harbor_down),
            native: None,
            when: None,
        },
        Step {
            name: "pihole",
            desc: "prepare Pi-hole",
            privilege: Some(Privilege::User),
            script: Some(render_pihole),
            native: None,
            when: Some(pihole_enabled),
        },
        Step {
            name: "aliases",
            desc: "source the landscapes rc file from ~/.bashrc",
            privilege: None,
            script: None,
            native: Some(run_aliases),
            when: None,
        },
        Step {
            name: "reboot",
            desc: "offer to reboot",
            privilege: None,
            script: None,
            native: Some(run_reboot),
            when: Some(reboot_enabled),
        },
    ]
}

fn pihole_enabled(ctx: &Context) -> bool {
    ctx.config.pihole
}

fn reboot_enabled(ctx: &Context) -> bool {
    ctx.reboot
}

pub fn by_name<'a>(steps: &'a [Step], name: &str) -> Result<&'a Step> {
    match steps.iter().find(|s| s.name == name) {
        Some(s) => Ok(s),
        None => {
            let names = steps.iter().map(|s| s.name).collect::<Vec<_>>();
            bail!("unknown step {:?} (steps are: {})", name, names.join(", "));
        }
    }
}

/**
 * The steps from the named one to the end.
 */
pub fn from<'a>(steps: &'a [Step], name: &str) -> Result<Vec<&'a Step>> {
    let first = by_name(steps, name)?.name;
    Ok(steps.iter().skip_while(|s| s.name != first).collect())
}

/**
 * The named steps, in sequence order rather than the order they were given.
 */
pub fn named<'a, S: AsRef<str>>(
    steps: &'a [Step],
    names: &[S],
) -> Result<Vec<&'a Step>> {
    for n in names.iter() {
        by_name(steps, n.as_ref())?;
    }

    Ok(steps.iter()
        .filter(|s| names.iter().any(|n| n.as_ref() == s.name))
        .collect())
}

/**
 * Run steps in order, stopping at the first failure.  Disabled steps are
 * skipped.
 */
pub fn run_sequence(
    log: &Logger,
    ctx: &mut Context,
    steps: &[&Step],
) -> Result<()> {
    let total = steps.len();

    for (i, s) in steps.iter().enumerate() {
        if !s.enabled(ctx) {
            info!(log, "[{}/{}] {}: disabled, skipping", i + 1, total, s.name);
            continue;
        }

        info!(log, "[{}/{}] {}: {}", i + 1, total, s.name, s.desc);
        s.run(log, ctx)?;
    }

    Ok(())
}

fn path_str(p: &Path) -> Result<String> {
    match p.to_str() {
        Some(s) => Ok(s.to_string()),
        None => bail!("path {:?} is not UTF-8", p),
    }
}

pub fn harbor_running(ps: &str) -> bool {
    ps.lines().any(|l| l.trim().starts_with("goharbor/"))
}

fn render_docker_group(_log: &Logger, ctx: &mut Context) -> Result<Script> {
    Script::render("checks", Privilege::Root,
        include_str!("../scripts/docker-group.sh"),
        &vars(vec![
            ("gid", ctx.config.docker.gid.to_string()),
            ("user", ctx.user.name.clone()),
        ]))
}

fn offer_reboot(log: &Logger, ctx: &mut Context) -> Result<()> {
    if !ctx.interactive || ctx.dry_run() {
        info!(log, "not offering a reboot");
        return Ok(());
    }

    if prompt::confirm("Reboot now?")? {
        let args = ctx.runner.elevate(&["systemctl", "reboot"]);
        let es = ensure::run_interactive(log, &args)?;
        if !es.success() {
            bail!("reboot failed: {}", es);
        }
    } else {
        println!("Ok, let's reboot later.");
    }

    Ok(())
}

fn run_checks(log: &Logger, ctx: &mut Context) -> Result<()> {
    match host::release() {
        Ok(r) if r.is("ubuntu", "22.04") => info!(log, "host is {}", r),
        Ok(r) => warn!(log, "host is {}, not Ubuntu 22.04; continuing anyway",
            r),
        Err(e) => warn!(log, "could not identify host: {}", e),
    }

    let group = (ctx.group)(DOCKER_GROUP)?;
    match group {
        Some(g) if g.has_member(&ctx.user) => {
            info!(log, "user {} is in group {} (gid {})", ctx.user.name,
                g.name, g.gid);
        }
        _ => {
            warn!(log, "user {} is not in group {}", ctx.user.name,
                DOCKER_GROUP);

            let s = render_docker_group(log, ctx)?;
            ctx.runner.run(log, &s)?;

            if !ctx.dry_run() {
                offer_reboot(log, ctx)?;
                bail!("user {} was added to group {}; log in again or \
                    reboot, then re-run the installer", ctx.user.name,
                    DOCKER_GROUP);
            }
        }
    }

    if let Ok(docker) = which::which("docker") {
        let out = Command::new(&docker)
            .arg("ps")
            .arg("--format")
            .arg("{{.Image}}")
            .output()?;

        if !out.status.success() {
            warn!(log, "docker ps failed: {}", out.info());
        } else if harbor_running(&String::from_utf8_lossy(&out.stdout)) {
            bail!("Docker Container Harbor is running! It is not advisable \
                to perform this installation while Harbor is running. Stop \
                the containers (\"docker stop $(docker ps -q)\") and re-run \
                the installer.");
        }
    }

    info!(log, "looking good! let's go...");
    Ok(())
}

fn run_directory(log: &Logger, ctx: &mut Context) -> Result<()> {
    let dir = ctx.landscapes_dir()?;
    info!(log, "install directory is {}", dir.display());
    Ok(())
}

fn render_unattended(_log: &Logger, _ctx: &mut Context) -> Result<Script> {
    Script::render("unattended", Privilege::Root,
        include_str!("../scripts/unattended.sh"),
        &vars(Vec::<(String, String)>::new()))
}

fn render_prep(_log: &Logger, _ctx: &mut Context) -> Result<Script> {
    Script::render("prep", Privilege::Root,
        include_str!("../scripts/prep.sh"),
        &vars(vec![("packages", PREP_PACKAGES.join(" "))]))
}

/**
 * The name an existing checkout is moved to before cloning afresh, e.g.
 * "OpenStudioLandscapes_2025-06-08_08-46-02".
 */
pub fn backup_name(dir: &Path, now: time::OffsetDateTime) -> Result<PathBuf> {
    let fmt = time::macros::format_description!(
        "[year]-[month]-[day]_[hour]-[minute]-[second]");
    let stamp = now.format(&fmt)?;

    let mut name = match dir.file_name() {
        Some(n) => n.to_os_string(),
        None => bail!("{} has no final component", dir.display()),
    };
    name.push(format!("_{}", stamp));
    Ok(dir.with_file_name(name))
}

fn render_clone(log: &Logger, ctx: &mut Context) -> Result<Script> {
    let dir = ctx.landscapes_dir()?;
    let parent = match dir.parent() {
        Some(p) => p.to_path_buf(),
        None => bail!("{} has no parent", dir.display()),
    };

    let now = time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    let backup = backup_name(&dir, now)?;

    let ssh_setup = if ctx.config.repository.use_ssh {
        let ssh_dir = ctx.user.dir.join(".ssh");
        let key = ssh_dir.join("id_ed25519");
        if ensure::check(&key)?.is_some() {
            println!("Existing SSH Key file found. You will be prompted \
                whether to overwrite existing keys or not.");
        }
        let email = ctx.email()?;

        expand::render(include_str!("../scripts/ssh-key.sh"),
            &vars(vec![
                ("ssh_dir", path_str(&ssh_dir)?),
                ("key", path_str(&key)?),
                ("email", email),
                ("known_hosts", path_str(&ssh_dir.join("known_hosts"))?),
            ]))?
    } else {
        String::new()
    };

    let url = ctx.config.repository.url()?;
    info!(log, "cloning {} into {}", url, dir.display());

    Script::render("clone", Privilege::User,
        include_str!("../scripts/clone.sh"),
        &vars(vec![
            ("ssh_setup", ssh_setup),
            ("dir", path_str(&dir)?),
            ("parent", path_str(&parent)?),
            ("backup", path_str(&backup)?),
            ("url", url),
        ]))
}

fn render_python(log: &Logger, ctx: &mut Context) -> Result<Script> {
    let src = ctx.python_source(log)?;

    Script::render("python", Privilege::Root,
        include_str!("../scripts/python.sh"),
        &vars(vec![
            ("packages", PYTHON_BUILD_PACKAGES.join(" ")),
            ("src", path_str(&src)?),
        ]))
}

fn run_python(log: &Logger, ctx: &mut Context) -> Result<()> {
    let v = ctx.config.python_version()?;

    if let Ok(p) = which::which(v.interpreter()) {
        info!(log, "{} is already installed at {}", v.interpreter(),
            p.display());
        return Ok(());
    }

    let s = render_python(log, ctx)?;
    ctx.runner.run(log, &s)?;

    if !ctx.dry_run() {
        let interpreter = v.interpreter();
        ensure::run(log, &[interpreter.as_str(), "--version"])?;
    }
    Ok(())
}

/**
 * The contents of /etc/docker/daemon.json: our registry is plain HTTP, and
 * pushes are serialised.
 */
pub fn daemon_json(registry_url: &str, max_uploads: u32) -> Result<String> {
    let v = serde_json::json!({
        "insecure-registries": [registry_url],
        "max-concurrent-uploads": max_uploads,
    });

    let mut out = serde_json::to_string_pretty(&v)?;
    out.push('\n');
    Ok(out)
}

fn render_docker(log: &Logger, ctx: &mut Context) -> Result<Script> {
    let dir = ctx.landscapes_dir()?;
    let json = daemon_json(&ctx.config.registry.url,
        ctx.config.docker.max_concurrent_uploads)?;
    let staged = ctx.runner.stage(log, "daemon.json", &json)?;

    Script::render("docker", Privilege::Root,
        include_str!("../scripts/docker.sh"),
        &vars(vec![
            ("prereqs", DOCKER_PREREQ_PACKAGES.join(" ")),
            ("packages", DOCKER_PACKAGES.join(" ")),
            ("daemon_json", path_str(&staged)?),
            ("dir", path_str(&dir)?),
            ("harbor", path_str(&dir.join(HARBOR_STATE))?),
        ]))
}

fn render_landscapes(_log: &Logger, ctx: &mut Context) -> Result<Script> {
    let dir = ctx.landscapes_dir()?;
    let interpreter = ctx.config.python_version()?.interpreter();

    /*
     * Prefer the full path if the interpreter is installed already; in a dry
     * run it may not be, and the script resolves it through PATH.
     */
    let python = match which::which(&interpreter) {
        Ok(p) => path_str(&p)?,
        Err(_) => interpreter,
    };

    Script::render("landscapes", Privilege::User,
        include_str!("../scripts/landscapes.sh"),
        &vars(vec![
            ("dir", path_str(&dir)?),
            ("python", python),
        ]))
}

fn render_hosts(log: &Logger, ctx: &mut Context) -> Result<Script> {
    let current = std::fs::read_to_string("/etc/hosts")?;
    let updated = hosts::with_entries(&current, &ctx.config.hosts_address,
        &ctx.config.hosts)?;
    let staged = ctx.runner.stage(log, "hosts", &updated)?;

    for h in ctx.config.hosts.iter() {
        info!(log, "{}", hosts::entry(&ctx.config.hosts_address, h));
    }

    Script::render("hosts", Privilege::Root,
        include_str!("../scripts/hosts.sh"),
        &vars(vec![("staged", path_str(&staged)?)]))
}

fn render_nox(ctx: &mut Context, step: &str, session: &str)
    -> Result<Script>
{
    let dir = ctx.landscapes_dir()?;

    Script::render(step, Privilege::User,
        include_str!("../scripts/nox.sh"),
        &vars(vec![
            ("dir", path_str(&dir)?),
            ("session", session.to_string()),
        ]))
}

fn render_harbor_prepare(_log: &Logger, ctx: &mut Context) -> Result<Script> {
    render_nox(ctx, "harbor-prepare", "harbor_prepare")
}

fn render_harbor_up(_log: &Logger, ctx: &mut Context) -> Result<Script> {
    render_nox(ctx, "harbor-up", "harbor_up_detach")
}

fn render_harbor_down(_log: &Logger, ctx: &mut Context) -> Result<Script> {
    render_nox(ctx, "harbor-down", "harbor_down")
}

fn render_pihole(_log: &Logger, ctx: &mut Context) -> Result<Script> {
    render_nox(ctx, "pihole", "pi_hole_prepare")
}

pub fn run_registry(log: &Logger, ctx: &mut Context) -> Result<()> {
    let c = &ctx.config.registry;

    if ctx.dry_run() {
        info!(log, "dry run; would create project {} and remove {:?} at {}",
            c.project, c.remove_projects, c.url);
        return Ok(());
    }

    let r = Registry::new(&c.url, &c.username, &c.password, c.settle_secs,
        c.attempts)?;

    r.wait_ready(log)?;
    r.create_project(log, &c.project, c.public)?;
    for p in c.remove_projects.iter() {
        if p == &c.project {
            warn!(log, "not removing project {}; we just created it", p);
            continue;
        }
        r.delete_project(log, p)?;
    }

    Ok(())
}

/**
 * The line added to ~/.bashrc to pick up the landscapes aliases.
 */
pub fn rc_line(dir: &Path) -> Result<String> {
    let rc = path_str(&dir.join(RC_FILE))?;
    Ok(format!("source {}", shell_words::quote(&rc)))
}

fn run_aliases(log: &Logger, ctx: &mut Context) -> Result<()> {
    let dir = ctx.landscapes_dir()?;
    let line = rc_line(&dir)?;
    let bashrc = ctx.user.dir.join(".bashrc");

    if ctx.dry_run() {
        info!(log, "dry run; would add {:?} to {}", line, bashrc.display());
        return Ok(());
    }

    ensure::line_at_end(log, &bashrc, &line)?;
    Ok(())
}

fn run_reboot(log: &Logger, ctx: &mut Context) -> Result<()> {
    offer_reboot(log, ctx)
}

#[cfg(test)]
mod test {
    use super::*;

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn context(home: &Path) -> Context {
        let user = Passwd {
            name: "artist".into(),
            uid: 1000,
            gid: 1000,
            dir: home.to_path_buf(),
        };
        let mut ctx = Context::new(Config::default(),
            Runner::new("test", true, false), user, false);
        ctx.inspect = true;
        ctx
    }

    #[test]
    fn step_order() {
        let names = all().iter().map(|s| s.name).collect::<Vec<_>>();
        assert_eq!(names, vec![
            "checks", "directory", "unattended", "prep", "clone", "python",
            "docker", "landscapes", "hosts", "harbor-prepare", "harbor-up",
            "registry", "harbor-down", "pihole", "aliases", "reboot",
        ]);
    }

    #[test]
    fn optional_steps() {
        let home = tempfile::tempdir().unwrap();
        let mut ctx = context(home.path());
        let steps = all();

        assert!(!by_name(&steps, "pihole").unwrap().enabled(&ctx));
        assert!(by_name(&steps, "reboot").unwrap().enabled(&ctx));
        ctx.config.pihole = true;
        ctx.reboot = false;
        assert!(by_name(&steps, "pihole").unwrap().enabled(&ctx));
        assert!(!by_name(&steps, "reboot").unwrap().enabled(&ctx));

        let e = by_name(&steps, "nope").err().unwrap();
        assert!(e.to_string().contains("harbor-up"));
    }

    #[test]
    fn non_interactive_directory_default() {
        let home = tempfile::tempdir().unwrap();
        let mut ctx = context(home.path());
        assert_eq!(ctx.landscapes_dir().unwrap(),
            home.path().join("git/repos/OpenStudioLandscapes"));
    }

    #[test]
    fn configured_directory_is_checked() {
        let home = tempfile::tempdir().unwrap();
        let mut ctx = context(home.path());
        ctx.inspect = false;

        let e = ctx.landscapes_dir().unwrap_err();
        assert!(e.to_string().contains("does not exist"));

        ctx.config.repository.base = "relative/nowhere".into();
        let e = ctx.landscapes_dir().unwrap_err();
        assert!(e.to_string().contains("not absolute"));

        ctx.config.repository.base = "~".into();
        ctx.config.repository.subdir = "..".into();
        assert!(ctx.landscapes_dir().is_err());

        ctx.config.repository.subdir = "OSL".into();
        assert_eq!(ctx.landscapes_dir().unwrap(), home.path().join("OSL"));
    }

    #[test]
    fn explicit_directory_is_checked() {
        let home = tempfile::tempdir().unwrap();
        let mut ctx = context(home.path());

        assert!(ctx.set_landscapes_dir("~/missing/Landscapes").is_err());
        ctx.set_landscapes_dir("~/Landscapes").unwrap();
        assert_eq!(ctx.landscapes_dir().unwrap(),
            home.path().join("Landscapes"));
    }

    #[test]
    fn render_clone_script() {
        let home = tempfile::tempdir().unwrap();
        let mut ctx = context(home.path());
        ctx.set_landscapes_dir("~/OSL").unwrap();

        let steps = all();
        let s = by_name(&steps, "clone").unwrap().render(&log(), &mut ctx)
            .unwrap();
        let dir = home.path().join("OSL");
        let url = "https://github.com/michimussato/OpenStudioLandscapes.git";
        assert_eq!(s.privilege, Privilege::User);
        assert!(s.body.contains(&format!("git clone --tags {} {}\n",
            shell_words::quote(url), shell_words::quote(dir.to_str().unwrap()))));
        assert!(!s.body.contains("ssh-keygen"));
    }

    #[test]
    fn render_clone_over_ssh() {
        let home = tempfile::tempdir().unwrap();
        let mut ctx = context(home.path());
        ctx.config.repository.use_ssh = true;

        let steps = all();
        let s = by_name(&steps, "clone").unwrap().render(&log(), &mut ctx)
            .unwrap();
        assert!(s.body.contains("ssh-keygen -f"));
        assert!(s.body.contains("-C '<email>'"));
        assert!(s.body.contains("ssh-keyscan github.com >>"));
        assert!(s.body.contains(
            "git@github.com:michimussato/OpenStudioLandscapes.git"));
    }

    #[test]
    fn render_docker_script() {
        let home = tempfile::tempdir().unwrap();
        let mut ctx = context(home.path());

        let steps = all();
        let s = by_name(&steps, "docker").unwrap().render(&log(), &mut ctx)
            .unwrap();
        assert_eq!(s.privilege, Privilege::Root);
        assert!(s.body.contains(
            "echo \"${UBUNTU_CODENAME:-$VERSION_CODENAME}\""));
        assert!(s.body.contains("apt-get install --no-install-recommends -y \
            docker-ce docker-ce-cli containerd.io docker-buildx-plugin \
            docker-compose-plugin\n"));
        assert!(s.body.contains(".landscapes/.harbor"));
        assert!(s.body.contains("/etc/docker/daemon.json"));
    }

    #[test]
    fn daemon_json_contents() {
        let j = daemon_json("http://harbor.farm.evil:80", 1).unwrap();
        let v: serde_json::Value = serde_json::from_str(&j).unwrap();
        assert_eq!(v["insecure-registries"][0], "http://harbor.farm.evil:80");
        assert_eq!(v["max-concurrent-uploads"], 1);
        assert!(j.ends_with("}\n"));
    }

    #[test]
    fn render_python_dry_run() {
        let home = tempfile::tempdir().unwrap();
        let mut ctx = context(home.path());

        let steps = all();
        let s = by_name(&steps, "python").unwrap().render(&log(), &mut ctx)
            .unwrap();
        assert!(s.body.contains("Python-3.11.11"));
        assert!(s.body.contains("./configure --enable-optimizations\n"));
        assert!(s.body.contains("make -j \"$(nproc)\"\n"));
        assert!(s.body.contains("libsqlite3-dev"));
    }

    #[test]
    fn render_nox_sessions() {
        let home = tempfile::tempdir().unwrap();
        let mut ctx = context(home.path());
        let steps = all();

        for (step, session) in [
            ("harbor-prepare", "harbor_prepare"),
            ("harbor-up", "harbor_up_detach"),
            ("harbor-down", "harbor_down"),
            ("pihole", "pi_hole_prepare"),
        ].iter() {
            let s = by_name(&steps, step).unwrap().render(&log(), &mut ctx)
                .unwrap();
            assert_eq!(s.step, *step);
            assert!(s.body.contains(&format!("nox --session {}\n", session)));
        }
    }

    #[test]
    fn native_only_steps_have_no_script() {
        let home = tempfile::tempdir().unwrap();
        let mut ctx = context(home.path());
        let steps = all();

        for n in ["directory", "registry", "aliases", "reboot"].iter() {
            let s = by_name(&steps, n).unwrap();
            assert!(!s.has_script());
            assert!(s.render(&log(), &mut ctx).is_err());
        }
    }

    #[test]
    fn aliases_in_bashrc() {
        let home = tempfile::tempdir().unwrap();
        let mut ctx = context(home.path());
        ctx.runner = Runner::new("test", false, false);
        ctx.set_landscapes_dir("~/OSL").unwrap();
        std::fs::write(home.path().join(".bashrc"), "PS1='$ '\n").unwrap();

        let steps = all();
        let aliases = by_name(&steps, "aliases").unwrap();
        aliases.run(&log(), &mut ctx).unwrap();
        aliases.run(&log(), &mut ctx).unwrap();

        let rc = std::fs::read_to_string(home.path().join(".bashrc")).unwrap();
        let line = rc_line(&home.path().join("OSL")).unwrap();
        assert_eq!(rc, format!("PS1='$ '\n{}\n", line));
    }

    #[test]
    fn backup_names() {
        let now = time::macros::datetime!(2025-06-08 08:46:02 UTC);
        let b = backup_name(Path::new("/home/a/OpenStudioLandscapes"), now)
            .unwrap();
        assert_eq!(b,
            PathBuf::from("/home/a/OpenStudioLandscapes_2025-06-08_08-46-02"));
    }

    #[test]
    fn harbor_in_ps_output() {
        assert!(harbor_running("nginx:latest\ngoharbor/harbor-core:v2.12\n"));
        assert!(!harbor_running("nginx:latest\nmy/goharbor/thing\n"));
        assert!(!harbor_running(""));
    }

    #[test]
    fn install_from_step() {
        let steps = all();
        let names = from(&steps, "hosts").unwrap().iter().map(|s| s.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec![
            "hosts", "harbor-prepare", "harbor-up", "registry",
            "harbor-down", "pihole", "aliases", "reboot",
        ]);

        assert_eq!(from(&steps, "checks").unwrap().len(), steps.len());
        assert!(from(&steps, "nope").is_err());
    }

    #[test]
    fn named_steps_in_sequence_order() {
        let steps = all();
        let names = named(&steps, &["aliases", "prep", "checks", "prep"])
            .unwrap().iter().map(|s| s.name).collect::<Vec<_>>();
        assert_eq!(names, vec!["checks", "prep", "aliases"]);

        let e = named(&steps, &["prep", "nope"]).err().unwrap();
        assert!(e.to_string().contains("unknown step \"nope\""));
    }

    fn no_group(_: &str) -> Result<Option<Group>> {
        Ok(None)
    }

    #[test]
    fn checks_stop_after_adding_to_group() {
        let home = tempfile::tempdir().unwrap();
        let mut ctx = context(home.path());
        ctx.runner = Runner::new("test", false, false).with_shell("true");
        ctx.group = no_group;

        let steps = all();
        let e = run_sequence(&log(), &mut ctx, &from(&steps, "checks")
            .unwrap()).unwrap_err();
        assert!(e.to_string().contains("was added to group docker; log in \
            again"));
        assert!(!home.path().join(".bashrc").exists());
    }

    #[test]
    fn mixed_steps_list_as_native() {
        let steps = all();
        assert_eq!(by_name(&steps, "checks").unwrap().privilege, None);
        assert!(by_name(&steps, "checks").unwrap().has_script());
    }

    #[test]
    fn dry_run_sequence() {
        let home = tempfile::tempdir().unwrap();
        let mut ctx = context(home.path());
        ctx.reboot = false;

        let steps = all();
        let picked = ["unattended", "prep", "registry", "aliases"].iter()
            .map(|n| by_name(&steps, n).unwrap())
            .collect::<Vec<_>>();
        run_sequence(&log(), &mut ctx, &picked).unwrap();
        assert!(!home.path().join(".bashrc").exists());
    }
}
