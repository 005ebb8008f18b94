/*
 * Copyright 2025 OpenStudioLandscapes Contributors
 */

mod common;
use common::*;

mod config;
mod ensure;
mod expand;
mod fetch;
mod host;
mod hosts;
mod prompt;
mod registry;
mod script;
mod steps;

use std::path::PathBuf;

use anyhow::{bail, Result};
use slog::Logger;

use config::Config;
use script::Runner;
use steps::Context;

fn baseopts() -> getopts::Options {
    let mut opts = getopts::Options::new();

    /*
     * We should always have a --help flag everywhere.
     */
    opts.optflag("", "help", "usage information");

    opts
}

struct Global {
    config: Option<PathBuf>,
}

impl Global {
    fn config(&self) -> Result<Config> {
        if let Some(p) = self.config.as_deref() {
            match ensure::check(p)? {
                Some(fi) if fi.filetype == ensure::FileType::Directory => {
                    bail!("configuration file {} is a directory", p.display());
                }
                Some(_) => (),
                None => {
                    bail!("configuration file {} does not exist", p.display());
                }
            }
        }
        Config::load(self.config.as_deref())
    }
}

/**
 * Build the shared context for a run.  The user is always the one we are
 * running as; the installation lands in their home directory.
 */
fn context(
    g: &Global,
    dry_run: bool,
    ask_password: bool,
    interactive: bool,
) -> Result<Context> {
    let config = g.config()?;
    let user = host::current_user()?;
    let runner = Runner::new(&config.script_prefix, dry_run, ask_password);
    Ok(Context::new(config, runner, user, interactive))
}

/**
 * A context for commands that only show what would be done.
 */
fn inspection(g: &Global) -> Result<Context> {
    let mut ctx = context(g, true, false, false)?;
    ctx.inspect = true;
    Ok(ctx)
}

fn installing(log: &Logger, ctx: &Context) {
    info!(log, "installing for user {} (uid {}, home {})", ctx.user.name,
        ctx.user.uid, ctx.user.dir.display());
}

fn cmd_install(log: &Logger, g: &Global, args: &[&str]) -> Result<()> {
    let mut opts = baseopts();
    opts.optopt("", "from", "skip the steps before this one", "STEP");
    opts.optopt("", "dir", "install into this directory without asking",
        "PATH");
    opts.optflag("n", "dry-run", "write and show scripts, but do not run them");
    opts.optflag("", "no-reboot", "do not offer a reboot at the end");
    opts.optflag("", "sudo-password",
        "ask for the sudo password here rather than letting sudo prompt");

    let usage = || {
        println!("{}", opts.usage("Usage: landscapes-setup [OPTIONS] install \
            [OPTIONS]"));
    };

    let res = opts.parse(args)?;

    if res.opt_present("help") {
        usage();
        return Ok(());
    }

    if !res.free.is_empty() {
        bail!("unexpected arguments: {:?}", res.free);
    }

    let mut ctx = context(g, res.opt_present("dry-run"),
        res.opt_present("sudo-password"), is_tty())?;
    installing(log, &ctx);
    ctx.reboot = !res.opt_present("no-reboot");
    if let Some(dir) = res.opt_str("dir") {
        ctx.set_landscapes_dir(&dir)?;
    }

    let all = steps::all();
    let todo = match res.opt_str("from") {
        Some(from) => {
            let todo = steps::from(&all, &from)?;
            info!(log, "starting at step {}", from);
            todo
        }
        None => all.iter().collect(),
    };

    steps::run_sequence(log, &mut ctx, &todo)?;

    info!(log, "installation complete");
    Ok(())
}

fn cmd_steps(_log: &Logger, g: &Global, args: &[&str]) -> Result<()> {
    let opts = baseopts();

    let usage = || {
        println!("{}", opts.usage("Usage: landscapes-setup [OPTIONS] steps"));
    };

    let res = opts.parse(args)?;

    if res.opt_present("help") {
        usage();
        return Ok(());
    }

    let ctx = inspection(g)?;

    for (i, s) in steps::all().iter().enumerate() {
        let how = match s.privilege {
            Some(script::Privilege::Root) => "root",
            Some(script::Privilege::User) => "user",
            None => "native",
        };
        let enabled = if s.enabled(&ctx) { "" } else { " (disabled)" };

        println!("{:>2}  {:<16} {:<7} {}{}", i + 1, s.name, how, s.desc,
            enabled);
    }

    Ok(())
}

fn cmd_script(log: &Logger, g: &Global, args: &[&str]) -> Result<()> {
    let mut opts = baseopts();
    opts.optopt("", "dir", "render for this install directory", "PATH");

    let usage = || {
        println!("{}", opts.usage("Usage: landscapes-setup [OPTIONS] script \
            [OPTIONS] STEP"));
    };

    let res = opts.parse(args)?;

    if res.opt_present("help") {
        usage();
        return Ok(());
    }

    if res.free.len() != 1 {
        usage();
        bail!("which step should I render?");
    }

    let mut ctx = inspection(g)?;
    if let Some(dir) = res.opt_str("dir") {
        ctx.set_landscapes_dir(&dir)?;
    }

    let all = steps::all();
    let s = steps::by_name(&all, &res.free[0])?;
    if !s.has_script() {
        bail!("step {:?} does its work without a script", s.name);
    }

    print!("{}", s.render(log, &mut ctx)?.body);
    Ok(())
}

fn cmd_run(log: &Logger, g: &Global, args: &[&str]) -> Result<()> {
    let mut opts = baseopts();
    opts.optopt("", "dir", "install into this directory without asking",
        "PATH");
    opts.optflag("n", "dry-run", "write and show scripts, but do not run them");
    opts.optflag("", "sudo-password",
        "ask for the sudo password here rather than letting sudo prompt");

    let usage = || {
        println!("{}", opts.usage("Usage: landscapes-setup [OPTIONS] run \
            [OPTIONS] STEP..."));
    };

    let res = opts.parse(args)?;

    if res.opt_present("help") {
        usage();
        return Ok(());
    }

    if res.free.is_empty() {
        usage();
        bail!("which steps should I run?");
    }

    let all = steps::all();
    let todo = steps::named(&all, res.free.as_slice())?;

    let mut ctx = context(g, res.opt_present("dry-run"),
        res.opt_present("sudo-password"), is_tty())?;
    installing(log, &ctx);
    if let Some(dir) = res.opt_str("dir") {
        ctx.set_landscapes_dir(&dir)?;
    }

    steps::run_sequence(log, &mut ctx, &todo)
}

fn cmd_registry(log: &Logger, g: &Global, args: &[&str]) -> Result<()> {
    let opts = baseopts();

    let usage = || {
        println!("{}", opts.usage("Usage: landscapes-setup [OPTIONS] \
            registry"));
    };

    let res = opts.parse(args)?;

    if res.opt_present("help") {
        usage();
        return Ok(());
    }

    let mut ctx = context(g, false, false, false)?;
    steps::run_registry(&log.new(o!("step" => "registry")), &mut ctx)
}

struct CommandInfo {
    name: String,
    desc: String,
    func: fn(&Logger, &Global, &[&str]) -> Result<()>,
    hide: bool,
}

fn main() -> Result<()> {
    let mut opts = baseopts();
    opts.parsing_style(getopts::ParsingStyle::StopAtFirstFree);
    opts.optopt("c", "config", "configuration file (TOML)", "FILE");

    let mut handlers: Vec<CommandInfo> = Vec::new();
    handlers.push(CommandInfo {
        name: "install".into(),
        desc: "provision this host".into(),
        func: cmd_install,
        hide: false,
    });
    handlers.push(CommandInfo {
        name: "steps".into(),
        desc: "list the installation steps".into(),
        func: cmd_steps,
        hide: false,
    });
    handlers.push(CommandInfo {
        name: "script".into(),
        desc: "show the script for a step".into(),
        func: cmd_script,
        hide: false,
    });
    handlers.push(CommandInfo {
        name: "run".into(),
        desc: "run some steps".into(),
        func: cmd_run,
        hide: false,
    });
    handlers.push(CommandInfo {
        name: "registry".into(),
        desc: "initialise the registry".into(),
        func: cmd_registry,
        hide: true,
    });

    let usage = || {
        let mut out = String::new();
        out += "Usage: landscapes-setup [OPTIONS] COMMAND [OPTIONS] \
            [ARGS...]\n\n";
        for ci in handlers.iter() {
            if ci.hide {
                continue;
            }

            out += &format!("    {:<16} {}\n", ci.name, ci.desc);
        }
        println!("{}", opts.usage(&out));
    };

    let res = opts.parse(std::env::args().skip(1))?;
    if res.opt_present("help") {
        usage();
        return Ok(());
    }

    if res.free.is_empty() {
        usage();
        bail!("choose a command");
    }

    let args = res.free[1..].iter().map(|s| s.as_str()).collect::<Vec<_>>();
    let g = Global {
        config: res.opt_str("config").map(PathBuf::from),
    };

    let log = init_log();

    if host::is_root() {
        warn!(log, "running as root; run as the user who will own the \
            installation, sudo is used where needed");
    }

    for ci in handlers {
        if ci.name != res.free[0] {
            continue;
        }

        return (ci.func)(&log, &g, args.as_slice());
    }

    bail!("command \"{}\" not understood", res.free[0]);
}
