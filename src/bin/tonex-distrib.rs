use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tonex_distrib::preflight::check_inputs;
use tonex_distrib::{DistribConfig, DistributionBuilder};

fn usage() -> &'static str {
    "Usage:\n  tonex-distrib [build] [--config <file>] [--version <version>] [--target <board>]... [--keep-going]\n  tonex-distrib check [--config <file>] [--target <board>]...\n  tonex-distrib list [--config <file>] [--version <version>] [--target <board>]..."
}

const BUILD_OPTIONS: &[&str] = &["--config", "--version", "--target", "--keep-going"];
const CHECK_OPTIONS: &[&str] = &["--config", "--target"];
const LIST_OPTIONS: &[&str] = &["--config", "--version", "--target"];

#[derive(Debug, Default, PartialEq, Eq)]
struct Options {
    config: Option<PathBuf>,
    version: Option<String>,
    targets: Vec<String>,
    keep_going: bool,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [] => build(Options::default()),
        [help] if help == "help" || help == "-h" || help == "--help" => {
            println!("{}", usage());
            Ok(())
        }
        [cmd, rest @ ..] if cmd == "build" => {
            build(parse_options("build", rest, BUILD_OPTIONS)?)
        }
        [cmd, rest @ ..] if cmd == "check" => {
            check(parse_options("check", rest, CHECK_OPTIONS)?)
        }
        [cmd, rest @ ..] if cmd == "list" => list(parse_options("list", rest, LIST_OPTIONS)?),
        [flag, ..] if flag.starts_with("--") => {
            build(parse_options("build", &args, BUILD_OPTIONS)?)
        }
        _ => bail!(usage()),
    }
}

/// Parse the flags of `command`, refusing any flag outside `allowed`.
fn parse_options(command: &str, args: &[String], allowed: &[&str]) -> Result<Options> {
    let mut options = Options::default();
    let mut rest = args;
    loop {
        rest = match rest {
            [] => return Ok(options),
            [flag, ..] if flag.starts_with("--") && !allowed.contains(&flag.as_str()) => {
                bail!("option '{}' is not valid for `{}`\n{}", flag, command, usage())
            }
            [flag, value, tail @ ..] if flag == "--config" => {
                options.config = Some(PathBuf::from(value));
                tail
            }
            [flag, value, tail @ ..] if flag == "--version" => {
                options.version = Some(value.clone());
                tail
            }
            [flag, value, tail @ ..] if flag == "--target" => {
                options.targets.push(value.clone());
                tail
            }
            [flag, tail @ ..] if flag == "--keep-going" => {
                options.keep_going = true;
                tail
            }
            [other, ..] => bail!("unexpected argument '{}'\n{}", other, usage()),
        };
    }
}

fn load_config(options: &Options) -> Result<DistribConfig> {
    let repo_root = std::env::current_dir().context("resolving current directory")?;
    let mut config = match &options.config {
        Some(path) => DistribConfig::load(&repo_root, path)?,
        None => DistribConfig::with_defaults(&repo_root),
    };
    if let Some(version) = &options.version {
        config.version = version.clone();
    }
    config.retain_targets(&options.targets)?;
    config.validate()?;
    Ok(config)
}

fn build(options: Options) -> Result<()> {
    let config = load_config(&options)?;
    let builder = DistributionBuilder::new(config)?;

    if options.keep_going {
        builder.build_all_isolated().into_result()?;
    } else {
        builder.build_all()?;
    }
    Ok(())
}

fn check(options: Options) -> Result<()> {
    let config = load_config(&options)?;
    check_inputs(&config)?;
    println!(
        "[distrib] all inputs present for {} target(s)",
        config.targets.len()
    );
    Ok(())
}

fn list(options: Options) -> Result<()> {
    let config = load_config(&options)?;
    for target in &config.targets {
        println!(
            "{}  <- {}/{} + {} (ota: {})",
            config.archive_path(target).display(),
            config.source_root.display(),
            target.target_folder,
            target.template,
            if target.include_ota { "yes" } else { "no" }
        );
    }
    Ok(())
}
