// SPDX-FileCopyrightText: 2024 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log;
use serde_json::{Map, Value};
use simple_logger;

mod cloud;
mod config;
mod error;
mod firewall;
mod inventory;
mod matcher;
mod module;
mod resolve;
mod server;
mod tags;
#[cfg(test)]
mod testutil;
mod upcloud;

use config::Config;
use error::{Error, Failure};
use module::{Invocation, ModuleKind};
use upcloud::UpCloudClient;

const VERSION: &str = match option_env!("BUILD_GIT_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

/// Ansible inventory and modules for UpCloud servers.
#[derive(Parser, Debug)]
#[command(version = VERSION, about)]
struct Cli {
    /// Increase log verbosity, may be repeated.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dynamic inventory.
    Inventory {
        /// List all groups (default).
        #[arg(long, conflicts_with = "host")]
        list: bool,
        /// Show variables of a single host.
        #[arg(long)]
        host: Option<String>,
        /// List public addresses instead of hostnames.
        #[arg(long)]
        return_ip_addresses: bool,
    },
    /// Run a module.
    Module {
        #[arg(value_enum)]
        kind: ModuleKind,
        /// File with module arguments, stdin when not given.
        args_file: Option<PathBuf>,
    },
}

fn log_level(verbose: u8) -> log::Level {
    match verbose {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        2 => log::Level::Debug,
        _ => log::Level::Trace,
    }
}

fn print_json(v: &Value) -> Result<()> {
    let out = serde_json::to_string_pretty(v).context("cannot serialize output")?;
    println!("{}", out);
    Ok(())
}

fn run_inventory(conf: &Config, host: Option<&str>, ips: bool) -> Result<()> {
    let mut inv_conf = conf.inventory.clone();
    inv_conf.return_ip_addresses |= ips;

    let creds = conf.credentials(None, None)?;
    let mut client =
        UpCloudClient::connect(creds, conf.request_timeout()).context("cannot set up API client")?;

    let out = match host {
        Some(host) => {
            let vars = inventory::host(&mut client, host, &inv_conf)
                .with_context(|| format!("cannot look up host {}", host))?;
            Value::Object(vars)
        }
        None => {
            let groups = inventory::list(&mut client, &inv_conf).context("cannot list servers")?;
            serde_json::to_value(groups).context("cannot serialize groups")?
        }
    };
    print_json(&out)
}

/// Runs a module end to end. Every error, including a bad configuration or
/// unreadable arguments, ends up as a module failure.
fn module_result(
    config: Option<&Path>,
    kind: ModuleKind,
    args_file: Option<&Path>,
) -> Result<Map<String, Value>, Failure> {
    let conf = Config::load(config)?;
    let raw = match args_file {
        Some(path) => {
            let f = fs::File::open(path).map_err(|e| {
                Error::InvalidArguments(format!(
                    "cannot open arguments file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            module::read_args(f)?
        }
        None => module::read_args(io::stdin().lock())?,
    };
    let inv = Invocation::parse(kind, raw)?;

    let (user, passwd) = inv.credentials();
    let creds = conf.credentials(user, passwd)?;
    let mut client = UpCloudClient::connect(creds, conf.request_timeout())?;
    let waiter = server::Waiter::new(conf.state_timeout());
    inv.run(&mut client, &waiter)
}

fn run_module(config: Option<&Path>, kind: ModuleKind, args_file: Option<&Path>) -> Result<()> {
    match module_result(config, kind, args_file) {
        Ok(out) => print_json(&Value::Object(out)),
        Err(failure) => {
            print_json(&module::failure_result(&failure))?;
            Err(anyhow!(failure)).context(format!("{:?} module failed", kind))
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    simple_logger::init_with_level(log_level(cli.verbose)).context("cannot set up logging")?;
    log::debug!("upcloud-ansible {}", VERSION);

    match &cli.command {
        Command::Inventory {
            list: _,
            host,
            return_ip_addresses,
        } => {
            let conf = Config::load(cli.config.as_deref()).context("cannot load configuration")?;
            run_inventory(&conf, host.as_deref(), *return_ip_addresses)
        }
        Command::Module { kind, args_file } => {
            run_module(cli.config.as_deref(), *kind, args_file.as_deref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_inventory() {
        let cli = Cli::try_parse_from(["upcloud-ansible", "inventory", "--host", "fi.example.com"])
            .expect("valid command line");
        match cli.command {
            Command::Inventory { list, host, .. } => {
                assert!(!list);
                assert_eq!(host.as_deref(), Some("fi.example.com"));
            }
            _ => panic!("unexpected command"),
        }

        assert!(
            Cli::try_parse_from(["upcloud-ansible", "inventory", "--list", "--host", "h"]).is_err()
        );
    }

    #[test]
    fn test_cli_module() {
        let cli = Cli::try_parse_from(["upcloud-ansible", "-vv", "module", "firewall", "args.json"])
            .expect("valid command line");
        assert_eq!(log_level(cli.verbose), log::Level::Debug);
        match cli.command {
            Command::Module { kind, args_file } => {
                assert_eq!(kind, ModuleKind::Firewall);
                assert_eq!(args_file, Some(PathBuf::from("args.json")));
            }
            _ => panic!("unexpected command"),
        }

        assert!(Cli::try_parse_from(["upcloud-ansible", "module", "volume"]).is_err());
    }

    fn scratch_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "upcloud-ansible-{}-{}",
            std::process::id(),
            name
        ));
        fs::write(&path, content).expect("cannot write scratch file");
        path
    }

    #[test]
    fn test_module_bad_config_is_a_failure() {
        let conf = scratch_file("bad-config.yaml", "timeout: soon\n");
        let args = scratch_file("bad-config-args.json", r#"{"uuid": "u-1", "tags": ["a"]}"#);

        let err = module_result(Some(conf.as_path()), ModuleKind::Tag, Some(args.as_path()))
            .expect_err("expected a failure");
        assert!(!err.changed);
        assert!(matches!(err.error, Error::Configuration(_)));
        let out = module::failure_result(&err);
        assert_eq!(out["failed"], Value::Bool(true));
        assert_eq!(out["changed"], Value::Bool(false));

        let missing = std::env::temp_dir().join("upcloud-ansible-no-such-config.yaml");
        let err = module_result(Some(missing.as_path()), ModuleKind::Tag, Some(args.as_path()))
            .expect_err("expected a failure");
        assert!(matches!(err.error, Error::Configuration(_)));

        fs::remove_file(conf).ok();
        fs::remove_file(args).ok();
    }

    #[test]
    fn test_module_missing_args_file_is_a_failure() {
        let conf = scratch_file("args-config.yaml", "timeout: 5\n");
        let missing = std::env::temp_dir().join("upcloud-ansible-no-such-args.json");

        let err = module_result(
            Some(conf.as_path()),
            ModuleKind::Firewall,
            Some(missing.as_path()),
        )
        .expect_err("expected a failure");
        assert!(!err.changed);
        assert!(matches!(err.error, Error::InvalidArguments(_)));
        let out = module::failure_result(&err);
        assert!(out["msg"]
            .as_str()
            .is_some_and(|m| m.contains("cannot open arguments file")));

        fs::remove_file(conf).ok();
    }

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0), log::Level::Warn);
        assert_eq!(log_level(1), log::Level::Info);
        assert_eq!(log_level(7), log::Level::Trace);
    }
}
