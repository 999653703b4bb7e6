// Copyright 2016 Mozilla Foundation
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::{Arg, ArgAction, ArgMatches, Command as ClapCommand, value_parser};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::config::CONFIG_ENV;
use crate::errors::*;

/// A specific command to run.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// List the direct children of a path.
    List { path: String },
    /// List every object below a path.
    Find { path: String },
    /// Write an object to stdout.
    Cat { path: String },
    /// Print what is known about an object as JSON.
    Stat { path: String },
    /// Upload a local file.
    Put { local: PathBuf, path: String },
    /// Download an object into a local file.
    Get { path: String, local: PathBuf },
    /// Copy an object.
    Copy { from: String, to: String },
    /// Delete an object, or a whole prefix with `recursive`.
    Remove { path: String, recursive: bool },
    /// Create a directory marker.
    MakeDirs { path: String },
}

/// A parsed command line.
#[derive(Debug, PartialEq, Eq)]
pub struct Invocation {
    /// Config file given with `--config`.
    pub config: Option<PathBuf>,
    pub command: Command,
}

fn path_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).required(true).help(help)
}

/// Get the `clap::Command` used for argument parsing.
fn get_clap_command() -> ClapCommand {
    ClapCommand::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about("Work with Alibaba Cloud OSS through oss:// paths")
        .after_help(format!(
            "Credentials are read from the config file or from OSS_ACCESS_KEY_ID and \
             OSS_ACCESS_KEY_SECRET. The config file defaults to ${CONFIG_ENV}."
        ))
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("TOML or JSON config file"),
        )
        .subcommand(
            ClapCommand::new("ls")
                .about("list the direct children of a path")
                .arg(path_arg("path", "oss://bucket/prefix")),
        )
        .subcommand(
            ClapCommand::new("find")
                .about("list every object below a path")
                .arg(path_arg("path", "oss://bucket/prefix")),
        )
        .subcommand(
            ClapCommand::new("cat")
                .about("write an object to stdout")
                .arg(path_arg("path", "oss://bucket/key")),
        )
        .subcommand(
            ClapCommand::new("stat")
                .about("show object metadata")
                .arg(path_arg("path", "oss://bucket/key")),
        )
        .subcommand(
            ClapCommand::new("put")
                .about("upload a local file")
                .arg(path_arg("local", "local file").value_parser(value_parser!(PathBuf)))
                .arg(path_arg("path", "oss://bucket/key")),
        )
        .subcommand(
            ClapCommand::new("get")
                .about("download an object")
                .arg(path_arg("path", "oss://bucket/key"))
                .arg(path_arg("local", "local file").value_parser(value_parser!(PathBuf))),
        )
        .subcommand(
            ClapCommand::new("cp")
                .about("copy an object")
                .arg(path_arg("from", "oss://bucket/key"))
                .arg(path_arg("to", "oss://bucket/key")),
        )
        .subcommand(
            ClapCommand::new("rm")
                .about("delete an object")
                .arg(
                    Arg::new("recursive")
                        .long("recursive")
                        .short('r')
                        .action(ArgAction::SetTrue)
                        .help("delete everything below the path"),
                )
                .arg(path_arg("path", "oss://bucket/key")),
        )
        .subcommand(
            ClapCommand::new("mkdir")
                .about("create a directory marker")
                .arg(path_arg("path", "oss://bucket/prefix")),
        )
}

fn string(matches: &ArgMatches, name: &str) -> String {
    matches
        .get_one::<String>(name)
        .cloned()
        .unwrap_or_default()
}

fn pathbuf(matches: &ArgMatches, name: &str) -> PathBuf {
    matches
        .get_one::<PathBuf>(name)
        .cloned()
        .unwrap_or_default()
}

/// Parse `args` (including the program name) into an `Invocation`.
pub fn try_parse_from<I, T>(args: I) -> Result<Invocation>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = get_clap_command().try_get_matches_from(args)?;
    let config = matches.get_one::<PathBuf>("config").cloned();

    let command = match matches.subcommand() {
        Some(("ls", m)) => Command::List {
            path: string(m, "path"),
        },
        Some(("find", m)) => Command::Find {
            path: string(m, "path"),
        },
        Some(("cat", m)) => Command::Cat {
            path: string(m, "path"),
        },
        Some(("stat", m)) => Command::Stat {
            path: string(m, "path"),
        },
        Some(("put", m)) => Command::Put {
            local: pathbuf(m, "local"),
            path: string(m, "path"),
        },
        Some(("get", m)) => Command::Get {
            path: string(m, "path"),
            local: pathbuf(m, "local"),
        },
        Some(("cp", m)) => Command::Copy {
            from: string(m, "from"),
            to: string(m, "to"),
        },
        Some(("rm", m)) => Command::Remove {
            path: string(m, "path"),
            recursive: m.get_flag("recursive"),
        },
        Some(("mkdir", m)) => Command::MakeDirs {
            path: string(m, "path"),
        },
        _ => bail!("No command specified"),
    };

    Ok(Invocation { config, command })
}

/// Parse the process command line.
pub fn try_parse() -> Result<Invocation> {
    try_parse_from(std::env::args_os())
}
