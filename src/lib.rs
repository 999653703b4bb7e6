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

#![deny(rust_2018_idioms)]
#![allow(clippy::new_without_default)]

#[macro_use]
extern crate log;
// To get macros in scope, this has to be first.
#[cfg(test)]
#[macro_use]
mod test;

pub mod errors;

pub mod cmdline;
pub mod commands;
pub mod config;
pub mod fs;

use std::env;

/// VERSION is the pkg version of oss-objfs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Used to denote the environment variable that controls
/// logging for oss-objfs.
pub const LOGGING_ENV: &str = "OSS_OBJFS_LOG";

pub fn main() {
    init_logging();

    let invocation = match cmdline::try_parse() {
        Ok(invocation) => invocation,
        Err(e) => match e.downcast::<clap::error::Error>() {
            // If the error is from clap then let them handle formatting and exiting
            Ok(clap_err) => clap_err.exit(),
            Err(some_other_err) => {
                println!("oss-objfs: {some_other_err}");
                for source in some_other_err.chain().skip(1) {
                    println!("oss-objfs: caused by: {source}");
                }
                std::process::exit(1);
            }
        },
    };

    std::process::exit(match commands::run_command(invocation) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("oss-objfs: error: {}", e);
            for e in e.chain().skip(1) {
                eprintln!("oss-objfs: caused by: {}", e);
            }
            2
        }
    });
}

fn init_logging() {
    if env::var(LOGGING_ENV).is_ok() {
        match env_logger::Builder::from_env(LOGGING_ENV).try_init() {
            Ok(_) => (),
            Err(e) => panic!("Failed to initialize logging: {:?}", e),
        }
    }
}
