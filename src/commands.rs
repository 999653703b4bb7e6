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

use std::io::{self, Write};

use tokio::runtime::Builder as RuntimeBuilder;

use crate::cmdline::{Command, Invocation};
use crate::config::OssConfig;
use crate::errors::*;
use crate::fs::{FsArgs, ObjectFileSystem, ObjectInfo, OssFileSystem};

fn print_infos<W: Write>(out: &mut W, infos: &[ObjectInfo]) -> Result<()> {
    for info in infos {
        if info.is_dir {
            writeln!(out, "{:>12}  {}/", "DIR", info.path)?;
        } else {
            writeln!(out, "{:>12}  {}", info.size, info.path)?;
        }
    }
    Ok(())
}

/// Run `cmd` against `fs`, writing any output to `out`.
pub async fn run<F, W>(fs: &F, cmd: Command, out: &mut W) -> Result<()>
where
    F: ObjectFileSystem,
    W: Write,
{
    match cmd {
        Command::List { path } => {
            let mut infos = fs.ls(&path).await?;
            infos.sort_by(|a, b| a.path.cmp(&b.path));
            print_infos(out, &infos)?;
        }
        Command::Find { path } => {
            let mut infos = fs.find(&path).await?;
            infos.sort_by(|a, b| a.path.cmp(&b.path));
            print_infos(out, &infos)?;
        }
        Command::Cat { path } => {
            let data = fs.read(&path).await?;
            out.write_all(&data)?;
        }
        Command::Stat { path } => {
            let info = fs.info(&path).await?;
            serde_json::to_writer_pretty(&mut *out, &info)?;
            writeln!(out)?;
        }
        Command::Put { local, path } => {
            fs.put_file(&local, &path)
                .await
                .with_context(|| format!("failed to upload {}", local.display()))?;
        }
        Command::Get { path, local } => {
            fs.get_file(&path, &local)
                .await
                .with_context(|| format!("failed to download {path}"))?;
        }
        Command::Copy { from, to } => fs.copy(&from, &to).await?,
        Command::Remove { path, recursive } => fs.rm(&path, recursive).await?,
        Command::MakeDirs { path } => fs.makedirs(&path).await?,
    }
    out.flush()?;
    Ok(())
}

/// Run a parsed command line against OSS, returning the exit code.
pub fn run_command(invocation: Invocation) -> Result<i32> {
    let Invocation { config, command } = invocation;
    let config = OssConfig::load(config.as_deref())?;
    let fs = OssFileSystem::new(config, FsArgs::default());
    trace!("running {:?} with {:?}", command, fs);

    let runtime = RuntimeBuilder::new_multi_thread().enable_all().build()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    runtime.block_on(run(&fs, command, &mut out))?;
    Ok(0)
}
