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

pub mod oss;
pub mod uri;
pub mod utils;

pub use crate::fs::oss::{ClientOptions, ClientTimeout, Credentials, FsArgs, OssClient, OssFileSystem};
pub use crate::fs::utils::split_bucket;

use crate::fs::uri::infer_storage_options;

use std::ops::Range;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use fs_err::tokio as tfs;
use futures::TryStreamExt;
use opendal::options::ListOptions;
use opendal::{EntryMode, ErrorKind, Metadata, Operator, Writer};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::*;

/// Chunk size used when streaming local files to the object store.
const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// What is known about a single object or directory-like prefix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    /// Fully qualified path, without a trailing `/` for directories.
    pub path: String,
    pub size: u64,
    /// The checksum field named by `PARAM_CHECKSUM`, if the backend has one.
    #[serde(rename = "etag")]
    pub checksum: Option<String>,
    pub last_modified: Option<String>,
    pub is_dir: bool,
}

/// A filesystem-like view over a remote object store.
///
/// Implementors provide the protocol constants, the path (un)stripping
/// rules and a way to get an `Operator` for a bucket. Everything else is
/// provided on top of those.
///
/// Paths given to the provided methods may be fully qualified
/// (`oss://bucket/key`) or already stripped (`bucket/key`).
#[async_trait]
pub trait ObjectFileSystem: Send + Sync {
    /// The URI scheme served by this filesystem.
    const PROTOCOL: &'static str;
    /// The metadata field compared when checking whether two objects match.
    const PARAM_CHECKSUM: &'static str;
    /// Page size hint for list requests.
    const LIST_OBJECT_PAGE_SIZE: usize;

    /// Turn a URI into the `bucket/key` form used internally.
    fn strip_protocol(path: &str) -> String;

    /// Turn a `bucket/key` path back into a URI.
    fn unstrip_protocol(&self, path: &str) -> String;

    /// Get an operator rooted at `bucket`.
    fn operator(&self, bucket: &str) -> Result<Operator>;

    /// Resolve `path` to an operator and the key inside its bucket.
    ///
    /// A URI with an empty host (`oss:///key`) is refused rather than
    /// having the first key segment taken as the bucket.
    fn locate(&self, path: &str) -> Result<(Operator, String)> {
        let options = infer_storage_options(path);
        let host = options.host.as_deref().unwrap_or_default();
        if options.protocol != "file" && host.is_empty() {
            bail!("{path:?} does not name a bucket");
        }
        let stripped = Self::strip_protocol(path);
        let (bucket, key) = split_bucket(&stripped);
        if bucket.is_empty() {
            bail!("{path:?} does not name a bucket");
        }
        Ok((self.operator(bucket)?, key.to_owned()))
    }

    /// Extract `PARAM_CHECKSUM` from object metadata.
    fn checksum_of(meta: &Metadata) -> Option<String> {
        let value = match Self::PARAM_CHECKSUM {
            "etag" => meta.etag(),
            "md5" => meta.content_md5(),
            _ => None,
        };
        value.map(|v| v.trim_matches('"').to_owned())
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        let (op, key) = self.locate(path)?;
        trace!("read {}", path);
        let buf = op
            .read(&key)
            .await
            .with_context(|| format!("failed to read {path}"))?;
        Ok(buf.to_bytes())
    }

    async fn read_range(&self, path: &str, range: Range<u64>) -> Result<Bytes> {
        let (op, key) = self.locate(path)?;
        trace!("read {} [{}..{})", path, range.start, range.end);
        let buf = op
            .reader(&key)
            .await?
            .read(range)
            .await
            .with_context(|| format!("failed to read {path}"))?;
        Ok(buf.to_bytes())
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let (op, key) = self.locate(path)?;
        trace!("write {} ({} bytes)", path, data.len());
        op.write(&key, data)
            .await
            .with_context(|| format!("failed to write {path}"))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.info(path).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Stat `path`. Prefixes that only exist because objects live below
    /// them are reported as directories.
    async fn info(&self, path: &str) -> Result<ObjectInfo> {
        let (op, key) = self.locate(path)?;
        let stripped = Self::strip_protocol(path);
        if key.is_empty() || key.ends_with('/') {
            return dir_info(self, &op, &stripped, &key).await;
        }
        match op.stat(&key).await {
            Ok(meta) => Ok(ObjectInfo {
                path: self.unstrip_protocol(&stripped),
                size: meta.content_length(),
                checksum: Self::checksum_of(&meta),
                last_modified: meta.last_modified().map(|t| t.to_string()),
                is_dir: meta.is_dir(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                dir_info(self, &op, &stripped, &format!("{key}/")).await
            }
            Err(e) => Err(Error::from(e).context(format!("failed to stat {path}"))),
        }
    }

    async fn checksum(&self, path: &str) -> Result<Option<String>> {
        Ok(self.info(path).await?.checksum)
    }

    /// Whether the object at `path` carries the checksum `expected`.
    async fn matches_checksum(&self, path: &str, expected: &str) -> Result<bool> {
        let actual = self.checksum(path).await?;
        Ok(actual.as_deref() == Some(expected.trim_matches('"')))
    }

    /// List the direct children of `path`.
    async fn ls(&self, path: &str) -> Result<Vec<ObjectInfo>> {
        list(self, path, false).await
    }

    /// List every object below `path`, recursively. Directories are left out.
    async fn find(&self, path: &str) -> Result<Vec<ObjectInfo>> {
        Ok(list(self, path, true)
            .await?
            .into_iter()
            .filter(|info| !info.is_dir)
            .collect())
    }

    async fn rm_file(&self, path: &str) -> Result<()> {
        let (op, key) = self.locate(path)?;
        debug!("delete {}", path);
        op.delete(&key)
            .await
            .with_context(|| format!("failed to delete {path}"))
    }

    /// Remove `path`. With `recursive`, everything below it goes too.
    async fn rm(&self, path: &str, recursive: bool) -> Result<()> {
        if !recursive {
            return self.rm_file(path).await;
        }
        let (op, key) = self.locate(path)?;
        let dir = if key.is_empty() || key.ends_with('/') {
            key.clone()
        } else {
            format!("{key}/")
        };
        let mut lister = op
            .lister_options(
                &dir,
                ListOptions {
                    limit: Some(Self::LIST_OBJECT_PAGE_SIZE),
                    recursive: true,
                    ..Default::default()
                },
            )
            .await?;
        let mut removed = 0usize;
        while let Some(entry) = lister.try_next().await? {
            op.delete(entry.path()).await?;
            removed += 1;
        }
        if !key.is_empty() {
            // The object itself and the directory marker, whichever exists.
            op.delete(&key).await?;
            op.delete(&dir).await?;
        }
        debug!("removed {} objects under {}", removed, path);
        Ok(())
    }

    /// Copy one object. Within a bucket this is a server side copy when
    /// the backend supports it.
    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let (from_op, from_key) = self.locate(from)?;
        let (to_op, to_key) = self.locate(to)?;
        let from_stripped = Self::strip_protocol(from);
        let to_stripped = Self::strip_protocol(to);

        debug!("copy {} -> {}", from, to);
        if split_bucket(&from_stripped).0 == split_bucket(&to_stripped).0 {
            match from_op.copy(&from_key, &to_key).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Unsupported => {
                    trace!("server side copy unsupported, copying through the client");
                }
                Err(e) => {
                    return Err(Error::from(e).context(format!("failed to copy {from} to {to}")));
                }
            }
        }
        let data = from_op
            .read(&from_key)
            .await
            .with_context(|| format!("failed to read {from}"))?;
        to_op
            .write(&to_key, data)
            .await
            .with_context(|| format!("failed to write {to}"))?;
        Ok(())
    }

    /// Create a directory marker at `path`. Buckets are never created.
    async fn makedirs(&self, path: &str) -> Result<()> {
        let (op, key) = self.locate(path)?;
        if key.is_empty() {
            return Ok(());
        }
        let dir = if key.ends_with('/') { key } else { format!("{key}/") };
        op.create_dir(&dir)
            .await
            .with_context(|| format!("failed to create {path}"))
    }

    /// Upload the local file `local` to `path`.
    async fn put_file(&self, local: &Path, path: &str) -> Result<()> {
        let (op, key) = self.locate(path)?;
        let mut file = tfs::File::open(local).await?;
        let mut writer = op.writer(&key).await?;
        let total = match upload_chunks(&mut file, &mut writer).await {
            Ok(total) => total,
            Err(e) => {
                // Don't leave a half-finished multipart upload behind.
                if let Err(abort_err) = writer.abort().await {
                    warn!("failed to abort upload to {}: {}", path, abort_err);
                }
                return Err(e.context(format!("failed to upload {} to {path}", local.display())));
            }
        };
        writer
            .close()
            .await
            .with_context(|| format!("failed to upload {} to {path}", local.display()))?;
        debug!("uploaded {} bytes from {} to {}", total, local.display(), path);
        Ok(())
    }

    /// Download `path` into the local file `local`.
    async fn get_file(&self, path: &str, local: &Path) -> Result<()> {
        let (op, key) = self.locate(path)?;
        let stream = op.reader(&key).await?.into_bytes_stream(..).await?;
        futures::pin_mut!(stream);
        let mut file = tfs::File::create(local).await?;
        let mut total = 0usize;
        while let Some(chunk) = stream.try_next().await? {
            total += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!("downloaded {} bytes from {} to {}", total, path, local.display());
        Ok(())
    }
}

async fn upload_chunks(file: &mut tfs::File, writer: &mut Writer) -> Result<usize> {
    let mut total = 0usize;
    loop {
        let mut chunk = Vec::with_capacity(UPLOAD_CHUNK_SIZE);
        let n = (&mut *file)
            .take(UPLOAD_CHUNK_SIZE as u64)
            .read_to_end(&mut chunk)
            .await?;
        if n == 0 {
            return Ok(total);
        }
        total += n;
        writer.write(chunk).await?;
    }
}

async fn dir_info<F: ObjectFileSystem + ?Sized>(
    fs: &F,
    op: &Operator,
    stripped: &str,
    dir: &str,
) -> Result<ObjectInfo> {
    let mut lister = op
        .lister_options(
            dir,
            ListOptions {
                limit: Some(1),
                ..Default::default()
            },
        )
        .await?;
    // Either the directory marker itself or anything below it will do.
    let found = dir.is_empty() || lister.try_next().await?.is_some();
    if !found {
        return Err(opendal::Error::new(ErrorKind::NotFound, "no such object or prefix")
            .with_context("path", stripped)
            .into());
    }
    Ok(ObjectInfo {
        path: fs.unstrip_protocol(stripped.trim_end_matches('/')),
        size: 0,
        checksum: None,
        last_modified: None,
        is_dir: true,
    })
}

async fn list<F: ObjectFileSystem + ?Sized>(
    fs: &F,
    path: &str,
    recursive: bool,
) -> Result<Vec<ObjectInfo>> {
    let stripped = F::strip_protocol(path);
    let (bucket, _) = split_bucket(&stripped);
    let bucket = bucket.to_owned();
    let (op, key) = fs.locate(path)?;
    let dir = if key.is_empty() || key.ends_with('/') {
        key
    } else {
        format!("{key}/")
    };

    let mut lister = op
        .lister_options(
            &dir,
            ListOptions {
                limit: Some(F::LIST_OBJECT_PAGE_SIZE),
                recursive,
                ..Default::default()
            },
        )
        .await
        .with_context(|| format!("failed to list {path}"))?;

    let mut infos = vec![];
    while let Some(entry) = lister.try_next().await? {
        // Some backends report the listed directory (or root) itself.
        if entry.path() == dir || entry.path() == "/" {
            continue;
        }
        let meta = entry.metadata();
        let is_dir = meta.mode() == EntryMode::DIR;
        let name = entry.path().trim_end_matches('/');
        infos.push(ObjectInfo {
            path: fs.unstrip_protocol(&format!("{bucket}/{name}")),
            size: meta.content_length(),
            checksum: F::checksum_of(meta),
            last_modified: meta.last_modified().map(|t| t.to_string()),
            is_dir,
        });
    }
    // Listing a plain object yields the object itself.
    if infos.is_empty() && !dir.is_empty() {
        match fs.info(path).await {
            Ok(info) if !info.is_dir => infos.push(info),
            Ok(_) => (),
            Err(e) if is_not_found(&e) => (),
            Err(e) => return Err(e),
        }
    }
    trace!("listed {} entries under {}", infos.len(), path);
    Ok(infos)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::mock_fs::MemoryFileSystem;
    use crate::test::utils::single_threaded_runtime;

    fn paths(infos: &[ObjectInfo]) -> Vec<String> {
        let mut paths: Vec<_> = infos.iter().map(|i| i.path.clone()).collect();
        paths.sort();
        paths
    }

    async fn populate(fs: &MemoryFileSystem) {
        for (path, data) in [
            ("mem://bkt/a.txt", "alpha"),
            ("mem://bkt/dir/b.txt", "bravo"),
            ("mem://bkt/dir/sub/c.txt", "charlie"),
        ] {
            fs.write(path, Bytes::from_static(data.as_bytes()))
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_read_write() {
        let fs = MemoryFileSystem::new();
        single_threaded_runtime().block_on(async {
            fs.write("mem://bkt/key", Bytes::from_static(b"hello world"))
                .await
                .unwrap();
            assert_eq!(fs.read("mem://bkt/key").await.unwrap(), "hello world");
            assert_eq!(fs.read("bkt/key").await.unwrap(), "hello world");
            assert_eq!(fs.read_range("mem://bkt/key", 6..11).await.unwrap(), "world");

            let err = fs.read("mem://bkt/missing").await.unwrap_err();
            assert!(is_not_found(&err));
        });
    }

    #[test]
    fn test_buckets_are_separate() {
        let fs = MemoryFileSystem::new();
        single_threaded_runtime().block_on(async {
            fs.write("mem://one/key", Bytes::from_static(b"1")).await.unwrap();
            assert!(fs.exists("mem://one/key").await.unwrap());
            assert!(!fs.exists("mem://two/key").await.unwrap());
        });
        assert_eq!(fs.bucket_count(), 2);
    }

    #[test]
    fn test_missing_bucket() {
        let fs = MemoryFileSystem::new();
        single_threaded_runtime().block_on(async {
            let err = fs.read("mem://").await.unwrap_err();
            assert!(err.to_string().contains("does not name a bucket"));

            // An empty host never falls through to the first key segment.
            fs.write("mem://data/x", Bytes::from_static(b"keep")).await.unwrap();
            for path in ["mem:///data/x", "mem://:8080/data/x", "mem://user@/data/x"] {
                let err = fs.read(path).await.unwrap_err();
                assert!(err.to_string().contains("does not name a bucket"), "{path}");
            }
            assert!(fs.rm("mem:///data", true).await.is_err());
            assert_eq!(fs.read("mem://data/x").await.unwrap(), "keep");
            assert_eq!(fs.bucket_count(), 1);
        });
    }

    #[test]
    fn test_info() {
        let fs = MemoryFileSystem::new();
        single_threaded_runtime().block_on(async {
            populate(&fs).await;

            let info = fs.info("mem://bkt/dir/b.txt").await.unwrap();
            assert_eq!(info.path, "mem://bkt/dir/b.txt");
            assert_eq!(info.size, 5);
            assert!(!info.is_dir);

            let info = fs.info("mem://bkt/dir").await.unwrap();
            assert_eq!(info.path, "mem://bkt/dir");
            assert!(info.is_dir);

            let info = fs.info("mem://bkt/dir/").await.unwrap();
            assert_eq!(info.path, "mem://bkt/dir");
            assert!(info.is_dir);

            assert!(fs.info("mem://bkt").await.unwrap().is_dir);

            assert!(fs.exists("mem://bkt/dir/sub").await.unwrap());
            assert!(!fs.exists("mem://bkt/nope").await.unwrap());
            assert!(!fs.exists("mem://bkt/nope/").await.unwrap());
        });
    }

    #[test]
    fn test_ls_and_find() {
        let fs = MemoryFileSystem::new();
        single_threaded_runtime().block_on(async {
            populate(&fs).await;

            let top = fs.ls("mem://bkt").await.unwrap();
            assert_eq!(paths(&top), vec!["mem://bkt/a.txt", "mem://bkt/dir"]);
            let dir = top.iter().find(|i| i.path == "mem://bkt/dir").unwrap();
            assert!(dir.is_dir);

            let under = fs.ls("mem://bkt/dir").await.unwrap();
            assert_eq!(
                paths(&under),
                vec!["mem://bkt/dir/b.txt", "mem://bkt/dir/sub"]
            );

            let single = fs.ls("mem://bkt/a.txt").await.unwrap();
            assert_eq!(paths(&single), vec!["mem://bkt/a.txt"]);
            assert!(fs.ls("mem://bkt/nothing").await.unwrap().is_empty());

            let all = fs.find("mem://bkt").await.unwrap();
            assert_eq!(
                paths(&all),
                vec![
                    "mem://bkt/a.txt",
                    "mem://bkt/dir/b.txt",
                    "mem://bkt/dir/sub/c.txt"
                ]
            );
            assert!(all.iter().all(|i| !i.is_dir));
        });
    }

    #[test]
    fn test_rm() {
        let fs = MemoryFileSystem::new();
        single_threaded_runtime().block_on(async {
            populate(&fs).await;

            fs.rm("mem://bkt/a.txt", false).await.unwrap();
            assert!(!fs.exists("mem://bkt/a.txt").await.unwrap());

            fs.rm("mem://bkt/dir", true).await.unwrap();
            assert!(!fs.exists("mem://bkt/dir/sub/c.txt").await.unwrap());
            assert!(!fs.exists("mem://bkt/dir").await.unwrap());
            assert!(fs.find("mem://bkt").await.unwrap().is_empty());
        });
    }

    #[test]
    fn test_copy() {
        let fs = MemoryFileSystem::new();
        single_threaded_runtime().block_on(async {
            populate(&fs).await;

            fs.copy("mem://bkt/a.txt", "mem://bkt/copy.txt").await.unwrap();
            assert_eq!(fs.read("mem://bkt/copy.txt").await.unwrap(), "alpha");

            fs.copy("mem://bkt/dir/b.txt", "mem://other/b.txt").await.unwrap();
            assert_eq!(fs.read("mem://other/b.txt").await.unwrap(), "bravo");
            assert_eq!(fs.read("mem://bkt/dir/b.txt").await.unwrap(), "bravo");
        });
    }

    #[test]
    fn test_makedirs() {
        let fs = MemoryFileSystem::new();
        single_threaded_runtime().block_on(async {
            fs.makedirs("mem://bkt").await.unwrap();
            fs.makedirs("mem://bkt/newdir").await.unwrap();
            let top = fs.ls("mem://bkt").await.unwrap();
            assert_eq!(paths(&top), vec!["mem://bkt/newdir"]);
            assert!(top[0].is_dir);
        });
    }

    #[test]
    fn test_put_and_get_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        fs_err::write(&src, &data).unwrap();

        let fs = MemoryFileSystem::new();
        single_threaded_runtime().block_on(async {
            fs.put_file(&src, "mem://bkt/blob").await.unwrap();
            assert_eq!(fs.info("mem://bkt/blob").await.unwrap().size, 100_000);
            fs.get_file("mem://bkt/blob", &dst).await.unwrap();
        });
        assert_eq!(fs_err::read(&dst).unwrap(), data);
    }

    #[test]
    fn test_put_file_read_error_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fs = MemoryFileSystem::new();
        single_threaded_runtime().block_on(async {
            // Opening a directory works, reading from it does not.
            let err = fs.put_file(dir.path(), "mem://bkt/blob").await.unwrap_err();
            assert!(err.to_string().contains("failed to upload"));
            assert!(!fs.exists("mem://bkt/blob").await.unwrap());
        });
    }

    #[test]
    fn test_checksum_of() {
        let meta = Metadata::new(EntryMode::FILE).with_etag("\"5d41402abc4b2a76\"".to_owned());
        assert_eq!(
            MemoryFileSystem::checksum_of(&meta).as_deref(),
            Some("5d41402abc4b2a76")
        );
        assert_eq!(
            MemoryFileSystem::checksum_of(&Metadata::new(EntryMode::FILE)),
            None
        );
    }
}
