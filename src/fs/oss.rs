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

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::OnceCell;
use opendal::Operator;
use opendal::layers::{HttpClientLayer, LoggingLayer};
use opendal::raw::HttpClient;
use opendal::services::Oss;
use reqwest::ClientBuilder;

use crate::config::{self, OssConfig};
use crate::errors::*;
use crate::fs::ObjectFileSystem;
use crate::fs::uri::infer_storage_options;

/// Looks up an environment variable.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Login details handed to the OSS operator.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub key: Option<String>,
    pub secret: Option<String>,
    pub endpoint: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl Credentials {
    /// Explicit config wins, then `OSS_ACCESS_KEY_ID` / `OSS_ACCESS_KEY_SECRET`.
    /// The endpoint is only ever taken from the config.
    ///
    /// Nothing is validated here; bad credentials show up as errors from
    /// the first request.
    pub fn resolve<E>(config: &OssConfig, env: E) -> Credentials
    where
        E: Fn(&str) -> Option<String>,
    {
        Credentials {
            key: config::resolve(
                config.oss_key_id.as_deref(),
                config::ACCESS_KEY_ID_ENV,
                None,
                &env,
            ),
            secret: config::resolve(
                config.oss_key_secret.as_deref(),
                config::ACCESS_KEY_SECRET_ENV,
                None,
                &env,
            ),
            endpoint: config.oss_endpoint.clone().filter(|e| !e.is_empty()),
        }
    }
}

/// Timeouts applied to the HTTP client. `None` means no timeout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientTimeout {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
    /// Cap on a whole request.
    pub total: Option<Duration>,
}

impl ClientTimeout {
    /// Resolve each timeout on its own: config key, then environment
    /// variable, then the built-in default.
    pub fn resolve<E>(config: &OssConfig, env: E) -> Result<ClientTimeout>
    where
        E: Fn(&str) -> Option<String>,
    {
        let seconds = |name: &str, configured: Option<&str>, env_key: &str, default: &str| {
            let value = config::resolve(configured, env_key, Some(default), &env)
                .unwrap_or_else(|| default.to_owned());
            config::parse_seconds(name, &value)
        };

        let connect = seconds(
            "oss_connect_timeout",
            config.oss_connect_timeout.as_deref(),
            config::CONNECT_TIMEOUT_ENV,
            config::DEFAULT_CONNECT_TIMEOUT,
        )?;
        let read = seconds(
            "oss_read_timeout",
            config.oss_read_timeout.as_deref(),
            config::READ_TIMEOUT_ENV,
            config::DEFAULT_READ_TIMEOUT,
        )?;
        let total = seconds(
            "oss_total_timeout",
            config.oss_total_timeout.as_deref(),
            config::TOTAL_TIMEOUT_ENV,
            config::DEFAULT_TOTAL_TIMEOUT,
        )?;

        Ok(ClientTimeout {
            connect: config::seconds_to_duration("oss_connect_timeout", connect)?,
            read: config::seconds_to_duration("oss_read_timeout", read)?,
            total: config::seconds_to_duration("oss_total_timeout", total)?,
        })
    }
}

/// Options for the HTTP client underneath the OSS operators.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// When set, used as is and never replaced by resolved timeouts.
    pub timeout: Option<ClientTimeout>,
    pub user_agent: Option<String>,
}

/// Arguments the filesystem client is constructed from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsArgs {
    pub client: ClientOptions,
    /// Key prefix applied inside every bucket.
    pub root: Option<String>,
    /// Send unsigned requests when no credentials are available.
    pub allow_anonymous: bool,
}

impl FsArgs {
    /// Fill in `client.timeout` from `timeout` unless the caller already
    /// picked one.
    pub fn with_default_timeout(mut self, timeout: ClientTimeout) -> FsArgs {
        if self.client.timeout.is_none() {
            self.client.timeout = Some(timeout);
        }
        self
    }
}

fn build_http_client(options: &ClientOptions) -> Result<HttpClient> {
    let user_agent = options.user_agent.clone().unwrap_or_else(|| {
        format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    });
    let mut builder = ClientBuilder::new().user_agent(user_agent);
    if let Some(timeout) = options.timeout {
        if let Some(connect) = timeout.connect {
            builder = builder.connect_timeout(connect);
        }
        if let Some(read) = timeout.read {
            builder = builder.read_timeout(read);
        }
        if let Some(total) = timeout.total {
            builder = builder.timeout(total);
        }
    }
    let client = builder.build().context("failed to build the HTTP client")?;
    Ok(HttpClient::with(client))
}

/// The async client shared by every operation of an `OssFileSystem`.
///
/// Holds one HTTP client and hands out one operator per bucket.
pub struct OssClient {
    args: FsArgs,
    credentials: Credentials,
    http: HttpClient,
    operators: Mutex<HashMap<String, Operator>>,
}

impl fmt::Debug for OssClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OssClient")
            .field("args", &self.args)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl OssClient {
    pub fn new(args: FsArgs, credentials: Credentials) -> Result<OssClient> {
        let http = build_http_client(&args.client)?;
        Ok(OssClient {
            args,
            credentials,
            http,
            operators: Mutex::new(HashMap::new()),
        })
    }

    pub fn args(&self) -> &FsArgs {
        &self.args
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Get the operator for `bucket`, building it on first use.
    pub fn operator(&self, bucket: &str) -> Result<Operator> {
        let mut operators = self.operators.lock().unwrap();
        if let Some(op) = operators.get(bucket) {
            return Ok(op.clone());
        }

        let mut builder = Oss::default()
            .bucket(bucket)
            .root(self.args.root.as_deref().unwrap_or("/"));
        if let Some(endpoint) = &self.credentials.endpoint {
            builder = builder.endpoint(endpoint);
        }
        if let Some(key) = &self.credentials.key {
            builder = builder.access_key_id(key);
        }
        if let Some(secret) = &self.credentials.secret {
            builder = builder.access_key_secret(secret);
        }
        if self.args.allow_anonymous {
            builder = builder.allow_anonymous();
        }

        let op = Operator::new(builder)
            .with_context(|| format!("failed to set up OSS bucket {bucket:?}"))?
            .layer(HttpClientLayer::new(self.http.clone()))
            .layer(LoggingLayer::default())
            .finish();
        debug!("built OSS operator for bucket {}", bucket);
        operators.insert(bucket.to_owned(), op.clone());
        Ok(op)
    }
}

/// Alibaba Cloud OSS, served under `oss://bucket/key`.
pub struct OssFileSystem {
    config: OssConfig,
    fs_args: FsArgs,
    env: EnvLookup,
    fs: OnceCell<Arc<OssClient>>,
}

impl fmt::Debug for OssFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OssFileSystem")
            .field("fs_args", &self.fs_args)
            .field("initialized", &self.fs.get().is_some())
            .finish_non_exhaustive()
    }
}

impl OssFileSystem {
    /// Create a filesystem reading fallbacks from the process environment.
    pub fn new(config: OssConfig, fs_args: FsArgs) -> OssFileSystem {
        OssFileSystem::with_env(config, fs_args, Arc::new(config::process_env))
    }

    /// Create a filesystem reading fallbacks through `env`.
    pub fn with_env(config: OssConfig, fs_args: FsArgs, env: EnvLookup) -> OssFileSystem {
        OssFileSystem {
            config,
            fs_args,
            env,
            fs: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &OssConfig {
        &self.config
    }

    pub fn prepare_credentials(&self) -> Credentials {
        Credentials::resolve(&self.config, &*self.env)
    }

    /// Work out the arguments the client gets built from.
    pub fn prepare_fs_args(&self) -> Result<FsArgs> {
        // Resolved even when the caller brought their own timeout, so bad
        // values are reported either way.
        let timeout = ClientTimeout::resolve(&self.config, &*self.env)?;
        Ok(self.fs_args.clone().with_default_timeout(timeout))
    }

    /// The shared client, built on first access.
    ///
    /// Concurrent first calls block until one of them has built the
    /// client and then all see that same instance. A failed build leaves
    /// nothing behind, so the next call tries again.
    pub fn fs(&self) -> Result<Arc<OssClient>> {
        self.fs
            .get_or_try_init(|| {
                let args = self.prepare_fs_args()?;
                let credentials = self.prepare_credentials();
                debug!(
                    "creating OSS client: endpoint {:?}, timeout {:?}",
                    credentials.endpoint, args.client.timeout
                );
                Ok::<_, Error>(Arc::new(OssClient::new(args, credentials)?))
            })
            .map(Arc::clone)
    }
}

impl ObjectFileSystem for OssFileSystem {
    const PROTOCOL: &'static str = "oss";
    const PARAM_CHECKSUM: &'static str = "etag";
    const LIST_OBJECT_PAGE_SIZE: usize = 100;

    fn strip_protocol(path: &str) -> String {
        let options = infer_storage_options(path);
        options.host.unwrap_or_default() + &options.path
    }

    fn unstrip_protocol(&self, path: &str) -> String {
        format!("{}://{}", Self::PROTOCOL, path.trim_start_matches('/'))
    }

    fn operator(&self, bucket: &str) -> Result<Operator> {
        self.fs()?.operator(bucket)
    }
}
