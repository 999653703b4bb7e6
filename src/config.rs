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

use fs_err as fs;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::result::Result as StdResult;
use std::time::Duration;

use crate::errors::*;

/// Environment variable pointing at the config file.
pub const CONFIG_ENV: &str = "OSS_OBJFS_CONF";

pub const ACCESS_KEY_ID_ENV: &str = "OSS_ACCESS_KEY_ID";
pub const ACCESS_KEY_SECRET_ENV: &str = "OSS_ACCESS_KEY_SECRET";
pub const CONNECT_TIMEOUT_ENV: &str = "OSS_CONNECT_TIMEOUT";
pub const READ_TIMEOUT_ENV: &str = "OSS_READ_TIMEOUT";
pub const TOTAL_TIMEOUT_ENV: &str = "OSS_TOTAL_TIMEOUT";

pub const DEFAULT_CONNECT_TIMEOUT: &str = "60";
pub const DEFAULT_READ_TIMEOUT: &str = "300";
/// Zero disables the total request cap.
pub const DEFAULT_TOTAL_TIMEOUT: &str = "0";

/// Connection options for the OSS backend.
///
/// Every key is optional. Keys left out here are looked up in the
/// environment one at a time, so a config that only sets
/// `oss_read_timeout` still picks `OSS_CONNECT_TIMEOUT` up from the
/// environment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[serde(deny_unknown_fields)]
pub struct OssConfig {
    pub oss_key_id: Option<String>,
    pub oss_key_secret: Option<String>,
    pub oss_endpoint: Option<String>,
    #[serde(deserialize_with = "number_or_string")]
    pub oss_connect_timeout: Option<String>,
    #[serde(deserialize_with = "number_or_string")]
    pub oss_read_timeout: Option<String>,
    #[serde(deserialize_with = "number_or_string")]
    pub oss_total_timeout: Option<String>,
}

// Config files may spell timeouts as `30`, `2.5` or `"30"`.
fn number_or_string<'de, D>(deserializer: D) -> StdResult<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Int(i64),
        Float(f64),
        Str(String),
    }

    Ok(Option::<Helper>::deserialize(deserializer)?.map(|v| match v {
        Helper::Int(i) => i.to_string(),
        Helper::Float(f) => f.to_string(),
        Helper::Str(s) => s,
    }))
}

impl OssConfig {
    /// Load the config from `path`, or from the file named by
    /// `OSS_OBJFS_CONF` when `path` is `None`.
    ///
    /// A config file that cannot be found yields the default (empty)
    /// config. A file that exists but doesn't parse is an error.
    pub fn load(path: Option<&Path>) -> Result<OssConfig> {
        let path = match path {
            Some(p) => p.to_owned(),
            None => match env::var_os(CONFIG_ENV) {
                Some(p) => PathBuf::from(p),
                None => {
                    debug!("{} not set, using an empty config", CONFIG_ENV);
                    return Ok(OssConfig::default());
                }
            },
        };
        Ok(try_read_config_file(&path)
            .context("Failed to load config file")?
            .unwrap_or_default())
    }
}

// If the file doesn't exist or we can't read it, log the issue and proceed. If the
// config exists but doesn't parse then something is wrong - return an error.
pub fn try_read_config_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    debug!("Attempting to read config file at {:?}", path);
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!("Couldn't open config file: {}", e);
            return Ok(None);
        }
    };

    let mut string = String::new();
    match file.read_to_string(&mut string) {
        Ok(_) => (),
        Err(e) => {
            warn!("Failed to read config file: {}", e);
            return Ok(None);
        }
    }

    let res = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&string)
            .with_context(|| format!("Failed to load json config file from {}", path.display()))?
    } else {
        toml::from_str(&string)
            .with_context(|| format!("Failed to load toml config file from {}", path.display()))?
    };

    Ok(Some(res))
}

/// Read `key` from the process environment.
///
/// Values that are not valid unicode are treated as unset.
pub fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Pick the first present value of `configured`, the environment variable
/// `env_key` and `default`.
///
/// Empty strings count as absent at every step.
pub fn resolve<E>(
    configured: Option<&str>,
    env_key: &str,
    default: Option<&str>,
    env: E,
) -> Option<String>
where
    E: Fn(&str) -> Option<String>,
{
    configured
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
        .or_else(|| {
            env(env_key).filter(|v| {
                if v.is_empty() {
                    warn!("{} is set but empty, ignoring it", env_key);
                }
                !v.is_empty()
            })
        })
        .or_else(|| default.map(ToOwned::to_owned))
}

/// Parse a timeout value given in (possibly fractional) seconds.
pub fn parse_seconds(name: &str, value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .with_context(|| format!("could not convert {name} value {value:?} to a number"))
}

/// Turn a number of seconds into a timeout. Zero or less means no timeout.
pub fn seconds_to_duration(name: &str, secs: f64) -> Result<Option<Duration>> {
    if !secs.is_finite() {
        bail!("{name} must be a finite number of seconds, got {secs}");
    }
    if secs <= 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .with_context(|| format!("{name} is too large: {secs}"))
}
