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

use std::env;
use std::ffi::OsString;

use tokio::runtime::{Builder as RuntimeBuilder, Runtime};

/// Return a `Vec` with each listed entry converted to an owned `String`.
macro_rules! stringvec {
    ( $( $x:expr ),* ) => {
        vec!($( $x.to_owned(), )*)
    };
}

pub fn single_threaded_runtime() -> Runtime {
    RuntimeBuilder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Sets environment variables for as long as it lives, restoring the
/// previous values on drop.
///
/// Tests using this must be marked `#[serial_test::serial(oss_env)]`.
pub struct EnvGuard {
    saved: Vec<(String, Option<OsString>)>,
}

impl EnvGuard {
    pub fn set(pairs: &[(&str, Option<&str>)]) -> EnvGuard {
        let saved = pairs
            .iter()
            .map(|(k, v)| {
                let old = env::var_os(k);
                unsafe {
                    match v {
                        Some(v) => env::set_var(k, v),
                        None => env::remove_var(k),
                    }
                }
                (k.to_string(), old)
            })
            .collect();
        EnvGuard { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (k, old) in self.saved.drain(..).rev() {
            unsafe {
                match old {
                    Some(v) => env::set_var(&k, v),
                    None => env::remove_var(&k),
                }
            }
        }
    }
}
