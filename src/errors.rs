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

pub use anyhow::{Context, Error, anyhow, bail};

// We use `anyhow` for error handling.
// - Use `context()`/`with_context()` to annotate errors.
// - Use `anyhow!` with a string to create a new `anyhow::Error`.
// - Errors coming out of opendal are passed through untouched so callers
//   can still downcast to `opendal::Error` and inspect its kind.

pub type Result<T> = anyhow::Result<T>;

/// Returns true if `err` wraps an opendal `NotFound` error.
pub fn is_not_found(err: &Error) -> bool {
    err.downcast_ref::<opendal::Error>()
        .is_some_and(|e| e.kind() == opendal::ErrorKind::NotFound)
}
