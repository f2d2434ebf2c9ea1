//! Storage configuration.
//!
//! Options follow the sanitize-on-open model: empty or missing fields fall
//! back to their defaults when the storage is opened, so a zero-value
//! `StorageOptions` is always usable.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::Error;
use crate::errors::Result;
use crate::utils::VersionSource;

/// Hook used to run the event-dispatch loop.
///
/// Defaults to `tokio::spawn`; tests inject their own hook to observe the
/// loop's completion.
pub type SpawnFn = Arc<dyn Fn(BoxFuture<'static, ()>) + Send + Sync>;

/// Options for file system storages.
#[derive(Serialize, Deserialize, Clone)]
pub struct StorageOptions {
    /// Root directory holding the `values/` and `versions/` trees.
    ///
    /// An empty path is replaced with `"versionedkv"` on open.
    #[serde(default = "default_base_dir_name")]
    pub base_dir_name: PathBuf,

    /// How the event-dispatch loop is run.
    #[serde(skip)]
    pub spawn: Option<SpawnFn>,

    /// Source of fresh version tokens.
    #[serde(skip)]
    pub version_source: Option<Arc<dyn VersionSource>>,
}

fn default_base_dir_name() -> PathBuf {
    PathBuf::from("versionedkv")
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            base_dir_name: default_base_dir_name(),
            spawn: None,
            version_source: None,
        }
    }
}

impl StorageOptions {
    pub(crate) fn sanitize(&mut self) {
        if self.base_dir_name.as_os_str().is_empty() {
            self.base_dir_name = default_base_dir_name();
        }
    }

    /// Rejects unusable option values. `sanitize` fills an empty
    /// `base_dir_name` with the default instead; callers constructing
    /// options by hand can use this to get a report rather than a silent
    /// fix-up.
    pub fn validate(&self) -> Result<()> {
        if self.base_dir_name.as_os_str().is_empty() {
            return Err(Error::Config(
                "base_dir_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for StorageOptions {
    // The spawn hook is function-like and carries no useful state.
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("StorageOptions")
            .field("base_dir_name", &self.base_dir_name)
            .field("version_source", &self.version_source)
            .finish_non_exhaustive()
    }
}
