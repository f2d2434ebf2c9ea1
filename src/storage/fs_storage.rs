//! Filesystem-backed storage engine.
//!
//! Layout under the base directory:
//!
//! ```text
//! <base>/versions/<key>        current version token, empty file = deleted
//! <base>/values/<key>.<ver>    value bytes for one committed version
//! ```
//!
//! Per-key mutations serialise on an exclusive advisory lock over the
//! version file, held across the whole read-decide-write sequence. The value
//! file is always written before the version file, so a reader that acquires
//! the lock after a version bump finds the new value file already in place.
//! Superseded value files are reclaimed best-effort after the bump.
//!
//! The versions directory doubles as the event surface: every commit
//! rewrites the key's version file, which the event bus observes through one
//! OS watch on the directory. A deleted key keeps its (now empty) version
//! file so waiters and re-creations stay observable through the same watched
//! name.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use super::Storage;
use super::StorageDetails;
use super::ValueDetails;
use crate::config::StorageOptions;
use crate::errors::Error;
use crate::errors::EventBusError;
use crate::errors::Result;
use crate::errors::StorageError;
use crate::event::EventBus;
use crate::event::EventBusOptions;
use crate::utils::LockedFile;
use crate::utils::UuidVersionSource;
use crate::utils::VersionSource;
use crate::version::internal_to_opaque;
use crate::version::opaque_to_internal;
use crate::version::Version;

/// A versioned key-value store persisted under one base directory.
///
/// Obtained from [`FsStorage::open`]; all behaviour is exposed through the
/// [`Storage`] trait.
pub struct FsStorage {
    dir_names: DirNames,
    event_bus: EventBus,
    version_source: Arc<dyn VersionSource>,
    closure: CancellationToken,
}

struct DirNames {
    values: PathBuf,
    versions: PathBuf,
}

/// Why a blocked `wait_for_value` resumed.
enum Wake {
    Event,
    Closure,
    Context,
}

impl FsStorage {
    /// Opens a storage rooted at `options.base_dir_name`, creating the
    /// directory layout if needed (idempotent) and starting the event bus
    /// over the versions directory.
    ///
    /// Must be called within a tokio runtime; the event-dispatch loop is
    /// spawned through `options.spawn` (default `tokio::spawn`).
    pub async fn open(mut options: StorageOptions) -> Result<Self> {
        options.sanitize();
        options.validate()?;
        let dir_names = create_dirs(&options.base_dir_name).await?;
        let event_bus = EventBus::new(EventBusOptions {
            event_dir_name: dir_names.versions.clone(),
            spawn: options.spawn.clone(),
        });
        event_bus.open().map_err(map_event_bus_error)?;
        let version_source = options
            .version_source
            .clone()
            .unwrap_or_else(|| Arc::new(UuidVersionSource));
        info!(base_dir = %options.base_dir_name.display(), "storage opened");
        Ok(Self {
            dir_names,
            event_bus,
            version_source,
            closure: CancellationToken::new(),
        })
    }

    /// Reads a key's committed state under the version-file lock.
    ///
    /// The third element is false while the observed version still equals
    /// `old_version`, which tells `wait_for_value` to keep waiting.
    fn read_value(
        &self,
        key: &str,
        old_version: &str,
    ) -> Result<(String, String, bool)> {
        if self.event_bus.is_closed() {
            return Err(Error::StorageClosed);
        }
        let (version_file, new_version) =
            match self.open_and_read_version_file(key, OpenOptions::new().read(true)) {
                Ok((version_file, version)) => (Some(version_file), version),
                Err(error) if error.kind() == ErrorKind::NotFound => (None, String::new()),
                Err(error) => {
                    return Err(StorageError::Path {
                        path: self.version_file_name(key),
                        source: error,
                    }
                    .into())
                }
            };
        if new_version == old_version {
            return Ok((String::new(), String::new(), false));
        }
        if new_version.is_empty() {
            // Deletion is a transition too: a waiter holding the old version
            // learns the key is gone.
            return Ok((String::new(), String::new(), true));
        }
        let value = match std::fs::read_to_string(self.value_file_name(key, &new_version)) {
            Ok(value) => value,
            // Stale read against a concurrent transition; callers re-read if
            // they need the settled state.
            Err(error) if error.kind() == ErrorKind::NotFound => String::new(),
            Err(error) => return Err(StorageError::Io(error).into()),
        };
        drop(version_file);
        Ok((value, new_version, true))
    }

    async fn do_wait_for_value(
        &self,
        ctx: &CancellationToken,
        key: &str,
        old_version: &str,
    ) -> Result<(String, String)> {
        loop {
            // Subscribing before the read closes the window where a commit
            // lands between the read and the wait.
            let mut watcher = self.event_bus.add_watcher(key).map_err(map_event_bus_error)?;
            let (value, new_version, done) = match self.read_value(key, old_version) {
                Ok(state) => state,
                Err(error) => {
                    let _ = self.event_bus.remove_watcher(key, &watcher);
                    return Err(error);
                }
            };
            if done {
                let _ = self.event_bus.remove_watcher(key, &watcher);
                return Ok((value, new_version));
            }
            let wake = tokio::select! {
                _ = watcher.changed() => Wake::Event,
                _ = self.closure.cancelled() => Wake::Closure,
                _ = ctx.cancelled() => Wake::Context,
            };
            match wake {
                // The fired set removed itself; loop back onto a fresh one.
                Wake::Event => {}
                // The closed bus would reject the removal; the watcher is moot.
                Wake::Closure => return Err(Error::StorageClosed),
                Wake::Context => {
                    let _ = self.event_bus.remove_watcher(key, &watcher);
                    return Err(Error::Cancelled);
                }
            }
        }
    }

    fn do_create_value(
        &self,
        key: &str,
        value: &str,
    ) -> Result<String> {
        if self.event_bus.is_closed() {
            return Err(Error::StorageClosed);
        }
        let (mut version_file, current_version) = self
            .open_and_read_version_file(
                key,
                OpenOptions::new().read(true).write(true).create(true),
            )
            .map_err(|source| StorageError::Path {
                path: self.version_file_name(key),
                source,
            })?;
        if !current_version.is_empty() {
            return Ok(String::new());
        }
        let version = self.version_source.next_version();
        self.set_value(key, value, &version, &mut version_file)?;
        Ok(version)
    }

    fn do_update_value(
        &self,
        key: &str,
        value: &str,
        old_version: &str,
    ) -> Result<String> {
        if self.event_bus.is_closed() {
            return Err(Error::StorageClosed);
        }
        let (mut version_file, current_version) =
            match self.open_and_read_version_file(key, OpenOptions::new().read(true).write(true)) {
                Ok(pair) => pair,
                Err(error) if error.kind() == ErrorKind::NotFound => return Ok(String::new()),
                Err(error) => {
                    return Err(StorageError::Path {
                        path: self.version_file_name(key),
                        source: error,
                    }
                    .into())
                }
            };
        if current_version.is_empty() {
            return Ok(String::new());
        }
        if !old_version.is_empty() && current_version != old_version {
            return Ok(String::new());
        }
        let new_version = self.version_source.next_version();
        self.set_value(key, value, &new_version, &mut version_file)?;
        self.remove_value_file(key, &current_version);
        Ok(new_version)
    }

    fn do_create_or_update_value(
        &self,
        key: &str,
        value: &str,
        old_version: &str,
    ) -> Result<String> {
        if self.event_bus.is_closed() {
            return Err(Error::StorageClosed);
        }
        let (mut version_file, current_version) = self
            .open_and_read_version_file(
                key,
                OpenOptions::new().read(true).write(true).create(true),
            )
            .map_err(|source| StorageError::Path {
                path: self.version_file_name(key),
                source,
            })?;
        if current_version.is_empty() {
            let version = self.version_source.next_version();
            self.set_value(key, value, &version, &mut version_file)?;
            return Ok(version);
        }
        if !old_version.is_empty() && current_version != old_version {
            return Ok(String::new());
        }
        let new_version = self.version_source.next_version();
        self.set_value(key, value, &new_version, &mut version_file)?;
        self.remove_value_file(key, &current_version);
        Ok(new_version)
    }

    fn do_delete_value(
        &self,
        key: &str,
        version: &str,
    ) -> Result<bool> {
        if self.event_bus.is_closed() {
            return Err(Error::StorageClosed);
        }
        let (mut version_file, current_version) =
            match self.open_and_read_version_file(key, OpenOptions::new().read(true).write(true)) {
                Ok(pair) => pair,
                Err(error) if error.kind() == ErrorKind::NotFound => return Ok(false),
                Err(error) => {
                    return Err(StorageError::Path {
                        path: self.version_file_name(key),
                        source: error,
                    }
                    .into())
                }
            };
        if current_version.is_empty() {
            return Ok(false);
        }
        if !version.is_empty() && current_version != version {
            return Ok(false);
        }
        // Plain truncation does not reliably produce a watch event on
        // Darwin; a one-byte write first forces a WRITE notification.
        #[cfg(target_os = "macos")]
        version_file
            .write_all(&[0])
            .map_err(StorageError::Io)?;
        version_file.set_len(0).map_err(StorageError::Io)?;
        self.remove_value_file(key, &current_version);
        Ok(true)
    }

    /// Opens and locks a key's version file, returning the held handle and
    /// the current version. When the version is non-empty the handle is
    /// rewound so the next write overwrites it in place (tokens are
    /// fixed-width, so no stale suffix can survive).
    fn open_and_read_version_file(
        &self,
        key: &str,
        open_options: &OpenOptions,
    ) -> std::io::Result<(LockedFile, String)> {
        let mut version_file = LockedFile::open(&self.version_file_name(key), open_options)?;
        let version = version_file.read_to_string()?;
        if !version.is_empty() {
            version_file.rewind()?;
        }
        Ok((version_file, version))
    }

    /// Writes the value file, then commits the version into the still-locked
    /// version file. The ordering is what keeps readers coherent: a version
    /// is never observable before its value file exists.
    fn set_value(
        &self,
        key: &str,
        value: &str,
        version: &str,
        version_file: &mut LockedFile,
    ) -> Result<()> {
        std::fs::write(self.value_file_name(key, version), value)
            .map_err(StorageError::Io)?;
        version_file
            .write_all(version.as_bytes())
            .map_err(StorageError::Io)?;
        Ok(())
    }

    /// Best-effort reclamation of a superseded value file.
    fn remove_value_file(
        &self,
        key: &str,
        version: &str,
    ) {
        if let Err(error) = std::fs::remove_file(self.value_file_name(key, version)) {
            if error.kind() != ErrorKind::NotFound {
                debug!(key, version, ?error, "failed to remove superseded value file");
            }
        }
    }

    fn value_file_name(
        &self,
        key: &str,
        version: &str,
    ) -> PathBuf {
        self.dir_names.values.join(format!("{key}.{version}"))
    }

    fn version_file_name(
        &self,
        key: &str,
    ) -> PathBuf {
        self.dir_names.versions.join(key)
    }
}

#[async_trait]
impl Storage for FsStorage {
    fn get_value(
        &self,
        key: &str,
    ) -> Result<(String, Option<Version>)> {
        let (value, version, _) = self.read_value(key, "")?;
        Ok((value, internal_to_opaque(version)))
    }

    async fn wait_for_value(
        &self,
        ctx: &CancellationToken,
        key: &str,
        old_version: Option<&Version>,
    ) -> Result<(String, Option<Version>)> {
        let (value, new_version) = self
            .do_wait_for_value(ctx, key, opaque_to_internal(old_version))
            .await?;
        Ok((value, internal_to_opaque(new_version)))
    }

    fn create_value(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<Version>> {
        Ok(internal_to_opaque(self.do_create_value(key, value)?))
    }

    fn update_value(
        &self,
        key: &str,
        value: &str,
        old_version: Option<&Version>,
    ) -> Result<Option<Version>> {
        let new_version = self.do_update_value(key, value, opaque_to_internal(old_version))?;
        Ok(internal_to_opaque(new_version))
    }

    fn create_or_update_value(
        &self,
        key: &str,
        value: &str,
        old_version: Option<&Version>,
    ) -> Result<Option<Version>> {
        let new_version =
            self.do_create_or_update_value(key, value, opaque_to_internal(old_version))?;
        Ok(internal_to_opaque(new_version))
    }

    fn delete_value(
        &self,
        key: &str,
        version: Option<&Version>,
    ) -> Result<bool> {
        self.do_delete_value(key, opaque_to_internal(version))
    }

    fn inspect(&self) -> Result<StorageDetails> {
        if self.event_bus.is_closed() {
            return Ok(StorageDetails {
                is_closed: true,
                ..Default::default()
            });
        }
        let entries = std::fs::read_dir(&self.dir_names.versions).map_err(|source| {
            StorageError::Path {
                path: self.dir_names.versions.clone(),
                source,
            }
        })?;
        let mut values = HashMap::new();
        for entry in entries {
            let entry = entry.map_err(StorageError::Io)?;
            let Some(key) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let (value, version, _) = self.read_value(&key, "")?;
            if version.is_empty() {
                // Tombstoned or racing with a deletion; best-effort snapshot.
                continue;
            }
            values.insert(
                key,
                ValueDetails {
                    value,
                    version: Version::new(version),
                },
            );
        }
        Ok(StorageDetails {
            values,
            is_closed: false,
        })
    }

    fn close(&self) -> Result<()> {
        self.event_bus.close().map_err(map_event_bus_error)?;
        self.closure.cancel();
        info!("storage closed");
        Ok(())
    }
}

fn map_event_bus_error(error: EventBusError) -> Error {
    match error {
        EventBusError::Closed => Error::StorageClosed,
        other => Error::EventBus(other),
    }
}

async fn create_dirs(base_dir_name: &Path) -> Result<DirNames> {
    let values = base_dir_name.join("values");
    tokio::fs::create_dir_all(&values)
        .await
        .map_err(|source| StorageError::Path {
            path: values.clone(),
            source,
        })?;
    let versions = base_dir_name.join("versions");
    tokio::fs::create_dir_all(&versions)
        .await
        .map_err(|source| StorageError::Path {
            path: versions.clone(),
            source,
        })?;
    Ok(DirNames { values, versions })
}
