//! Storage capability and its filesystem implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::version::Version;

mod fs_storage;

pub use fs_storage::FsStorage;


/// A versioned key-value store.
///
/// Every mutation produces a fresh opaque [`Version`]; conditional mutations
/// succeed only while the caller's claimed prior version still matches.
/// Version conflicts and key absence are reported through the return values
/// (`None` / `false`), never as errors.
///
/// `wait_for_value` is the only suspending operation; every other operation
/// is synchronous with respect to its caller.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Returns the current value and version, `("", None)` when the key is
    /// absent or deleted.
    fn get_value(
        &self,
        key: &str,
    ) -> Result<(String, Option<Version>)>;

    /// Blocks until the key's version moves past `old_version`, then returns
    /// the new state. Deletion counts as a move and yields `("", None)`.
    ///
    /// Returns [`crate::Error::StorageClosed`] when the storage shuts down
    /// and [`crate::Error::Cancelled`] when `ctx` fires.
    async fn wait_for_value(
        &self,
        ctx: &CancellationToken,
        key: &str,
        old_version: Option<&Version>,
    ) -> Result<(String, Option<Version>)>;

    /// Creates the key. Returns `None` when it already has a current
    /// version.
    fn create_value(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<Version>>;

    /// Replaces the value if `old_version` still matches (`None` means
    /// unconditional). Returns `None` when the key is absent or on version
    /// conflict.
    fn update_value(
        &self,
        key: &str,
        value: &str,
        old_version: Option<&Version>,
    ) -> Result<Option<Version>>;

    /// Creates the key, or updates it under the same conditions as
    /// [`Storage::update_value`]. Returns `None` only on version conflict.
    fn create_or_update_value(
        &self,
        key: &str,
        value: &str,
        old_version: Option<&Version>,
    ) -> Result<Option<Version>>;

    /// Deletes the key if `version` still matches (`None` means
    /// unconditional). Returns false when the key is absent or on version
    /// conflict.
    fn delete_value(
        &self,
        key: &str,
        version: Option<&Version>,
    ) -> Result<bool>;

    /// Best-effort snapshot of the store's contents.
    fn inspect(&self) -> Result<StorageDetails>;

    /// Shuts the store down, waking every blocked `wait_for_value` with
    /// [`crate::Error::StorageClosed`]. Later calls return the same error.
    fn close(&self) -> Result<()>;
}

/// Point-in-time view of a storage, as reported by [`Storage::inspect`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageDetails {
    pub values: HashMap<String, ValueDetails>,
    pub is_closed: bool,
}

/// One key's entry in [`StorageDetails`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueDetails {
    pub value: String,
    pub version: Version,
}
