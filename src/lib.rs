//! # fskv
//!
//! A versioned key-value store persisted on the local filesystem, with
//! optimistic concurrency control and a blocking wait-for-change primitive.
//!
//! ## Features
//! - **Versioned writes**: every mutation produces a fresh opaque [`Version`]
//! - **Compare-and-swap**: conditional updates and deletes succeed only while
//!   the caller's claimed prior version still matches
//! - **Wait-for-change**: [`Storage::wait_for_value`] blocks until a key's
//!   version moves past the one the caller already observed
//! - **Cross-process**: per-key advisory file locks coordinate every process
//!   that opens the same base directory
//!
//! ## Quick start
//! ```no_run
//! use fskv::{FsStorage, Storage, StorageOptions};
//!
//! #[tokio::main]
//! async fn main() -> fskv::Result<()> {
//!     let storage = FsStorage::open(StorageOptions::default()).await?;
//!
//!     let version = storage.create_value("greeting", "hello")?;
//!     assert!(version.is_some());
//!
//!     let (value, current) = storage.get_value("greeting")?;
//!     assert_eq!(value, "hello");
//!
//!     let updated = storage.update_value("greeting", "hi", current.as_ref())?;
//!     assert!(updated.is_some());
//!
//!     storage.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## On-disk layout
//! ```text
//! <base>/versions/<key>        current version token, empty file = deleted
//! <base>/values/<key>.<ver>    value bytes for one committed version
//! ```
//!
//! Change notification rides on a single OS watch over the versions
//! directory, so external writers that follow the same protocol wake local
//! waiters too.

pub mod config;
pub mod errors;
pub mod storage;

mod event;
mod version;

#[doc(hidden)]
pub mod utils;

pub use config::*;
pub use errors::*;
pub use storage::*;
pub use utils::{UuidVersionSource, VersionSource};
pub use version::Version;
