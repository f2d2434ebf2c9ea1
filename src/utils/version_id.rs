//! Version token generation.

use std::fmt;

use uuid::Uuid;

/// Source of fresh version tokens.
///
/// Tokens must be non-empty, filename-safe, and collision-free for the
/// lifetime of the store. The source is injectable so tests can pin token
/// values.
pub trait VersionSource: Send + Sync + fmt::Debug {
    /// Produces a fresh, never-before-issued token.
    fn next_version(&self) -> String;
}

/// Default token source: UUIDv7 rendered as 32 lowercase-hex characters.
///
/// The v7 layout (millisecond timestamp followed by random bits) keeps
/// tokens lexicographically time-ordered, fixed-width, and unique across
/// processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidVersionSource;

impl VersionSource for UuidVersionSource {
    fn next_version(&self) -> String {
        Uuid::now_v7().simple().to_string()
    }
}
