pub mod locked_file;
pub mod version_id;

pub use locked_file::LockedFile;
pub use version_id::UuidVersionSource;
pub use version_id::VersionSource;

#[cfg(test)]
mod version_id_test;
