//! Mount records: path-keyed overlays applied only at exec time.

use crate::id::{CacheVolumeId, DirectoryId, FileId, SecretId, SocketId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheSharingMode {
    Shared,
    Private,
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountSource {
    Directory(DirectoryId),
    File(FileId),
    Tempfs,
    Cache {
        cache_id: CacheVolumeId,
        source: Option<DirectoryId>,
        sharing: CacheSharingMode,
    },
    Secret(SecretId),
    UnixSocket(SocketId),
}

impl MountSource {
    /// Directory and file mounts overlay readable content; tempfs and
    /// secret mounts cannot be read back through `directory()`/`file()`
    /// per the path-reader contract in the value model.
    pub fn is_readable(&self) -> bool {
        matches!(
            self,
            MountSource::Directory(_) | MountSource::File(_) | MountSource::Cache { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub path: String,
    pub source: MountSource,
}

/// The mount (if any) that overlays `path`: either an exact match or the
/// longest mounted ancestor directory. Used by the path readers
/// (`directory()`/`file()`) to decide whether to read through the
/// backend's rootfs or refuse with `MountNotReadable`.
pub fn covering_mount<'a>(mounts: &'a [Mount], path: &str) -> Option<&'a Mount> {
    mounts
        .iter()
        .filter(|m| path == m.path || path.starts_with(&format!("{}/", m.path.trim_end_matches('/'))))
        .max_by_key(|m| m.path.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempfs_and_secret_are_unreadable() {
        assert!(!MountSource::Tempfs.is_readable());
        assert!(!MountSource::Secret(SecretId::of_value(&"s")).is_readable());
    }

    #[test]
    fn covering_mount_matches_exact_and_nested_paths() {
        let mounts = vec![Mount {
            path: "/t".to_string(),
            source: MountSource::Tempfs,
        }];
        assert!(covering_mount(&mounts, "/t").is_some());
        assert!(covering_mount(&mounts, "/t/f").is_some());
        assert!(covering_mount(&mounts, "/other").is_none());
    }

    #[test]
    fn covering_mount_prefers_longest_match() {
        let mounts = vec![
            Mount {
                path: "/a".to_string(),
                source: MountSource::Tempfs,
            },
            Mount {
                path: "/a/b".to_string(),
                source: MountSource::Directory(DirectoryId::of_value(&"d")),
            },
        ];
        let found = covering_mount(&mounts, "/a/b/c").unwrap();
        assert_eq!(found.path, "/a/b");
    }

    #[test]
    fn directory_and_cache_are_readable() {
        assert!(MountSource::Directory(DirectoryId::of_value(&"d")).is_readable());
        assert!(MountSource::Cache {
            cache_id: CacheVolumeId::of_value(&"c"),
            source: None,
            sharing: CacheSharingMode::Shared,
        }
        .is_readable());
    }
}
