//! Typed error surface for the core.
//!
//! Value-model operations only ever fail with [`CoreError::InvalidPath`]
//! or [`CoreError::InvalidId`]; every other variant is only ever
//! produced by a terminal (backend-forcing) operation, per the
//! error-handling design.

use crate::id::AnyId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid id {id}: {reason}")]
    InvalidId { id: AnyId, reason: String },

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("withExec called with an empty effective command (no entrypoint and no args)")]
    NoCommand,

    /// Raised by a `BuildBackend` implementation when it can't actually
    /// launch the requested process (missing image, runtime refused the
    /// spawn, and so on). The core itself never constructs this: a
    /// pending exec node that never reaches a backend fails earlier,
    /// with a more specific variant, or not at all.
    #[error("backend failed to start process: {0:#}")]
    ExecStartFailed(#[source] anyhow::Error),

    /// Two simultaneous mounts that can't coexist at the same path once
    /// a backend actually tries to assemble them (e.g. a cache volume
    /// requested `Locked` by one consumer while another already holds it
    /// `Shared` elsewhere). The value model's own `with_mounted_*`
    /// family never raises this: mounting over an existing path is
    /// defined as last-mount-wins replacement, not a conflict, so this
    /// variant exists purely for a `BuildBackend` to report an
    /// irreconcilable mount it discovers while solving a node.
    #[error("mount conflict at path {path:?}: {reason}")]
    MountConflict { path: PathBuf, reason: String },

    #[error("cannot read through mount at {path:?}: {reason}")]
    MountNotReadable { path: PathBuf, reason: String },

    #[error("endpoint() called with no port argument and no exposed ports")]
    NoExposedPort,

    #[error("publish failed: {0:#}")]
    PublishFailed(#[source] anyhow::Error),

    #[error("export failed: {0:#}")]
    ExportFailed(#[source] anyhow::Error),

    #[error("pull failed: {0:#}")]
    PullFailed(#[source] anyhow::Error),

    #[error("build failed: {0:#}")]
    BuildFailed(#[source] anyhow::Error),

    #[error("operation was cancelled")]
    Cancelled,
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> CoreError {
        CoreError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_id(id: impl Into<AnyId>, reason: impl Into<String>) -> CoreError {
        CoreError::InvalidId {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Validates a path a caller hands the value model for a mount point or
/// a rootfs write: non-empty, absolute, and free of any `..` component
/// that could walk it outside the rootfs it's applied to. Per spec §7
/// this is the one kind of failure a pure value-model operation (as
/// opposed to a terminal, backend-forcing one) can return synchronously.
pub fn validate_container_path(path: &str) -> CoreResult<()> {
    if path.is_empty() {
        return Err(CoreError::invalid_path(path, "path must not be empty"));
    }
    if !path.starts_with('/') {
        return Err(CoreError::invalid_path(path, "path must be absolute"));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(CoreError::invalid_path(
            path,
            "path must not contain a '..' component",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod path_tests {
    use super::*;

    #[test]
    fn rejects_empty_path() {
        assert!(validate_container_path("").is_err());
    }

    #[test]
    fn rejects_relative_path() {
        assert!(validate_container_path("etc/passwd").is_err());
    }

    #[test]
    fn rejects_dotdot_escape() {
        assert!(validate_container_path("/a/../../etc/passwd").is_err());
    }

    #[test]
    fn accepts_absolute_path() {
        assert!(validate_container_path("/a/b/c").is_ok());
        assert!(validate_container_path("/").is_ok());
    }
}
