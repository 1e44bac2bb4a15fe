//! The backend capability surface (C2 / §6): the one seam between the
//! pure value model and whatever actually pulls images, runs processes,
//! and talks to registries. Mirrors the teacher's `Registry` trait -
//! `RegistryCore` and `BlobStore` composed behind one object-safe
//! `Arc<dyn Registry>` handle - generalized from transferring blobs to
//! solving and executing op-graph nodes.

use crate::error::CoreResult;
use crate::id::StreamId;
use crate::opgraph::{ExecOpSpec, RootfsNode};
use crate::platform::Platform;
use crate::value::mount::Mount;
use crate::value::registry_auth::RegistryAuth;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Where a started service can be reached from inside another container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub hostname: String,
}

/// One platform's worth of a container, ready to hand to a backend for
/// publish/export - the op-graph root plus the config fields that end
/// up in the image manifest.
#[derive(Debug, Clone)]
pub struct PlatformVariant {
    pub platform: Platform,
    pub rootfs: Arc<RootfsNode>,
    pub config: crate::value::image_config::ImageConfig,
}

/// The single collaborator trait the engine depends on. Implement this
/// once per real backend (buildkit-over-gRPC, a local OCI builder, ...)
/// and everything above it - `Engine`, `Query` - is backend-agnostic.
#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Ensures `node` and every ancestor it depends on is realized on
    /// the backend, without running anything or returning content.
    /// Idempotent: a backend is expected to cache on the node's id.
    async fn solve(&self, node: &Arc<RootfsNode>) -> CoreResult<()>;

    /// Resolves `reference` against the backend's configured registries,
    /// returning the fully-qualified, digest-pinned reference `from()`
    /// records as `imageRefOnce`.
    async fn resolve_pull(
        &self,
        reference: &str,
        platform: &Platform,
        auth: Option<&RegistryAuth>,
    ) -> CoreResult<String>;

    /// Runs the effective command described by `spec` against the
    /// already-solved rootfs at `node`, returning the captured result.
    async fn run(
        &self,
        node: &Arc<RootfsNode>,
        spec: &ExecOpSpec,
        platform: &Platform,
    ) -> CoreResult<crate::value::last_exec::LastExec>;

    /// Reads back the captured bytes of a stream handle returned in a
    /// [`crate::value::last_exec::LastExec`].
    async fn read_stream(&self, stream: StreamId) -> CoreResult<Vec<u8>>;

    /// Reads a single file out of `node`'s materialized rootfs, with
    /// `mounts` overlaid exactly as a `withExec` would see them.
    async fn read_file(
        &self,
        node: &Arc<RootfsNode>,
        mounts: &[Mount],
        path: &str,
    ) -> CoreResult<Vec<u8>>;

    /// Lists immediate entries of a directory inside `node`'s rootfs.
    async fn read_dir(
        &self,
        node: &Arc<RootfsNode>,
        mounts: &[Mount],
        path: &str,
    ) -> CoreResult<Vec<String>>;

    /// Starts a long-running container as a service, reachable by the
    /// returned endpoint from any container that binds it.
    async fn start_service(
        &self,
        alias: &str,
        node: &Arc<RootfsNode>,
        spec: &ExecOpSpec,
        platform: &Platform,
    ) -> CoreResult<ServiceEndpoint>;

    async fn stop_service(&self, endpoint: &ServiceEndpoint) -> CoreResult<()>;

    /// Assembles and pushes a (possibly multi-platform) image to
    /// `address`, returning the fully-qualified ref it was published as.
    async fn publish(
        &self,
        variants: &[PlatformVariant],
        address: &str,
        auth: Option<&RegistryAuth>,
    ) -> CoreResult<String>;

    /// Writes an OCI-layout tarball for `variants` to `dest_path`.
    async fn export_oci(&self, variants: &[PlatformVariant], dest_path: &Path) -> CoreResult<()>;
}
