//! The evaluation engine (C5/C7): the only place in the crate that
//! actually forces the lazy op graph a `Container` describes. Every
//! method here takes a `Container` by reference and talks to a
//! `BuildBackend` to produce either a plain value (bytes, an exit
//! code, a published ref) or - for a handful of mutating terminal
//! reads - a new `Container` carrying the result.

pub mod service_coordinator;

use crate::backend::{BuildBackend, PlatformVariant};
use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};
use crate::hash::Digest256;
use crate::id::{ContainerId, StreamId};
use crate::opgraph::RootfsOp;
use crate::platform::Platform;
use crate::value::container::Container;
use crate::value::last_exec::LastExec;
use crate::value::mount::covering_mount;
use crate::value::registry_auth::resolve_auth;
use service_coordinator::ServiceCoordinator;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Races `fut` against `cancel` being triggered, turning a mid-flight
/// cancellation into [`CoreError::Cancelled`] instead of the caller
/// waiting out a backend call nothing still wants the result of.
async fn run_cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = CoreResult<T>>) -> CoreResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CoreError::Cancelled),
        result = fut => result,
    }
}

/// Owns the backend handle, the engine-wide config, the single-flight
/// exec cache, and the service coordinator - the full set of mutable,
/// process-lifetime state the value model itself stays free of.
pub struct Engine {
    backend: Arc<dyn BuildBackend>,
    config: EngineConfig,
    exec_cache: Mutex<HashMap<Digest256, Arc<OnceCell<LastExec>>>>,
    services: ServiceCoordinator,
    /// Side-table from a Container's own id back to the value itself,
    /// the only way a bare `ContainerId` recorded in a `ServiceBinding`
    /// or an exec's `services` list can later be resolved back into
    /// something `ServiceCoordinator::bind` can start. Populated
    /// opportunistically every time this engine forces a Container.
    known: Mutex<HashMap<ContainerId, Container>>,
    /// Bounds how many backend-forcing calls this engine issues at
    /// once, the same role `pusher_app`'s `Semaphore::new(32)` plays
    /// around concurrent blob uploads.
    backend_ops: Semaphore,
}

impl Engine {
    pub fn new(backend: Arc<dyn BuildBackend>, config: EngineConfig) -> Engine {
        let backend_ops = Semaphore::new(config.max_concurrent_backend_ops);
        Engine {
            services: ServiceCoordinator::new(Arc::clone(&backend)),
            backend,
            config,
            exec_cache: Mutex::new(HashMap::new()),
            known: Mutex::new(HashMap::new()),
            backend_ops,
        }
    }

    /// Records `container` under its own id so a later service binding
    /// referencing that id can be resolved back into a live value.
    async fn remember(&self, container: &Container) {
        self.known.lock().await.insert(container.id(), container.clone());
    }

    /// Starts every service this container (or its pending exec) names,
    /// either by a persistent `withServiceBinding` alias or a one-shot
    /// `withExec(services: ...)` reference, resolving each bare id
    /// through the `known` side-table. A service whose Container was
    /// never forced through this engine can't be resolved and is
    /// silently skipped, same as an alias nobody ever bound would be.
    ///
    /// Returns the service Containers this call actually bound, so the
    /// caller can release exactly those references once its own forcing
    /// is done - each terminal evaluation is one consumer reference,
    /// held only for the lifetime of that evaluation (spec §4.5/§5).
    async fn start_bound_services(&self, container: &Container, spec_services: &[ContainerId]) -> CoreResult<Vec<Container>> {
        let mut bound = Vec::new();
        for binding in &container.services {
            let resolved = self.known.lock().await.get(&binding.container_id).cloned();
            if let Some(service) = resolved {
                self.services.bind(&binding.alias, &service).await?;
                bound.push(service);
            }
        }
        for service_id in spec_services {
            let resolved = self.known.lock().await.get(service_id).cloned();
            if let Some(service) = resolved {
                self.services.bind(&service_id.to_string(), &service).await?;
                bound.push(service);
            }
        }
        Ok(bound)
    }

    /// Releases every reference `start_bound_services` acquired for one
    /// terminal evaluation, regardless of whether that evaluation
    /// succeeded, failed, or was cancelled - otherwise a service's
    /// refcount only ever grows and it is never torn down.
    async fn release_bound_services(&self, bound: &[Container]) {
        for service in bound {
            if let Err(err) = self.services.unbind(service).await {
                tracing::warn!(error = %err, container = %service.id(), "failed to release service reference");
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn solve_ancestors(&self, container: &Container) -> CoreResult<()> {
        for ancestor in container.rootfs.ancestors_root_first() {
            let _permit = self.backend_ops.acquire().await.expect("semaphore never closes");
            self.backend.solve(&ancestor).await?;
        }
        Ok(())
    }

    /// `from(address)`: resolves `address` to a digest-pinned reference
    /// via the backend (consulting `container`'s registryAuths by
    /// longest-prefix match), appends a Pull node, and records the
    /// resolved reference as `imageRefOnce`.
    pub async fn from(
        &self,
        container: Container,
        address: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<Container> {
        let auth = resolve_auth(&container.registry_auths, address).cloned();
        let platform = container.platform.clone();
        run_cancellable(cancel, async {
            let _permit = self.backend_ops.acquire().await.expect("semaphore never closes");
            let resolved = self
                .backend
                .resolve_pull(address, &platform, auth.as_ref())
                .await?;
            info!(address, resolved = %resolved, "pulled image reference");
            let pulled = container.push_pull(resolved, platform);
            self.remember(&pulled).await;
            Ok(pulled)
        })
        .await
    }

    /// Forces the exec node currently at the tip of `container`'s
    /// rootfs chain, de-duplicating concurrent callers for the exact
    /// same pending Container via a single-flight cache keyed on its id.
    ///
    /// A Container whose rootfs tip isn't a pending exec has never
    /// executed, so per spec §4.4 this returns `Ok(None)` rather than an
    /// error - `exitCode`/`stdout`/`stderr` on such a Container are
    /// documented as returning null, not failing.
    pub async fn force_exec(&self, container: &Container, cancel: &CancellationToken) -> CoreResult<Option<LastExec>> {
        let spec = match &container.rootfs.op {
            RootfsOp::Exec { spec } => spec.clone(),
            _ => return Ok(None),
        };

        self.remember(container).await;
        let bound_services = self.start_bound_services(container, &spec.services).await?;

        let key = container.pending_exec_key();
        let cell = {
            let mut cache = self.exec_cache.lock().await;
            Arc::clone(
                cache
                    .entry(key)
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let node = Arc::clone(&container.rootfs);
        let platform = container.platform.clone();
        let backend = Arc::clone(&self.backend);
        let result = run_cancellable(cancel, async {
            let _permit = self.backend_ops.acquire().await.expect("semaphore never closes");
            let result = cell
                .get_or_try_init(|| async move {
                    for ancestor in node.ancestors_root_first() {
                        backend.solve(&ancestor).await?;
                    }
                    debug!(cmd = ?spec.cmd, "running exec node");
                    backend.run(&node, &spec, &platform).await
                })
                .await?;
            Ok(result.clone())
        })
        .await;

        // Every consumer reference this call acquired is scoped to this
        // one terminal evaluation - release it here regardless of
        // whether the exec itself succeeded.
        self.release_bound_services(&bound_services).await;

        result.map(Some)
    }

    pub async fn exit_code(&self, container: &Container, cancel: &CancellationToken) -> CoreResult<Option<i32>> {
        Ok(self.force_exec(container, cancel).await?.map(|e| e.exit_code))
    }

    pub async fn stdout(&self, container: &Container, cancel: &CancellationToken) -> CoreResult<Option<Vec<u8>>> {
        match self.force_exec(container, cancel).await? {
            Some(last_exec) => Ok(Some(self.read_stream(last_exec.stdout).await?)),
            None => Ok(None),
        }
    }

    pub async fn stderr(&self, container: &Container, cancel: &CancellationToken) -> CoreResult<Option<Vec<u8>>> {
        match self.force_exec(container, cancel).await? {
            Some(last_exec) => Ok(Some(self.read_stream(last_exec.stderr).await?)),
            None => Ok(None),
        }
    }

    async fn read_stream(&self, stream: StreamId) -> CoreResult<Vec<u8>> {
        self.backend.read_stream(stream).await
    }

    /// `directory(path)`/`file(path)`: forces evaluation of `container`'s
    /// rootfs (with mounts overlaid) and reads back content at `path`.
    /// Reading through a tempfs/secret mount (or one nested under one)
    /// fails with `MountNotReadable` before the backend is ever asked.
    pub async fn read_file(
        &self,
        container: &Container,
        path: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<Vec<u8>> {
        crate::error::validate_container_path(path)?;
        self.check_mount_readable(container, path)?;
        self.remember(container).await;
        run_cancellable(cancel, async {
            self.solve_ancestors(container).await?;
            self.backend
                .read_file(&container.rootfs, &container.mounts, path)
                .await
        })
        .await
    }

    pub async fn read_dir(
        &self,
        container: &Container,
        path: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<Vec<String>> {
        crate::error::validate_container_path(path)?;
        self.check_mount_readable(container, path)?;
        self.remember(container).await;
        run_cancellable(cancel, async {
            self.solve_ancestors(container).await?;
            self.backend
                .read_dir(&container.rootfs, &container.mounts, path)
                .await
        })
        .await
    }

    fn check_mount_readable(&self, container: &Container, path: &str) -> CoreResult<()> {
        if let Some(mount) = covering_mount(&container.mounts, path) {
            if !mount.source.is_readable() {
                return Err(CoreError::MountNotReadable {
                    path: path.into(),
                    reason: format!("path is under an unreadable mount at {}", mount.path),
                });
            }
        }
        Ok(())
    }

    /// Binds `container` as a service reachable under `alias`, starting
    /// it on first reference and reusing the running instance for
    /// every later consumer that binds the same Container value.
    pub async fn bind_service(&self, alias: &str, container: &Container) -> CoreResult<String> {
        self.remember(container).await;
        let endpoint = self.services.bind(alias, container).await?;
        Ok(endpoint.hostname)
    }

    pub async fn unbind_service(&self, container: &Container) -> CoreResult<()> {
        self.services.unbind(container).await
    }

    /// `hostname`: the container's assigned alias-resolvable name,
    /// stable for a given ContainerID within this process. Starts the
    /// container as a service (keyed on its own id) if it isn't bound
    /// under any alias yet.
    pub async fn hostname(&self, container: &Container) -> CoreResult<String> {
        let alias = container.id().to_string();
        self.bind_service(&alias, container).await
    }

    /// `endpoint(port)`: resolves the reachable hostname:port for a
    /// service container, starting it if it isn't already running.
    /// Falls back to the container's sole exposed port when `port` is
    /// omitted, and fails with `NoExposedPort` when none exists.
    pub async fn endpoint(&self, container: &Container, port: Option<u16>) -> CoreResult<String> {
        let port = match port {
            Some(p) => p,
            None => container
                .config
                .exposed_ports
                .first()
                .map(|p| p.port)
                .ok_or(CoreError::NoExposedPort)?,
        };
        let hostname = self.hostname(container).await?;
        Ok(format!("{}:{}", hostname, port))
    }

    fn to_variant(container: &Container) -> PlatformVariant {
        PlatformVariant {
            platform: container.platform.clone(),
            rootfs: Arc::clone(&container.rootfs),
            config: container.config.clone(),
        }
    }

    /// `publish(address)`: assembles `container` plus every entry in
    /// `platform_variants` into one multi-platform image and pushes it,
    /// resolving credentials from `container`'s registryAuths.
    pub async fn publish(
        &self,
        container: &Container,
        address: &str,
        platform_variants: &[Container],
        cancel: &CancellationToken,
    ) -> CoreResult<String> {
        self.remember(container).await;
        for variant in platform_variants {
            self.remember(variant).await;
        }
        run_cancellable(cancel, async {
            self.solve_ancestors(container).await?;
            for variant in platform_variants {
                self.solve_ancestors(variant).await?;
            }
            let mut variants = vec![Self::to_variant(container)];
            variants.extend(platform_variants.iter().map(Self::to_variant));
            let auth = resolve_auth(&container.registry_auths, address).cloned();
            self.backend.publish(&variants, address, auth.as_ref()).await
        })
        .await
    }

    /// `export(path)`: writes an OCI-layout tarball for `container` (and
    /// any additional platform variants) to the local filesystem.
    pub async fn export(
        &self,
        container: &Container,
        dest_path: &Path,
        platform_variants: &[Container],
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        run_cancellable(cancel, async {
            self.solve_ancestors(container).await?;
            for variant in platform_variants {
                self.solve_ancestors(variant).await?;
            }
            let mut variants = vec![Self::to_variant(container)];
            variants.extend(platform_variants.iter().map(Self::to_variant));
            self.backend.export_oci(&variants, dest_path).await
        })
        .await
    }
}

/// `Query.container()`: the crate's single entrypoint for constructing
/// a fresh scratch Container bound to this engine's default platform.
pub struct Query {
    pub engine: Arc<Engine>,
}

impl Query {
    pub fn new(engine: Arc<Engine>) -> Query {
        Query { engine }
    }

    pub fn container(&self) -> Container {
        self.container_for_platform(self.engine.config().default_platform.clone())
    }

    pub fn container_for_platform(&self, platform: Platform) -> Container {
        Container::scratch(platform)
    }
}
