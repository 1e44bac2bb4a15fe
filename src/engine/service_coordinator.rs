//! Service coordination (C6): reference-counted lazy start/stop of
//! containers bound as services, so N containers sharing one service
//! binding only pay for a single running instance.

use crate::backend::{BuildBackend, ServiceEndpoint};
use crate::error::CoreResult;
use crate::id::ContainerId;
use crate::opgraph::{ExecOpSpec, RootfsOp};
use crate::value::container::Container;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

struct RunningService {
    endpoint: ServiceEndpoint,
    refcount: AtomicUsize,
}

/// Tracks every service container currently bound by at least one
/// consumer, keyed by the service container's own content-addressed id
/// so two bindings of the same Container value always share one start.
pub struct ServiceCoordinator {
    backend: Arc<dyn BuildBackend>,
    running: Mutex<HashMap<ContainerId, Arc<RunningService>>>,
}

impl ServiceCoordinator {
    pub fn new(backend: Arc<dyn BuildBackend>) -> ServiceCoordinator {
        ServiceCoordinator {
            backend,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// The effective command a service container runs, assembled the
    /// same way `withExec` assembles one: entrypoint followed by
    /// defaultArgs when no standalone exec node is already pending.
    fn service_spec(container: &Container) -> ExecOpSpec {
        if let RootfsOp::Exec { spec } = &container.rootfs.op {
            return spec.clone();
        }
        let mut cmd = container.config.entrypoint.clone().unwrap_or_default();
        if let Some(default_args) = &container.config.default_args {
            cmd.extend(default_args.clone());
        }
        ExecOpSpec {
            cmd,
            env: container.config.env.clone(),
            secret_env: container.config.secret_envs.clone(),
            mounts: container.mounts.clone(),
            workdir: container.config.workdir.clone(),
            user: container.config.user.clone(),
            services: Vec::new(),
            privileged: false,
            stdin: None,
            redirect_stdout: None,
            redirect_stderr: None,
        }
    }

    /// Starts `container` under `alias` if it isn't already running,
    /// otherwise bumps its refcount and reuses the existing endpoint.
    pub async fn bind(&self, alias: &str, container: &Container) -> CoreResult<ServiceEndpoint> {
        let id = container.id();
        let mut running = self.running.lock().await;
        if let Some(existing) = running.get(&id) {
            existing.refcount.fetch_add(1, Ordering::SeqCst);
            return Ok(existing.endpoint.clone());
        }

        for ancestor in container.rootfs.ancestors_root_first() {
            self.backend.solve(&ancestor).await?;
        }
        let spec = Self::service_spec(container);
        debug!(alias, container = %id, "starting service");
        let endpoint = self
            .backend
            .start_service(alias, &container.rootfs, &spec, &container.platform)
            .await?;
        running.insert(
            id,
            Arc::new(RunningService {
                endpoint: endpoint.clone(),
                refcount: AtomicUsize::new(1),
            }),
        );
        Ok(endpoint)
    }

    /// Drops one reference to `container`'s service binding, stopping
    /// it via the backend once the last consumer releases it.
    pub async fn unbind(&self, container: &Container) -> CoreResult<()> {
        let id = container.id();
        let mut running = self.running.lock().await;
        let Some(entry) = running.get(&id).cloned() else {
            return Ok(());
        };
        if entry.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
            running.remove(&id);
            drop(running);
            debug!(container = %id, "stopping service, last reference released");
            self.backend.stop_service(&entry.endpoint).await?;
        }
        Ok(())
    }
}
