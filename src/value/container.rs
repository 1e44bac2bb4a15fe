//! `Container` (C3): the central immutable record. Every derivation
//! method consumes `self` by value and returns a new `Container` -
//! structural sharing through `Arc<RootfsNode>` keeps this cheap even
//! for long derivation chains, the same way the teacher's `ConfigDelta`
//! values are threaded through a build without ever being mutated in
//! place.

use crate::error::{CoreError, CoreResult};
use crate::hash::Digest256;
use crate::id::{CacheVolumeId, ContainerId, DirectoryId, FileId, SecretId, SocketId};
use crate::opgraph::{ExecOpSpec, RootfsNode, RootfsOp, Write, WriteKind};
use crate::platform::Platform;
use crate::value::image_config::ImageConfig;
use crate::value::last_exec::LastExec;
use crate::value::mount::{CacheSharingMode, Mount, MountSource};
use crate::value::ordered_map::OrderedMap;
use crate::value::pipeline::PipelineLabel;
use crate::value::port::NetworkProtocol;
use crate::value::registry_auth::RegistryAuth;
use crate::value::service::ServiceBinding;
use serde::Serialize;
use std::sync::Arc;

/// Options accepted by `withExec`, mirroring the spec's optional-field
/// bag rather than a long positional argument list.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub services: Vec<ContainerId>,
    pub privileged: bool,
    pub stdin: Option<String>,
    pub redirect_stdout: Option<String>,
    pub redirect_stderr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub platform: Platform,
    pub rootfs: Arc<RootfsNode>,
    pub config: ImageConfig,
    pub mounts: Vec<Mount>,
    pub services: Vec<ServiceBinding>,
    pub registry_auths: OrderedMap<String, RegistryAuth>,
    pub last_exec: Option<LastExec>,
    pub image_ref_once: Option<String>,
    pub pipeline: Option<PipelineLabel>,
}

/// Flat, serializable projection of a Container used only to compute its
/// content-addressed id - the live value keeps the rich `Arc<RootfsNode>`
/// handle in process instead of round-tripping through this shape.
#[derive(Serialize)]
struct ContainerEncoding<'a> {
    platform: &'a Platform,
    rootfs: DirectoryId,
    config: &'a ImageConfig,
    mounts: &'a [Mount],
    services: &'a [ServiceBinding],
    registry_auths: &'a OrderedMap<String, RegistryAuth>,
    last_exec: &'a Option<LastExec>,
    image_ref_once: &'a Option<String>,
    pipeline: &'a Option<PipelineLabel>,
}

impl Container {
    /// The scratch container: empty rootfs, default platform, empty
    /// everything else. A null `ContainerID` resolves to this value.
    pub fn scratch(platform: Platform) -> Container {
        Container {
            rootfs: RootfsNode::scratch(platform.clone()),
            platform,
            config: ImageConfig::default(),
            mounts: Vec::new(),
            services: Vec::new(),
            registry_auths: OrderedMap::new(),
            last_exec: None,
            image_ref_once: None,
            pipeline: None,
        }
    }

    /// The content-addressed id of this exact record. Equal Containers
    /// always yield equal ids; there is no other way to construct one.
    pub fn id(&self) -> ContainerId {
        ContainerId::of_value(&ContainerEncoding {
            platform: &self.platform,
            rootfs: self.rootfs.id,
            config: &self.config,
            mounts: &self.mounts,
            services: &self.services,
            registry_auths: &self.registry_auths,
            last_exec: &self.last_exec,
            image_ref_once: &self.image_ref_once,
            pipeline: &self.pipeline,
        })
    }

    pub(crate) fn push_rootfs(mut self, op: RootfsOp) -> Container {
        self.rootfs = RootfsNode::push(&self.rootfs, op);
        self.last_exec = None;
        self.image_ref_once = None;
        self
    }

    /// `imageRefOnce` is only ever present on the value handed back
    /// directly from `from()`; every other derivation clears it.
    fn clear_image_ref_once(mut self) -> Container {
        self.image_ref_once = None;
        self
    }

    /// Appends a resolved `Pull` node and records the digest-pinned
    /// reference as `imageRefOnce`. Used by the engine's `from()`, which
    /// needs the backend to resolve the reference before the node (and
    /// therefore the rootfs id) can be built.
    pub(crate) fn push_pull(self, resolved_reference: String, platform: Platform) -> Container {
        let mut container = self.push_rootfs(RootfsOp::Pull {
            reference: resolved_reference.clone(),
            platform,
        });
        container.image_ref_once = Some(resolved_reference);
        container
    }

    // -- pure config derivations: never touch rootfs or lastExec --

    pub fn with_user(mut self, user: impl Into<String>) -> Container {
        self.config.user = Some(user.into());
        self.clear_image_ref_once()
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Container {
        self.config.workdir = Some(workdir.into());
        self.clear_image_ref_once()
    }

    pub fn with_env_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Container {
        self.config = self.config.with_env_variable(name, value);
        self.clear_image_ref_once()
    }

    pub fn with_secret_variable(mut self, name: impl Into<String>, secret: SecretId) -> Container {
        self.config = self.config.with_secret_variable(name, secret);
        self.clear_image_ref_once()
    }

    pub fn without_env_variable(mut self, name: &str) -> Container {
        self.config = self.config.without_env_variable(name);
        self.clear_image_ref_once()
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Container {
        self.config = self.config.with_label(name, value);
        self.clear_image_ref_once()
    }

    pub fn without_label(mut self, name: &str) -> Container {
        self.config = self.config.without_label(name);
        self.clear_image_ref_once()
    }

    pub fn with_entrypoint(mut self, args: Vec<String>) -> Container {
        self.config.entrypoint = Some(args);
        self.clear_image_ref_once()
    }

    pub fn with_default_args(mut self, args: Vec<String>) -> Container {
        self.config.default_args = Some(args);
        self.clear_image_ref_once()
    }

    pub fn with_exposed_port(
        mut self,
        port: u16,
        protocol: NetworkProtocol,
        description: Option<String>,
    ) -> Container {
        self.config = self.config.with_exposed_port(port, protocol, description);
        self.clear_image_ref_once()
    }

    pub fn without_exposed_port(mut self, port: u16, protocol: NetworkProtocol) -> Container {
        self.config = self.config.without_exposed_port(port, protocol);
        self.clear_image_ref_once()
    }

    pub fn with_registry_auth(
        mut self,
        address: impl Into<String>,
        username: impl Into<String>,
        secret_id: SecretId,
    ) -> Container {
        self.registry_auths.insert(
            address.into(),
            RegistryAuth {
                username: username.into(),
                secret_id,
            },
        );
        self.clear_image_ref_once()
    }

    pub fn without_registry_auth(mut self, address: &str) -> Container {
        self.registry_auths.remove(&address.to_string());
        self.clear_image_ref_once()
    }

    pub fn pipeline(mut self, name: impl Into<String>, description: Option<String>) -> Container {
        self.pipeline = Some(PipelineLabel {
            name: name.into(),
            description,
        });
        self.clear_image_ref_once()
    }

    pub fn with_service_binding(mut self, alias: impl Into<String>, container_id: ContainerId) -> Container {
        let alias = alias.into();
        self.services.retain(|s| s.alias != alias);
        self.services.push(ServiceBinding { alias, container_id });
        self.clear_image_ref_once()
    }

    // -- mounts: path-keyed, replace-on-same-path, never touch rootfs --

    fn with_mount(mut self, path: impl Into<String>, source: MountSource) -> CoreResult<Container> {
        let path = path.into();
        crate::error::validate_container_path(&path)?;
        self.mounts.retain(|m| m.path != path);
        self.mounts.push(Mount { path, source });
        Ok(self.clear_image_ref_once())
    }

    pub fn with_mounted_directory(self, path: impl Into<String>, source: DirectoryId) -> CoreResult<Container> {
        self.with_mount(path, MountSource::Directory(source))
    }

    pub fn with_mounted_file(self, path: impl Into<String>, source: FileId) -> CoreResult<Container> {
        self.with_mount(path, MountSource::File(source))
    }

    pub fn with_mounted_temp(self, path: impl Into<String>) -> CoreResult<Container> {
        self.with_mount(path, MountSource::Tempfs)
    }

    pub fn with_mounted_cache(
        self,
        path: impl Into<String>,
        cache_id: CacheVolumeId,
        source: Option<DirectoryId>,
        sharing: CacheSharingMode,
    ) -> CoreResult<Container> {
        self.with_mount(
            path,
            MountSource::Cache {
                cache_id,
                source,
                sharing,
            },
        )
    }

    pub fn with_mounted_secret(self, path: impl Into<String>, secret: SecretId) -> CoreResult<Container> {
        self.with_mount(path, MountSource::Secret(secret))
    }

    pub fn with_mounted_unix_socket(self, path: impl Into<String>, socket: SocketId) -> CoreResult<Container> {
        self.with_mount(path, MountSource::UnixSocket(socket))
    }

    pub fn without_mount(mut self, path: &str) -> CoreResult<Container> {
        crate::error::validate_container_path(path)?;
        self.mounts.retain(|m| m.path != path);
        Ok(self.clear_image_ref_once())
    }

    /// The sorted list of currently active mount paths.
    pub fn mounts(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.mounts.iter().map(|m| m.path.clone()).collect();
        paths.sort();
        paths
    }

    // -- rootfs replacement and content writes --

    /// Installs `dir` as a new rootfs. Mounts and config are preserved;
    /// only the derivation history rooted at rootfs is replaced.
    pub fn with_rootfs(mut self, dir: DirectoryId) -> Container {
        self.rootfs = RootfsNode::from_directory(dir, self.platform.clone());
        self.last_exec = None;
        self.clear_image_ref_once()
    }

    pub fn with_fs(self, dir: DirectoryId) -> Container {
        self.with_rootfs(dir)
    }

    /// The current rootfs handle, with no mounts overlaid - mounts only
    /// apply at exec/read time, they never become part of the chain a
    /// `rootfs()`/`fs()` accessor hands back.
    pub fn rootfs(&self) -> DirectoryId {
        self.rootfs.id
    }

    pub fn fs(&self) -> DirectoryId {
        self.rootfs()
    }

    pub fn with_new_file(
        self,
        path: impl Into<String>,
        contents: Vec<u8>,
        permissions: Option<u32>,
    ) -> CoreResult<Container> {
        let dst_path = path.into();
        crate::error::validate_container_path(&dst_path)?;
        let write = Write {
            dst_path,
            permissions: permissions.unwrap_or(0o644),
            kind: WriteKind::Mkfile { contents },
        };
        Ok(self.push_rootfs(RootfsOp::Overlay { writes: vec![write] }))
    }

    pub fn with_file(
        self,
        path: impl Into<String>,
        source: FileId,
        permissions: Option<u32>,
    ) -> CoreResult<Container> {
        let dst_path = path.into();
        crate::error::validate_container_path(&dst_path)?;
        let write = Write {
            dst_path,
            permissions: permissions.unwrap_or(0o644),
            kind: WriteKind::CopyFile {
                source,
                src_path: String::new(),
            },
        };
        Ok(self.push_rootfs(RootfsOp::Overlay { writes: vec![write] }))
    }

    pub fn with_directory(
        self,
        path: impl Into<String>,
        source: DirectoryId,
        include: Vec<String>,
        exclude: Vec<String>,
    ) -> CoreResult<Container> {
        let dst_path = path.into();
        crate::error::validate_container_path(&dst_path)?;
        let write = Write {
            dst_path,
            permissions: 0o755,
            kind: WriteKind::CopyDir {
                source,
                src_path: "/".to_string(),
                include,
                exclude,
            },
        };
        Ok(self.push_rootfs(RootfsOp::Overlay { writes: vec![write] }))
    }

    pub fn with_new_directory(self, path: impl Into<String>, permissions: Option<u32>) -> CoreResult<Container> {
        let dst_path = path.into();
        crate::error::validate_container_path(&dst_path)?;
        let write = Write {
            dst_path,
            permissions: permissions.unwrap_or(0o755),
            kind: WriteKind::Mkdir,
        };
        Ok(self.push_rootfs(RootfsOp::Overlay { writes: vec![write] }))
    }

    /// `dockerfile` defaults to `./Dockerfile` relative to `context` when
    /// omitted; an absent `target` means the final stage.
    pub fn build(
        self,
        context: DirectoryId,
        dockerfile: Option<String>,
        build_args: OrderedMap<String, String>,
        target: Option<String>,
    ) -> Container {
        let platform = self.platform.clone();
        let dockerfile = dockerfile.unwrap_or_else(|| "./Dockerfile".to_string());
        self.push_rootfs(RootfsOp::DockerfileBuild {
            context,
            dockerfile,
            build_args,
            target,
            platform,
        })
    }

    /// Appends an exec node to the rootfs chain. Pure and lazy: nothing
    /// actually runs until a terminal accessor (`exitCode`/`stdout`/
    /// `stderr`) forces the engine to solve and run this node. The
    /// effective command is `entrypoint ++ args`; `args` itself must
    /// supply a command unless the entrypoint alone already does, so
    /// `with_exec(vec![], ..)` on a container with no entrypoint is
    /// `NoCommand` even if `defaultArgs` is set - that fallback belongs
    /// to [`Container::exec`], not here.
    pub fn with_exec(self, args: Vec<String>, opts: ExecOptions) -> CoreResult<Container> {
        let mut cmd = self.config.entrypoint.clone().unwrap_or_default();
        cmd.extend(args);
        if cmd.is_empty() {
            return Err(CoreError::NoCommand);
        }

        let spec = ExecOpSpec {
            cmd,
            env: self.config.env.clone(),
            secret_env: self.config.secret_envs.clone(),
            mounts: self.mounts.clone(),
            workdir: self.config.workdir.clone(),
            user: self.config.user.clone(),
            services: opts.services,
            privileged: opts.privileged,
            stdin: opts.stdin,
            redirect_stdout: opts.redirect_stdout,
            redirect_stderr: opts.redirect_stderr,
        };
        Ok(self.push_rootfs(RootfsOp::Exec { spec }))
    }

    /// The deprecated `exec` alias: when `args` is omitted entirely it
    /// falls back to `defaultArgs` before forwarding to [`Self::with_exec`].
    /// New implementations are expected to forward `exec` to `withExec`
    /// rather than grow their own copy of this fallback.
    pub fn exec(self, args: Option<Vec<String>>, opts: ExecOptions) -> CoreResult<Container> {
        let args = match args {
            Some(args) => args,
            None => self.config.default_args.clone().unwrap_or_default(),
        };
        self.with_exec(args, opts)
    }

    /// Materializes a terminal exec result onto this container, used by
    /// the engine after it has actually run the backend process. Kept
    /// here so the "every mutation returns a new Container" invariant
    /// holds even for this cache-populating step.
    pub fn with_last_exec(mut self, last_exec: LastExec) -> Container {
        self.last_exec = Some(last_exec);
        self
    }

    /// Digest used as the single-flight key for a pending exec: the
    /// identity of the Container right before the backend is asked to
    /// run it, independent of whatever result eventually comes back.
    pub fn pending_exec_key(&self) -> Digest256 {
        Digest256::of_value(&self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> Container {
        Container::scratch(Platform::default_platform())
    }

    #[test]
    fn equal_derivation_chains_yield_equal_ids() {
        let a = scratch().with_user("root").with_env_variable("X", "1");
        let b = scratch().with_user("root").with_env_variable("X", "1");
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn config_change_does_not_advance_rootfs() {
        let base = scratch();
        let derived = base.clone().with_user("root").with_workdir("/app");
        assert_eq!(base.rootfs.id, derived.rootfs.id);
    }

    #[test]
    fn with_new_file_advances_rootfs_and_clears_last_exec() {
        let base = scratch();
        let with_exec = base
            .clone()
            .with_exec(vec!["true".to_string()], ExecOptions::default())
            .unwrap()
            .with_last_exec(LastExec {
                exit_code: 0,
                stdout: crate::id::StreamId::of_value(&""),
                stderr: crate::id::StreamId::of_value(&""),
            });
        assert!(with_exec.last_exec.is_some());

        let written = with_exec.with_new_file("/x", b"hi".to_vec(), None).unwrap();
        assert_ne!(written.rootfs.id, base.rootfs.id);
        assert!(written.last_exec.is_none());
    }

    #[test]
    fn with_exec_with_no_entrypoint_and_no_args_is_no_command() {
        let result = scratch().with_exec(Vec::new(), ExecOptions::default());
        assert!(matches!(result, Err(CoreError::NoCommand)));
    }

    #[test]
    fn with_exec_does_not_fall_back_to_default_args() {
        let result = scratch()
            .with_entrypoint(vec!["/bin/sh".to_string()])
            .with_default_args(vec!["-c".to_string(), "echo hi".to_string()])
            .with_exec(Vec::new(), ExecOptions::default())
            .unwrap();
        match &result.rootfs.op {
            RootfsOp::Exec { spec } => {
                assert_eq!(spec.cmd, vec!["/bin/sh"]);
            }
            other => panic!("expected exec node, got {:?}", other),
        }
    }

    #[test]
    fn exec_falls_back_to_default_args_when_args_omitted() {
        let container = scratch()
            .with_entrypoint(vec!["/bin/sh".to_string()])
            .with_default_args(vec!["-c".to_string(), "echo hi".to_string()])
            .exec(None, ExecOptions::default())
            .unwrap();
        match &container.rootfs.op {
            RootfsOp::Exec { spec } => {
                assert_eq!(spec.cmd, vec!["/bin/sh", "-c", "echo hi"]);
            }
            other => panic!("expected exec node, got {:?}", other),
        }
    }

    #[test]
    fn exec_with_explicit_args_ignores_default_args() {
        let container = scratch()
            .with_entrypoint(vec!["/bin/sh".to_string()])
            .with_default_args(vec!["-c".to_string(), "echo hi".to_string()])
            .exec(Some(vec!["-c".to_string(), "echo bye".to_string()]), ExecOptions::default())
            .unwrap();
        match &container.rootfs.op {
            RootfsOp::Exec { spec } => {
                assert_eq!(spec.cmd, vec!["/bin/sh", "-c", "echo bye"]);
            }
            other => panic!("expected exec node, got {:?}", other),
        }
    }

    #[test]
    fn mounting_same_path_twice_replaces_not_duplicates() {
        let container = scratch()
            .with_mounted_temp("/cache")
            .unwrap()
            .with_mounted_directory("/cache", DirectoryId::of_value(&"d"))
            .unwrap();
        assert_eq!(container.mounts().len(), 1);
    }

    #[test]
    fn with_rootfs_preserves_mounts_but_clears_last_exec() {
        let container = scratch()
            .with_mounted_temp("/tmp")
            .unwrap()
            .with_exec(vec!["true".to_string()], ExecOptions::default())
            .unwrap()
            .with_last_exec(LastExec {
                exit_code: 0,
                stdout: crate::id::StreamId::of_value(&""),
                stderr: crate::id::StreamId::of_value(&""),
            });
        let replaced = container.with_rootfs(DirectoryId::of_value(&"external"));
        assert_eq!(replaced.mounts().len(), 1);
        assert!(replaced.last_exec.is_none());
    }

    #[test]
    fn without_registry_auth_removes_entry() {
        let container = scratch()
            .with_registry_auth("example.com", "user", SecretId::of_value(&"s"))
            .without_registry_auth("example.com");
        assert!(container.registry_auths.is_empty());
    }

    #[test]
    fn image_ref_once_is_cleared_by_any_subsequent_derivation() {
        let mut pulled = scratch();
        pulled.image_ref_once = Some("alpine:3.18@sha256:deadbeef".to_string());
        assert!(pulled.clone().with_user("root").image_ref_once.is_none());
        assert!(pulled.clone().with_env_variable("A", "1").image_ref_once.is_none());
        assert!(pulled.clone().with_mounted_temp("/t").unwrap().image_ref_once.is_none());
        assert!(pulled
            .clone()
            .with_new_file("/x", b"hi".to_vec(), None)
            .unwrap()
            .image_ref_once
            .is_none());
        assert!(pulled.image_ref_once.is_some());
    }

    #[test]
    fn build_defaults_dockerfile_to_dot_slash_dockerfile() {
        let container = scratch().build(DirectoryId::of_value(&"ctx"), None, OrderedMap::new(), None);
        match &container.rootfs.op {
            RootfsOp::DockerfileBuild { dockerfile, .. } => assert_eq!(dockerfile, "./Dockerfile"),
            other => panic!("expected dockerfile build node, got {:?}", other),
        }
    }

    #[test]
    fn relative_mount_path_is_rejected() {
        let result = scratch().with_mounted_temp("relative/path");
        assert!(matches!(result, Err(CoreError::InvalidPath { .. })));
    }

    #[test]
    fn dotdot_escaping_write_path_is_rejected() {
        let result = scratch().with_new_file("/a/../../etc/passwd", b"x".to_vec(), None);
        assert!(matches!(result, Err(CoreError::InvalidPath { .. })));
    }
}
