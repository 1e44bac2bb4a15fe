//! An in-memory [`BuildBackend`] (C12) for exercising the engine without
//! a real builder or registry behind it. Deliberately approximate: it
//! tracks enough filesystem state to make `withNewFile`/`withDirectory`
//! plus `directory()`/`file()` round-trip, and enough process state to
//! make `echo`-style `withExec` chains produce believable output, but it
//! is not a container runtime.

use crate::backend::{BuildBackend, PlatformVariant, ServiceEndpoint};
use crate::error::{CoreError, CoreResult};
use crate::hash::Digest256;
use crate::id::{DirectoryId, StreamId};
use crate::opgraph::{RootfsNode, RootfsOp, WriteKind};
use crate::platform::Platform;
use crate::value::last_exec::LastExec;
use crate::value::mount::{Mount, MountSource};
use crate::value::registry_auth::RegistryAuth;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type FakeDir = BTreeMap<String, Vec<u8>>;

/// A backend that keeps every "pulled", "built", or "written" file in
/// process memory, and a log of what it was asked to do - tests assert
/// against `calls()` as well as exec/read results.
#[derive(Default)]
pub struct FakeBackend {
    fs: Mutex<HashMap<DirectoryId, Arc<FakeDir>>>,
    streams: Mutex<HashMap<StreamId, Vec<u8>>>,
    /// Persistent cache-volume contents, keyed by the cache's encoded id
    /// rather than by any rootfs node - the whole point of a cache mount
    /// is that it outlives any one derivation chain.
    caches: Mutex<HashMap<String, Arc<Mutex<FakeDir>>>>,
    services_started: AtomicUsize,
    calls: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, usize)>>,
}

/// Applies `withDirectory`'s include/exclude glob filters: when absent,
/// every entry is copied; exclude is applied after include.
fn path_selected(path: &str, include: &[String], exclude: &[String]) -> bool {
    let relative = path.trim_start_matches('/');
    let matches_any = |patterns: &[String]| {
        patterns.iter().any(|p| {
            glob::Pattern::new(p)
                .map(|pattern| pattern.matches(relative))
                .unwrap_or(false)
        })
    };
    if !include.is_empty() && !matches_any(include) {
        return false;
    }
    if !exclude.is_empty() && matches_any(exclude) {
        return false;
    }
    true
}

fn join_path(base: &str, leaf: &str) -> String {
    let base = base.trim_end_matches('/');
    let leaf = leaf.trim_start_matches('/');
    if base.is_empty() {
        format!("/{}", leaf)
    } else {
        format!("{}/{}", base, leaf)
    }
}

impl FakeBackend {
    pub fn new() -> Arc<FakeBackend> {
        Arc::new(FakeBackend::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<(String, usize)> {
        self.published.lock().unwrap().clone()
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn store_stream(&self, bytes: Vec<u8>) -> StreamId {
        let id = StreamId::of_value(&Digest256::of_bytes(&bytes).to_hex());
        self.streams.lock().unwrap().insert(id, bytes);
        id
    }

    /// The persistent store backing a cache mount, created on first use
    /// and shared by every container that mounts the same `cache_id` -
    /// the behavior `SHARED`/`LOCKED` sharing modes both rely on.
    fn cache_store(&self, cache_id: &str) -> Arc<Mutex<FakeDir>> {
        Arc::clone(
            self.caches
                .lock()
                .unwrap()
                .entry(cache_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(BTreeMap::new()))),
        )
    }

    fn materialize(&self, node: &Arc<RootfsNode>) -> Arc<FakeDir> {
        if let Some(cached) = self.fs.lock().unwrap().get(&node.id) {
            return Arc::clone(cached);
        }
        let mut dir: FakeDir = match &node.parent {
            Some(parent) => (*self.materialize(parent)).clone(),
            None => BTreeMap::new(),
        };
        match &node.op {
            RootfsOp::Scratch => {}
            RootfsOp::FromDirectory { directory } => {
                if let Some(known) = self.fs.lock().unwrap().get(directory) {
                    dir = (**known).clone();
                }
            }
            RootfsOp::Pull { reference, .. } => {
                dir.insert(
                    "/etc/image-reference".to_string(),
                    reference.clone().into_bytes(),
                );
            }
            RootfsOp::DockerfileBuild { dockerfile, .. } => {
                dir.insert(
                    "/etc/built-from-dockerfile".to_string(),
                    dockerfile.clone().into_bytes(),
                );
            }
            RootfsOp::Overlay { writes } => {
                for write in writes {
                    match &write.kind {
                        WriteKind::Mkfile { contents } => {
                            dir.insert(write.dst_path.clone(), contents.clone());
                        }
                        WriteKind::Mkdir => {
                            dir.entry(join_path(&write.dst_path, ".keep"))
                                .or_insert_with(Vec::new);
                        }
                        WriteKind::CopyDir {
                            source,
                            include,
                            exclude,
                            ..
                        } => {
                            if let Some(known) = self.fs.lock().unwrap().get(source) {
                                for (path, contents) in known.iter() {
                                    if path_selected(path, include, exclude) {
                                        dir.insert(join_path(&write.dst_path, path), contents.clone());
                                    }
                                }
                            }
                        }
                        WriteKind::CopyFile { .. } => {
                            // standalone FileId content isn't tracked by this
                            // fake backend; copies land as an empty file.
                            dir.entry(write.dst_path.clone()).or_insert_with(Vec::new);
                        }
                    }
                }
            }
            RootfsOp::Exec { .. } => {}
        }
        let dir = Arc::new(dir);
        self.fs.lock().unwrap().insert(node.id, Arc::clone(&dir));
        dir
    }

    fn overlay_mounts(&self, base: &FakeDir, mounts: &[Mount]) -> FakeDir {
        let mut dir = base.clone();
        for mount in mounts {
            match &mount.source {
                MountSource::Directory(source) => {
                    if let Some(known) = self.fs.lock().unwrap().get(source) {
                        for (path, contents) in known.iter() {
                            dir.insert(join_path(&mount.path, path), contents.clone());
                        }
                    }
                }
                MountSource::File(_) => {
                    dir.entry(mount.path.clone()).or_insert_with(Vec::new);
                }
                MountSource::Cache { cache_id, .. } => {
                    let store = self.cache_store(&cache_id.to_string());
                    let store = store.lock().unwrap();
                    for (path, contents) in store.iter() {
                        dir.insert(join_path(&mount.path, path), contents.clone());
                    }
                }
                _ => {}
            }
        }
        dir
    }

    /// Writes `contents` into whichever cache mount covers `path`; a no-op
    /// for any other mount kind, since tempfs/secret writes are never
    /// meant to surface anywhere this fake backend can see again.
    fn write_through_mount(&self, mounts: &[Mount], path: &str, contents: Vec<u8>) {
        if let Some(mount) = crate::value::mount::covering_mount(mounts, path) {
            if let MountSource::Cache { cache_id, .. } = &mount.source {
                let relative = path
                    .strip_prefix(&mount.path)
                    .unwrap_or(path)
                    .trim_start_matches('/')
                    .to_string();
                let store = self.cache_store(&cache_id.to_string());
                store.lock().unwrap().insert(relative, contents);
            }
        }
    }

    fn read_through_mount(&self, mounts: &[Mount], path: &str) -> Option<Vec<u8>> {
        let mount = crate::value::mount::covering_mount(mounts, path)?;
        if let MountSource::Cache { cache_id, .. } = &mount.source {
            let relative = path
                .strip_prefix(&mount.path)
                .unwrap_or(path)
                .trim_start_matches('/')
                .to_string();
            let store = self.cache_store(&cache_id.to_string());
            return store.lock().unwrap().get(&relative).cloned();
        }
        None
    }
}

#[async_trait]
impl BuildBackend for FakeBackend {
    async fn solve(&self, node: &Arc<RootfsNode>) -> CoreResult<()> {
        self.materialize(node);
        Ok(())
    }

    async fn resolve_pull(
        &self,
        reference: &str,
        _platform: &Platform,
        auth: Option<&RegistryAuth>,
    ) -> CoreResult<String> {
        self.log(format!("pull {}", reference));
        if reference.is_empty() {
            return Err(CoreError::PullFailed(anyhow::anyhow!("empty reference")));
        }
        let _ = auth;
        let digest = Digest256::of_bytes(reference.as_bytes());
        Ok(format!("{}@{}", reference, digest))
    }

    async fn run(
        &self,
        node: &Arc<RootfsNode>,
        spec: &crate::opgraph::ExecOpSpec,
        _platform: &Platform,
    ) -> CoreResult<LastExec> {
        self.log(format!("run {}", spec.cmd.join(" ")));
        let (exit_code, stdout_bytes, stderr_bytes) = match spec.cmd.first().map(String::as_str) {
            Some("echo") => (0, format!("{}\n", spec.cmd[1..].join(" ")).into_bytes(), Vec::new()),
            Some("true") | Some("nc") => (0, Vec::new(), Vec::new()),
            Some("false") => (1, Vec::new(), Vec::new()),
            Some("pwd") => (
                0,
                format!("{}\n", spec.workdir.clone().unwrap_or_else(|| "/".to_string())).into_bytes(),
                Vec::new(),
            ),
            Some("env") => {
                let mut lines: Vec<String> =
                    spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                lines.extend(spec.secret_env.keys().map(|k| format!("{}=***", k)));
                (0, (lines.join("\n") + "\n").into_bytes(), Vec::new())
            }
            // Test-only sentinel commands that let cache-mount scenarios
            // exercise actual reads/writes through this fake backend
            // without needing a real shell: `write <path> <contents>` /
            // `read <path>`, both resolved against `spec.mounts`.
            Some("write") if spec.cmd.len() == 3 => {
                self.write_through_mount(&spec.mounts, &spec.cmd[1], spec.cmd[2].clone().into_bytes());
                (0, Vec::new(), Vec::new())
            }
            Some("read") if spec.cmd.len() == 2 => {
                let contents = self.read_through_mount(&spec.mounts, &spec.cmd[1]).unwrap_or_default();
                (0, contents, Vec::new())
            }
            _ => (0, Vec::new(), Vec::new()),
        };
        self.materialize(node);
        if spec.redirect_stdout.is_some() || spec.redirect_stderr.is_some() {
            let mut dir = (*self.materialize(node)).clone();
            if let Some(path) = &spec.redirect_stdout {
                dir.insert(path.clone(), stdout_bytes.clone());
            }
            if let Some(path) = &spec.redirect_stderr {
                dir.insert(path.clone(), stderr_bytes.clone());
            }
            self.fs.lock().unwrap().insert(node.id, Arc::new(dir));
        }
        Ok(LastExec {
            exit_code,
            stdout: self.store_stream(stdout_bytes),
            stderr: self.store_stream(stderr_bytes),
        })
    }

    async fn read_stream(&self, stream: StreamId) -> CoreResult<Vec<u8>> {
        self.streams
            .lock()
            .unwrap()
            .get(&stream)
            .cloned()
            .ok_or_else(|| CoreError::invalid_id(stream, "unknown stream handle"))
    }

    async fn read_file(
        &self,
        node: &Arc<RootfsNode>,
        mounts: &[Mount],
        path: &str,
    ) -> CoreResult<Vec<u8>> {
        let base = self.materialize(node);
        let dir = self.overlay_mounts(&base, mounts);
        dir.get(path)
            .cloned()
            .ok_or_else(|| CoreError::invalid_path(PathBuf::from(path), "no such file"))
    }

    async fn read_dir(
        &self,
        node: &Arc<RootfsNode>,
        mounts: &[Mount],
        path: &str,
    ) -> CoreResult<Vec<String>> {
        let base = self.materialize(node);
        let dir = self.overlay_mounts(&base, mounts);
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        };
        let mut names: Vec<String> = dir
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty())
            .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn start_service(
        &self,
        alias: &str,
        _node: &Arc<RootfsNode>,
        spec: &crate::opgraph::ExecOpSpec,
        _platform: &Platform,
    ) -> CoreResult<ServiceEndpoint> {
        self.log(format!("start_service {} ({})", alias, spec.cmd.join(" ")));
        self.services_started.fetch_add(1, Ordering::SeqCst);
        Ok(ServiceEndpoint {
            hostname: format!("{}.fake-service.internal", alias),
        })
    }

    async fn stop_service(&self, endpoint: &ServiceEndpoint) -> CoreResult<()> {
        self.log(format!("stop_service {}", endpoint.hostname));
        Ok(())
    }

    async fn publish(
        &self,
        variants: &[PlatformVariant],
        address: &str,
        _auth: Option<&RegistryAuth>,
    ) -> CoreResult<String> {
        self.log(format!("publish {} ({} variants)", address, variants.len()));
        self.published
            .lock()
            .unwrap()
            .push((address.to_string(), variants.len()));
        let digest = Digest256::of_bytes(address.as_bytes());
        Ok(format!("{}@{}", address, digest))
    }

    async fn export_oci(&self, variants: &[PlatformVariant], dest_path: &Path) -> CoreResult<()> {
        self.log(format!(
            "export_oci {} ({} variants)",
            dest_path.display(),
            variants.len()
        ));
        Ok(())
    }
}
