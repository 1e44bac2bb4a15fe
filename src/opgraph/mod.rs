//! Op graph builder (C4): lowers a Container's rootfs derivation into an
//! immutable DAG a [`crate::backend::BuildBackend`] can solve.
//!
//! Every node's [`DirectoryId`] is the hash of its own op plus its
//! parent's id (git-commit style content addressing), so structurally
//! equal derivation histories always produce byte-identical ids, and a
//! backend can use the id itself as a solve cache key - satisfying the
//! builder's determinism and de-duplication guarantees without the core
//! needing to maintain a global intern table.

use crate::id::{CacheVolumeId, ContainerId, DirectoryId, FileId, SecretId, SocketId};
use crate::platform::Platform;
use crate::value::mount::Mount;
use crate::value::ordered_map::OrderedMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Write {
    pub dst_path: String,
    pub permissions: u32,
    pub kind: WriteKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteKind {
    CopyDir {
        source: DirectoryId,
        src_path: String,
        include: Vec<String>,
        exclude: Vec<String>,
    },
    CopyFile {
        source: FileId,
        src_path: String,
    },
    Mkfile {
        contents: Vec<u8>,
    },
    Mkdir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOpSpec {
    pub cmd: Vec<String>,
    pub env: OrderedMap<String, String>,
    pub secret_env: OrderedMap<String, SecretId>,
    pub mounts: Vec<Mount>,
    pub workdir: Option<String>,
    pub user: Option<String>,
    pub services: Vec<ContainerId>,
    pub privileged: bool,
    pub stdin: Option<String>,
    pub redirect_stdout: Option<String>,
    pub redirect_stderr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootfsOp {
    Scratch,
    /// Installs an externally-produced directory as a fresh rootfs, used
    /// by `withRootfs`/`withFS`. Has no parent of its own: whatever
    /// history produced `directory` is opaque from here on.
    FromDirectory {
        directory: DirectoryId,
    },
    Pull {
        reference: String,
        platform: Platform,
    },
    DockerfileBuild {
        context: DirectoryId,
        dockerfile: String,
        build_args: OrderedMap<String, String>,
        target: Option<String>,
        platform: Platform,
    },
    Overlay {
        writes: Vec<Write>,
    },
    Exec {
        spec: ExecOpSpec,
    },
}

#[derive(Debug, Serialize)]
struct NodeEncoding<'a> {
    parent: Option<DirectoryId>,
    op: &'a RootfsOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootfsNode {
    pub id: DirectoryId,
    pub parent: Option<Arc<RootfsNode>>,
    pub op: RootfsOp,
    pub platform: Platform,
}

impl RootfsNode {
    pub fn scratch(platform: Platform) -> Arc<RootfsNode> {
        let op = RootfsOp::Scratch;
        let id = DirectoryId::of_value(&NodeEncoding { parent: None, op: &op });
        Arc::new(RootfsNode {
            id,
            parent: None,
            op,
            platform,
        })
    }

    /// Installs an externally-produced directory as a brand new root,
    /// discarding whatever history produced it. Used by `withRootfs`.
    pub fn from_directory(directory: DirectoryId, platform: Platform) -> Arc<RootfsNode> {
        let op = RootfsOp::FromDirectory { directory };
        let id = DirectoryId::of_value(&NodeEncoding { parent: None, op: &op });
        Arc::new(RootfsNode {
            id,
            parent: None,
            op,
            platform,
        })
    }

    pub fn push(parent: &Arc<RootfsNode>, op: RootfsOp) -> Arc<RootfsNode> {
        let id = DirectoryId::of_value(&NodeEncoding {
            parent: Some(parent.id),
            op: &op,
        });
        Arc::new(RootfsNode {
            id,
            parent: Some(Arc::clone(parent)),
            op,
            platform: parent.platform.clone(),
        })
    }

    /// Topologically ordered ancestor chain, root first - the order a
    /// backend would need to submit nodes in so each node's inputs are
    /// already solved.
    pub fn ancestors_root_first(self: &Arc<RootfsNode>) -> Vec<Arc<RootfsNode>> {
        let mut chain = Vec::new();
        let mut cur = Some(Arc::clone(self));
        while let Some(node) = cur {
            cur = node.parent.clone();
            chain.push(node);
        }
        chain.reverse();
        chain
    }

    pub fn describe(&self) -> String {
        match &self.op {
            RootfsOp::Scratch => "scratch".to_string(),
            RootfsOp::FromDirectory { directory } => format!("from-directory({})", directory),
            RootfsOp::Pull { reference, .. } => format!("pull({})", reference),
            RootfsOp::DockerfileBuild { dockerfile, .. } => {
                format!("dockerfile-build({})", dockerfile)
            }
            RootfsOp::Overlay { writes } => format!("overlay({} writes)", writes.len()),
            RootfsOp::Exec { spec } => format!("exec({})", spec.cmd.join(" ")),
        }
    }
}

/// Unreadable mount kinds that still need a type signature in the
/// builder: referenced here so downstream modules share one import
/// path for the handful of ids a DAG node can carry.
pub type CacheRef = CacheVolumeId;
pub type SocketRef = SocketId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_histories_produce_equal_ids() {
        let a = RootfsNode::scratch(Platform::default_platform());
        let b = RootfsNode::scratch(Platform::default_platform());
        assert_eq!(a.id, b.id);

        let a2 = RootfsNode::push(
            &a,
            RootfsOp::Pull {
                reference: "alpine:3.18".to_string(),
                platform: Platform::default_platform(),
            },
        );
        let b2 = RootfsNode::push(
            &b,
            RootfsOp::Pull {
                reference: "alpine:3.18".to_string(),
                platform: Platform::default_platform(),
            },
        );
        assert_eq!(a2.id, b2.id);
    }

    #[test]
    fn distinct_histories_produce_distinct_ids() {
        let base = RootfsNode::scratch(Platform::default_platform());
        let a = RootfsNode::push(
            &base,
            RootfsOp::Pull {
                reference: "alpine:3.18".to_string(),
                platform: Platform::default_platform(),
            },
        );
        let b = RootfsNode::push(
            &base,
            RootfsOp::Pull {
                reference: "alpine:3.19".to_string(),
                platform: Platform::default_platform(),
            },
        );
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn ancestors_are_root_first() {
        let base = RootfsNode::scratch(Platform::default_platform());
        let a = RootfsNode::push(
            &base,
            RootfsOp::Pull {
                reference: "alpine:3.18".to_string(),
                platform: Platform::default_platform(),
            },
        );
        let chain = a.ancestors_root_first();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].id, base.id);
        assert_eq!(chain[1].id, a.id);
    }
}
