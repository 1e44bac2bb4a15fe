//! Service bindings: aliases that make another container reachable by
//! name during exec (C6).

use crate::id::ContainerId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBinding {
    pub alias: String,
    pub container_id: ContainerId,
}
