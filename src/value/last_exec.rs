//! The result of the most recent `withExec` in a derivation chain.

use crate::id::StreamId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastExec {
    pub exit_code: i32,
    pub stdout: StreamId,
    pub stderr: StreamId,
}
