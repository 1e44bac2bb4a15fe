//! Pipeline labelling (C8): named sub-pipeline context threaded through
//! derived Containers purely for observability.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineLabel {
    pub name: String,
    pub description: Option<String>,
}
