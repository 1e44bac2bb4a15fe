//! OS/arch/variant platform triples, as used to parameterize pulls,
//! builds, and execution.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Platform {
        Platform {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Platform {
        self.variant = Some(variant.into());
        self
    }

    /// The default platform new Containers are constructed with absent
    /// an explicit override - linux/amd64, matching the teacher's own
    /// implicit default when no `--platform` is threaded through.
    pub fn default_platform() -> Platform {
        Platform::new("linux", "amd64")
    }

    /// Parses `os/arch` or `os/arch/variant`, the same slash-separated
    /// form OCI image indexes and `docker buildx --platform` use.
    pub fn parse(s: &str) -> Option<Platform> {
        let mut parts = s.split('/');
        let os = parts.next()?.to_string();
        let architecture = parts.next()?.to_string();
        if os.is_empty() || architecture.is_empty() {
            return None;
        }
        let variant = parts.next().map(|v| v.to_string());
        if parts.next().is_some() {
            return None;
        }
        Some(Platform {
            os,
            architecture,
            variant,
        })
    }
}

impl Default for Platform {
    fn default() -> Platform {
        Platform::default_platform()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(v) => write!(f, "{}/{}/{}", self.os, self.architecture, v),
            None => write!(f, "{}/{}", self.os, self.architecture),
        }
    }
}
