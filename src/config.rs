//! Engine configuration (C10).
//!
//! Loaded the same way the teacher loads its JSON configs
//! (`MergeConfig::parse_file` / `PusherConfig::parse_file`): a small
//! `serde`-derived struct with a `parse_file`/`parse_str` pair, plus a
//! `Default` impl for programmatic construction when no file is
//! involved.

use crate::platform::Platform;
use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on concurrently in-flight backend operations (solves,
    /// execs, pulls) this engine instance will issue at once.
    pub max_concurrent_backend_ops: usize,

    /// Platform used for `Query.container()` when the caller doesn't
    /// specify one.
    pub default_platform: Platform,

    /// Directory the engine asks the backend to use for any local
    /// scratch space a service/bind needs (download staging, etc).
    pub cache_dir: std::path::PathBuf,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            max_concurrent_backend_ops: 32,
            default_platform: Platform::default_platform(),
            cache_dir: std::env::temp_dir().join("container-pipeline-core"),
        }
    }
}

impl EngineConfig {
    pub fn parse_str(s: impl AsRef<str>) -> Result<EngineConfig, Error> {
        let cfg: EngineConfig = serde_json::from_str(s.as_ref())
            .with_context(|| "parsing EngineConfig from string")?;
        Ok(cfg)
    }

    pub fn parse_file(f: impl AsRef<Path>) -> Result<EngineConfig, Error> {
        let content = std::fs::read_to_string(f.as_ref())
            .with_context(|| format!("reading engine config at {:?}", f.as_ref()))?;
        EngineConfig::parse_str(&content).with_context(|| {
            format!(
                "parsing engine config from file: {}, content:\n{}",
                f.as_ref().to_string_lossy(),
                content
            )
        })
    }

    pub fn write_file(&self, f: impl AsRef<Path>) -> Result<(), Error> {
        use std::fs::File;
        use std::io::BufWriter;

        let file = File::create(f.as_ref())?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let cfg = EngineConfig::default();
        assert!(cfg.max_concurrent_backend_ops > 0);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = EngineConfig {
            max_concurrent_backend_ops: 8,
            default_platform: Platform::new("linux", "arm64"),
            cache_dir: "/tmp/cache".into(),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed = EngineConfig::parse_str(&json).unwrap();
        assert_eq!(parsed.max_concurrent_backend_ops, 8);
        assert_eq!(parsed.default_platform, Platform::new("linux", "arm64"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = EngineConfig::parse_str(r#"{"max_concurrent_backend_ops": 4}"#).unwrap();
        assert_eq!(cfg.max_concurrent_backend_ops, 4);
        assert_eq!(cfg.default_platform, Platform::default_platform());
    }
}
