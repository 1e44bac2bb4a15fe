//! A lazily-evaluated, content-addressed graph engine for composing
//! immutable container descriptions: build up a `Container` through a
//! chain of pure derivations, then force it to run, publish, or export
//! through whichever [`backend::BuildBackend`] is wired in.
//!
//! ```no_run
//! # async fn run() -> container_pipeline_core::error::CoreResult<()> {
//! use container_pipeline_core::engine::{Engine, Query};
//! use container_pipeline_core::testing::FakeBackend;
//! use container_pipeline_core::config::EngineConfig;
//! use std::sync::Arc;
//!
//! let engine = Arc::new(Engine::new(FakeBackend::new(), EngineConfig::default()));
//! let query = Query::new(engine.clone());
//! let container = query.container().with_exec(vec!["echo".to_string(), "hi".to_string()], Default::default())?;
//! let cancel = tokio_util::sync::CancellationToken::new();
//! let stdout = engine.stdout(&container, &cancel).await?;
//! assert_eq!(stdout, Some(b"hi\n".to_vec()));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod hash;
pub mod id;
pub mod opgraph;
pub mod platform;
pub mod testing;
pub mod value;

pub use engine::{Engine, Query};
pub use error::{CoreError, CoreResult};
pub use value::Container;
