//! End-to-end scenarios driven against `testing::FakeBackend`, mirroring
//! the concrete walkthroughs in the core's design document one for one.

use container_pipeline_core::config::EngineConfig;
use container_pipeline_core::engine::{Engine, Query};
use container_pipeline_core::id::{CacheVolumeId, SecretId};
use container_pipeline_core::platform::Platform;
use container_pipeline_core::testing::FakeBackend;
use container_pipeline_core::value::container::ExecOptions;
use container_pipeline_core::value::mount::CacheSharingMode;
use container_pipeline_core::value::port::NetworkProtocol;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn engine() -> (Arc<Engine>, Arc<FakeBackend>) {
    let backend = FakeBackend::new();
    let engine = Arc::new(Engine::new(backend.clone(), EngineConfig::default()));
    (engine, backend)
}

#[tokio::test]
async fn scratch_echo() {
    let (engine, _backend) = engine();
    let query = Query::new(engine.clone());
    let cancel = CancellationToken::new();

    let container = engine
        .from(query.container(), "alpine:3.18", &cancel)
        .await
        .unwrap();
    let container = container
        .with_exec(vec!["echo".to_string(), "hi".to_string()], ExecOptions::default())
        .unwrap();

    assert_eq!(engine.stdout(&container, &cancel).await.unwrap(), Some(b"hi\n".to_vec()));
    assert_eq!(engine.exit_code(&container, &cancel).await.unwrap(), Some(0));
}

#[tokio::test]
async fn accessors_return_none_before_any_exec_is_pending() {
    let (engine, _backend) = engine();
    let query = Query::new(engine.clone());
    let cancel = CancellationToken::new();

    let container = engine
        .from(query.container(), "alpine:3.18", &cancel)
        .await
        .unwrap();

    assert_eq!(engine.exit_code(&container, &cancel).await.unwrap(), None);
    assert_eq!(engine.stdout(&container, &cancel).await.unwrap(), None);
    assert_eq!(engine.stderr(&container, &cancel).await.unwrap(), None);
}

#[tokio::test]
async fn env_propagation() {
    let (engine, _backend) = engine();
    let query = Query::new(engine.clone());
    let cancel = CancellationToken::new();

    let base = engine
        .from(query.container(), "alpine:3.18", &cancel)
        .await
        .unwrap()
        .with_env_variable("A", "1");
    let container = base
        .with_exec(
            vec!["env".to_string()],
            ExecOptions::default(),
        )
        .unwrap();

    let stdout = engine.stdout(&container, &cancel).await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&stdout).contains("A=1"));
}

#[tokio::test]
async fn mount_isolation() {
    let (engine, _backend) = engine();
    let query = Query::new(engine.clone());
    let cancel = CancellationToken::new();

    let container = query
        .container()
        .with_mounted_temp("/t")
        .unwrap()
        .with_exec(
            vec!["write".to_string(), "/t/f".to_string(), "x".to_string()],
            ExecOptions::default(),
        )
        .unwrap();

    // forces the exec so the returned container carries a post-exec rootfs
    engine.exit_code(&container, &cancel).await.unwrap();

    let err = engine.read_file(&container, "/t/f", &cancel).await.unwrap_err();
    assert!(matches!(
        err,
        container_pipeline_core::error::CoreError::MountNotReadable { .. }
    ));

    let root_listing = engine.read_dir(&container, "/", &cancel).await.unwrap();
    assert!(!root_listing.contains(&"t".to_string()));
}

#[tokio::test]
async fn cache_sharing_is_observable_across_containers() {
    let (engine, _backend) = engine();
    let query = Query::new(engine.clone());
    let cancel = CancellationToken::new();
    let cache_id = CacheVolumeId::of_value(&"shared-cache");

    let writer_a = query
        .container()
        .with_mounted_cache("/c", cache_id, None, CacheSharingMode::Shared)
        .unwrap();
    let writer_b = writer_a.clone();

    let exec_a = writer_a
        .with_exec(
            vec!["write".to_string(), "/c/a".to_string(), "from-a".to_string()],
            ExecOptions::default(),
        )
        .unwrap();
    let exec_b = writer_b
        .with_exec(
            vec!["write".to_string(), "/c/b".to_string(), "from-b".to_string()],
            ExecOptions::default(),
        )
        .unwrap();

    let (r1, r2) = tokio::join!(
        engine.exit_code(&exec_a, &cancel),
        engine.exit_code(&exec_b, &cancel),
    );
    assert_eq!(r1.unwrap(), Some(0));
    assert_eq!(r2.unwrap(), Some(0));

    let reader = query
        .container()
        .with_mounted_cache("/c", cache_id, None, CacheSharingMode::Shared)
        .unwrap()
        .with_exec(
            vec!["read".to_string(), "/c/a".to_string()],
            ExecOptions::default(),
        )
        .unwrap();
    assert_eq!(engine.stdout(&reader, &cancel).await.unwrap(), Some(b"from-a".to_vec()));

    let reader_b = query
        .container()
        .with_mounted_cache("/c", cache_id, None, CacheSharingMode::Shared)
        .unwrap()
        .with_exec(
            vec!["read".to_string(), "/c/b".to_string()],
            ExecOptions::default(),
        )
        .unwrap();
    assert_eq!(engine.stdout(&reader_b, &cancel).await.unwrap(), Some(b"from-b".to_vec()));
}

#[tokio::test]
async fn service_endpoint_is_reachable_by_alias() {
    let (engine, _backend) = engine();
    let query = Query::new(engine.clone());
    let cancel = CancellationToken::new();

    let redis = engine
        .from(query.container(), "redis", &cancel)
        .await
        .unwrap()
        .with_exposed_port(6379, NetworkProtocol::Tcp, None);

    let client = engine
        .from(query.container(), "alpine", &cancel)
        .await
        .unwrap()
        .with_service_binding("db", redis.id())
        .with_exec(
            vec!["nc".to_string(), "-z".to_string(), "db".to_string(), "6379".to_string()],
            ExecOptions::default(),
        )
        .unwrap();

    assert_eq!(engine.exit_code(&client, &cancel).await.unwrap(), Some(0));

    let endpoint = engine.endpoint(&redis, None).await.unwrap();
    assert!(endpoint.ends_with(":6379"));
}

#[tokio::test]
async fn service_refcount_releases_on_exec_completion() {
    let (engine, backend) = engine();
    let query = Query::new(engine.clone());
    let cancel = CancellationToken::new();

    let redis = engine
        .from(query.container(), "redis", &cancel)
        .await
        .unwrap()
        .with_exposed_port(6379, NetworkProtocol::Tcp, None);

    let client = engine
        .from(query.container(), "alpine", &cancel)
        .await
        .unwrap()
        .with_service_binding("db", redis.id())
        .with_exec(
            vec!["nc".to_string(), "-z".to_string(), "db".to_string(), "6379".to_string()],
            ExecOptions::default(),
        )
        .unwrap();

    // Bind the same service once more independently of `client`'s exec,
    // so the refcount starts above one and a single exec's release
    // shouldn't tear the service down by itself.
    engine.bind_service("keepalive", &redis).await.unwrap();

    assert_eq!(engine.exit_code(&client, &cancel).await.unwrap(), Some(0));
    assert!(!backend.calls().iter().any(|c| c.starts_with("stop_service")));

    // Releasing the remaining reference should now stop it.
    engine.unbind_service(&redis).await.unwrap();
    assert!(backend.calls().iter().any(|c| c.starts_with("stop_service")));
}

#[tokio::test]
async fn multi_platform_publish_includes_every_variant() {
    let (engine, backend) = engine();
    let query = Query::new(engine.clone());
    let cancel = CancellationToken::new();

    let amd64 = engine
        .from(
            query.container_for_platform(Platform::new("linux", "amd64")),
            "alpine",
            &cancel,
        )
        .await
        .unwrap();
    let arm64 = engine
        .from(
            query.container_for_platform(Platform::new("linux", "arm64")),
            "alpine",
            &cancel,
        )
        .await
        .unwrap();

    let published = engine
        .publish(&amd64, "registry.example.com/app:latest", &[arm64], &cancel)
        .await
        .unwrap();

    assert!(published.starts_with("registry.example.com/app:latest@sha256:"));
    assert_eq!(backend.published(), vec![("registry.example.com/app:latest".to_string(), 2)]);
}

#[tokio::test]
async fn registry_auth_is_not_required_for_an_unconfigured_secret() {
    let (engine, _backend) = engine();
    let query = Query::new(engine.clone());
    let cancel = CancellationToken::new();

    let container = query
        .container()
        .with_registry_auth("registry.example.com", "user", SecretId::of_value(&"s"));
    let pulled = engine.from(container, "registry.example.com/app:latest", &cancel).await;
    assert!(pulled.is_ok());
}
