// End-to-end worker pipelines against a loopback HTTP server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use futures_util::future::FutureExt;
use tokio::net::TcpListener;

use splat_loader_engine::cloud::{sh_coeff_count, SH_CHANNELS};
use splat_loader_engine::config::LoaderConfig;
use splat_loader_engine::engine::lifecycle::EngineLifecycle;
use splat_loader_engine::engine::native::{NativeSplatEngine, MAGIC, VERSION};
use splat_loader_engine::engine::traits::DecodeEngine;
use splat_loader_engine::error::{FetchError, LoadError};
use splat_loader_engine::source::UrlAssetSource;
use splat_loader_engine::worker::{LoadCommand, LoadEvent, LoadPhase, LoadWorker};
use splat_loader_engine::SplatLoader;

fn pack_asset(num_points: u32, sh_degree: u8) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&num_points.to_le_bytes());
    out.extend_from_slice(&[sh_degree, 12, 0, 0]);

    let n = num_points as usize;
    let payload = n * 9 + n + n * 3 + n * 3 + n * 3 + n * SH_CHANNELS * sh_coeff_count(sh_degree);
    out.extend((0..payload).map(|i| (i % 251) as u8));
    out
}

/// Serve `asset` at /scene.spz after `delay`; anything else is a 404.
async fn start_server(asset: Vec<u8>, delay: Duration) -> SocketAddr {
    let app = Router::new().route(
        "/scene.spz",
        get(move || {
            let asset = asset.clone();
            async move {
                tokio::time::sleep(delay).await;
                asset
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn lifecycle_for(engine: Arc<NativeSplatEngine>) -> Arc<EngineLifecycle> {
    Arc::new(EngineLifecycle::new(Arc::new(move || {
        let engine = engine.clone();
        async move { Ok(engine as Arc<dyn DecodeEngine>) }.boxed()
    })))
}

#[tokio::test]
async fn test_load_success_over_http() {
    let addr = start_server(pack_asset(3, 2), Duration::ZERO).await;
    let (worker, mut events) = LoadWorker::with_config(LoaderConfig::default());

    let url = format!("http://{addr}/scene.spz");
    assert!(worker.send(LoadCommand::Load { url: url.clone() }).await);

    match events.recv().await.unwrap() {
        LoadEvent::Loaded { url: got, envelope } => {
            assert_eq!(got, url);
            assert_eq!(envelope.meta.num_points, 3);
            assert_eq!(envelope.meta.sh_degree, 2);
            assert!(!envelope.meta.antialiased);
            assert_eq!(envelope.positions.len(), 9);
            assert_eq!(envelope.scales.len(), 9);
            assert_eq!(envelope.rotations.len(), 12);
            assert_eq!(envelope.alphas.len(), 3);
            assert_eq!(envelope.colors.len(), 9);
            assert_eq!(envelope.sh.len(), 3 * SH_CHANNELS * sh_coeff_count(2));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_404_fails_request_but_not_the_worker() {
    let addr = start_server(pack_asset(1, 0), Duration::ZERO).await;
    let (worker, mut events) = LoadWorker::with_config(LoaderConfig::default());

    let missing = format!("http://{addr}/missing.spz");
    assert!(worker.send(LoadCommand::Load { url: missing.clone() }).await);

    match events.recv().await.unwrap() {
        LoadEvent::Failed { url, phase, error } => {
            assert_eq!(url, missing);
            assert_eq!(phase, LoadPhase::Fetching);
            match error {
                LoadError::Fetch(fetch) => assert_eq!(fetch.status(), Some(404)),
                other => panic!("unexpected error: {other:?}"),
            }
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // The dispatcher is still listening: the next command succeeds.
    let good = format!("http://{addr}/scene.spz");
    assert!(worker.send(LoadCommand::Load { url: good.clone() }).await);
    match events.recv().await.unwrap() {
        LoadEvent::Loaded { url, .. } => assert_eq!(url, good),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_truncated_asset_fails_decode_without_leak() {
    let mut asset = pack_asset(4, 1);
    asset.truncate(asset.len() - 3);
    let addr = start_server(asset, Duration::ZERO).await;

    let engine = Arc::new(NativeSplatEngine::new(1 << 20));
    let source = Arc::new(UrlAssetSource::new(&LoaderConfig::default()));
    let (worker, mut events) = LoadWorker::spawn(lifecycle_for(engine.clone()), source);

    let url = format!("http://{addr}/scene.spz");
    assert!(worker.send(LoadCommand::Load { url }).await);

    match events.recv().await.unwrap() {
        LoadEvent::Failed { phase, error, .. } => {
            assert_eq!(phase, LoadPhase::Decoding);
            assert!(matches!(error, LoadError::Decode(_)));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(engine.outstanding(), 0);
    assert_eq!(engine.used_bytes(), 0);
}

#[tokio::test]
async fn test_engine_initializes_once_across_concurrent_loads() {
    let addr = start_server(pack_asset(1, 0), Duration::ZERO).await;

    let attempts = Arc::new(AtomicU32::new(0));
    let factory_attempts = attempts.clone();
    let lifecycle = Arc::new(EngineLifecycle::new(Arc::new(move || {
        let attempts = factory_attempts.clone();
        async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(Arc::new(NativeSplatEngine::new(1 << 20)) as Arc<dyn DecodeEngine>)
        }
        .boxed()
    })));
    let source = Arc::new(UrlAssetSource::new(&LoaderConfig::default()));
    let (worker, mut events) = LoadWorker::spawn(lifecycle, source);

    // Distinct query strings keep the three commands independent.
    for i in 0..3 {
        let url = format!("http://{addr}/scene.spz?i={i}");
        assert!(worker.send(LoadCommand::Load { url }).await);
    }
    for _ in 0..3 {
        match events.recv().await.unwrap() {
            LoadEvent::Loaded { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_zero_point_asset_loads_empty_arrays() {
    let addr = start_server(pack_asset(0, 3), Duration::ZERO).await;
    let (worker, mut events) = LoadWorker::with_config(LoaderConfig::default());

    let url = format!("http://{addr}/scene.spz");
    assert!(worker.send(LoadCommand::Load { url }).await);

    match events.recv().await.unwrap() {
        LoadEvent::Loaded { envelope, .. } => {
            assert_eq!(envelope.meta.num_points, 0);
            assert!(envelope.positions.is_empty());
            assert!(envelope.scales.is_empty());
            assert!(envelope.rotations.is_empty());
            assert!(envelope.alphas.is_empty());
            assert!(envelope.colors.is_empty());
            assert!(envelope.sh.is_empty());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_staged_file_released_after_load() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoaderConfig {
        scratch_dir: Some(dir.path().to_path_buf()),
        ..LoaderConfig::default()
    };

    let path = dir.path().join("scene.spz");
    std::fs::write(&path, pack_asset(2, 0)).unwrap();
    let url = reqwest::Url::from_file_path(&path).unwrap().to_string();

    let (worker, mut events) = LoadWorker::with_config(config);
    assert!(worker.send(LoadCommand::Load { url }).await);

    match events.recv().await.unwrap() {
        LoadEvent::Loaded { envelope, .. } => assert_eq!(envelope.meta.num_points, 2),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(!path.exists(), "staged file should be released after the read");
}

#[tokio::test]
async fn test_duplicate_command_for_in_flight_url_is_dropped() {
    let addr = start_server(pack_asset(1, 0), Duration::from_millis(200)).await;
    let (worker, mut events) = LoadWorker::with_config(LoaderConfig::default());

    let url = format!("http://{addr}/scene.spz");
    assert!(worker.send(LoadCommand::Load { url: url.clone() }).await);
    assert!(worker.send(LoadCommand::Load { url }).await);

    match events.recv().await.unwrap() {
        LoadEvent::Loaded { .. } => {}
        other => panic!("unexpected event: {other:?}"),
    }
    // The duplicate produced no second event.
    let second = tokio::time::timeout(Duration::from_millis(300), events.recv()).await;
    assert!(second.is_err());
}

#[tokio::test]
async fn test_client_load_roundtrip() {
    let addr = start_server(pack_asset(2, 1), Duration::ZERO).await;
    let loader = SplatLoader::new(LoaderConfig::default());

    let envelope = loader
        .load(&format!("http://{addr}/scene.spz"))
        .await
        .unwrap();
    assert_eq!(envelope.meta.num_points, 2);
    assert_eq!(envelope.rotations.len(), 8);

    let err = loader.load("ftp://nowhere/scene.spz").await.unwrap_err();
    assert!(matches!(err, LoadError::Fetch(FetchError::Scheme(_))));

    loader.shutdown();
}
