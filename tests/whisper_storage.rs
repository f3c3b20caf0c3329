use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tempfile::TempDir;
use whorl::datamodel::{AggregationMethod, Point, Retention};
use whorl::storage::error::StorageError;
use whorl::storage::storage::{CreateOptions, StorageBackend};
use whorl::storage::storage_factory::create_storage_from_connection_string;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Backend on a scratch directory; the TempDir must outlive the backend.
async fn whisper_backend() -> Result<(TempDir, Arc<dyn StorageBackend>)> {
    init_tracing();
    let dir = TempDir::new()?;
    let connection = format!("whisper:{}", dir.path().display());
    let backend = create_storage_from_connection_string(&connection).await?;
    Ok((dir, backend))
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs() as u32
}

/// One minute per point for a day, one hour per point for a week.
fn default_archives() -> Vec<Retention> {
    vec![Retention::new(60, 1440), Retention::new(3600, 168)]
}

async fn create_series(backend: &Arc<dyn StorageBackend>, metric: &str) -> Result<()> {
    backend
        .create(
            metric,
            &default_archives(),
            0.5,
            AggregationMethod::Average,
            CreateOptions::default(),
        )
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_create_then_exists() -> Result<()> {
    let (_dir, backend) = whisper_backend().await?;

    assert!(!backend.exists("servers.host1.cpu.load").await);
    create_series(&backend, "servers.host1.cpu.load").await?;
    assert!(backend.exists("servers.host1.cpu.load").await);

    // a sibling metric is still absent
    assert!(!backend.exists("servers.host1.cpu.idle").await);
    Ok(())
}

#[tokio::test]
async fn test_double_create_fails_and_preserves_metadata() -> Result<()> {
    let (_dir, backend) = whisper_backend().await?;
    create_series(&backend, "a.b.c").await?;

    let err = backend
        .create(
            "a.b.c",
            &[Retention::new(10, 100)],
            0.9,
            AggregationMethod::Sum,
            CreateOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists { .. }));

    let info = backend.info("a.b.c").await?;
    assert_eq!(info.aggregation_method, AggregationMethod::Average);
    assert_eq!(info.archives, default_archives());
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_inconsistent_tiers() -> Result<()> {
    let (_dir, backend) = whisper_backend().await?;
    let err = backend
        .create(
            "bad.tiers",
            &[Retention::new(60, 10), Retention::new(90, 100)],
            0.5,
            AggregationMethod::Average,
            CreateOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidArchiveConfig(_)));
    assert!(!backend.exists("bad.tiers").await);
    Ok(())
}

#[tokio::test]
async fn test_update_then_fetch_returns_written_values() -> Result<()> {
    let (_dir, backend) = whisper_backend().await?;
    create_series(&backend, "servers.host1.load").await?;

    let step = 60;
    let t1 = (now() / step) * step - 10 * step;
    let t2 = t1 + step;
    backend
        .update_many(
            "servers.host1.load",
            &[Point::new(t1, 0.25), Point::new(t2, 0.75)],
        )
        .await?;

    let fetched = backend
        .fetch("servers.host1.load", t1 - step, t2)
        .await?
        .expect("window is inside retention");
    assert_eq!(fetched.step, step);
    let points: Vec<_> = fetched.points().collect();
    assert_eq!(points, vec![(t1, Some(0.25)), (t2, Some(0.75))]);
    Ok(())
}

#[tokio::test]
async fn test_fetch_rejects_inverted_range() -> Result<()> {
    let (_dir, backend) = whisper_backend().await?;
    create_series(&backend, "m").await?;

    let t = now();
    assert!(matches!(
        backend.fetch("m", t, t).await,
        Err(StorageError::InvalidRange { .. })
    ));
    assert!(matches!(
        backend.fetch("m", t, t - 60).await,
        Err(StorageError::InvalidRange { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_set_aggregation_method_is_visible_via_info() -> Result<()> {
    let (_dir, backend) = whisper_backend().await?;
    create_series(&backend, "agg.series").await?;

    let previous = backend
        .set_aggregation_method("agg.series", AggregationMethod::Max)
        .await?;
    assert_eq!(previous, AggregationMethod::Average);
    assert_eq!(
        backend.info("agg.series").await?.aggregation_method,
        AggregationMethod::Max
    );
    Ok(())
}

#[tokio::test]
async fn test_operations_on_missing_series_fail_with_not_found() -> Result<()> {
    let (_dir, backend) = whisper_backend().await?;
    let t = now();

    assert!(matches!(
        backend.info("no.such.series").await,
        Err(StorageError::NotFound { .. })
    ));
    assert!(matches!(
        backend
            .set_aggregation_method("no.such.series", AggregationMethod::Sum)
            .await,
        Err(StorageError::NotFound { .. })
    ));
    assert!(matches!(
        backend
            .update_many("no.such.series", &[Point::new(t, 1.0)])
            .await,
        Err(StorageError::NotFound { .. })
    ));
    assert!(matches!(
        backend.fetch("no.such.series", t - 120, t).await,
        Err(StorageError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_unsafe_metric_names_are_rejected() -> Result<()> {
    let (_dir, backend) = whisper_backend().await?;

    for bad in ["", "a..b", ".leading", "trailing.", "a/b.c", "a.b\\c"] {
        let err = backend
            .create(
                bad,
                &default_archives(),
                0.5,
                AggregationMethod::Average,
                CreateOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, StorageError::InvalidMetricName(_)),
            "{bad:?} should be rejected"
        );
        // and exists never fails, it just says no
        assert!(!backend.exists(bad).await);
    }
    Ok(())
}

#[tokio::test]
async fn test_round_robin_keeps_only_the_ring_capacity() -> Result<()> {
    let (_dir, backend) = whisper_backend().await?;
    // a single tier: 1 second per point, 10 points
    backend
        .create(
            "ring.series",
            &[Retention::new(1, 10)],
            0.5,
            AggregationMethod::Average,
            CreateOptions::default(),
        )
        .await?;

    // eleven sequential seconds: one more than the ring holds
    let t0 = now() - 10;
    let points: Vec<Point> = (0..11).map(|i| Point::new(t0 + i, i as f64)).collect();
    backend.update_many("ring.series", &points).await?;

    let fetched = backend
        .fetch("ring.series", t0.saturating_sub(2), t0 + 11)
        .await?
        .expect("window overlaps retention");
    assert_eq!(fetched.step, 1);
    // the earliest second has been overwritten by the eleventh
    assert!(fetched.points().all(|(interval, _)| interval > t0));
    let last = fetched
        .points()
        .find(|(interval, _)| *interval == t0 + 10)
        .and_then(|(_, value)| value);
    assert_eq!(last, Some(10.0));
    Ok(())
}

#[tokio::test]
async fn test_sparse_window_does_not_reach_coarser_tier() -> Result<()> {
    let (_dir, backend) = whisper_backend().await?;
    // coarse tier needs every fine slot before consolidating
    backend
        .create(
            "strict.series",
            &[Retention::new(60, 60), Retention::new(300, 100)],
            1.0,
            AggregationMethod::Average,
            CreateOptions::default(),
        )
        .await?;

    let t = (now() / 60) * 60 - 600;
    backend
        .update_many("strict.series", &[Point::new(t, 5.0)])
        .await?;

    // fetched far enough back to be served by the coarse tier
    let fetched = backend
        .fetch("strict.series", now() - 7200, now())
        .await?
        .expect("window overlaps retention");
    assert_eq!(fetched.step, 300);
    // one of sixty slots is nowhere near the factor: nothing consolidated,
    // and in particular nothing turned into a zero
    assert!(fetched.values.iter().all(|value| value.is_none()));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_writers_on_one_series_do_not_corrupt_it() -> Result<()> {
    let (_dir, backend) = whisper_backend().await?;
    backend
        .create(
            "contended.series",
            &[Retention::new(1, 600)],
            0.5,
            AggregationMethod::Last,
            CreateOptions::default(),
        )
        .await?;

    let t0 = now() - 400;
    let mut tasks = Vec::new();
    for writer in 0..8u32 {
        let backend = backend.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..20u32 {
                let t = t0 + writer * 20 + i;
                backend
                    .update_many("contended.series", &[Point::new(t, f64::from(t % 1000))])
                    .await?;
            }
            Ok::<(), StorageError>(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    // every written slot is intact, none torn or misplaced
    let fetched = backend
        .fetch("contended.series", t0 - 1, t0 + 160)
        .await?
        .expect("window is inside retention");
    for (interval, value) in fetched.points() {
        if (t0..t0 + 160).contains(&interval) {
            assert_eq!(value, Some(f64::from(interval % 1000)), "slot {interval}");
        }
    }
    Ok(())
}
