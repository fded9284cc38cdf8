use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a business's WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    run_compactor_every(engine, threshold, CHECK_INTERVAL).await;
}

async fn run_compactor_every(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// Compact when at least `threshold` appends landed since the last rewrite.
/// Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("business {}: compacted after {appends} appends", engine.business_id);
            true
        }
        Err(e) => {
            tracing::error!("business {}: WAL compaction failed: {e}", engine.business_id);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::Collaborators;
    use crate::config::EngineConfig;
    use crate::model::*;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotwise_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn service(name: &str) -> Service {
        Service {
            id: Ulid::new(),
            name: name.into(),
            duration: 30,
            price: 1000,
            final_price: 1000,
            active: true,
        }
    }

    async fn engine_with_upserts(name: &str, upserts: usize) -> Arc<Engine> {
        let path = test_wal_path(name);
        let engine = Arc::new(
            Engine::new(
                Ulid::new(),
                path,
                Collaborators::default(),
                Arc::new(EngineConfig::default()),
            )
            .unwrap(),
        );
        // the same service rewritten over and over collapses to one event
        let mut s = service("Cut");
        for i in 0..upserts {
            s.price = 1000 + i as Money;
            s.final_price = s.price;
            engine.upsert_service(s.clone()).await.unwrap();
        }
        engine
    }

    #[tokio::test]
    async fn below_threshold_is_left_alone() {
        let engine = engine_with_upserts("compactor_below.wal", 3).await;
        assert!(!compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 3);
    }

    #[tokio::test]
    async fn at_threshold_compacts() {
        let engine = engine_with_upserts("compactor_due.wal", 10).await;
        assert!(compact_if_due(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }

    #[tokio::test]
    async fn background_loop_compacts() {
        let engine = engine_with_upserts("compactor_loop.wal", 5).await;
        let task = tokio::spawn(run_compactor_every(engine.clone(), 5, Duration::from_millis(10)));
        for _ in 0..200 {
            if engine.wal_appends_since_compact().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        task.abort();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
