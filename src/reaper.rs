use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{days_left, Engine, EngineError};
use crate::model::Notice;
use crate::observability;
use crate::store::MemoryStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub expiring: usize,
}

/// One expiry pass: drop bookings whose return date has passed, announcing
/// each one removed, then warn about those ending within `days` days.
pub async fn sweep_once(engine: &Engine, days: i64) -> Result<SweepReport, EngineError> {
    let expired = engine.get_all_expired_records().await?;
    let expired = engine.release_expired(&expired).await?;

    let now = engine.now();
    let expiring = engine.get_all_expiring_records(days).await?;
    for booking in &expiring {
        engine.notify.send(Notice::Expiring {
            booking: booking.clone(),
            days_left: days_left(booking.return_date, now),
        });
    }

    metrics::counter!(observability::SWEPT_EXPIRED_TOTAL).increment(expired.len() as u64);
    metrics::counter!(observability::EXPIRING_NOTICES_TOTAL).increment(expiring.len() as u64);
    Ok(SweepReport { expired: expired.len(), expiring: expiring.len() })
}

/// Background task running `sweep_once` every `every`.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration, days: i64) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match sweep_once(&engine, days).await {
            Ok(report) => info!(
                "expiry sweep: {} expired removed, {} expiring announced",
                report.expired, report.expiring
            ),
            Err(e) => tracing::error!("expiry sweep failed: {e}"),
        }
        engine.notify.prune();
        engine.prune_locks();
    }
}

/// Background task compacting the WAL once it has grown by `threshold` appends.
pub async fn run_compactor(store: Arc<MemoryStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = store.appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AccessPolicy;
    use crate::engine::TakeOutcome;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::store::Repositories;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("stagebook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn day(d: u32) -> Ts {
        Utc.with_ymd_and_hms(2025, 9, d, 12, 0, 0).unwrap()
    }

    async fn engine_with_bookings(name: &str) -> (Engine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(day(1)));
        let store = Arc::new(MemoryStore::open(test_wal_path(name)).unwrap());
        let engine = Engine::new(
            Repositories::from_memory(store),
            clock.clone(),
            Arc::new(NotifyHub::new()),
            AccessPolicy::default(),
        );
        engine
            .create_resource(NewResource { name: "stage-1".into(), category: "stages".into(), ..Default::default() })
            .await
            .unwrap();
        engine
            .register_visitor(Registration { email: "a@example.com".into(), external_id: 1, ..Default::default() })
            .await
            .unwrap();
        for (since, until) in [(day(2), day(3)), (day(5), day(6)), (day(10), day(11))] {
            let outcome = engine.take("stage-1", 1, since, until).await.unwrap();
            assert!(matches!(outcome, TakeOutcome::Taken { .. }));
        }
        (engine, clock)
    }

    #[tokio::test]
    async fn sweep_removes_expired_and_announces_expiring() {
        let (engine, clock) = engine_with_bookings("sweep.wal").await;
        let mut rx = engine.notify.subscribe_all();
        clock.set(day(4));

        let report = sweep_once(&engine, 2).await.unwrap();
        assert_eq!(report, SweepReport { expired: 1, expiring: 1 });

        match rx.recv().await.unwrap() {
            Notice::Expired { booking } => assert_eq!(booking.return_date, day(3)),
            other => panic!("expected Expired, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            Notice::Expiring { booking, days_left } => {
                assert_eq!(booking.return_date, day(6));
                assert_eq!(days_left, 2);
            }
            other => panic!("expected Expiring, got {other:?}"),
        }
        assert!(engine.get_all_expired_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_sweep_is_quiet() {
        let (engine, clock) = engine_with_bookings("sweep_twice.wal").await;
        clock.set(day(4));
        sweep_once(&engine, 0).await.unwrap();
        clock.advance(ChronoDuration::minutes(5));
        assert_eq!(sweep_once(&engine, 0).await.unwrap(), SweepReport::default());
    }
}
