use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::broadcast;
use tokio_test::assert_ok;
use ulid::Ulid;

use stagebook::clock::ManualClock;
use stagebook::config::Settings;
use stagebook::engine::{Engine, TakeOutcome};
use stagebook::model::*;
use stagebook::notify::NotifyHub;
use stagebook::reaper;
use stagebook::store::{MemoryStore, Repositories};

// ── Test infrastructure ──────────────────────────────────────

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("stagebook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn settings_for(dir: &Path) -> Settings {
    let dir = dir.display().to_string();
    Settings::from_lookup(|key| match key {
        "STAGEBOOK_DATA_DIR" => Some(dir.clone()),
        "STAGEBOOK_ADMINS" => Some("lead@club.org".into()),
        _ => None,
    })
    .unwrap()
}

fn june(d: u32, h: u32) -> Ts {
    Utc.with_ymd_and_hms(2025, 6, d, h, 0, 0).unwrap()
}

struct Harness {
    engine: Arc<Engine>,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

fn open(settings: &Settings, clock: Arc<ManualClock>) -> Harness {
    let store = Arc::new(MemoryStore::open(settings.wal_path()).unwrap());
    let engine = Arc::new(Engine::new(
        Repositories::from_memory(store.clone()),
        clock.clone(),
        Arc::new(NotifyHub::new()),
        settings.policy.clone(),
    ));
    Harness { engine, store, clock }
}

async fn populate(engine: &Engine) {
    for name in ["main-hall", "studio-a", "studio-b"] {
        assert_ok!(
            engine
                .create_resource(NewResource { name: name.into(), category: "rooms".into(), ..Default::default() })
                .await
        );
    }
    for (email, ext) in [("ann@club.org", 1), ("ben@club.org", 2), ("lead@club.org", 3)] {
        assert_ok!(
            engine
                .register_visitor(Registration { email: email.into(), external_id: ext, ..Default::default() })
                .await
        );
    }
}

async fn next_notice(rx: &mut broadcast::Receiver<Notice>) -> Notice {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for notice")
        .expect("notice channel closed")
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn take_return_and_sweep_lifecycle() {
    let dir = data_dir();
    let settings = settings_for(&dir);
    let h = open(&settings, Arc::new(ManualClock::new(june(10, 9))));
    populate(&h.engine).await;
    let mut feed = h.engine.notify.subscribe("main-hall");

    let ann = h.engine.take("main-hall", 1, june(10, 8), june(11, 20)).await.unwrap();
    let ann = ann.booking().cloned().unwrap();
    assert_eq!(next_notice(&mut feed).await, Notice::Taken { booking: ann.clone() });

    let ben = h.engine.take("main-hall", 2, june(12, 10), june(12, 22)).await.unwrap();
    let ben = ben.booking().cloned().unwrap();
    next_notice(&mut feed).await;

    let clash = h.engine.take("main-hall", 2, june(11, 20), june(12, 9)).await.unwrap();
    assert_eq!(clash.conflicting(), Some(&ann));

    let infos = h.engine.get_stage_info_for_visitor("ben@club.org").await.unwrap();
    assert_eq!(infos[0].status, Status::Others);
    assert_eq!(infos[0].last_booked_day_in_row, Some(june(12, 22)));
    assert_eq!(infos[1].status, Status::NoOne);

    // Ben cannot return Ann's booking; the configured lead can.
    assert!(h.engine.return_booking(ann.id, 2).await.unwrap().is_none());
    let returned = h.engine.return_booking(ann.id, 3).await.unwrap().unwrap();
    assert_eq!(returned.closed.return_date, june(10, 9));
    assert_eq!(next_notice(&mut feed).await, Notice::Returned { closed: returned.closed });

    let infos = h.engine.get_stage_info_for_visitor("ben@club.org").await.unwrap();
    assert_eq!(infos[0].status, Status::WillBeTaken);
    assert_eq!(infos[0].first_booked_day_in_future, Some(june(12, 10)));

    // Two days later Ben's booking has ended and the sweep removes it.
    h.clock.set(june(13, 7));
    let report = reaper::sweep_once(&h.engine, settings.expiring_days).await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(next_notice(&mut feed).await, Notice::Expired { booking: ben });
    assert!(h.engine.get_all_expired_records().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_takes_across_resources() {
    let dir = data_dir();
    let settings = settings_for(&dir);
    let h = open(&settings, Arc::new(ManualClock::new(june(1, 0))));
    populate(&h.engine).await;

    let mut attempts = Vec::new();
    for resource in ["main-hall", "studio-a", "studio-b"] {
        for visitor in [1, 2, 3] {
            for _ in 0..4 {
                let engine = h.engine.clone();
                attempts.push(async move { engine.take(resource, visitor, june(5, 10), june(5, 12)).await });
            }
        }
    }
    let outcomes = futures::future::join_all(attempts.into_iter().map(tokio::spawn)).await;

    let mut taken = Vec::new();
    for outcome in outcomes {
        if let TakeOutcome::Taken { resource, .. } = outcome.unwrap().unwrap() {
            taken.push(resource.name);
        }
    }
    taken.sort();
    assert_eq!(taken, ["main-hall", "studio-a", "studio-b"]);
}

#[tokio::test]
async fn state_survives_compaction_and_restart() {
    let dir = data_dir();
    let settings = settings_for(&dir);
    let clock = Arc::new(ManualClock::new(june(1, 0)));
    let (kept, returned) = {
        let h = open(&settings, clock.clone());
        populate(&h.engine).await;
        let kept = h.engine.take("studio-a", 1, june(3, 9), june(3, 17)).await.unwrap();
        let kept = kept.booking().cloned().unwrap();
        let gone = h.engine.take("studio-a", 2, june(4, 9), june(4, 17)).await.unwrap();
        let gone = gone.booking().cloned().unwrap();
        let returned = h.engine.return_booking(gone.id, 2).await.unwrap().unwrap();
        assert_ok!(h.store.compact().await);
        assert_eq!(h.store.appends_since_compact().await, 0);
        (kept, returned.closed)
    };

    let h = open(&settings, clock);
    assert_eq!(h.engine.list_resources().await.unwrap().len(), 3);
    assert_eq!(h.engine.future_bookings_for_resource("studio-a").await.unwrap(), vec![kept]);
    assert_eq!(h.engine.closed_bookings_for_visitor("ben@club.org").await.unwrap(), vec![returned]);
    assert!(!h.engine.needs_registration(3).await.unwrap());
    assert!(h.engine.get_visitor("lead@club.org").await.unwrap().unwrap().is_admin);
}
